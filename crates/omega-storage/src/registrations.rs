//! Registration record storage.
//!
//! A registration record represents a device that exists physically but
//! has not been claimed by any user yet. Records are created by
//! anonymous registration and consumed exactly once by binding; the
//! consume step is the atomic [`RegistrationStore::claim`].

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// key = device_uuid, value = RegistrationRecord (JSON)
const REGISTRATIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("registrations");
// key = reg_code, value = device_uuid
const REG_CODE_INDEX: TableDefinition<&str, &str> = TableDefinition::new("registration_codes");

/// A not-yet-claimed device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// Device identifier assigned at registration; carried over to the
    /// instance at bind time.
    pub device_uuid: String,
    /// Short single-use claim code handed to the user.
    pub reg_code: String,
    /// Numeric device-type id in the type registry.
    pub device_type_id: i32,
    /// SHA-256 of the device verify code. The raw code is never stored.
    pub verify_hash: String,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds; the record is claimable only while `now < expires_at`.
    pub expires_at: i64,
    /// Flips false -> true exactly once.
    pub bound: bool,
}

impl RegistrationRecord {
    /// Whether the record can still be used for binding at `now`.
    pub fn is_claimable(&self, now: i64) -> bool {
        !self.bound && now < self.expires_at
    }
}

/// Persistent store for registration records.
pub struct RegistrationStore {
    db: Arc<Database>,
}

impl RegistrationStore {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create a throwaway store for tests.
    pub fn memory() -> Result<Self> {
        let path = std::env::temp_dir().join(format!("omega_regs_{}.redb", uuid::Uuid::new_v4()));
        Self::open(path)
    }

    fn ensure_tables(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.open_table(REGISTRATIONS_TABLE)?;
        txn.open_table(REG_CODE_INDEX)?;
        txn.commit()?;
        Ok(())
    }

    /// Persist a new record.
    ///
    /// Fails with `Duplicate` if either the device identifier or the
    /// registration code already exists.
    pub fn create(&self, record: &RegistrationRecord) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        let txn = self.db.begin_write()?;
        {
            let mut records = txn.open_table(REGISTRATIONS_TABLE)?;
            let mut codes = txn.open_table(REG_CODE_INDEX)?;

            if records.get(record.device_uuid.as_str())?.is_some() {
                return Err(Error::Duplicate(record.device_uuid.clone()));
            }
            if codes.get(record.reg_code.as_str())?.is_some() {
                return Err(Error::Duplicate(record.reg_code.clone()));
            }

            records.insert(record.device_uuid.as_str(), value.as_slice())?;
            codes.insert(record.reg_code.as_str(), record.device_uuid.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Look up a record by device identifier.
    pub fn get(&self, device_uuid: &str) -> Result<Option<RegistrationRecord>> {
        let txn = self.db.begin_read()?;
        let records = txn.open_table(REGISTRATIONS_TABLE)?;
        match records.get(device_uuid)? {
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
            None => Ok(None),
        }
    }

    /// Look up a record by registration code.
    pub fn get_by_code(&self, reg_code: &str) -> Result<Option<RegistrationRecord>> {
        let txn = self.db.begin_read()?;
        let codes = txn.open_table(REG_CODE_INDEX)?;
        let device_uuid = match codes.get(reg_code)? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };
        drop(codes);
        let records = txn.open_table(REGISTRATIONS_TABLE)?;
        match records.get(device_uuid.as_str())? {
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
            None => Ok(None),
        }
    }

    /// Atomically consume a registration code.
    ///
    /// Flips `bound` false -> true inside one write transaction; redb
    /// serializes writers, so at most one caller can ever claim a given
    /// code. Unknown, already-bound, and expired codes all fail with
    /// `ExpiredOrUsed` so the caller cannot distinguish them.
    pub fn claim(&self, reg_code: &str, now: i64) -> Result<RegistrationRecord> {
        let txn = self.db.begin_write()?;
        let record = {
            let mut records = txn.open_table(REGISTRATIONS_TABLE)?;
            let codes = txn.open_table(REG_CODE_INDEX)?;

            let device_uuid = match codes.get(reg_code)? {
                Some(guard) => guard.value().to_string(),
                None => return Err(Error::ExpiredOrUsed(reg_code.to_string())),
            };

            let mut record: RegistrationRecord = match records.get(device_uuid.as_str())? {
                Some(raw) => serde_json::from_slice(raw.value())?,
                None => return Err(Error::ExpiredOrUsed(reg_code.to_string())),
            };

            if !record.is_claimable(now) {
                return Err(Error::ExpiredOrUsed(reg_code.to_string()));
            }

            record.bound = true;
            let value = serde_json::to_vec(&record)?;
            records.insert(device_uuid.as_str(), value.as_slice())?;
            record
        };
        txn.commit()?;
        Ok(record)
    }

    /// Remove a record and its code index entry.
    pub fn delete(&self, device_uuid: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut records = txn.open_table(REGISTRATIONS_TABLE)?;
            let mut codes = txn.open_table(REG_CODE_INDEX)?;

            let removed = match records.remove(device_uuid)? {
                Some(raw) => {
                    let record: RegistrationRecord = serde_json::from_slice(raw.value())?;
                    codes.remove(record.reg_code.as_str())?;
                    true
                }
                None => false,
            };
            removed
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Garbage-collect expired unbound records. Returns how many were
    /// removed. Correctness never depends on this running: expiry is
    /// checked again at claim time.
    pub fn purge_expired(&self, now: i64) -> Result<usize> {
        let expired: Vec<String> = {
            let txn = self.db.begin_read()?;
            let records = txn.open_table(REGISTRATIONS_TABLE)?;
            let mut expired = Vec::new();
            for item in records.iter()? {
                let (_, raw) = item?;
                let record: RegistrationRecord = serde_json::from_slice(raw.value())?;
                if !record.bound && record.expires_at <= now {
                    expired.push(record.device_uuid);
                }
            }
            expired
        };

        for device_uuid in &expired {
            self.delete(device_uuid)?;
        }
        Ok(expired.len())
    }
}
