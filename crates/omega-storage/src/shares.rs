//! Device share storage.
//!
//! A share is a time-bounded, permission-scoped grant letting a
//! non-owner access a device. Revocation is a status flip, never a row
//! removal, so the grant history stays auditable.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// key = share id, value = DeviceShare (JSON)
const SHARES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("shares");

/// Permission level carried by a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    ReadWrite,
}

impl Permission {
    /// Whether a grant at this level satisfies `required`.
    pub fn grants(&self, required: Permission) -> bool {
        *self == Permission::ReadWrite || *self == required
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::ReadWrite => write!(f, "read_write"),
        }
    }
}

/// Grant status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareStatus {
    Active,
    Revoked,
}

/// A grant from an owner to a recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceShare {
    /// Grant identifier.
    pub id: String,
    /// Subject device.
    pub device_uuid: String,
    /// Granting user.
    pub shared_by: String,
    /// Recipient user.
    pub shared_with: String,
    pub permission: Permission,
    pub status: ShareStatus,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds.
    pub updated_at: i64,
    /// Unix seconds; `None` never expires.
    pub expires_at: Option<i64>,
}

impl DeviceShare {
    /// A share is effective iff active and not expired.
    /// `expires_at == now` already denies.
    pub fn is_effective(&self, now: i64) -> bool {
        self.status == ShareStatus::Active && self.expires_at.map_or(true, |at| at > now)
    }
}

/// Persistent store for device shares.
pub struct ShareStore {
    db: Arc<Database>,
}

impl ShareStore {
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
        let path = std::env::temp_dir().join(format!("omega_shares_{}.redb", uuid::Uuid::new_v4()));
        Self::open(path)
    }

    fn ensure_tables(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.open_table(SHARES_TABLE)?;
        txn.commit()?;
        Ok(())
    }

    /// Persist a new grant. Multiple grants for the same
    /// (device, recipient) pair are permitted.
    pub fn create(&self, share: &DeviceShare) -> Result<()> {
        let value = serde_json::to_vec(share)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SHARES_TABLE)?;
            if table.get(share.id.as_str())?.is_some() {
                return Err(Error::Duplicate(share.id.clone()));
            }
            table.insert(share.id.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Look up a grant by id.
    pub fn get(&self, id: &str) -> Result<Option<DeviceShare>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SHARES_TABLE)?;
        match table.get(id)? {
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
            None => Ok(None),
        }
    }

    /// Flip a grant to revoked. Idempotent on already-revoked grants.
    pub fn revoke(&self, id: &str, now: i64) -> Result<DeviceShare> {
        let txn = self.db.begin_write()?;
        let share = {
            let mut table = txn.open_table(SHARES_TABLE)?;
            let mut share: DeviceShare = match table.get(id)? {
                Some(raw) => serde_json::from_slice(raw.value())?,
                None => return Err(Error::NotFound(id.to_string())),
            };
            share.status = ShareStatus::Revoked;
            share.updated_at = now;
            let value = serde_json::to_vec(&share)?;
            table.insert(id, value.as_slice())?;
            share
        };
        txn.commit()?;
        Ok(share)
    }

    fn scan<F: FnMut(&DeviceShare) -> bool>(&self, mut keep: F) -> Result<Vec<DeviceShare>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SHARES_TABLE)?;
        let mut result = Vec::new();
        for item in table.iter()? {
            let (_, raw) = item?;
            let share: DeviceShare = serde_json::from_slice(raw.value())?;
            if keep(&share) {
                result.push(share);
            }
        }
        Ok(result)
    }

    /// All grants on a device, effective or not.
    pub fn list_for_device(&self, device_uuid: &str) -> Result<Vec<DeviceShare>> {
        self.scan(|share| share.device_uuid == device_uuid)
    }

    /// All grants where the user is the recipient, effective or not.
    pub fn list_for_recipient(&self, user_uuid: &str) -> Result<Vec<DeviceShare>> {
        self.scan(|share| share.shared_with == user_uuid)
    }

    /// The first effective grant of a device to a recipient, if any.
    pub fn effective_for(
        &self,
        device_uuid: &str,
        user_uuid: &str,
        now: i64,
    ) -> Result<Option<DeviceShare>> {
        Ok(self
            .scan(|share| {
                share.device_uuid == device_uuid
                    && share.shared_with == user_uuid
                    && share.is_effective(now)
            })?
            .into_iter()
            .next())
    }

    /// Number of currently-effective grants on a device.
    pub fn count_effective(&self, device_uuid: &str, now: i64) -> Result<usize> {
        Ok(self
            .scan(|share| share.device_uuid == device_uuid && share.is_effective(now))?
            .len())
    }
}
