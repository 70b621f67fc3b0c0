//! Device instance storage.
//!
//! An instance is a provisioned, bound device together with its
//! latest-known property state. The set of property keys is fixed when
//! the instance is created from its type schema; telemetry may only
//! overwrite values.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// key = device_uuid, value = Instance (JSON)
const INSTANCES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Per-property schema carried on every instance property.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyMeta {
    /// Whether the device accepts writes to this property.
    pub writable: bool,
    /// Human description.
    pub description: String,
    /// Physical unit.
    pub unit: String,
    /// Optional numeric range.
    pub range: Option<Vec<i64>>,
    /// Wire-format tag. Kept as the raw string so unrecognized tags
    /// survive round-trips; coercion degrades them to text.
    pub format: String,
    /// Optional enumerated allowed values.
    #[serde(rename = "enum")]
    pub enum_values: Option<Vec<String>>,
}

/// Per-property runtime state on an instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyItem {
    /// Current value in its canonical wire-format string form. Empty
    /// until the device first reports it.
    #[serde(default)]
    pub value: String,
    /// Copy of the schema metadata taken at instance creation.
    #[serde(default)]
    pub meta: PropertyMeta,
}

/// A provisioned device and its current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Immutable device identifier, shared with the originating
    /// registration record.
    pub device_uuid: String,
    /// User-chosen display name.
    pub name: String,
    /// Device type name.
    pub device_type: String,
    /// Owning user identity.
    pub owner_uuid: String,
    /// Type description copied at creation.
    #[serde(default)]
    pub description: String,
    /// Free-text remark from the owner.
    #[serde(default)]
    pub remark: String,
    /// Online flag, driven by telemetry.
    #[serde(default)]
    pub online: bool,
    /// Unix seconds of the last telemetry message.
    pub last_seen: i64,
    /// Unix seconds of creation.
    pub created_at: i64,
    /// SHA-256 of the verify code, immutable once created.
    pub verify_hash: String,
    /// Property map; keys fixed at creation.
    pub properties: HashMap<String, PropertyItem>,
    /// Read-time aggregate, not authoritative in storage.
    #[serde(default)]
    pub is_shared: bool,
    /// Read-time aggregate, not authoritative in storage.
    #[serde(default)]
    pub shared_count: usize,
}

/// Persistent store for device instances.
pub struct InstanceStore {
    db: Arc<Database>,
}

impl InstanceStore {
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
        let path =
            std::env::temp_dir().join(format!("omega_instances_{}.redb", uuid::Uuid::new_v4()));
        Self::open(path)
    }

    fn ensure_tables(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.open_table(INSTANCES_TABLE)?;
        txn.commit()?;
        Ok(())
    }

    /// Persist a new instance. Fails with `Duplicate` if the device
    /// identifier already exists.
    pub fn insert(&self, instance: &Instance) -> Result<()> {
        let value = serde_json::to_vec(instance)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(INSTANCES_TABLE)?;
            if table.get(instance.device_uuid.as_str())?.is_some() {
                return Err(Error::Duplicate(instance.device_uuid.clone()));
            }
            table.insert(instance.device_uuid.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Overwrite an instance's state as one atomic write.
    pub fn save(&self, instance: &Instance) -> Result<()> {
        let value = serde_json::to_vec(instance)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(INSTANCES_TABLE)?;
            table.insert(instance.device_uuid.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Look up an instance by device identifier.
    pub fn get(&self, device_uuid: &str) -> Result<Option<Instance>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(INSTANCES_TABLE)?;
        match table.get(device_uuid)? {
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
            None => Ok(None),
        }
    }

    /// Look up an instance by identifier *and* verify hash.
    ///
    /// This is the telemetry authentication step: both must match, and a
    /// miss is indistinguishable from an unknown device.
    pub fn get_authenticated(
        &self,
        device_uuid: &str,
        verify_hash: &str,
    ) -> Result<Option<Instance>> {
        Ok(self
            .get(device_uuid)?
            .filter(|instance| instance.verify_hash == verify_hash))
    }

    /// All instances.
    pub fn list_all(&self) -> Result<Vec<Instance>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(INSTANCES_TABLE)?;
        let mut result = Vec::new();
        for item in table.iter()? {
            let (_, raw) = item?;
            result.push(serde_json::from_slice(raw.value())?);
        }
        Ok(result)
    }

    /// Instances owned by a given user.
    pub fn list_by_owner(&self, owner_uuid: &str) -> Result<Vec<Instance>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|instance| instance.owner_uuid == owner_uuid)
            .collect())
    }

    /// Remove an instance. Administrative action; the telemetry core
    /// never calls this.
    pub fn delete(&self, device_uuid: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(INSTANCES_TABLE)?;
            let removed = table.remove(device_uuid)?.is_some();
            removed
        };
        txn.commit()?;
        Ok(removed)
    }
}
