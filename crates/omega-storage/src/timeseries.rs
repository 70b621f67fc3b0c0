//! Typed time-series storage using redb.
//!
//! One sample is a set of typed fields recorded for a measurement path
//! at a single millisecond timestamp. All fields of a sample are written
//! in one transaction; a sample is either fully recorded or absent.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::Result;

// key = (path, field, timestamp millis), value = FieldValue (JSON)
const SAMPLES_TABLE: TableDefinition<(&str, &str, i64), &[u8]> = TableDefinition::new("samples");

/// A typed field value inside a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Boolean(bool),
}

/// One timestamped, multi-field sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Hierarchical measurement path.
    pub path: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    /// Field name/value pairs.
    pub fields: Vec<(String, FieldValue)>,
}

impl Sample {
    pub fn new(path: impl Into<String>, timestamp: i64) -> Self {
        Self {
            path: path.into(),
            timestamp,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((name.into(), value));
        self
    }
}

/// Append-oriented typed time-series store.
pub struct TimeSeriesStore {
    db: Arc<Database>,
}

impl TimeSeriesStore {
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
        let path = std::env::temp_dir().join(format!("omega_ts_{}.redb", uuid::Uuid::new_v4()));
        Self::open(path)
    }

    fn ensure_tables(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.open_table(SAMPLES_TABLE)?;
        txn.commit()?;
        Ok(())
    }

    /// Append one sample; all fields commit together.
    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SAMPLES_TABLE)?;
            for (field, value) in &sample.fields {
                let raw = serde_json::to_vec(value)?;
                table.insert(
                    (sample.path.as_str(), field.as_str(), sample.timestamp),
                    raw.as_slice(),
                )?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Timestamped values of one field over `[start, end)`.
    pub async fn query_range(
        &self,
        path: &str,
        field: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<(i64, FieldValue)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SAMPLES_TABLE)?;
        let mut result = Vec::new();
        for item in table.range((path, field, start)..(path, field, end))? {
            let (key, raw) = item?;
            let (_, _, timestamp) = key.value();
            result.push((timestamp, serde_json::from_slice(raw.value())?));
        }
        Ok(result)
    }

    /// Most recent value of one field, if any.
    pub async fn latest(&self, path: &str, field: &str) -> Result<Option<(i64, FieldValue)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SAMPLES_TABLE)?;
        let mut range = table.range((path, field, i64::MIN)..(path, field, i64::MAX))?;
        match range.next_back() {
            Some(item) => {
                let (key, raw) = item?;
                let (_, _, timestamp) = key.value();
                Ok(Some((timestamp, serde_json::from_slice(raw.value())?)))
            }
            None => Ok(None),
        }
    }
}
