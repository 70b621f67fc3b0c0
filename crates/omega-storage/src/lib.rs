//! Persistence layer for the Omega IoT platform.
//!
//! Four redb-backed stores, one file each:
//! - [`RegistrationStore`]: single-use registration records with an
//!   atomic claim operation.
//! - [`InstanceStore`]: latest-known state of provisioned devices.
//! - [`ShareStore`]: ownership grants between users.
//! - [`TimeSeriesStore`]: typed historical samples keyed by measurement
//!   path and millisecond timestamp.
//!
//! Values are stored as JSON; keys are plain strings (or string/i64
//! tuples for time series). Every store offers `open(path)` for disk
//! persistence and `memory()` for tests.

pub mod error;
pub mod instances;
pub mod registrations;
pub mod shares;
pub mod timeseries;

pub use error::{Error, Result};
pub use instances::{Instance, InstanceStore, PropertyItem, PropertyMeta};
pub use registrations::{RegistrationRecord, RegistrationStore};
pub use shares::{DeviceShare, Permission, ShareStatus, ShareStore};
pub use timeseries::{FieldValue, Sample, TimeSeriesStore};
