//! Two-phase device provisioning.
//!
//! `Unregistered -> AwaitingBind -> Bound`. Anonymous registration
//! creates a claimable record with a 24-hour expiry; binding consumes
//! the registration code exactly once and materializes the Instance
//! from the type schema.

use std::collections::HashMap;
use std::sync::Arc;

use omega_core::{credentials, Error, Result};
use omega_storage::{
    Instance, InstanceStore, PropertyItem, RegistrationRecord, RegistrationStore,
};

use crate::commands::{CommandSink, ENABLE_UPLOAD};
use crate::types::TypeRegistry;

/// Registration records stay claimable for 24 hours.
const REGISTRATION_TTL_SECS: i64 = 24 * 60 * 60;

/// Collisions in the code space are vanishingly rare; a handful of
/// regeneration attempts is plenty before surfacing the error.
const MAX_GENERATION_ATTEMPTS: u32 = 5;

/// Display name used when the binding user supplies none.
const DEFAULT_DEVICE_NAME: &str = "Unnamed Device";

/// Result of anonymous registration. The raw verify code is divulged
/// here exactly once and never persisted.
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub record: RegistrationRecord,
    pub verify_code: String,
}

/// Device provisioning protocol.
pub struct ProvisioningService {
    registry: Arc<TypeRegistry>,
    registrations: Arc<RegistrationStore>,
    instances: Arc<InstanceStore>,
    commands: Arc<dyn CommandSink>,
}

impl ProvisioningService {
    pub fn new(
        registry: Arc<TypeRegistry>,
        registrations: Arc<RegistrationStore>,
        instances: Arc<InstanceStore>,
        commands: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            registry,
            registrations,
            instances,
            commands,
        }
    }

    /// Register a physically-present but unclaimed device.
    ///
    /// When `raw_verify_code` is `None` a fresh code is generated. On an
    /// identifier collision the service regenerates and retries a
    /// bounded number of times before surfacing `DuplicateKey`.
    pub async fn register_anonymously(
        &self,
        device_type_id: i32,
        raw_verify_code: Option<&str>,
    ) -> Result<RegistrationOutcome> {
        if self.registry.get_by_id(device_type_id).await.is_none() {
            return Err(Error::InvalidInput(format!(
                "unknown device type id: {}",
                device_type_id
            )));
        }

        let verify_code = match raw_verify_code {
            Some(code) if !code.is_empty() => code.to_string(),
            Some(_) => return Err(Error::InvalidInput("empty verify code".to_string())),
            None => credentials::generate_verify_code(),
        };
        let verify_hash = credentials::hash_verify_code(&verify_code);
        let now = chrono::Utc::now().timestamp();

        let mut last_err = None;
        for attempt in 0..MAX_GENERATION_ATTEMPTS {
            let record = RegistrationRecord {
                device_uuid: credentials::generate_device_uuid(),
                reg_code: credentials::generate_reg_code(),
                device_type_id,
                verify_hash: verify_hash.clone(),
                created_at: now,
                expires_at: now + REGISTRATION_TTL_SECS,
                bound: false,
            };

            match self.registrations.create(&record) {
                Ok(()) => {
                    tracing::info!(
                        device_uuid = %record.device_uuid,
                        device_type_id,
                        "device registered anonymously"
                    );
                    return Ok(RegistrationOutcome {
                        record,
                        verify_code,
                    });
                }
                Err(e @ omega_storage::Error::Duplicate(_)) => {
                    tracing::warn!(attempt, "registration identifier collision, regenerating");
                    last_err = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_err
            .map(Into::into)
            .unwrap_or_else(|| Error::Transient("registration retries exhausted".to_string())))
    }

    /// Claim a registration code and create the bound Instance.
    ///
    /// The code is consumed atomically before the Instance exists, so
    /// concurrent binds of the same code cannot both succeed. Unknown,
    /// bound, and expired codes are indistinguishable to the caller.
    pub async fn bind_by_reg_code(
        &self,
        user_uuid: &str,
        reg_code: &str,
        nickname: &str,
        remark: &str,
    ) -> Result<Instance> {
        let now = chrono::Utc::now().timestamp();
        let record = self.registrations.claim(reg_code, now)?;

        let device_type = match self.registry.get_by_id(record.device_type_id).await {
            Some(t) => t,
            None => {
                // Orphan record: its type left the catalog after
                // registration. Remove it so the code cannot be retried.
                tracing::warn!(
                    device_uuid = %record.device_uuid,
                    device_type_id = record.device_type_id,
                    "registration references a type no longer in the catalog"
                );
                self.registrations.delete(&record.device_uuid)?;
                return Err(Error::Inconsistent(format!(
                    "device type {} no longer exists",
                    record.device_type_id
                )));
            }
        };

        let properties: HashMap<String, PropertyItem> = device_type
            .properties
            .iter()
            .map(|(name, meta)| {
                (
                    name.clone(),
                    PropertyItem {
                        value: String::new(),
                        meta: meta.clone(),
                    },
                )
            })
            .collect();

        let name = if nickname.trim().is_empty() {
            DEFAULT_DEVICE_NAME.to_string()
        } else {
            nickname.to_string()
        };
        let instance = Instance {
            device_uuid: record.device_uuid.clone(),
            name,
            device_type: device_type.name.clone(),
            owner_uuid: user_uuid.to_string(),
            description: device_type.description.clone(),
            remark: remark.to_string(),
            online: false,
            last_seen: 0,
            created_at: now,
            verify_hash: record.verify_hash.clone(),
            properties,
            is_shared: false,
            shared_count: 0,
        };

        self.instances.insert(&instance)?;
        tracing::info!(
            device_uuid = %instance.device_uuid,
            owner = %user_uuid,
            device_type = %instance.device_type,
            "device bound"
        );

        // Non-fatal: the bind is authoritative once the Instance is
        // durable; the device retries upload enablement out of band.
        if let Err(e) = self
            .commands
            .publish_command(
                &instance.device_uuid,
                ENABLE_UPLOAD,
                serde_json::json!({}),
            )
            .await
        {
            tracing::warn!(
                device_uuid = %instance.device_uuid,
                error = %e,
                "enable_upload dispatch failed after bind"
            );
        }

        Ok(instance)
    }
}
