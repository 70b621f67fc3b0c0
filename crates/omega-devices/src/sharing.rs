//! Ownership and sharing access control.
//!
//! Owners always pass every access check. Non-owners need an effective
//! grant: active, unexpired, and at the right permission level.
//! Authorization failure is a normal outcome, never an error.

use std::sync::Arc;

use omega_core::{Error, Result};
use omega_storage::{
    DeviceShare, Instance, InstanceStore, Permission, ShareStatus, ShareStore,
};

/// A user's reachable devices, annotated with read-time share
/// aggregates.
#[derive(Debug)]
pub struct AccessibleDevices {
    pub count: usize,
    pub instances: Vec<Instance>,
}

/// Sharing and access-control service.
pub struct ShareService {
    instances: Arc<InstanceStore>,
    shares: Arc<ShareStore>,
}

impl ShareService {
    pub fn new(instances: Arc<InstanceStore>, shares: Arc<ShareStore>) -> Self {
        Self { instances, shares }
    }

    /// Whether `user_uuid` may act on the device at `required` level.
    ///
    /// Owners pass unconditionally. Every lookup failure yields `false`.
    pub async fn check_access(
        &self,
        device_uuid: &str,
        user_uuid: &str,
        required: Permission,
    ) -> bool {
        let instance = match self.instances.get(device_uuid) {
            Ok(Some(instance)) => instance,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(device_uuid, "access check lookup failed: {}", e);
                return false;
            }
        };
        if instance.owner_uuid == user_uuid {
            return true;
        }

        let now = chrono::Utc::now().timestamp();
        match self.shares.effective_for(device_uuid, user_uuid, now) {
            Ok(Some(share)) => share.permission.grants(required),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(device_uuid, "access check share lookup failed: {}", e);
                false
            }
        }
    }

    /// Grant a recipient access to an owned device.
    ///
    /// Multiple live grants for the same (device, recipient) pair are
    /// permitted; each is revoked independently.
    pub async fn share_device(
        &self,
        device_uuid: &str,
        owner_uuid: &str,
        recipient_uuid: &str,
        permission: Permission,
        expires_at: Option<i64>,
    ) -> Result<DeviceShare> {
        let instance = self
            .instances
            .get(device_uuid)
            .map_err(omega_core::Error::from)?
            .ok_or_else(|| Error::NotFound(format!("device {}", device_uuid)))?;
        if instance.owner_uuid != owner_uuid {
            return Err(Error::Unauthorized(format!(
                "{} does not own device {}",
                owner_uuid, device_uuid
            )));
        }
        if recipient_uuid == owner_uuid {
            return Err(Error::InvalidInput(
                "cannot share a device with its owner".to_string(),
            ));
        }

        let now = chrono::Utc::now().timestamp();
        let share = DeviceShare {
            id: uuid::Uuid::new_v4().to_string(),
            device_uuid: device_uuid.to_string(),
            shared_by: owner_uuid.to_string(),
            shared_with: recipient_uuid.to_string(),
            permission,
            status: ShareStatus::Active,
            created_at: now,
            updated_at: now,
            expires_at,
        };
        self.shares.create(&share).map_err(omega_core::Error::from)?;
        tracing::info!(
            device_uuid,
            recipient = recipient_uuid,
            permission = %permission,
            "device shared"
        );
        Ok(share)
    }

    /// Revoke a grant. Only the granting user may revoke; the row is
    /// kept for audit.
    pub async fn revoke_share(&self, share_id: &str, user_uuid: &str) -> Result<DeviceShare> {
        let share = self
            .shares
            .get(share_id)
            .map_err(omega_core::Error::from)?
            .ok_or_else(|| Error::NotFound(format!("share {}", share_id)))?;
        if share.shared_by != user_uuid {
            return Err(Error::Unauthorized(format!(
                "{} did not grant share {}",
                user_uuid, share_id
            )));
        }

        let now = chrono::Utc::now().timestamp();
        let revoked = self
            .shares
            .revoke(share_id, now)
            .map_err(omega_core::Error::from)?;
        tracing::info!(share_id, device_uuid = %revoked.device_uuid, "share revoked");
        Ok(revoked)
    }

    /// Union of owned devices and devices reachable through an
    /// effective grant. Share aggregates are computed at query time.
    pub async fn get_accessible_devices(&self, user_uuid: &str) -> Result<AccessibleDevices> {
        let now = chrono::Utc::now().timestamp();

        let mut instances = self
            .instances
            .list_by_owner(user_uuid)
            .map_err(omega_core::Error::from)?;

        for share in self
            .shares
            .list_for_recipient(user_uuid)
            .map_err(omega_core::Error::from)?
        {
            if !share.is_effective(now) {
                continue;
            }
            if instances
                .iter()
                .any(|i| i.device_uuid == share.device_uuid)
            {
                continue;
            }
            if let Some(instance) = self
                .instances
                .get(&share.device_uuid)
                .map_err(omega_core::Error::from)?
            {
                instances.push(instance);
            }
        }

        for instance in &mut instances {
            let effective = self
                .shares
                .count_effective(&instance.device_uuid, now)
                .map_err(omega_core::Error::from)?;
            instance.shared_count = effective;
            instance.is_shared = effective > 0;
        }

        Ok(AccessibleDevices {
            count: instances.len(),
            instances,
        })
    }
}
