//! End-to-end provisioning flow: anonymous registration through bind.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use omega_core::{credentials, Error};
use omega_devices::{CommandSink, ProvisioningService, TypeRegistry, ENABLE_UPLOAD};
use omega_storage::{InstanceStore, RegistrationStore};

/// Captures published commands instead of touching a broker.
#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<(String, String)>>,
    fail: bool,
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn publish_command(
        &self,
        device_id: &str,
        command: &str,
        _params: serde_json::Value,
    ) -> omega_core::Result<()> {
        if self.fail {
            return Err(Error::Transient("broker unreachable".to_string()));
        }
        self.published
            .lock()
            .await
            .push((device_id.to_string(), command.to_string()));
        Ok(())
    }
}

async fn registry() -> Arc<TypeRegistry> {
    let registry = TypeRegistry::new();
    registry
        .load_from_value(json!({
            "device_types": [{
                "id": 1,
                "name": "door_sensor",
                "description": "Magnetic door sensor",
                "properties": {
                    "battery_level": { "format": "integer", "unit": "%" },
                    "door_open": { "format": "boolean" }
                }
            }]
        }))
        .await
        .unwrap();
    Arc::new(registry)
}

fn service(
    registry: Arc<TypeRegistry>,
    sink: Arc<RecordingSink>,
) -> (ProvisioningService, Arc<RegistrationStore>, Arc<InstanceStore>) {
    let registrations = Arc::new(RegistrationStore::memory().unwrap());
    let instances = Arc::new(InstanceStore::memory().unwrap());
    let service = ProvisioningService::new(
        registry,
        registrations.clone(),
        instances.clone(),
        sink,
    );
    (service, registrations, instances)
}

#[tokio::test]
async fn test_register_then_bind() {
    let sink = Arc::new(RecordingSink::default());
    let (service, registrations, instances) = service(registry().await, sink.clone());

    let outcome = service.register_anonymously(1, None).await.unwrap();
    let record = &outcome.record;
    assert!(!record.bound);
    assert_eq!(record.expires_at, record.created_at + 24 * 60 * 60);
    assert_eq!(
        record.verify_hash,
        credentials::hash_verify_code(&outcome.verify_code)
    );
    // The raw code never lands in storage.
    let stored = registrations.get(&record.device_uuid).unwrap().unwrap();
    assert_eq!(stored.verify_hash, record.verify_hash);
    assert_ne!(stored.verify_hash, outcome.verify_code);

    let instance = service
        .bind_by_reg_code("alice", &record.reg_code, "Front Door", "hallway")
        .await
        .unwrap();
    assert_eq!(instance.device_uuid, record.device_uuid);
    assert_eq!(instance.name, "Front Door");
    assert_eq!(instance.remark, "hallway");
    assert_eq!(instance.owner_uuid, "alice");
    assert_eq!(instance.device_type, "door_sensor");
    assert_eq!(instance.verify_hash, record.verify_hash);
    // Property set comes from the schema, values start empty.
    assert_eq!(instance.properties.len(), 2);
    assert_eq!(instance.properties["battery_level"].value, "");
    assert_eq!(instance.properties["battery_level"].meta.format, "integer");

    assert!(instances.get(&record.device_uuid).unwrap().is_some());
    assert_eq!(
        *sink.published.lock().await,
        vec![(record.device_uuid.clone(), ENABLE_UPLOAD.to_string())]
    );
}

#[tokio::test]
async fn test_bind_same_code_twice_fails() {
    let sink = Arc::new(RecordingSink::default());
    let (service, _, _) = service(registry().await, sink);

    let outcome = service.register_anonymously(1, None).await.unwrap();
    service
        .bind_by_reg_code("alice", &outcome.record.reg_code, "First", "")
        .await
        .unwrap();

    let second = service
        .bind_by_reg_code("bob", &outcome.record.reg_code, "Second", "")
        .await;
    assert!(matches!(second, Err(Error::ExpiredOrUsed(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_binds_claim_code_once() {
    let sink = Arc::new(RecordingSink::default());
    let (service, _, instances) = service(registry().await, sink);
    let service = Arc::new(service);

    let outcome = service.register_anonymously(1, None).await.unwrap();
    let reg_code = outcome.record.reg_code.clone();

    let mut handles = Vec::new();
    for i in 0..16 {
        let service = service.clone();
        let reg_code = reg_code.clone();
        handles.push(tokio::spawn(async move {
            service
                .bind_by_reg_code(&format!("user-{}", i), &reg_code, "Front Door", "")
                .await
        }));
    }

    let mut bound = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => bound += 1,
            Err(Error::ExpiredOrUsed(_)) => rejected += 1,
            Err(e) => panic!("unexpected bind error: {}", e),
        }
    }
    assert_eq!(bound, 1);
    assert_eq!(rejected, 15);
    assert_eq!(instances.list_all().unwrap().len(), 1);
}

#[tokio::test]
async fn test_register_unknown_type_rejected() {
    let sink = Arc::new(RecordingSink::default());
    let (service, _, _) = service(registry().await, sink);

    let result = service.register_anonymously(99, None).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_bind_unknown_code_indistinguishable_from_expired() {
    let sink = Arc::new(RecordingSink::default());
    let (service, _, _) = service(registry().await, sink);

    let result = service.bind_by_reg_code("alice", "NOPE1234", "X", "").await;
    assert!(matches!(result, Err(Error::ExpiredOrUsed(_))));
}

#[tokio::test]
async fn test_orphaned_record_is_inconsistent_and_removed() {
    let sink = Arc::new(RecordingSink::default());
    let registry = registry().await;
    let (service, registrations, _) = service(registry.clone(), sink);

    let outcome = service.register_anonymously(1, None).await.unwrap();
    // The type leaves the catalog between registration and bind.
    registry
        .load_from_value(json!({ "device_types": [] }))
        .await
        .unwrap();

    let result = service
        .bind_by_reg_code("alice", &outcome.record.reg_code, "X", "")
        .await;
    assert!(matches!(result, Err(Error::Inconsistent(_))));
    assert!(registrations
        .get(&outcome.record.device_uuid)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_command_failure_does_not_fail_bind() {
    let sink = Arc::new(RecordingSink {
        fail: true,
        ..Default::default()
    });
    let (service, _, instances) = service(registry().await, sink);

    let outcome = service.register_anonymously(1, None).await.unwrap();
    let instance = service
        .bind_by_reg_code("alice", &outcome.record.reg_code, "Front Door", "")
        .await
        .unwrap();
    assert!(instances.get(&instance.device_uuid).unwrap().is_some());
}

#[tokio::test]
async fn test_empty_nickname_gets_default_name() {
    let sink = Arc::new(RecordingSink::default());
    let (service, _, _) = service(registry().await, sink);

    let outcome = service.register_anonymously(1, None).await.unwrap();
    let instance = service
        .bind_by_reg_code("alice", &outcome.record.reg_code, "  ", "")
        .await
        .unwrap();
    assert_eq!(instance.name, "Unnamed Device");
}

#[tokio::test]
async fn test_caller_supplied_verify_code() {
    let sink = Arc::new(RecordingSink::default());
    let (service, _, _) = service(registry().await, sink);

    let outcome = service
        .register_anonymously(1, Some("device-secret"))
        .await
        .unwrap();
    assert_eq!(outcome.verify_code, "device-secret");
    assert_eq!(
        outcome.record.verify_hash,
        credentials::hash_verify_code("device-secret")
    );

    let empty = service.register_anonymously(1, Some("")).await;
    assert!(matches!(empty, Err(Error::InvalidInput(_))));
}
