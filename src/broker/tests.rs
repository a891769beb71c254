use crate::broker::resource::LockState;
use crate::broker::store::MemoryBackend;
use crate::broker::Broker;
use serde_json::Value;
use std::sync::Arc;

pub fn create_test_broker() -> Broker {
    Broker::new(Arc::new(MemoryBackend::new()))
}

/// Registers a resource and returns its id.
pub async fn register(broker: &Broker, resource_set: &str, properties: Value) -> String {
    let properties = serde_json::from_value(properties).expect("properties must be an object");
    broker
        .register(resource_set.to_string(), properties)
        .await
        .expect("Failed to register resource")
        .id
}

pub async fn state_of(broker: &Broker, id: &str) -> LockState {
    broker
        .list(None)
        .await
        .expect("Failed to list resources")
        .into_iter()
        .find(|r| r.id == id)
        .map(|r| r.lock_state)
        .expect("Resource not found")
}
