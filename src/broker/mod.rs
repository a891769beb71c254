use crate::broker::store::DurableStore;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::Mutex;

mod acquire;
mod admin;
mod error;
mod release;
pub mod request;
pub mod resource;
pub mod server;
pub mod store;
mod sweeper;
#[cfg(test)]
pub mod tests;
pub mod unlock_token;
mod version;

pub use error::Error;
pub use request::{AcquisitionOptions, ResourceRequest};
pub use resource::Properties;
pub use sweeper::Sweeper;

/// Entry point for every lock operation.
///
/// Cloning is cheap: clones share the durable store and the serialization
/// guard, so every clone sees the same acquisition ordering.
#[derive(Clone)]
pub struct Broker {
    store: Arc<dyn DurableStore>,
    serialization_guard: Arc<Mutex<()>>,
}

impl Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker").finish()
    }
}

impl Broker {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            serialization_guard: Arc::new(Mutex::new(())),
        }
    }
}
