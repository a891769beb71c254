use crate::broker::request::PropertyFilter;
use crate::broker::resource::{LockState, Resource, Transition};
use crate::broker::unlock_token::{TokenFilter, UnlockToken};
use crate::configuration::StoreConfig;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

mod error;
mod memory_backend;
mod redis_backend;

pub use error::Error;
pub use memory_backend::MemoryBackend;
pub use redis_backend::RedisBackend;

/// Durable storage for the `resources` and `unlock_tokens` collections.
///
/// Every state change is conditional on the state currently stored for that
/// record; implementations must perform the check and the write atomically.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn insert_resource(&self, resource: Resource) -> Result<(), Error>;

    async fn read_resource(&self, id: &str) -> Result<Option<Resource>, Error>;

    /// Resources in store order, optionally restricted to one set.
    async fn list_resources(&self, resource_set: Option<String>) -> Result<Vec<Resource>, Error>;

    /// Moves the first `Free` resource matching the set and filter to
    /// `Reserved` and returns it, or `None` when nothing matches.
    async fn claim_resource(
        &self,
        resource_set: &str,
        filter: &PropertyFilter,
    ) -> Result<Option<Resource>, Error>;

    async fn transition(
        &self,
        id: &str,
        from: LockState,
        to: LockState,
    ) -> Result<Transition, Error>;

    /// Deletes the resource only if its state is `expected`.
    async fn delete_resource(&self, id: &str, expected: LockState) -> Result<Transition, Error>;

    async fn insert_token(&self, token: UnlockToken) -> Result<(), Error>;

    /// Reads and deletes a token in one step; only one caller can take it.
    async fn take_token(&self, id: &str) -> Result<Option<UnlockToken>, Error>;

    async fn list_tokens(&self, filter: TokenFilter) -> Result<Vec<UnlockToken>, Error>;
}

/// Builds the store selected by the configuration: Redis when a `redis`
/// section is present, in-memory otherwise.
pub fn build(config: &StoreConfig) -> Result<Arc<dyn DurableStore>, Error> {
    match &config.redis {
        Some(redis_config) => {
            info!("Using Redis durable store");
            Ok(Arc::new(RedisBackend::new(
                &redis_config.url,
                redis_config.key_prefix.clone(),
            )?))
        }
        None => {
            info!("Using in-memory durable store");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}
