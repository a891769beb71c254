use crate::broker::request::{is_match, PropertyFilter};
use crate::broker::resource::{LockState, Resource, Transition};
use crate::broker::store::{DurableStore, Error};
use crate::broker::unlock_token::{TokenFilter, UnlockToken};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    resources: Vec<Resource>,
    tokens: Vec<UnlockToken>,
}

/// Process-local store. Each operation runs under a single write lock, which
/// makes every conditional update atomic.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryBackend {
    async fn insert_resource(&self, resource: Resource) -> Result<(), Error> {
        self.state.write().await.resources.push(resource);
        Ok(())
    }

    async fn read_resource(&self, id: &str) -> Result<Option<Resource>, Error> {
        let state = self.state.read().await;
        Ok(state.resources.iter().find(|r| r.id == id).cloned())
    }

    async fn list_resources(&self, resource_set: Option<String>) -> Result<Vec<Resource>, Error> {
        let state = self.state.read().await;
        Ok(state
            .resources
            .iter()
            .filter(|r| resource_set.as_ref().map_or(true, |set| &r.resource_set == set))
            .cloned()
            .collect())
    }

    async fn claim_resource(
        &self,
        resource_set: &str,
        filter: &PropertyFilter,
    ) -> Result<Option<Resource>, Error> {
        let mut state = self.state.write().await;
        let candidate = state
            .resources
            .iter_mut()
            .find(|r| r.lock_state == LockState::Free && is_match(r, resource_set, filter));

        Ok(candidate.map(|resource| {
            resource.lock_state = LockState::Reserved;
            resource.clone()
        }))
    }

    async fn transition(
        &self,
        id: &str,
        from: LockState,
        to: LockState,
    ) -> Result<Transition, Error> {
        let mut state = self.state.write().await;
        let Some(resource) = state.resources.iter_mut().find(|r| r.id == id) else {
            return Ok(Transition::Missing);
        };

        if resource.lock_state != from {
            return Ok(Transition::Conflict(resource.lock_state));
        }
        resource.lock_state = to;
        Ok(Transition::Applied)
    }

    async fn delete_resource(&self, id: &str, expected: LockState) -> Result<Transition, Error> {
        let mut state = self.state.write().await;
        let Some(position) = state.resources.iter().position(|r| r.id == id) else {
            return Ok(Transition::Missing);
        };

        let current = state.resources[position].lock_state;
        if current != expected {
            return Ok(Transition::Conflict(current));
        }
        state.resources.remove(position);
        Ok(Transition::Applied)
    }

    async fn insert_token(&self, token: UnlockToken) -> Result<(), Error> {
        self.state.write().await.tokens.push(token);
        Ok(())
    }

    async fn take_token(&self, id: &str) -> Result<Option<UnlockToken>, Error> {
        let mut state = self.state.write().await;
        let position = state.tokens.iter().position(|t| t.id == id);
        Ok(position.map(|position| state.tokens.remove(position)))
    }

    async fn list_tokens(&self, filter: TokenFilter) -> Result<Vec<UnlockToken>, Error> {
        let state = self.state.read().await;
        Ok(state
            .tokens
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }
}
