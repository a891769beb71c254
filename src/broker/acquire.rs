use crate::broker::request::{AcquisitionOptions, MissingResource, ResourceRequest};
use crate::broker::resource::{LockState, Transition};
use crate::broker::store::DurableStore;
use crate::broker::unlock_token::{LockedResource, UnlockToken};
use crate::broker::{Broker, Error};
use crate::metrics_provider::METRICS_PROVIDER;
use chrono::Utc;
use std::mem;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, instrument, warn};

impl Broker {
    /// Claims one resource per request, all or nothing.
    ///
    /// Attempts are serialized: only one runs at a time, and each one sees the
    /// effects of the previous one. Unsatisfiable requests are all reported
    /// through `Error::MissingResources`, in input order.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidOptions` if both expiry forms are given
    /// * `Error::InvalidInput` if no resource is requested
    /// * `Error::MissingResources` if at least one request has no free match
    /// * `Error::Internal` if the store failed; reservations are reverted first
    #[instrument(skip(self, requests, options), fields(requests = requests.len()))]
    pub async fn acquire(
        &self,
        requests: Vec<ResourceRequest>,
        options: AcquisitionOptions,
    ) -> Result<UnlockToken, Error> {
        options.validate()?;
        if requests.is_empty() {
            return Err(Error::InvalidInput(
                "at least one resource must be requested".to_string(),
            ));
        }
        if requests.iter().any(|r| r.resource_set.is_empty()) {
            return Err(Error::InvalidInput(
                "'resource_set' must not be empty".to_string(),
            ));
        }

        // Detached from the caller: a dropped request must not cancel an
        // attempt halfway through.
        let broker = self.clone();
        let outcome =
            tokio::spawn(async move { broker.run_attempt(&requests, &options).await }).await?;

        let result = match &outcome {
            Ok(token) => {
                info!(token = %token.id, "Acquired {} resource(s)", token.resources.len());
                "granted"
            }
            Err(Error::MissingResources(missing)) => {
                debug!("{} request(s) could not be satisfied", missing.len());
                "missing"
            }
            Err(error) => {
                warn!("Acquisition failed: {error}");
                "failed"
            }
        };
        METRICS_PROVIDER
            .metric_acquisitions
            .with_label_values(&[result])
            .inc();

        outcome
    }

    async fn run_attempt(
        &self,
        requests: &[ResourceRequest],
        options: &AcquisitionOptions,
    ) -> Result<UnlockToken, Error> {
        let guard = Arc::clone(&self.serialization_guard).lock_owned().await;
        let mut attempt = Attempt::new(Arc::clone(&self.store), guard);

        let outcome = attempt.execute(requests, options).await;
        attempt.finish().await;
        outcome
    }
}

/// Resources an attempt still has to hand back if it does not commit.
#[derive(Debug, Default)]
struct Pending {
    reserved: Vec<String>,
    promoted: Vec<String>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.reserved.is_empty() && self.promoted.is_empty()
    }
}

/// One claim attempt, holding the serialization guard until it is finished.
///
/// `finish` reverts whatever was not committed before releasing the guard. If
/// the attempt is dropped without `finish` (its task unwound), the same revert
/// runs on a spawned task which keeps the guard until it is done.
struct Attempt {
    store: Arc<dyn DurableStore>,
    guard: Option<OwnedMutexGuard<()>>,
    pending: Pending,
    committed: bool,
}

impl Attempt {
    fn new(store: Arc<dyn DurableStore>, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            store,
            guard: Some(guard),
            pending: Pending::default(),
            committed: false,
        }
    }

    async fn execute(
        &mut self,
        requests: &[ResourceRequest],
        options: &AcquisitionOptions,
    ) -> Result<UnlockToken, Error> {
        let mut claimed = Vec::with_capacity(requests.len());
        let mut missing = Vec::new();

        for (index, request) in requests.iter().enumerate() {
            let filter = request.filter();
            match self
                .store
                .claim_resource(&request.resource_set, &filter)
                .await?
            {
                Some(resource) => {
                    debug!("Reserved {} for request #{index}", resource.id);
                    self.pending.reserved.push(resource.id.clone());
                    claimed.push(LockedResource::from(&resource));
                }
                None => missing.push(MissingResource {
                    index,
                    request: request.clone(),
                }),
            }
        }

        if !missing.is_empty() {
            return Err(Error::MissingResources(missing));
        }

        for resource in &claimed {
            match self
                .store
                .transition(&resource.id, LockState::Reserved, LockState::Locked)
                .await?
            {
                Transition::Applied => self.promote(&resource.id),
                outcome => {
                    error!("Reservation of {} lost before commit: {outcome:?}", resource.id);
                    return Err(Error::Internal(Some(
                        "Reservation lost before commit".to_string(),
                    )));
                }
            }
        }

        let now = Utc::now();
        let token = UnlockToken::new(
            claimed,
            now,
            options.expire_at(now),
            options.unlock_set.clone(),
        );
        self.store.insert_token(token.clone()).await?;
        self.committed = true;

        Ok(token)
    }

    fn promote(&mut self, id: &str) {
        self.pending.reserved.retain(|reserved| reserved != id);
        self.pending.promoted.push(id.to_string());
    }

    fn take_pending(&mut self) -> Pending {
        let mut pending = mem::take(&mut self.pending);
        if self.committed {
            pending.promoted.clear();
        }
        pending
    }

    async fn finish(mut self) {
        let pending = self.take_pending();
        rollback(self.store.as_ref(), pending).await;
    }
}

impl Drop for Attempt {
    fn drop(&mut self) {
        let pending = self.take_pending();
        if pending.is_empty() {
            return;
        }

        let store = Arc::clone(&self.store);
        let guard = self.guard.take();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    rollback(store.as_ref(), pending).await;
                    drop(guard);
                });
            }
            Err(_) => error!(
                "No runtime to revert {:?}; they stay held until the next recovery",
                pending
            ),
        }
    }
}

async fn rollback(store: &dyn DurableStore, pending: Pending) {
    for id in &pending.reserved {
        revert(store, id, LockState::Reserved).await;
    }
    for id in &pending.promoted {
        revert(store, id, LockState::Locked).await;
    }
}

async fn revert(store: &dyn DurableStore, id: &str, from: LockState) {
    match store.transition(id, from, LockState::Free).await {
        Ok(Transition::Applied) => debug!("Reverted {id} from {from}"),
        Ok(outcome) => warn!("Could not revert {id} from {from}: {outcome:?}"),
        Err(error) => error!("Failed to revert {id} from {from}, left until recovery: {error}"),
    }
}
