use crate::broker::resource::{LockState, Transition};
use crate::broker::unlock_token::{TokenFilter, UnlockToken};
use crate::broker::{Broker, Error};
use crate::metrics_provider::METRICS_PROVIDER;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone, Copy, Debug)]
enum ReleaseCause {
    Unlock,
    UnlockSet,
    Expired,
    UnlockAll,
}

impl ReleaseCause {
    fn as_str(self) -> &'static str {
        match self {
            ReleaseCause::Unlock => "unlock",
            ReleaseCause::UnlockSet => "unlock_set",
            ReleaseCause::Expired => "expired",
            ReleaseCause::UnlockAll => "unlock_all",
        }
    }
}

impl Broker {
    /// Deletes the token and frees every resource it holds.
    ///
    /// # Errors
    ///
    /// * `Error::UnlockTokenDoesNotExist` if no live token has this id
    /// * `Error::Internal` if the store failed
    #[instrument(skip(self))]
    pub async fn release_by_token(&self, token_id: &str) -> Result<UnlockToken, Error> {
        self.release_token(token_id, ReleaseCause::Unlock).await
    }

    /// Releases every live token tagged with `label` and returns how many were
    /// released. Tokens released concurrently by someone else are not counted.
    /// A failing token does not stop the others; the first failure is returned.
    #[instrument(skip(self))]
    pub async fn release_by_set(&self, label: &str) -> Result<usize, Error> {
        let tokens = self
            .store
            .list_tokens(TokenFilter::UnlockSet(label.to_string()))
            .await?;

        let mut count = 0;
        let mut failure = None;
        for token in tokens {
            match self.release_token(&token.id, ReleaseCause::UnlockSet).await {
                Ok(_) => count += 1,
                Err(Error::UnlockTokenDoesNotExist) => {
                    debug!("Token {} already released", token.id);
                }
                Err(error) => {
                    error!("Failed to release token {}: {error}", token.id);
                    failure.get_or_insert(error);
                }
            }
        }

        info!("Released {count} token(s) from unlock set '{label}'");
        match failure {
            Some(error) => Err(error),
            None => Ok(count),
        }
    }

    /// Releases every token whose expiry is at or before `now`. Failures are
    /// logged per token and do not stop the batch.
    #[instrument(skip(self))]
    pub async fn release_expired(&self, now: DateTime<Utc>) -> Result<usize, Error> {
        let tokens = self.store.list_tokens(TokenFilter::ExpiredAt(now)).await?;

        let mut count = 0;
        for token in tokens {
            match self.release_token(&token.id, ReleaseCause::Expired).await {
                Ok(_) => count += 1,
                Err(Error::UnlockTokenDoesNotExist) => {
                    debug!("Expired token {} already released", token.id);
                }
                Err(error) => error!("Failed to release expired token {}: {error}", token.id),
            }
        }
        Ok(count)
    }

    /// Releases every live token, then frees any `Reserved` or `Locked`
    /// resource left without one. `Disabled` resources are left alone.
    #[instrument(skip(self))]
    pub async fn release_all(&self) -> Result<usize, Error> {
        let _guard = self.serialization_guard.lock().await;

        let tokens = self.store.list_tokens(TokenFilter::All).await?;
        let mut count = 0;
        for token in tokens {
            match self.release_token(&token.id, ReleaseCause::UnlockAll).await {
                Ok(_) => count += 1,
                Err(Error::UnlockTokenDoesNotExist) => {}
                Err(error) => return Err(error),
            }
        }

        let mut strays = 0;
        for resource in self.store.list_resources(None).await? {
            if !matches!(resource.lock_state, LockState::Reserved | LockState::Locked) {
                continue;
            }
            let outcome = self
                .store
                .transition(&resource.id, resource.lock_state, LockState::Free)
                .await?;
            if outcome == Transition::Applied {
                strays += 1;
            }
        }

        info!("Released {count} token(s) and {strays} stray resource(s)");
        Ok(count)
    }

    /// Reverts every `Reserved` resource to `Free`. Safe only while no attempt
    /// is in flight, which the serialization guard ensures.
    #[instrument(skip(self))]
    pub async fn recover_reservations(&self) -> Result<usize, Error> {
        let _guard = self.serialization_guard.lock().await;

        let mut count = 0;
        for resource in self.store.list_resources(None).await? {
            if resource.lock_state != LockState::Reserved {
                continue;
            }
            let outcome = self
                .store
                .transition(&resource.id, LockState::Reserved, LockState::Free)
                .await?;
            if outcome == Transition::Applied {
                warn!("Recovered stale reservation of {}", resource.id);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn release_token(
        &self,
        token_id: &str,
        cause: ReleaseCause,
    ) -> Result<UnlockToken, Error> {
        let token = self
            .store
            .take_token(token_id)
            .await?
            .ok_or(Error::UnlockTokenDoesNotExist)?;

        let mut failure = None;
        let mut orphans = Vec::new();
        for resource in &token.resources {
            if let Err(error) = self.free_resource(&resource.id).await {
                orphans.push(resource.id.as_str());
                failure.get_or_insert(error);
            }
        }

        if let Some(error) = failure {
            warn!(
                "Token {} is deleted but resources [{}] stay locked ({error}), run unlock-all to free them",
                token.id,
                orphans.join(", ")
            );
            return Err(error);
        }

        METRICS_PROVIDER
            .metric_released_tokens
            .with_label_values(&[cause.as_str()])
            .inc();
        debug!("Released token {} ({})", token.id, cause.as_str());
        Ok(token)
    }

    /// The token is the only authority over its resources, so a resource found
    /// in an unexpected state is still brought back to `Free`.
    async fn free_resource(&self, id: &str) -> Result<(), Error> {
        match self
            .store
            .transition(id, LockState::Locked, LockState::Free)
            .await?
        {
            Transition::Applied | Transition::Conflict(LockState::Free) => Ok(()),
            Transition::Conflict(state) => {
                warn!("Resource {id} was {state} instead of locked, forcing it free");
                let outcome = self.store.transition(id, state, LockState::Free).await?;
                if outcome != Transition::Applied {
                    warn!("Resource {id} changed again while forcing it free: {outcome:?}");
                }
                Ok(())
            }
            Transition::Missing => {
                warn!("Resource {id} no longer exists");
                Ok(())
            }
        }
    }
}
