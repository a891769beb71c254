use crate::broker::Broker;
use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

/// Background task releasing tokens past their expiry, once per interval.
#[derive(Debug)]
pub struct Sweeper {
    broker: Broker,
    interval: Duration,
}

impl Sweeper {
    pub fn new(broker: Broker, interval: Duration) -> Self {
        Self { broker, interval }
    }

    /// Runs a single pass and returns the number of released tokens.
    pub async fn sweep(&self) -> usize {
        match self.broker.release_expired(Utc::now()).await {
            Ok(0) => {
                debug!("No expired token");
                0
            }
            Ok(count) => {
                info!("Released {count} expired token(s)");
                count
            }
            Err(error) => {
                error!("Expiration sweep failed: {error}");
                0
            }
        }
    }

    pub async fn run(self) {
        info!("Sweeping expired tokens every {:?}", self.interval);
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.sweep().await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::request::{AcquisitionOptions, ResourceRequest};
    use crate::broker::resource::LockState;
    use crate::broker::tests::{create_test_broker, register, state_of};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    #[tokio::test]
    async fn test_sweep_releases_expired_tokens_only() {
        let broker = create_test_broker();
        let expired = register(&broker, "test", json!({})).await;
        let kept = register(&broker, "test", json!({})).await;

        broker
            .acquire(
                vec![ResourceRequest::new("test")],
                AcquisitionOptions {
                    expire_date: Some(Utc::now() - ChronoDuration::minutes(5)),
                    ..AcquisitionOptions::default()
                },
            )
            .await
            .unwrap();
        broker
            .acquire(vec![ResourceRequest::new("test")], AcquisitionOptions::default())
            .await
            .unwrap();

        let sweeper = Sweeper::new(broker.clone(), Duration::from_secs(60));
        assert_eq!(sweeper.sweep().await, 1);
        assert_eq!(sweeper.sweep().await, 0);

        assert_eq!(state_of(&broker, &expired).await, LockState::Free);
        assert_eq!(state_of(&broker, &kept).await, LockState::Locked);
    }

    #[tokio::test]
    async fn test_spawned_sweeper_releases_within_one_interval() {
        let broker = create_test_broker();
        let id = register(&broker, "test", json!({})).await;

        let sweeper = Sweeper::new(broker.clone(), Duration::from_millis(50)).spawn();

        broker
            .acquire(
                vec![ResourceRequest::new("test")],
                AcquisitionOptions {
                    expire_minutes: Some(0),
                    ..AcquisitionOptions::default()
                },
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(state_of(&broker, &id).await, LockState::Free);

        sweeper.abort();
    }
}
