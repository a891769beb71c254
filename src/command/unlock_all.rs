use crate::broker::Broker;
use crate::command;
use argh::FromArgs;
use tracing::info;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "unlock-all",
    description = "Force-release every lock and exit"
)]
pub struct Options {}

pub struct Command {
    broker: Broker,
}

impl Command {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }

    pub async fn run(&self) -> Result<(), command::Error> {
        let released = self.broker.release_all().await?;
        info!("Released {released} lock(s)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::resource::LockState;
    use crate::broker::tests::{create_test_broker, register, state_of};
    use crate::broker::{AcquisitionOptions, ResourceRequest};
    use serde_json::json;

    #[tokio::test]
    async fn test_unlock_all_frees_every_lock() {
        let broker = create_test_broker();
        let first = register(&broker, "test", json!({})).await;
        let second = register(&broker, "test", json!({})).await;

        for _ in 0..2 {
            broker
                .acquire(vec![ResourceRequest::new("test")], AcquisitionOptions::default())
                .await
                .unwrap();
        }

        Command::new(broker.clone()).run().await.unwrap();

        assert_eq!(state_of(&broker, &first).await, LockState::Free);
        assert_eq!(state_of(&broker, &second).await, LockState::Free);
    }
}
