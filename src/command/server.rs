use crate::broker::server::listeners::insecure::InsecureListener;
use crate::broker::server::ServerContext;
use crate::broker::{Broker, Sweeper};
use crate::command;
use crate::configuration::{ServerConfig, SweeperConfig};
use argh::FromArgs;
use std::time::Duration;
use tracing::{info, warn};

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "serve",
    description = "Run the lock broker HTTP listener and expiration sweeper"
)]
pub struct Options {}

pub struct Command {
    broker: Broker,
    sweeper_interval: Duration,
    listener: InsecureListener,
}

impl Command {
    pub fn new(server_config: &ServerConfig, sweeper_config: &SweeperConfig, broker: Broker) -> Self {
        let listener = InsecureListener::new(server_config, ServerContext::new(broker.clone()));

        Command {
            broker,
            sweeper_interval: sweeper_config.interval(),
            listener,
        }
    }

    pub async fn run(&self) -> Result<(), command::Error> {
        let recovered = self.broker.recover_reservations().await?;
        if recovered > 0 {
            warn!("Reverted {recovered} reservation(s) left by a previous run");
        } else {
            info!("No stale reservation found");
        }

        let sweeper = Sweeper::new(self.broker.clone(), self.sweeper_interval).spawn();
        let result = self.listener.serve().await;
        sweeper.abort();

        Ok(result?)
    }
}
