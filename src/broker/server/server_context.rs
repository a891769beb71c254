use crate::broker::Broker;

pub struct ServerContext {
    pub broker: Broker,
}

impl ServerContext {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }
}
