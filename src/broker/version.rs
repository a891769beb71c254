use crate::broker::Broker;
use serde::Serialize;

pub const SERVICE_NAME: &str = "reslock";

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub version: &'static str,
    pub service_name: &'static str,
}

impl Broker {
    pub fn version(&self) -> Version {
        Version {
            version: env!("CARGO_PKG_VERSION"),
            service_name: SERVICE_NAME,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::broker::tests::create_test_broker;
    use serde_json::json;

    #[test]
    fn test_version() {
        let broker = create_test_broker();

        assert_eq!(
            serde_json::to_value(broker.version()).unwrap(),
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "serviceName": "reslock",
            })
        );
    }
}
