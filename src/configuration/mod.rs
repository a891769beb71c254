use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

mod error;

pub use error::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    pub server: ServerConfig,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_query_timeout")]
    pub query_timeout: u64,
    #[serde(default = "ServerConfig::default_query_timeout_grace_period")]
    pub query_timeout_grace_period: u64,
}

impl ServerConfig {
    fn default_port() -> u16 {
        4000
    }

    fn default_query_timeout() -> u64 {
        3600
    }

    fn default_query_timeout_grace_period() -> u64 {
        60
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "GlobalConfig::default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            max_concurrent_requests: GlobalConfig::default_max_concurrent_requests(),
        }
    }
}

impl GlobalConfig {
    fn default_max_concurrent_requests() -> usize {
        4
    }
}

/// Durable store selection: in-memory unless a `[store.redis]` section is present.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(default)]
    pub redis: Option<RedisStoreConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RedisStoreConfig {
    pub url: String,
    #[serde(default = "RedisStoreConfig::default_key_prefix")]
    pub key_prefix: String,
}

impl RedisStoreConfig {
    fn default_key_prefix() -> String {
        "reslock:".to_string()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SweeperConfig {
    /// Seconds between two expiration sweeps.
    #[serde(default = "SweeperConfig::default_interval")]
    pub interval: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        SweeperConfig {
            interval: SweeperConfig::default_interval(),
        }
    }
}

impl SweeperConfig {
    fn default_interval() -> u64 {
        60
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TracingConfig {
    pub endpoint: String,
    pub sampling_rate: f64,
}

impl Configuration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config_str = fs::read_to_string(path)?;
        Self::load_from_str(&config_str)
    }

    pub fn load_from_str(slice: &str) -> Result<Self, Error> {
        let config: Configuration = toml::from_str(slice).map_err(|e| {
            println!("Configuration file format error:");
            println!("{e}");
            Error::ConfigurationFileFormat(e.to_string())
        })?;

        if config.sweeper.interval == 0 {
            return Err(Error::InvalidValue(
                "sweeper.interval must be at least 1 second".to_string(),
            ));
        }

        if let Some(redis) = &config.store.redis {
            if redis.url.is_empty() {
                return Err(Error::InvalidValue(
                    "store.redis.url must not be empty".to_string(),
                ));
            }
        }

        Ok(config)
    }
}
