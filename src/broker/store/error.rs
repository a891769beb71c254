use redis::RedisError;
use std::fmt;
use tracing::debug;

#[derive(Debug, PartialEq)]
pub enum Error {
    BackendError(String),
    Corrupted(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BackendError(err) => write!(f, "Storage error: {err}"),
            Error::Corrupted(err) => write!(f, "Corrupted record: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<RedisError> for Error {
    fn from(error: RedisError) -> Self {
        let error = format!("Redis error: {error:?}");
        debug!("{error}");
        Error::BackendError(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        debug!("Record (de)serialization error: {error}");
        Error::Corrupted(error.to_string())
    }
}
