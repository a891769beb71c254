use crate::broker::request::MissingResource;
use crate::broker::store;
use hyper::StatusCode;
use serde_json::{json, Value};
use std::fmt::Display;
use tracing::{debug, error, warn};

#[derive(Debug, PartialEq)]
pub enum Error {
    InvalidOptions(String),
    InvalidInput(String),
    MissingResources(Vec<MissingResource>),
    ResourceDoesNotExist,
    ResourceLocked,
    ResourceNotDisabled,
    UnlockTokenDoesNotExist,
    // Transport
    NotFound,
    Unsupported,
    // Catch-all
    Internal(Option<String>),
}

impl Error {
    /// Stable tag reported to callers alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidOptions(_) => "INVALID_OPTIONS",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::MissingResources(_) => "MISSING_RESOURCES",
            Error::ResourceDoesNotExist => "RESOURCE_DOES_NOT_EXIST",
            Error::ResourceLocked => "RESOURCE_LOCKED",
            Error::ResourceNotDisabled => "RESOURCE_ALREADY_ENABLED",
            Error::UnlockTokenDoesNotExist => "UNLOCK_TOKEN_DOES_NOT_EXIST",
            Error::NotFound => "NOT_FOUND",
            Error::Unsupported => "UNSUPPORTED",
            Error::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidOptions(_) | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::MissingResources(_) | Error::ResourceLocked | Error::ResourceNotDisabled => {
                StatusCode::CONFLICT
            }
            Error::ResourceDoesNotExist | Error::UnlockTokenDoesNotExist | Error::NotFound => {
                StatusCode::NOT_FOUND
            }
            Error::Unsupported => StatusCode::METHOD_NOT_ALLOWED,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_json(&self, request_id: Option<&String>) -> Value {
        let mut body = json!({
            "error": self.kind(),
            "cause": self.to_string(),
        });

        if let Error::MissingResources(missing) = self {
            body["missing_resources"] = json!(missing);
        }
        if let Some(request_id) = request_id {
            body["request_id"] = json!(request_id);
        }

        body
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidOptions(s) => write!(f, "invalid options: {s}"),
            Error::InvalidInput(s) => write!(f, "invalid input: {s}"),
            Error::MissingResources(missing) => {
                write!(f, "{} requested resource(s) unavailable", missing.len())
            }
            Error::ResourceDoesNotExist => write!(f, "resource does not exist"),
            Error::ResourceLocked => write!(f, "resource is locked"),
            Error::ResourceNotDisabled => write!(f, "resource is not disabled"),
            Error::UnlockTokenDoesNotExist => write!(f, "unlock token does not exist"),
            Error::NotFound => write!(f, "route not found"),
            Error::Unsupported => write!(f, "the operation is unsupported"),
            Error::Internal(Some(s)) => write!(f, "internal server error: {s}"),
            Error::Internal(None) => write!(f, "internal server error"),
        }
    }
}

impl std::error::Error for Error {}

impl From<store::Error> for Error {
    fn from(error: store::Error) -> Self {
        warn!("Store error: {error}");
        Error::Internal(Some("Store error during operations".to_string()))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        error!("Acquisition task failed: {error}");
        Error::Internal(Some("Acquisition attempt aborted".to_string()))
    }
}

impl From<hyper::Error> for Error {
    fn from(error: hyper::Error) -> Self {
        debug!("Hyper error: {:?}", error);
        Error::Internal(Some("HTTP error during operations".to_string()))
    }
}

impl From<hyper::http::Error> for Error {
    fn from(error: hyper::http::Error) -> Self {
        debug!("Hyper HTTP error: {:?}", error);
        Error::Internal(Some("HTTP error during operations".to_string()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        debug!("Serde JSON error: {:?}", error);
        Error::Internal(Some(
            "(De)Serialization error during operations".to_string(),
        ))
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        debug!("I/O error: {:?}", error);
        Error::Internal(Some("I/O error during operations".to_string()))
    }
}
