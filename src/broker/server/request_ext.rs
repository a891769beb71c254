use crate::broker::Error;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use serde::de::DeserializeOwned;
use tracing::debug;

pub const MAX_BODY_SIZE: usize = 1024 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Reads a JSON request body of at most `MAX_BODY_SIZE` bytes.
pub async fn read_json<B, T>(body: B) -> Result<T, Error>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
    T: DeserializeOwned,
{
    let bytes = match Limited::new(body, MAX_BODY_SIZE).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) if error.is::<LengthLimitError>() => {
            return Err(Error::InvalidInput(format!(
                "request body exceeds {MAX_BODY_SIZE} bytes"
            )));
        }
        Err(error) => {
            debug!("Unable to read request body: {error}");
            return Err(Error::InvalidInput(
                "unable to read request body".to_string(),
            ));
        }
    };

    serde_json::from_slice(&bytes)
        .map_err(|error| Error::InvalidInput(format!("malformed JSON body: {error}")))
}
