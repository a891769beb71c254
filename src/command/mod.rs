mod error;
pub mod server;
pub mod unlock_all;

pub use error::Error;
