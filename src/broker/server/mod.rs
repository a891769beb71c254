mod http_server;
pub mod listeners;
mod request_ext;
mod router;
mod server_context;

pub use http_server::serve_request;
pub use server_context::ServerContext;
