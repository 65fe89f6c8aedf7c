//! HTTP gateway exposing projects, imports, questions, and progress streams.

mod error;
mod handlers;
mod router;
mod server;

pub use error::GatewayError;
pub use server::GatewayServer;
