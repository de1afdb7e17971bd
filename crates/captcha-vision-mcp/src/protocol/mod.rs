//! MCP protocol handling: JSON-RPC dispatch and connection lifecycle.

pub mod handler;
pub mod lifecycle;
pub mod validator;

pub use handler::ProtocolHandler;
pub use lifecycle::{Lifecycle, LifecycleState};
