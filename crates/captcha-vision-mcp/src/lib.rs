//! Captcha Vision MCP Server: captcha recognition and image preprocessing
//! tools for LLM clients.

pub mod config;
pub mod context;
pub mod protocol;
pub mod repl;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::ServerConfig;
pub use context::ToolContext;
pub use protocol::ProtocolHandler;
pub use tools::ToolRegistry;
pub use transport::StdioTransport;
