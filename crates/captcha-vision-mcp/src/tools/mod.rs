//! MCP tool implementations.

pub mod captcha_recognize;
pub mod captcha_recognize_batch;
pub mod captcha_recognize_file;
pub mod image_preprocess;
pub mod registry;
pub mod validator;

pub use registry::{ToolEntry, ToolHandler, ToolRegistry};
