//! Error types and JSON-RPC error codes for the MCP server.

use captcha_vision::VisionError;
use serde_json::json;

use super::message::{JsonRpcError, JsonRpcErrorObject, RequestId, JSONRPC_VERSION};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Application error codes for image and recognition failures.
pub mod captcha_error_codes {
    pub const IMAGE_DECODE_ERROR: i32 = -1001;
    pub const RECOGNITION_ERROR: i32 = -1002;
}

/// All errors that can occur in the MCP server.
#[derive(thiserror::Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Frame too large: {size} bytes exceeds {max} bytes")]
    ContentTooLarge { size: usize, max: usize },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The detail is logged, never sent; clients always see one stable message.
    #[error("Image decode error: {0}")]
    ImageDecode(String),

    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn code(&self) -> i32 {
        use captcha_error_codes::*;
        use error_codes::*;
        match self {
            McpError::ParseError(_) | McpError::Json(_) => PARSE_ERROR,
            McpError::InvalidRequest(_) | McpError::ContentTooLarge { .. } => INVALID_REQUEST,
            McpError::MethodNotFound(_) | McpError::ToolNotFound(_) => METHOD_NOT_FOUND,
            McpError::InvalidParams(_) => INVALID_PARAMS,
            McpError::InternalError(_) | McpError::Transport(_) | McpError::Io(_) => {
                INTERNAL_ERROR
            }
            McpError::ImageDecode(_) => IMAGE_DECODE_ERROR,
            McpError::Recognition(_) => RECOGNITION_ERROR,
        }
    }

    /// Whether the wire message hides the underlying cause.
    fn is_opaque(&self) -> bool {
        matches!(
            self,
            McpError::InternalError(_) | McpError::Transport(_) | McpError::Io(_)
        )
    }

    /// Message sent to the client.
    pub fn wire_message(&self) -> String {
        match self {
            McpError::ImageDecode(_) => "Image decode error".to_string(),
            e if e.is_opaque() => "Internal error".to_string(),
            e => e.to_string(),
        }
    }

    /// Build the error envelope. With `debug` set, opaque errors carry their
    /// cause under `data.detail`.
    pub fn to_json_rpc_error_with(&self, id: RequestId, debug: bool) -> JsonRpcError {
        let data = (debug && (self.is_opaque() || matches!(self, McpError::ImageDecode(_))))
            .then(|| json!({ "detail": self.to_string() }));
        JsonRpcError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JsonRpcErrorObject {
                code: self.code(),
                message: self.wire_message(),
                data,
            },
        }
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        self.to_json_rpc_error_with(id, false)
    }
}

impl From<VisionError> for McpError {
    fn from(e: VisionError) -> Self {
        match e {
            VisionError::Io(io) => McpError::Io(io),
            e if e.is_recognition() => McpError::Recognition(e.to_string()),
            e => McpError::ImageDecode(e.to_string()),
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;
