//! Message framing for newline-delimited JSON.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::types::{JsonRpcMessage, McpError, McpResult, RequestId};

/// Splits a byte stream into lines on `\n` without interpreting the bytes,
/// so multi-byte characters are never cut.
///
/// `next_line` is cancel-safe: a partial line survives a dropped future and
/// is resumed on the next call.
pub struct LineFramer<R> {
    reader: R,
    pending: Vec<u8>,
    max_frame_bytes: usize,
}

impl<R: AsyncBufRead + Unpin> LineFramer<R> {
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            max_frame_bytes,
        }
    }

    /// Next complete line without its terminator, or `None` at end of
    /// stream. A trailing unterminated line is returned before `None`.
    ///
    /// A line longer than the frame limit is an error; the stream cannot be
    /// resynchronized after it.
    pub async fn next_line(&mut self) -> McpResult<Option<Vec<u8>>> {
        loop {
            let available = self.reader.fill_buf().await.map_err(McpError::Io)?;

            if available.is_empty() {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.pending)));
            }

            let (chunk_len, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i, true),
                None => (available.len(), false),
            };

            let size = self.pending.len() + chunk_len;
            if size > self.max_frame_bytes {
                return Err(McpError::ContentTooLarge {
                    size,
                    max: self.max_frame_bytes,
                });
            }

            self.pending.extend_from_slice(&available[..chunk_len]);
            let consumed = if complete { chunk_len + 1 } else { chunk_len };
            self.reader.consume(consumed);

            if complete {
                let mut line = std::mem::take(&mut self.pending);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
        }
    }
}

/// Parse a single line of text as a JSON-RPC message.
///
/// Invalid JSON is a parse error; valid JSON that is not a JSON-RPC
/// envelope is an invalid request.
pub fn parse_message(line: &str) -> McpResult<JsonRpcMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(McpError::ParseError("Empty message".to_string()));
    }

    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| McpError::ParseError(e.to_string()))?;

    let Some(object) = value.as_object() else {
        return Err(McpError::InvalidRequest(
            "Message must be a JSON object".to_string(),
        ));
    };
    if let Some(id) = object.get("id") {
        if RequestId::from_value(id).is_none() {
            return Err(McpError::InvalidRequest(format!(
                "Request id must be a string or an integer, got {id}"
            )));
        }
    }

    serde_json::from_value(value).map_err(|e| McpError::InvalidRequest(e.to_string()))
}

/// Best-effort id of a message that failed to parse, for the error reply.
pub fn recover_id(line: &str) -> RequestId {
    serde_json::from_str::<Value>(line.trim())
        .ok()
        .and_then(|v| v.get("id").and_then(RequestId::from_value))
        .unwrap_or(RequestId::Null)
}

/// Serialize a value to a JSON line (with trailing newline).
pub fn frame_message(value: &Value) -> McpResult<String> {
    let mut json = serde_json::to_string(value).map_err(McpError::Json)?;
    json.push('\n');
    Ok(json)
}
