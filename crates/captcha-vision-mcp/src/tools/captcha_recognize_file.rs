//! Tool: captcha_recognize_file: Recognize a captcha image stored on disk.

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use captcha_vision::{decode_bytes, ImageBuffer, VisionError};

use crate::config::ServerConfig;
use crate::context::{run_blocking, ToolContext};
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::captcha_recognize::{option_properties, recognize_image, RecognitionReport, RecognizeOptions};

#[derive(Debug, Deserialize)]
struct RecognizeFileParams {
    file_path: String,
    #[serde(flatten)]
    options: RecognizeOptions,
}

#[derive(Debug, Serialize)]
pub(crate) struct FileReport {
    pub file_path: String,
    #[serde(flatten)]
    pub report: RecognitionReport,
}

pub fn definition(config: &ServerConfig) -> ToolDefinition {
    let mut properties = Map::new();
    properties.insert(
        "file_path".to_string(),
        json!({
            "type": "string",
            "minLength": 1,
            "description": "Path to the captcha image file"
        }),
    );
    properties.extend(option_properties(config));

    ToolDefinition {
        name: "captcha_recognize_file".to_string(),
        description: Some("Recognize the characters in a captcha image file".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": ["file_path"],
            "additionalProperties": false
        }),
    }
}

pub async fn execute(args: Map<String, Value>, ctx: &ToolContext) -> McpResult<ToolCallResult> {
    let start = Instant::now();
    let params: RecognizeFileParams = serde_json::from_value(Value::Object(args))
        .map_err(|e| McpError::InvalidParams(e.to_string()))?;

    let report = recognize_file(&params.file_path, params.options, ctx, start).await?;
    Ok(ToolCallResult::json(&report))
}

pub(crate) async fn recognize_file(
    path: &str,
    options: RecognizeOptions,
    ctx: &ToolContext,
    start: Instant,
) -> McpResult<FileReport> {
    let image = read_image_file(Path::new(path), ctx).await?;
    let report = recognize_image(image, options, ctx, start).await?;
    Ok(FileReport {
        file_path: path.to_string(),
        report,
    })
}

/// Read and decode an image file, checking its size before reading.
pub(crate) async fn read_image_file(path: &Path, ctx: &ToolContext) -> McpResult<ImageBuffer> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        McpError::InvalidParams(format!("Cannot read file {}: {e}", path.display()))
    })?;
    if !metadata.is_file() {
        return Err(McpError::InvalidParams(format!(
            "Not a file: {}",
            path.display()
        )));
    }

    let limits = ctx.config.decode_limits();
    let size = metadata.len() as usize;
    if size > limits.max_bytes {
        return Err(VisionError::TooLarge {
            size,
            max: limits.max_bytes,
        }
        .into());
    }

    let bytes = tokio::fs::read(path).await.map_err(|e| {
        McpError::InvalidParams(format!("Cannot read file {}: {e}", path.display()))
    })?;
    run_blocking(move || Ok(decode_bytes(bytes, &limits)?)).await
}
