//! Tool: captcha_recognize_batch: Recognize several captcha files in one call.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::ServerConfig;
use crate::context::ToolContext;
use crate::types::{round_to, McpError, McpResult, ToolCallResult, ToolDefinition};

use super::captcha_recognize::{option_properties, RecognizeOptions};
use super::captcha_recognize_file::{recognize_file, FileReport};

#[derive(Debug, Deserialize)]
struct BatchParams {
    file_paths: Vec<String>,
    #[serde(flatten)]
    options: RecognizeOptions,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum BatchEntry {
    Recognized(FileReport),
    Failed {
        file_path: String,
        success: bool,
        error: ErrorSummary,
    },
}

#[derive(Debug, Serialize)]
struct ErrorSummary {
    code: i32,
    message: String,
}

#[derive(Debug, Serialize)]
struct BatchReport {
    total_files: usize,
    successful_count: usize,
    failed_count: usize,
    results: Vec<BatchEntry>,
    elapsed: f64,
}

pub fn definition(config: &ServerConfig) -> ToolDefinition {
    let mut properties = Map::new();
    properties.insert(
        "file_paths".to_string(),
        json!({
            "type": "array",
            "items": { "type": "string", "minLength": 1 },
            "minItems": 1,
            "maxItems": config.max_batch_size,
            "description": "Paths of the captcha image files"
        }),
    );
    properties.extend(option_properties(config));

    ToolDefinition {
        name: "captcha_recognize_batch".to_string(),
        description: Some(format!(
            "Recognize up to {} captcha image files. A failing file does not fail the batch.",
            config.max_batch_size
        )),
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": ["file_paths"],
            "additionalProperties": false
        }),
    }
}

pub async fn execute(args: Map<String, Value>, ctx: &ToolContext) -> McpResult<ToolCallResult> {
    let start = Instant::now();
    let params: BatchParams = serde_json::from_value(Value::Object(args))
        .map_err(|e| McpError::InvalidParams(e.to_string()))?;

    let mut results = Vec::with_capacity(params.file_paths.len());
    for path in &params.file_paths {
        let entry = match recognize_file(path, params.options, ctx, Instant::now()).await {
            Ok(report) => BatchEntry::Recognized(report),
            Err(e) => {
                tracing::warn!("Batch entry {path} failed: {e}");
                BatchEntry::Failed {
                    file_path: path.clone(),
                    success: false,
                    error: ErrorSummary {
                        code: e.code(),
                        message: e.wire_message(),
                    },
                }
            }
        };
        results.push(entry);
    }

    let successful_count = results
        .iter()
        .filter(|r| matches!(r, BatchEntry::Recognized(_)))
        .count();

    let report = BatchReport {
        total_files: results.len(),
        successful_count,
        failed_count: results.len() - successful_count,
        results,
        elapsed: round_to(start.elapsed().as_secs_f64(), 3),
    };

    tracing::info!(
        "Batch recognition: {}/{} succeeded",
        report.successful_count,
        report.total_files
    );

    Ok(ToolCallResult::json(&report))
}
