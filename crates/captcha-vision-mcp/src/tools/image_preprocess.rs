//! Tool: image_preprocess: Run the preprocessing stages and report the result.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use captcha_vision::{decode_base64, preprocess, Dimensions, ImageKind, Operation, PreprocessOptions};

use crate::config::ServerConfig;
use crate::context::{run_blocking, ToolContext};
use crate::types::{round_to, McpError, McpResult, ToolCallResult, ToolContent, ToolDefinition};

#[derive(Debug, Deserialize)]
struct PreprocessParams {
    image_data: String,
    operations: Vec<Operation>,
    contrast: f32,
    sharpness: f32,
    max_width: u32,
    max_height: u32,
    return_processed_image: bool,
}

#[derive(Debug, Serialize)]
struct PreprocessReport {
    applied_operations: Vec<Operation>,
    elapsed: f64,
    original_size: Dimensions,
    processed_size: Dimensions,
    format: ImageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    processed_image: Option<String>,
}

pub fn definition(config: &ServerConfig) -> ToolDefinition {
    let operations: Vec<&str> = Operation::ALL.iter().map(|op| op.as_str()).collect();

    ToolDefinition {
        name: "image_preprocess".to_string(),
        description: Some(
            "Apply denoise, enhance and resize to an image. Stages always run in that order."
                .to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_data": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Base64-encoded image; a data: URL prefix is accepted"
                },
                "operations": {
                    "type": "array",
                    "items": { "type": "string", "enum": operations },
                    "description": "Stages to apply; an empty list returns the image unchanged"
                },
                "contrast": {
                    "type": "number",
                    "minimum": 0.1,
                    "maximum": 3.0,
                    "default": config.default_contrast,
                    "description": "Contrast factor used by enhance"
                },
                "sharpness": {
                    "type": "number",
                    "minimum": 0.1,
                    "maximum": 3.0,
                    "default": config.default_sharpness,
                    "description": "Sharpness factor used by enhance"
                },
                "max_width": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 4096,
                    "default": config.default_max_width,
                    "description": "Width bound used by resize"
                },
                "max_height": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 4096,
                    "default": config.default_max_height,
                    "description": "Height bound used by resize"
                },
                "return_processed_image": {
                    "type": "boolean",
                    "default": false,
                    "description": "Include the processed image as base64 in the same format as the input"
                }
            },
            "required": ["image_data", "operations"],
            "additionalProperties": false
        }),
    }
}

pub async fn execute(args: Map<String, Value>, ctx: &ToolContext) -> McpResult<ToolCallResult> {
    let params: PreprocessParams = serde_json::from_value(Value::Object(args))
        .map_err(|e| McpError::InvalidParams(e.to_string()))?;

    let options = PreprocessOptions {
        operations: params.operations.into_iter().collect(),
        contrast: params.contrast,
        sharpness: params.sharpness,
        max_width: params.max_width,
        max_height: params.max_height,
        denoise_radius: ctx.config.denoise_radius,
    };
    let limits = ctx.config.decode_limits();
    let image_data = params.image_data;
    let return_processed_image = params.return_processed_image;

    let (original_size, outcome, processed_image) = run_blocking(move || {
        let image = decode_base64(&image_data, &limits)?;
        let outcome = preprocess(&image, &options)?;
        let processed_image = if return_processed_image {
            Some(outcome.image.encode_base64()?)
        } else {
            None
        };
        Ok((image.dimensions(), outcome, processed_image))
    })
    .await?;

    tracing::debug!(
        "Preprocessed {} -> {} with {:?}",
        original_size,
        outcome.image.dimensions(),
        outcome.applied
    );

    let report = PreprocessReport {
        applied_operations: outcome.applied,
        elapsed: round_to(outcome.elapsed.as_secs_f64(), 3),
        original_size,
        processed_size: outcome.image.dimensions(),
        format: outcome.image.kind(),
        processed_image,
    };

    let mut result = ToolCallResult::json(&report);
    if let Some(data) = report.processed_image {
        result.content.push(ToolContent::Image {
            data,
            mime_type: outcome.image.kind().mime_type().to_string(),
        });
    }
    Ok(result)
}
