//! Tool: captcha_recognize: Recognize the text in a base64-encoded captcha.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use captcha_vision::{decode_base64, preprocess, ImageBuffer, Operation};

use crate::config::ServerConfig;
use crate::context::{run_blocking, ToolContext};
use crate::types::{round_to, McpError, McpResult, ToolCallResult, ToolDefinition};

/// Stages run before recognition when `preprocess` is set.
const RECOGNITION_STAGES: [Operation; 2] = [Operation::Denoise, Operation::Enhance];

#[derive(Debug, Deserialize)]
struct RecognizeParams {
    image_data: String,
    #[serde(flatten)]
    options: RecognizeOptions,
}

/// Options shared by every recognition tool.
#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct RecognizeOptions {
    pub confidence_threshold: f64,
    pub preprocess: bool,
}

/// Payload returned by the recognition tools.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct RecognitionReport {
    pub success: bool,
    pub text: String,
    pub confidence: f64,
    pub elapsed: f64,
    pub threshold_met: bool,
    pub applied_operations: Vec<Operation>,
}

pub fn definition(config: &ServerConfig) -> ToolDefinition {
    let mut properties = Map::new();
    properties.insert(
        "image_data".to_string(),
        json!({
            "type": "string",
            "minLength": 1,
            "description": "Base64-encoded image (PNG, JPEG, GIF, BMP or WebP); a data: URL prefix is accepted"
        }),
    );
    properties.extend(option_properties(config));

    ToolDefinition {
        name: "captcha_recognize".to_string(),
        description: Some(
            "Recognize the characters in a captcha image. Optionally denoises and enhances the image first."
                .to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": ["image_data"],
            "additionalProperties": false
        }),
    }
}

/// Schema properties for [`RecognizeOptions`], with configured defaults.
pub(crate) fn option_properties(config: &ServerConfig) -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "confidence_threshold".to_string(),
        json!({
            "type": "number",
            "minimum": 0.0,
            "maximum": 1.0,
            "default": config.default_confidence_threshold,
            "description": "Confidence below this is reported as threshold_met = false"
        }),
    );
    properties.insert(
        "preprocess".to_string(),
        json!({
            "type": "boolean",
            "default": true,
            "description": "Denoise and enhance the image before recognition"
        }),
    );
    properties
}

pub async fn execute(args: Map<String, Value>, ctx: &ToolContext) -> McpResult<ToolCallResult> {
    let start = Instant::now();
    let params: RecognizeParams = serde_json::from_value(Value::Object(args))
        .map_err(|e| McpError::InvalidParams(e.to_string()))?;

    let limits = ctx.config.decode_limits();
    let image_data = params.image_data;
    let image = run_blocking(move || Ok(decode_base64(&image_data, &limits)?)).await?;
    let report = recognize_image(image, params.options, ctx, start).await?;

    Ok(ToolCallResult::json(&report))
}

/// Preprocess (if asked), recognize, and build the report.
///
/// `start` marks when the call began so `elapsed` covers decoding too.
pub(crate) async fn recognize_image(
    image: ImageBuffer,
    options: RecognizeOptions,
    ctx: &ToolContext,
    start: Instant,
) -> McpResult<RecognitionReport> {
    let stages = options
        .preprocess
        .then(|| ctx.preprocess_options(RECOGNITION_STAGES));
    let (bytes, applied) = run_blocking(move || match stages {
        Some(stages) => {
            let outcome = preprocess(&image, &stages)?;
            Ok((outcome.image.encode_png()?.into_owned(), outcome.applied))
        }
        None => Ok((image.encode()?.into_owned(), Vec::new())),
    })
    .await?;

    let result = ctx.recognition.recognize(bytes).await?;

    let threshold_met = result.confidence >= options.confidence_threshold;
    if !threshold_met {
        tracing::warn!(
            "Recognition confidence {:.4} below threshold {}",
            result.confidence,
            options.confidence_threshold
        );
    }

    Ok(RecognitionReport {
        success: true,
        text: result.text,
        confidence: round_to(result.confidence, 4),
        elapsed: round_to(start.elapsed().as_secs_f64(), 3),
        threshold_met,
        applied_operations: applied,
    })
}
