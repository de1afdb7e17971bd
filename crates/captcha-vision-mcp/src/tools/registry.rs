//! Tool registration and dispatch.

use std::collections::HashSet;
use std::time::Instant;

use serde_json::Value;

use crate::config::ServerConfig;
use crate::context::ToolContext;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::validator::validate_arguments;
use super::{captcha_recognize, captcha_recognize_batch, captcha_recognize_file, image_preprocess};

/// Which handler serves a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolHandler {
    CaptchaRecognize,
    ImagePreprocess,
    CaptchaRecognizeFile,
    CaptchaRecognizeBatch,
}

/// A registered tool: its advertised definition and its handler.
#[derive(Debug, Clone)]
pub struct ToolEntry {
    pub definition: ToolDefinition,
    pub handler: ToolHandler,
}

/// The fixed set of tools, built once at startup.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    entries: Vec<ToolEntry>,
}

impl ToolRegistry {
    pub fn new(config: &ServerConfig) -> Self {
        let entries = vec![
            ToolEntry {
                definition: captcha_recognize::definition(config),
                handler: ToolHandler::CaptchaRecognize,
            },
            ToolEntry {
                definition: image_preprocess::definition(config),
                handler: ToolHandler::ImagePreprocess,
            },
            ToolEntry {
                definition: captcha_recognize_file::definition(config),
                handler: ToolHandler::CaptchaRecognizeFile,
            },
            ToolEntry {
                definition: captcha_recognize_batch::definition(config),
                handler: ToolHandler::CaptchaRecognizeBatch,
            },
        ];

        let mut seen = HashSet::new();
        for entry in &entries {
            assert!(
                seen.insert(entry.definition.name.as_str()),
                "duplicate tool name: {}",
                entry.definition.name
            );
        }

        Self { entries }
    }

    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.entries.iter().map(|e| e.definition.clone()).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.definition.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.iter().find(|e| e.definition.name == name)
    }

    /// Validate the arguments and run the tool. The handler only runs when
    /// validation passes.
    pub async fn call(
        &self,
        name: &str,
        arguments: Option<Value>,
        ctx: &ToolContext,
    ) -> McpResult<ToolCallResult> {
        let entry = self
            .get(name)
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;

        let args = validate_arguments(&entry.definition.input_schema, arguments)?;

        let start = Instant::now();
        let result = match entry.handler {
            ToolHandler::CaptchaRecognize => captcha_recognize::execute(args, ctx).await,
            ToolHandler::ImagePreprocess => image_preprocess::execute(args, ctx).await,
            ToolHandler::CaptchaRecognizeFile => captcha_recognize_file::execute(args, ctx).await,
            ToolHandler::CaptchaRecognizeBatch => captcha_recognize_batch::execute(args, ctx).await,
        };

        match &result {
            Ok(_) => tracing::info!("Tool {name} completed in {:?}", start.elapsed()),
            Err(e) => tracing::warn!("Tool {name} failed after {:?}: {e}", start.elapsed()),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lists_all_tools() {
        let registry = ToolRegistry::new(&ServerConfig::default());
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            vec![
                "captcha_recognize",
                "image_preprocess",
                "captcha_recognize_file",
                "captcha_recognize_batch"
            ]
        );
    }

    #[test]
    fn test_schema_defaults_follow_config() {
        let config = ServerConfig {
            default_max_width: 320,
            default_confidence_threshold: 0.5,
            max_batch_size: 4,
            ..ServerConfig::default()
        };
        let registry = ToolRegistry::new(&config);

        let pre = &registry.get("image_preprocess").unwrap().definition.input_schema;
        assert_eq!(pre["properties"]["max_width"]["default"], 320);

        let rec = &registry.get("captcha_recognize").unwrap().definition.input_schema;
        assert_eq!(rec["properties"]["confidence_threshold"]["default"], 0.5);

        let batch = &registry.get("captcha_recognize_batch").unwrap().definition.input_schema;
        assert_eq!(batch["properties"]["file_paths"]["maxItems"], 4);
    }

    #[test]
    fn test_every_schema_is_closed() {
        let registry = ToolRegistry::new(&ServerConfig::default());
        for tool in registry.list_tools() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
            assert_eq!(tool.input_schema["additionalProperties"], false, "{}", tool.name);
            assert!(tool.input_schema["required"].is_array(), "{}", tool.name);
        }
    }
}
