//! Main request dispatcher: receives JSON-RPC messages, routes to handlers.

use std::sync::Arc;

use serde_json::Value;

use crate::context::ToolContext;
use crate::tools::ToolRegistry;
use crate::types::*;

use super::lifecycle::{Lifecycle, LifecycleState};
use super::validator::validate_request;

/// Dispatches the JSON-RPC messages of one connection.
///
/// The tool registry and context are shared between connections; the
/// lifecycle belongs to this handler alone.
pub struct ProtocolHandler {
    registry: Arc<ToolRegistry>,
    context: Arc<ToolContext>,
    lifecycle: Lifecycle,
}

impl ProtocolHandler {
    pub fn new(registry: Arc<ToolRegistry>, context: Arc<ToolContext>) -> Self {
        Self {
            registry,
            context,
            lifecycle: Lifecycle::default(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Move to `Closed`. Calls still in flight will not be answered.
    pub fn close(&self) {
        self.lifecycle.close();
    }

    /// Whether this message should run as its own task rather than inline.
    ///
    /// Only admitted tool calls qualify; everything that can change the
    /// lifecycle or is rejected by it runs inline so ordering holds.
    pub fn runs_concurrently(&self, msg: &JsonRpcMessage) -> bool {
        match msg {
            JsonRpcMessage::Request(req) => {
                is_tool_call(&req.method)
                    && req.id != RequestId::Null
                    && self.lifecycle.state() == LifecycleState::Initialized
            }
            _ => false,
        }
    }

    pub async fn handle_message(&self, msg: JsonRpcMessage) -> Option<Value> {
        if self.lifecycle.is_closed() {
            return None;
        }

        let response = match msg {
            JsonRpcMessage::Request(req) if req.id == RequestId::Null => {
                tracing::warn!("Ignoring request {} with null id", req.method);
                None
            }
            JsonRpcMessage::Request(req) => Some(self.handle_request(req).await),
            JsonRpcMessage::Notification(notif) => {
                self.handle_notification(notif);
                None
            }
            _ => {
                tracing::warn!("Received unexpected message type from client");
                None
            }
        };

        // Results finishing after close are dropped.
        if self.lifecycle.is_closed() {
            return None;
        }
        response
    }

    /// Error envelope for a message that never reached dispatch.
    pub fn error_response(&self, error: &McpError, id: RequestId) -> Value {
        serde_json::to_value(error.to_json_rpc_error_with(id, self.context.config.debug))
            .unwrap_or_default()
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Value {
        let id = request.id.clone();

        let result = match validate_request(&request) {
            Ok(()) => self.dispatch_request(&request).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => serde_json::to_value(JsonRpcResponse::new(id, value)).unwrap_or_default(),
            Err(e) => {
                tracing::debug!("Request {} ({}) failed: {e}", id, request.method);
                self.error_response(&e, id)
            }
        }
    }

    async fn dispatch_request(&self, request: &JsonRpcRequest) -> McpResult<Value> {
        if request.method == "initialize" {
            return self.handle_initialize(request.params.clone());
        }

        self.lifecycle.admit(&request.method)?;

        match request.method.as_str() {
            "tools/list" | "list_tools" => self.handle_tools_list(),
            "tools/call" | "call_tool" => self.handle_tools_call(request.params.clone()).await,
            "ping" => Ok(Value::Object(serde_json::Map::new())),
            _ => Err(McpError::MethodNotFound(request.method.clone())),
        }
    }

    fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" | "initialized" => {
                tracing::info!("MCP handshake complete");
            }
            "notifications/cancelled" | "$/cancelRequest" => {
                let request = notification
                    .params
                    .and_then(|p| serde_json::from_value::<CancelRequestParams>(p).ok());
                match request {
                    Some(p) => tracing::info!(
                        "Client cancelled request {} ({})",
                        p.request_id,
                        p.reason.as_deref().unwrap_or("no reason")
                    ),
                    None => tracing::info!("Received cancellation notification"),
                }
            }
            _ => {
                tracing::debug!("Unknown notification: {}", notification.method);
            }
        }
    }

    fn handle_initialize(&self, params: Option<Value>) -> McpResult<Value> {
        let init_params: InitializeParams = match params {
            None => InitializeParams::default(),
            Some(p) => serde_json::from_value(p).unwrap_or_else(|e| {
                tracing::warn!("Unrecognized initialize params ({e}); using defaults");
                InitializeParams::default()
            }),
        };

        self.lifecycle.initialize(init_params)?;

        let result = InitializeResult::with_tools(self.registry.list_tools());
        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    fn handle_tools_list(&self) -> McpResult<Value> {
        let result = ToolListResult {
            tools: self.registry.list_tools(),
            next_cursor: None,
        };
        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> McpResult<Value> {
        let call_params: ToolCallParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Tool call params required".to_string()))?;

        let result = self
            .registry
            .call(&call_params.name, call_params.arguments, &self.context)
            .await?;

        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }
}

fn is_tool_call(method: &str) -> bool {
    matches!(method, "tools/call" | "call_tool")
}
