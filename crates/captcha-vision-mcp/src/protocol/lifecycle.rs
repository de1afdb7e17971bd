//! Connection lifecycle: handshake gating and shutdown.

use std::sync::{Mutex, PoisonError};

use crate::types::{InitializeParams, McpError, McpResult, MCP_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Closed,
}

/// Per-connection lifecycle. `Closed` is terminal.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: Mutex::new(LifecycleState::Uninitialized),
        }
    }
}

impl Lifecycle {
    pub fn state(&self) -> LifecycleState {
        *self.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == LifecycleState::Closed
    }

    /// Record the client's handshake. Repeating it is harmless.
    pub fn initialize(&self, params: InitializeParams) -> McpResult<()> {
        let mut state = self.lock();
        match *state {
            LifecycleState::Closed => {
                return Err(McpError::InvalidRequest("Connection is closed".to_string()))
            }
            LifecycleState::Initialized => {
                tracing::debug!("Repeated initialize; re-announcing capabilities");
                return Ok(());
            }
            LifecycleState::Uninitialized => {}
        }

        if let Some(version) = &params.protocol_version {
            if version != MCP_VERSION {
                tracing::warn!(
                    "Client requested protocol version {version}, server supports {MCP_VERSION}. Proceeding with server version."
                );
            }
        }

        match &params.client_info {
            Some(info) => tracing::info!("Initialized with client: {} v{}", info.name, info.version),
            None => tracing::info!("Initialized with anonymous client"),
        }

        *state = LifecycleState::Initialized;
        Ok(())
    }

    /// Whether a non-initialize request may run now.
    pub fn admit(&self, method: &str) -> McpResult<()> {
        match self.state() {
            LifecycleState::Initialized => Ok(()),
            LifecycleState::Uninitialized => Err(McpError::InvalidRequest(format!(
                "Server not initialized; call initialize before {method}"
            ))),
            LifecycleState::Closed => {
                Err(McpError::InvalidRequest("Connection is closed".to_string()))
            }
        }
    }

    pub fn close(&self) {
        let mut state = self.lock();
        if *state != LifecycleState::Closed {
            *state = LifecycleState::Closed;
            tracing::info!("Connection closed");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
