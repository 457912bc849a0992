//! Tool dispatch: name resolution, timeout enforcement, cancellation.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tracing::{Instrument, info_span, warn};

use crate::error::ToolError;

use super::{ToolCallRecord, ToolContext, ToolRegistry};

/// Default per-call tool timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolves tool calls against a registry and invokes them with a
/// per-call deadline.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: ToolRegistry,
    default_timeout: Duration,
    overrides: HashMap<String, Duration>,
}

impl Dispatcher {
    /// Create a dispatcher over the given registry.
    #[must_use]
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            default_timeout: DEFAULT_TOOL_TIMEOUT,
            overrides: HashMap::new(),
        }
    }

    /// Set the default per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Override the timeout for one tool.
    #[must_use]
    pub fn with_tool_timeout(mut self, name: impl Into<String>, timeout: Duration) -> Self {
        self.overrides.insert(name.into(), timeout);
        self
    }

    /// The registry backing this dispatcher.
    #[must_use]
    pub const fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// The effective timeout for a tool.
    #[must_use]
    pub fn timeout_for(&self, name: &str) -> Duration {
        self.overrides
            .get(name)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    /// Invoke the tool named by `call`.
    ///
    /// # Errors
    ///
    /// [`ToolError::NotFound`] when no tool matches, [`ToolError::Timeout`]
    /// when the deadline elapses, [`ToolError::Cancelled`] when the
    /// context's cancellation token fires first, or whatever the tool
    /// itself reports.
    pub async fn dispatch(
        &self,
        call: &ToolCallRecord,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let Some(tool) = self.registry.get(&call.name) else {
            warn!(tool = %call.name, "tool not found");
            return Err(ToolError::NotFound(call.name.clone()));
        };

        let timeout = self.timeout_for(&call.name);
        let span = info_span!(
            "tool",
            tool.name = %call.name,
            tool.id = %call.id,
        );

        async {
            tokio::select! {
                () = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
                outcome = tokio::time::timeout(timeout, tool.call_json(call.arguments.clone(), ctx)) => {
                    match outcome {
                        Ok(result) => result,
                        Err(_) => {
                            warn!(tool = %call.name, timeout_ms = timeout.as_millis() as u64, "tool timed out");
                            Err(ToolError::Timeout(timeout))
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}
