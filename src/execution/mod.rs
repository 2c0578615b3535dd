//! Rate-limited tool dispatcher
//!
//! Executes the invocations requested by one assistant turn strictly in
//! order, one at a time, waiting at least `min_interval` between the end
//! of one call and the start of the next.

use crate::error::OrchestrationError;
use crate::models::Turn;
use crate::tools::ToolRegistry;
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Default spacing between tool calls
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(500);

/// Sequential tool executor. One instance per conversation run.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    min_interval: Duration,
    last_call: Option<Instant>,
    /// Results of the batch in flight; left in place when the batch aborts
    completed: Vec<Turn>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, min_interval: Duration) -> Self {
        Self {
            registry,
            min_interval,
            last_call: None,
            completed: Vec::new(),
        }
    }

    /// Completion time of the most recent invocation
    pub fn last_call(&self) -> Option<Instant> {
        self.last_call
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Results of invocations that ran before the last batch aborted.
    /// Empty after a successful batch.
    pub fn take_completed(&mut self) -> Vec<Turn> {
        std::mem::take(&mut self.completed)
    }

    /// Execute every invocation on `turn`, returning one tool-result turn per
    /// invocation in request order. Turns without invocations pass through.
    ///
    /// When a batch aborts, the results already produced stay available
    /// through [`ToolDispatcher::take_completed`].
    pub async fn dispatch(&mut self, turn: &Turn) -> Result<Vec<Turn>> {
        self.completed.clear();

        let invocations = turn.invocations();
        if invocations.is_empty() {
            return Ok(Vec::new());
        }

        for call in invocations {
            if let Some(last) = self.last_call {
                let elapsed = last.elapsed();
                if elapsed < self.min_interval {
                    let wait = self.min_interval - elapsed;
                    debug!(wait_ms = wait.as_millis() as u64, "Rate limit: waiting before next tool call");
                    sleep(wait).await;
                }
            }

            let tool = self.registry.get(&call.name).ok_or_else(|| {
                warn!(tool = %call.name, invocation_id = %call.id, "Requested tool is not registered");
                OrchestrationError::ToolNotFound(call.name.clone())
            })?;

            let started = Instant::now();
            let outcome = tool.invoke(&call.arguments).await;
            self.last_call = Some(Instant::now());

            let content = match outcome {
                Ok(value) => serde_json::to_string(&value)?,
                Err(e) => {
                    warn!(
                        tool = %call.name,
                        invocation_id = %call.id,
                        error = %e,
                        "Tool invocation failed"
                    );
                    serde_json::to_string(&json!({ "error": e.to_string() }))?
                }
            };

            info!(
                tool = %call.name,
                invocation_id = %call.id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Tool executed"
            );

            self.completed
                .push(Turn::tool_result(&call.id, &call.name, content));
        }

        Ok(self.take_completed())
    }
}
