//! History optimization
//!
//! Builds a bounded, model-safe copy of a conversation before it is sent to
//! the language model: recent window, tool-call pairing repair, and
//! head/tail compression of overlong turns. The stored history is never
//! modified.

use crate::models::{Role, Turn};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Configuration for history optimization
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Size of the recent window taken from the history
    pub max_messages: usize,
    /// Content length (chars) above which user/assistant turns are compressed.
    /// `None` disables compression.
    pub compress_threshold: Option<usize>,
    /// Characters kept from the start of a compressed turn
    pub keep_head: usize,
    /// Characters kept from the end of a compressed turn
    pub keep_tail: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_messages: 12,
            compress_threshold: Some(5000),
            keep_head: 800 / 3,
            keep_tail: 800 / 3,
        }
    }
}

/// Per-turn classification inside the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keep {
    /// Always forwarded
    Valid,
    /// Forwarded only while budget remains
    Contextual,
}

/// Optimizes message history for model consumption
pub struct HistoryOptimizer {
    config: OptimizerConfig,
}

impl HistoryOptimizer {
    pub fn new() -> Self {
        Self {
            config: OptimizerConfig::default(),
        }
    }

    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Produce the sequence sent to the model: one fresh system turn carrying
    /// `instructions`, then at most `max_messages` turns from `history`.
    pub fn optimize(&self, instructions: &str, history: &[Turn]) -> Vec<Turn> {
        // Earlier copies of these instructions are replaced by the fresh one.
        let relevant: Vec<&Turn> = history
            .iter()
            .filter(|t| !matches!(t, Turn::System { content } if content == instructions))
            .collect();

        let start = relevant.len().saturating_sub(self.config.max_messages);
        let window = &relevant[start..];
        let classes = classify(window);

        let mut output: Vec<Turn> = Vec::with_capacity(window.len() + 1);
        output.push(Turn::system(instructions));

        let mut contextual: Vec<&Turn> = Vec::new();
        for (turn, keep) in window.iter().zip(classes.iter()) {
            match keep {
                Keep::Valid => output.push((*turn).clone()),
                Keep::Contextual => contextual.push(*turn),
            }
        }

        let remaining = self.config.max_messages.saturating_sub(output.len());
        if remaining > 0 && !contextual.is_empty() {
            let from = contextual.len().saturating_sub(remaining);
            for turn in &contextual[from..] {
                if turn.is_tool_result() && breaks_sequence(output.last()) {
                    continue;
                }
                output.push((*turn).clone());
            }
        }

        let output: Vec<Turn> = output
            .into_iter()
            .map(|turn| self.compress_turn(turn))
            .collect();

        debug!(
            original = history.len(),
            optimized = output.len(),
            dropped_contextual = contextual.len().saturating_sub(remaining),
            "History optimized"
        );

        for (i, pair) in output.windows(2).enumerate() {
            if pair[1].is_tool_result() && pair[0].role() != Role::Assistant && !pair[0].is_tool_result() {
                warn!(position = i + 1, "Tool result without preceding assistant turn");
            }
        }

        output
    }

    /// Compress user/assistant content above the threshold; other turns pass unchanged
    pub fn compress_turn(&self, turn: Turn) -> Turn {
        let Some(threshold) = self.config.compress_threshold else {
            return turn;
        };

        match turn.role() {
            Role::User | Role::Assistant if turn.content().chars().count() > threshold => {
                let compressed =
                    compress_content(turn.content(), self.config.keep_head, self.config.keep_tail);
                turn.with_content(compressed)
            }
            _ => turn,
        }
    }
}

impl Default for HistoryOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// A contextual tool result may not lead the sequence or follow a system
/// turn, another tool result, or an assistant turn whose invocations it
/// does not answer.
fn breaks_sequence(previous: Option<&Turn>) -> bool {
    match previous {
        None => true,
        Some(turn) => {
            turn.role() == Role::System || turn.is_tool_result() || turn.has_invocations()
        }
    }
}

/// Single forward pass. An invocation-bearing assistant turn opens a block;
/// the tool results directly after it are valid when they answer one of its
/// ids. The assistant turn itself is valid once at least one id is answered.
fn classify(window: &[&Turn]) -> Vec<Keep> {
    let mut classes = vec![Keep::Contextual; window.len()];
    let mut open: Option<(usize, HashSet<&str>)> = None;

    for (i, turn) in window.iter().enumerate() {
        match turn {
            Turn::User { .. } | Turn::System { .. } => {
                open = None;
                classes[i] = Keep::Valid;
            }
            Turn::Assistant { invocations, .. } if !invocations.is_empty() => {
                let ids = invocations.iter().map(|c| c.id.as_str()).collect();
                open = Some((i, ids));
            }
            Turn::Assistant { .. } => {
                open = None;
                classes[i] = Keep::Valid;
            }
            Turn::ToolResult { correlation_id, .. } => {
                if let Some((owner, ids)) = &open {
                    if ids.contains(correlation_id.as_str()) {
                        classes[i] = Keep::Valid;
                        classes[*owner] = Keep::Valid;
                    }
                }
            }
        }
    }

    classes
}

/// Keep `head` leading and `tail` trailing characters, replacing the middle
/// with a marker carrying the original length.
pub fn compress_content(content: &str, head: usize, tail: usize) -> String {
    let total = content.chars().count();
    if total <= head + tail {
        return content.to_string();
    }

    let prefix: String = content.chars().take(head).collect();
    let suffix: String = content.chars().skip(total - tail).collect();

    format!(
        "{}\n\n[...compressed content - {} characters total...]\n\n{}",
        prefix, total, suffix
    )
}
