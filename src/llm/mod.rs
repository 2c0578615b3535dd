//! Language model seam
//!
//! A `ChatModel` turns an ordered list of turns into one assistant turn,
//! optionally carrying requested invocations.

use crate::models::{Role, Turn};
use crate::Result;
use std::sync::Arc;
use tracing::{error, warn};

pub mod openai;
pub use openai::OpenAiChatModel;

/// Fallback question used when a thread has no user turn at all
pub const DEFAULT_FALLBACK_QUESTION: &str = "Can you help me?";

#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier used in logs
    fn name(&self) -> &str;

    async fn invoke(&self, turns: &[Turn]) -> Result<Turn>;
}

/// Call the model on the optimized sequence; on failure retry once with a
/// minimal exchange of the instructions plus the latest raw user turn.
pub async fn invoke_with_fallback(
    model: &Arc<dyn ChatModel>,
    optimized: &[Turn],
    instructions: &str,
    history: &[Turn],
) -> Result<Turn> {
    match model.invoke(optimized).await {
        Ok(turn) => Ok(turn),
        Err(first) => {
            warn!(
                model = model.name(),
                error = %first,
                turns = optimized.len(),
                "Model call failed, retrying with minimal context"
            );

            let latest_user = history
                .iter()
                .rev()
                .find(|t| t.role() == Role::User)
                .cloned()
                .unwrap_or_else(|| Turn::user(DEFAULT_FALLBACK_QUESTION));

            let minimal = [Turn::system(instructions), latest_user];
            model.invoke(&minimal).await.map_err(|e| {
                error!(model = model.name(), error = %e, "Minimal-context retry failed");
                e
            })
        }
    }
}
