//! Finance graph steps

use crate::classifier::EntryRouter;
use crate::error::OrchestrationError;
use crate::extraction::{document_kind, extension_of, DocumentExtractor};
use crate::graph::{Node, RunContext};
use crate::llm::{invoke_with_fallback, ChatModel};
use crate::memory::HistoryOptimizer;
use crate::models::{ConversationState, ExtractionPhase, StateUpdate, Turn};
use crate::phase::PhaseRouter;
use crate::prompts::statement_turn_content;
use crate::tools::ToolRegistry;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Entry step: records the route for the newest user turn.
pub struct RouterStep;

#[async_trait::async_trait]
impl Node for RouterStep {
    async fn run(&self, state: &ConversationState, ctx: &mut RunContext) -> Result<StateUpdate> {
        let route = EntryRouter::route(&state.turns);
        info!(thread_id = ctx.thread_id(), %route, "Entry route decided");

        Ok(StateUpdate {
            next: Some(route),
            ..StateUpdate::default()
        })
    }
}

/// Runs OCR on the referenced document and appends its text as a user turn.
pub struct ExtractionStep {
    extractor: Arc<dyn DocumentExtractor>,
}

impl ExtractionStep {
    pub fn new(extractor: Arc<dyn DocumentExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait::async_trait]
impl Node for ExtractionStep {
    async fn run(&self, state: &ConversationState, ctx: &mut RunContext) -> Result<StateUpdate> {
        let reference = state
            .last_user_turn()
            .map(|t| t.content().trim().to_string())
            .unwrap_or_default();

        if document_kind(&reference).is_none() {
            info!(thread_id = ctx.thread_id(), reference = %reference, "Unsupported document format");
            return Ok(StateUpdate::turn(Turn::system(format!(
                "Unsupported file format: {}",
                extension_of(&reference)
            ))));
        }

        let text = self.extractor.extract(&reference).await?;
        if text.trim().is_empty() {
            return Err(OrchestrationError::ExtractionError(format!(
                "No text could be extracted from {}",
                reference
            )));
        }

        info!(thread_id = ctx.thread_id(), chars = text.len(), "Bank statement received for processing");

        Ok(StateUpdate {
            turns: vec![Turn::user(statement_turn_content(&text))],
            document_text: Some(text),
            phase: Some(ExtractionPhase::Extracting),
            ..StateUpdate::default()
        })
    }
}

/// Classification step of the extraction pipeline
pub struct ClassifierStep {
    model: Arc<dyn ChatModel>,
    optimizer: HistoryOptimizer,
    instructions: String,
}

impl ClassifierStep {
    pub fn new(model: Arc<dyn ChatModel>, optimizer: HistoryOptimizer, instructions: String) -> Self {
        Self {
            model,
            optimizer,
            instructions,
        }
    }
}

#[async_trait::async_trait]
impl Node for ClassifierStep {
    async fn run(&self, state: &ConversationState, ctx: &mut RunContext) -> Result<StateUpdate> {
        let optimized = self.optimizer.optimize(&self.instructions, &state.turns);
        let reply =
            invoke_with_fallback(&self.model, &optimized, &self.instructions, &state.turns).await?;

        let decision = PhaseRouter::decide(Some(&reply));
        debug!(
            thread_id = ctx.thread_id(),
            decision = decision.key(),
            invocations = reply.invocations().len(),
            "Classification turn produced"
        );

        Ok(StateUpdate::turn(reply).with_phase(decision.extraction_phase()))
    }
}

/// Question-answering step of the query pipeline
pub struct QaStep {
    model: Arc<dyn ChatModel>,
    optimizer: HistoryOptimizer,
    instructions: String,
}

impl QaStep {
    pub fn new(model: Arc<dyn ChatModel>, optimizer: HistoryOptimizer, instructions: String) -> Self {
        Self {
            model,
            optimizer,
            instructions,
        }
    }
}

#[async_trait::async_trait]
impl Node for QaStep {
    async fn run(&self, state: &ConversationState, ctx: &mut RunContext) -> Result<StateUpdate> {
        let optimized = self.optimizer.optimize(&self.instructions, &state.turns);
        let reply =
            invoke_with_fallback(&self.model, &optimized, &self.instructions, &state.turns).await?;

        debug!(
            thread_id = ctx.thread_id(),
            invocations = reply.invocations().len(),
            "Answer turn produced"
        );

        Ok(StateUpdate::turn(reply))
    }
}

/// Executes the invocations of the latest assistant turn through the run's
/// rate-limited dispatcher.
pub struct ToolStep {
    key: &'static str,
    registry: Arc<ToolRegistry>,
    min_interval: Duration,
    phase_after: Option<ExtractionPhase>,
}

impl ToolStep {
    pub fn new(key: &'static str, registry: Arc<ToolRegistry>, min_interval: Duration) -> Self {
        Self {
            key,
            registry,
            min_interval,
            phase_after: None,
        }
    }

    /// Phase recorded once results have been appended
    pub fn with_phase_after(mut self, phase: ExtractionPhase) -> Self {
        self.phase_after = Some(phase);
        self
    }
}

#[async_trait::async_trait]
impl Node for ToolStep {
    async fn run(&self, state: &ConversationState, ctx: &mut RunContext) -> Result<StateUpdate> {
        let Some(last) = state.last_turn() else {
            return Ok(StateUpdate::none());
        };

        let results = ctx
            .dispatcher(self.key, &self.registry, self.min_interval)
            .dispatch(last)
            .await?;

        let mut update = StateUpdate::turns(results);
        if !update.turns.is_empty() {
            update.phase = self.phase_after;
        }
        Ok(update)
    }
}
