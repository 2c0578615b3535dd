//! Finance assistant graph
//!
//! router ─┬─ extraction ─ classifier ⇄ tools
//!         └─ qa ⇄ tools_qa

pub mod steps;

use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::extraction::{DocumentExtractor, MistralOcrExtractor};
use crate::graph::{CompiledGraph, GraphBuilder, END};
use crate::llm::{ChatModel, OpenAiChatModel};
use crate::memory::{build_checkpointer, Checkpointer, HistoryOptimizer, OptimizerConfig};
use crate::models::{ExtractionPhase, Route, Turn};
use crate::phase::{tools_condition, PhaseRouter};
use crate::prompts::{classification_prompt, qa_prompt};
use crate::tools::{create_finance_registry, FinanceApiClient, ToolRegistry};
use crate::Result;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use steps::{ClassifierStep, ExtractionStep, QaStep, RouterStep, ToolStep};

pub const ROUTER: &str = "router";
pub const EXTRACTION: &str = "extraction";
pub const CLASSIFIER: &str = "classifier";
pub const TOOLS: &str = "tools";
pub const QA: &str = "qa";
pub const TOOLS_QA: &str = "tools_qa";

/// Window for the classification step. The statement and every insert
/// pair must stay visible, and statement text is never compressed.
const CLASSIFIER_WINDOW: usize = 100;

/// Collaborators and limits the finance graph is built from
pub struct FinanceGraphParts {
    pub classifier_model: Arc<dyn ChatModel>,
    pub qa_model: Arc<dyn ChatModel>,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub registry: Arc<ToolRegistry>,
    pub catalog: Catalog,
    pub checkpointer: Arc<dyn Checkpointer>,
    pub min_interval: Duration,
    pub qa_max_messages: usize,
    pub max_steps: usize,
}

pub fn build_finance_graph(parts: FinanceGraphParts) -> Result<CompiledGraph> {
    let today = Local::now().date_naive();

    let classifier = ClassifierStep::new(
        parts.classifier_model,
        HistoryOptimizer::with_config(OptimizerConfig {
            max_messages: CLASSIFIER_WINDOW,
            compress_threshold: None,
            ..OptimizerConfig::default()
        }),
        classification_prompt(&parts.catalog, today),
    );

    let qa = QaStep::new(
        parts.qa_model,
        HistoryOptimizer::with_config(OptimizerConfig {
            max_messages: parts.qa_max_messages,
            ..OptimizerConfig::default()
        }),
        qa_prompt(&parts.catalog, today),
    );

    let tools = ToolStep::new(TOOLS, Arc::clone(&parts.registry), parts.min_interval)
        .with_phase_after(ExtractionPhase::Verifying);
    let tools_qa = ToolStep::new(TOOLS_QA, Arc::clone(&parts.registry), parts.min_interval);

    GraphBuilder::new()
        .add_node(ROUTER, Arc::new(RouterStep))
        .add_node(EXTRACTION, Arc::new(ExtractionStep::new(parts.extractor)))
        .add_node(CLASSIFIER, Arc::new(classifier))
        .add_node(TOOLS, Arc::new(tools))
        .add_node(QA, Arc::new(qa))
        .add_node(TOOLS_QA, Arc::new(tools_qa))
        .set_entry(ROUTER)
        .add_conditional_edges(
            ROUTER,
            |s| s.next.unwrap_or(Route::Question).key(),
            &[
                (Route::Extraction.key(), EXTRACTION),
                (Route::Question.key(), QA),
            ],
        )
        .add_conditional_edges(
            EXTRACTION,
            // A statement turn means text was extracted; anything else ends the run
            |s| match s.last_turn() {
                Some(Turn::User { .. }) => "classify",
                _ => "end",
            },
            &[("classify", CLASSIFIER), ("end", END)],
        )
        .add_conditional_edges(
            CLASSIFIER,
            |s| PhaseRouter::decide(s.last_turn()).key(),
            &[("tools", TOOLS), ("end", END)],
        )
        .add_edge(TOOLS, CLASSIFIER)
        .add_conditional_edges(
            QA,
            |s| tools_condition(s.last_turn()).key(),
            &[("tools", TOOLS_QA), ("end", END)],
        )
        .add_edge(TOOLS_QA, QA)
        .compile(parts.checkpointer, parts.max_steps)
}

/// Wire the real collaborators described by `config`.
pub async fn build_from_config(config: &AppConfig) -> Result<CompiledGraph> {
    let finance_api = config
        .finance_api_base_url
        .as_deref()
        .map(FinanceApiClient::new)
        .transpose()?;

    let registry = Arc::new(create_finance_registry(finance_api.clone()));
    let definitions = registry.definitions();

    let classifier_model = OpenAiChatModel::new(
        config.openai_api_key.clone(),
        &config.openai_base_url,
        config.classifier_model.clone(),
    )?
    .with_tools(definitions.clone());

    let qa_model = OpenAiChatModel::new(
        config.openai_api_key.clone(),
        &config.openai_base_url,
        config.qa_model.clone(),
    )?
    .with_tools(definitions);

    let extractor = MistralOcrExtractor::new(config.mistral_api_key.clone().unwrap_or_default())?;
    let catalog = Catalog::load(config.catalog_path.as_deref(), finance_api.as_ref()).await;
    let checkpointer = build_checkpointer(config.database_url.as_deref());

    info!(
        tools = registry.len(),
        catalog_entries = catalog.entries().len(),
        classifier_model = %config.classifier_model,
        qa_model = %config.qa_model,
        "Finance graph components ready"
    );

    build_finance_graph(FinanceGraphParts {
        classifier_model: Arc::new(classifier_model),
        qa_model: Arc::new(qa_model),
        extractor: Arc::new(extractor),
        registry,
        catalog,
        checkpointer,
        min_interval: config.tool_min_interval,
        qa_max_messages: config.qa_max_messages,
        max_steps: config.max_graph_steps,
    })
}
