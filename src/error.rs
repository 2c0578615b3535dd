//! Error types for the finance assistant graph

use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Document extraction error: {0}")]
    ExtractionError(String),

    #[error("Graph error: {0}")]
    GraphError(String),

    #[error("Step limit exceeded: {0}")]
    StepLimitExceeded(String),

    #[error("State persistence error: {0}")]
    StateError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Configuration or wiring defects, as opposed to transient runtime failures.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            OrchestrationError::ToolNotFound(_)
                | OrchestrationError::GraphError(_)
                | OrchestrationError::ConfigError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_classification() {
        assert!(OrchestrationError::ToolNotFound("x".into()).is_internal());
        assert!(OrchestrationError::GraphError("x".into()).is_internal());
        assert!(!OrchestrationError::LlmError("timeout".into()).is_internal());
        assert!(!OrchestrationError::ToolError("boom".into()).is_internal());
    }
}
