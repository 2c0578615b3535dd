//! Finance Assistant Graph
//!
//! A conversational finance assistant that:
//! - Routes bank statement files to an OCR → classify → insert pipeline
//! - Routes questions to a tool-using question-answering step
//! - Executes tool calls sequentially under a global rate limit
//! - Bounds and repairs message history before every model call
//! - Checkpoints every conversation by thread id
//!
//! FLOW:
//! INPUT → ROUTE → {EXTRACT → CLASSIFY ⇄ TOOLS | ANSWER ⇄ TOOLS} → END

pub mod agent;
pub mod api;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod error;
pub mod execution;
pub mod extraction;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod models;
pub mod phase;
pub mod prompts;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use classifier::EntryRouter;
pub use phase::{PhaseDecision, PhaseRouter};
