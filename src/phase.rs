//! Phase Router
//!
//! Decides, after every assistant turn, whether the conversation must keep
//! invoking tools or has reached its terminal phase.

use crate::models::{ExtractionPhase, Turn};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseDecision {
    AwaitingTools,
    Terminal,
}

impl PhaseDecision {
    /// Routing key consumed by conditional graph edges
    pub fn key(self) -> &'static str {
        match self {
            PhaseDecision::AwaitingTools => "tools",
            PhaseDecision::Terminal => "end",
        }
    }

    /// Extraction phase implied by this decision
    pub fn extraction_phase(self) -> ExtractionPhase {
        match self {
            PhaseDecision::AwaitingTools => ExtractionPhase::Extracting,
            PhaseDecision::Terminal => ExtractionPhase::Complete,
        }
    }
}

/// Lowercase markers the classification step emits in its final phase.
const COMPLETION_MARKERS: &[&str] = &[
    "processing completed",
    "final summary:",
    "all transactions from the statement",
    "phase 3",
    "procesamiento completado",
    "resumen final:",
    "✅ todas las transacciones",
    "fase 3",
    "finalización completada",
];

pub struct PhaseRouter;

impl PhaseRouter {
    /// Route the turn produced by the classification step
    pub fn decide(turn: Option<&Turn>) -> PhaseDecision {
        let Some(turn) = turn else {
            return PhaseDecision::Terminal;
        };

        if turn.has_invocations() {
            return PhaseDecision::AwaitingTools;
        }

        if Self::has_completion_marker(turn.content()) {
            debug!("Completion marker detected - terminating extraction loop");
            return PhaseDecision::Terminal;
        }

        // Ambiguous turn: end rather than loop.
        debug!("No invocations and no completion marker - terminating extraction loop");
        PhaseDecision::Terminal
    }

    pub fn has_completion_marker(content: &str) -> bool {
        let lowered = content.to_lowercase();
        COMPLETION_MARKERS.iter().any(|m| lowered.contains(m))
    }
}

/// Tool-request check used by the question pipeline.
pub fn tools_condition(turn: Option<&Turn>) -> PhaseDecision {
    match turn {
        Some(turn) if turn.has_invocations() => PhaseDecision::AwaitingTools,
        _ => PhaseDecision::Terminal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Invocation;
    use serde_json::json;

    fn with_call(content: &str) -> Turn {
        Turn::assistant_with_invocations(
            content,
            vec![Invocation::new("call_1", "insert_movement", json!({}))],
        )
    }

    #[test]
    fn test_invocations_always_await_tools() {
        let turn = with_call("Procesamiento completado. Resumen final: 4 movimientos");
        assert_eq!(PhaseRouter::decide(Some(&turn)), PhaseDecision::AwaitingTools);
    }

    #[test]
    fn test_completion_markers_terminate() {
        let cases = vec![
            "Listo. RESUMEN FINAL: 3 transacciones",
            "Processing completed. Final summary: 12 movements",
            "Estamos en FASE 3",
        ];
        for c in cases {
            let turn = Turn::assistant(c);
            assert!(PhaseRouter::has_completion_marker(c), "{}", c);
            assert_eq!(PhaseRouter::decide(Some(&turn)), PhaseDecision::Terminal);
        }
    }

    #[test]
    fn test_ambiguous_turn_fails_safe() {
        let turn = Turn::assistant("Verifying inserts...");
        assert!(!PhaseRouter::has_completion_marker(turn.content()));
        assert_eq!(PhaseRouter::decide(Some(&turn)), PhaseDecision::Terminal);
        assert_eq!(PhaseRouter::decide(None), PhaseDecision::Terminal);
    }

    #[test]
    fn test_tools_condition() {
        assert_eq!(tools_condition(Some(&with_call(""))), PhaseDecision::AwaitingTools);
        assert_eq!(
            tools_condition(Some(&Turn::assistant("Your balance is Q100"))),
            PhaseDecision::Terminal
        );
        assert_eq!(tools_condition(None), PhaseDecision::Terminal);
    }

    #[test]
    fn test_decision_keys() {
        assert_eq!(PhaseDecision::AwaitingTools.key(), "tools");
        assert_eq!(PhaseDecision::Terminal.key(), "end");
        assert_eq!(
            PhaseDecision::Terminal.extraction_phase(),
            ExtractionPhase::Complete
        );
    }
}
