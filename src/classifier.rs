//! Entry Router
//!
//! Classifies the newest user turn as either:
//! - a document reference (bank statement file) → extraction pipeline
//! - a question → query pipeline

use crate::models::{Role, Route, Turn};

/// Static extension list, zero allocation
const DOCUMENT_EXTENSIONS: &[&str] = &[".pdf", ".png", ".jpg"];

/// Entry router
pub struct EntryRouter;

impl EntryRouter {
    /// Route a single user input
    pub fn classify(input: &str) -> Route {
        let normalized = input.trim().to_lowercase();

        if DOCUMENT_EXTENSIONS
            .iter()
            .any(|ext| normalized.ends_with(ext))
        {
            Route::Extraction
        } else {
            Route::Question
        }
    }

    /// Route the newest user turn of a history. No user turn falls back to the question path.
    pub fn route(turns: &[Turn]) -> Route {
        turns
            .iter()
            .rev()
            .find(|t| t.role() == Role::User)
            .map(|t| Self::classify(t.content()))
            .unwrap_or(Route::Question)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_references() {
        let cases = vec![
            "statement.pdf",
            "/home/me/Extracto_Junio.PDF",
            "scan.png",
            "photo.JPG",
            "  https://bank.example/files/enero.pdf  ",
        ];

        for c in cases {
            assert_eq!(EntryRouter::classify(c), Route::Extraction, "{}", c);
        }
    }

    #[test]
    fn test_questions() {
        let cases = vec![
            "What is my balance?",
            "¿Cuánto gasté en transporte?",
            "statement.pdf please",
            "photo.jpeg",
            "",
        ];

        for c in cases {
            assert_eq!(EntryRouter::classify(c), Route::Question, "{}", c);
        }
    }

    #[test]
    fn test_route_uses_latest_user_turn() {
        let turns = vec![
            Turn::user("statement.pdf"),
            Turn::assistant("Processing completed. Final summary: 3 movements"),
            Turn::user("What is my balance?"),
        ];
        assert_eq!(EntryRouter::route(&turns), Route::Question);
    }

    #[test]
    fn test_empty_history_routes_to_question() {
        assert_eq!(EntryRouter::route(&[]), Route::Question);
    }
}
