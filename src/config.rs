//! Application configuration loaded from the environment / `.env`

use crate::error::OrchestrationError;
use crate::llm::openai::DEFAULT_BASE_URL;
use crate::Result;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub classifier_model: String,
    pub qa_model: String,
    pub mistral_api_key: Option<String>,
    pub finance_api_base_url: Option<String>,
    pub catalog_path: Option<String>,
    pub database_url: Option<String>,
    pub tool_min_interval: Duration,
    pub qa_max_messages: usize,
    pub max_graph_steps: usize,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            classifier_model: "gpt-4o".to_string(),
            qa_model: "gpt-4o-mini".to_string(),
            mistral_api_key: None,
            finance_api_base_url: None,
            catalog_path: None,
            database_url: None,
            tool_min_interval: Duration::from_millis(500),
            qa_max_messages: 12,
            max_graph_steps: 25,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let tool_min_interval = match get("TOOL_MIN_INTERVAL_MS") {
            Some(raw) => Duration::from_millis(parse_number("TOOL_MIN_INTERVAL_MS", &raw)?),
            None => defaults.tool_min_interval,
        };

        let qa_max_messages = match get("QA_MAX_MESSAGES") {
            Some(raw) => parse_number("QA_MAX_MESSAGES", &raw)?,
            None => defaults.qa_max_messages,
        };

        let max_graph_steps: usize = match get("MAX_GRAPH_STEPS") {
            Some(raw) => parse_number("MAX_GRAPH_STEPS", &raw)?,
            None => defaults.max_graph_steps,
        };
        if max_graph_steps == 0 {
            return Err(OrchestrationError::ConfigError(
                "MAX_GRAPH_STEPS must be at least 1".to_string(),
            ));
        }

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => parse_number("PORT", &raw)?,
            None => defaults.port,
        };

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY").unwrap_or_default(),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            classifier_model: get("CLASSIFIER_MODEL").unwrap_or(defaults.classifier_model),
            qa_model: get("QA_MODEL").unwrap_or(defaults.qa_model),
            mistral_api_key: get("MISTRAL_API_KEY"),
            finance_api_base_url: get("FINANCE_API_BASE_URL"),
            catalog_path: get("CATALOG_PATH"),
            database_url: get("DATABASE_URL").or_else(|| get("POSTGRES_URL")),
            tool_min_interval,
            qa_max_messages,
            max_graph_steps,
            port,
        })
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>().map_err(|_| {
        OrchestrationError::ConfigError(format!("{} must be a non-negative integer, got {:?}", key, raw))
    })
}
