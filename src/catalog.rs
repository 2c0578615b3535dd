//! Classification catalog
//!
//! Opaque labels (accounts, transaction types, spend categories) embedded
//! verbatim into step instructions. Loaded once when the graph is built.

use crate::error::OrchestrationError;
use crate::tools::FinanceApiClient;
use crate::Result;
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

/// Finance API resources making up the catalog, with their labels
pub const CATALOG_RESOURCES: [(&str, &str); 3] = [
    ("accounts", "/api/v1/catalog/accounts"),
    ("transaction types", "/api/v1/catalog/transaction-types"),
    ("spend types", "/api/v1/catalog/spend-types"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<String>,
}

impl Catalog {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries joined one per line, as embedded into prompts
    pub fn block(&self) -> String {
        self.entries.join("\n")
    }

    /// Parse catalog text: a JSON array (strings kept as-is, other values
    /// serialized) or, failing that, one entry per non-empty line.
    pub fn parse(raw: &str) -> Self {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) {
            let entries = items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect();
            return Self { entries };
        }

        let entries = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Self { entries }
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            OrchestrationError::ConfigError(format!(
                "Cannot read catalog {}: {}",
                path.display(),
                e
            ))
        })?;

        let catalog = Self::parse(&raw);
        info!(entries = catalog.entries.len(), path = %path.display(), "Catalog loaded from file");
        Ok(catalog)
    }

    /// One entry per catalog resource: its label followed by the JSON body.
    pub async fn from_api(api: &FinanceApiClient) -> Result<Self> {
        let mut entries = Vec::with_capacity(CATALOG_RESOURCES.len());

        for (label, path) in CATALOG_RESOURCES {
            let body = api.get_json(path).await?;
            entries.push(format!("{}: {}", label, body));
        }

        info!(entries = entries.len(), "Catalog loaded from finance API");
        Ok(Self { entries })
    }

    /// File first, then the finance API, else empty.
    pub async fn load(path: Option<&str>, api: Option<&FinanceApiClient>) -> Self {
        if let Some(path) = path {
            match Self::from_file(path).await {
                Ok(catalog) => return catalog,
                Err(e) => warn!("Catalog file unusable: {}", e),
            }
        }

        if let Some(api) = api {
            match Self::from_api(api).await {
                Ok(catalog) => return catalog,
                Err(e) => warn!("Catalog API unreachable: {}", e),
            }
        }

        warn!("No catalog available, prompts will carry an empty catalog");
        Self::default()
    }
}
