//! Document extraction (OCR)
//!
//! Turns a document reference (local path or http URL) into page-separated
//! markdown text.

use crate::error::OrchestrationError;
use crate::Result;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

pub const MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";
pub const OCR_MODEL: &str = "mistral-ocr-latest";

/// Separator placed between the markdown of consecutive pages
pub const PAGE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
}

/// Classify a reference by its extension, ignoring any URL query string.
pub fn document_kind(reference: &str) -> Option<DocumentKind> {
    let path = reference.trim().split('?').next().unwrap_or_default();
    match extension_of(path).as_str() {
        "pdf" => Some(DocumentKind::Pdf),
        "png" | "jpg" | "jpeg" => Some(DocumentKind::Image),
        _ => None,
    }
}

/// Lowercased trailing extension, empty when there is none
pub fn extension_of(reference: &str) -> String {
    reference
        .trim()
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

#[async_trait::async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, reference: &str) -> Result<String>;
}

/// Mistral OCR over HTTP
pub struct MistralOcrExtractor {
    client: Client,
    api_key: String,
    base_url: String,
}

impl MistralOcrExtractor {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, MISTRAL_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(180))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn upload(&self, path: &str) -> Result<String> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            OrchestrationError::ExtractionError(format!("Cannot read {}: {}", path, e))
        })?;

        let file_name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();

        let form = Form::new()
            .text("purpose", "ocr")
            .part("file", Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let uploaded: UploadedFile = parse_json(response, "file upload").await?;
        info!(file_id = %uploaded.id, "Document uploaded for OCR");
        Ok(uploaded.id)
    }

    async fn signed_url(&self, file_id: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/files/{}/url", self.base_url, file_id))
            .query(&[("expiry", "24")])
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let signed: SignedUrl = parse_json(response, "signed url").await?;
        Ok(signed.url)
    }

    async fn ocr(&self, url: &str, kind: DocumentKind) -> Result<String> {
        let document = match kind {
            DocumentKind::Pdf => json!({"type": "document_url", "document_url": url}),
            DocumentKind::Image => json!({"type": "image_url", "image_url": url}),
        };

        let response = self
            .client
            .post(format!("{}/ocr", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": OCR_MODEL, "document": document }))
            .send()
            .await?;

        let result: OcrResponse = parse_json(response, "ocr").await?;
        Ok(join_pages(&result.pages))
    }
}

#[async_trait::async_trait]
impl DocumentExtractor for MistralOcrExtractor {
    async fn extract(&self, reference: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::ExtractionError(
                "MISTRAL_API_KEY not configured".to_string(),
            ));
        }

        let reference = reference.trim();
        let kind = document_kind(reference).ok_or_else(|| {
            OrchestrationError::ExtractionError(format!(
                "Unsupported file format: {}",
                extension_of(reference)
            ))
        })?;

        let text = if reference.starts_with("http") {
            info!(reference, "Running OCR on remote document");
            self.ocr(reference, kind).await?
        } else {
            info!(reference, "Running OCR on local document");
            let file_id = self.upload(reference).await?;
            let url = self.signed_url(&file_id).await?;
            self.ocr(&url, kind).await?
        };

        info!(chars = text.len(), "Document text extracted");
        Ok(text)
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    stage: &str,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(%status, stage, "OCR API error response: {}", body);
        return Err(OrchestrationError::ExtractionError(format!(
            "OCR {} failed with {}: {}",
            stage, status, body
        )));
    }

    response.json::<T>().await.map_err(|e| {
        OrchestrationError::ExtractionError(format!("Invalid OCR {} response: {}", stage, e))
    })
}

fn join_pages(pages: &[OcrPage]) -> String {
    pages
        .iter()
        .map(|p| p.markdown.as_str())
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<OcrPage>,
}

#[derive(Debug, Deserialize)]
struct OcrPage {
    #[serde(default)]
    markdown: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_kind() {
        assert_eq!(document_kind("statement.PDF"), Some(DocumentKind::Pdf));
        assert_eq!(document_kind("scan.jpeg"), Some(DocumentKind::Image));
        assert_eq!(
            document_kind("https://bank.example/s.png?sig=abc.def"),
            Some(DocumentKind::Image)
        );
        assert_eq!(document_kind("notes.docx"), None);
        assert_eq!(document_kind("What is my balance?"), None);
    }

    #[test]
    fn test_pages_joined_with_blank_line() {
        let response: OcrResponse = serde_json::from_value(json!({
            "pages": [
                {"index": 0, "markdown": "# Page 1"},
                {"index": 1, "markdown": "| date | amount |"}
            ]
        }))
        .unwrap();

        assert_eq!(join_pages(&response.pages), "# Page 1\n\n| date | amount |");
    }

    #[tokio::test]
    async fn test_missing_key_is_extraction_error() {
        let extractor = MistralOcrExtractor::new("").unwrap();
        let result = extractor.extract("statement.pdf").await;
        assert!(matches!(result, Err(OrchestrationError::ExtractionError(_))));
    }

    #[tokio::test]
    async fn test_unsupported_format_rejected() {
        let extractor = MistralOcrExtractor::new("key").unwrap();
        let result = extractor.extract("ledger.xlsx").await;
        assert!(matches!(result, Err(OrchestrationError::ExtractionError(msg)) if msg.contains("xlsx")));
    }
}
