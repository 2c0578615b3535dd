//! HTTP-backed finance tools
//!
//! Each tool maps to one endpoint of the finance service that owns the
//! accounts and transaction tables.

use crate::error::OrchestrationError;
use crate::tools::{Tool, ToolRegistry};
use crate::Result;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct FinanceApiClient {
    client: Client,
    base_url: String,
}

impl FinanceApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn get_json(&self, path: &str) -> Result<Value> {
        self.request_json(Method::GET, path, None).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        self.request_json(Method::POST, path, Some(body)).await
    }

    async fn request_json(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            OrchestrationError::ToolError(format!(
                "Finance API request failed for {}: {}",
                path, e
            ))
        })?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| OrchestrationError::ToolError(format!("Invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(OrchestrationError::ToolError(format!(
                "Finance API returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

/// A tool that posts its argument object to one finance endpoint.
pub struct FinanceEndpointTool {
    name: &'static str,
    description: &'static str,
    path: &'static str,
    parameters: Value,
    api: Option<FinanceApiClient>,
}

impl FinanceEndpointTool {
    fn new(
        name: &'static str,
        description: &'static str,
        path: &'static str,
        parameters: Value,
        api: Option<FinanceApiClient>,
    ) -> Self {
        Self {
            name,
            description,
            path,
            parameters,
            api,
        }
    }
}

fn ensure_object_arguments(arguments: &Value) -> Result<()> {
    if arguments.is_object() {
        Ok(())
    } else {
        Err(OrchestrationError::InvalidToolInput(
            "tool arguments must be a JSON object".to_string(),
        ))
    }
}

fn ensure_required(arguments: &Value, schema: &Value) -> Result<()> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };

    let missing: Vec<&str> = required
        .iter()
        .filter_map(Value::as_str)
        .filter(|key| arguments.get(*key).map_or(true, Value::is_null))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(OrchestrationError::InvalidToolInput(format!(
            "missing required argument(s): {}",
            missing.join(", ")
        )))
    }
}

#[async_trait::async_trait]
impl Tool for FinanceEndpointTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value> {
        let api = self.api.as_ref().ok_or_else(|| {
            OrchestrationError::ToolError("FINANCE_API_BASE_URL is not configured".to_string())
        })?;

        ensure_object_arguments(arguments)?;
        ensure_required(arguments, &self.parameters)?;

        api.post_json(self.path, arguments).await
    }
}

/// Create a registry with the finance tools.
pub fn create_finance_registry(api: Option<FinanceApiClient>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(FinanceEndpointTool::new(
        "insert_movement",
        "Insert one transaction (movement) into the ledger",
        "/api/v1/movements",
        json!({
            "type": "object",
            "properties": {
                "date": {"type": "string", "description": "Movement date (YYYY-MM-DD)"},
                "amount": {"type": "number", "description": "Transaction amount"},
                "description": {"type": "string", "description": "Movement description"},
                "type": {"type": "string", "description": "Transaction type (Debito, Ingreso, ...)"},
                "spendType": {"type": "string", "description": "Spend category"},
                "origin": {"type": "string", "description": "Id of the origin account"}
            },
            "required": ["date", "amount", "description", "origin"]
        }),
        api.clone(),
    )));

    registry.register(Arc::new(FinanceEndpointTool::new(
        "get_latest_movements",
        "Return the most recent movements",
        "/api/v1/movements/latest",
        json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "description": "How many movements to return", "default": 5}
            }
        }),
        api.clone(),
    )));

    registry.register(Arc::new(FinanceEndpointTool::new(
        "get_movements_by_keyword",
        "Search movements whose description contains a keyword",
        "/api/v1/movements/search",
        json!({
            "type": "object",
            "properties": {
                "keyword": {"type": "string", "description": "Keyword to look for in the description"},
                "limit": {"type": "integer", "description": "Maximum movements to return", "default": 5}
            },
            "required": ["keyword"]
        }),
        api.clone(),
    )));

    registry.register(Arc::new(FinanceEndpointTool::new(
        "get_total_by_category",
        "Total amount spent in one spend category between two dates",
        "/api/v1/movements/total-by-category",
        json!({
            "type": "object",
            "properties": {
                "category": {"type": "string", "description": "Exact spend category name"},
                "startDate": {"type": "string", "description": "Start date (YYYY-MM-DD)"},
                "endDate": {"type": "string", "description": "End date (YYYY-MM-DD)"}
            },
            "required": ["category", "startDate", "endDate"]
        }),
        api.clone(),
    )));

    registry.register(Arc::new(FinanceEndpointTool::new(
        "get_movements_by_date_range",
        "List movements between two dates, oldest first",
        "/api/v1/movements/range",
        json!({
            "type": "object",
            "properties": {
                "startDate": {"type": "string", "description": "Start date (YYYY-MM-DD)"},
                "endDate": {"type": "string", "description": "End date (YYYY-MM-DD)"}
            },
            "required": ["startDate", "endDate"]
        }),
        api.clone(),
    )));

    registry.register(Arc::new(FinanceEndpointTool::new(
        "get_account_balance",
        "Current balance of an account, loan or credit card",
        "/api/v1/accounts/balance",
        json!({
            "type": "object",
            "properties": {
                "account": {"type": "string", "description": "Account id or name"}
            },
            "required": ["account"]
        }),
        api,
    )));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_contents() {
        let registry = create_finance_registry(None);
        assert_eq!(
            registry.list(),
            vec![
                "get_account_balance",
                "get_latest_movements",
                "get_movements_by_date_range",
                "get_movements_by_keyword",
                "get_total_by_category",
                "insert_movement",
            ]
        );
    }

    #[test]
    fn test_required_arguments() {
        let schema = json!({"required": ["date", "amount"]});
        assert!(ensure_required(&json!({"date": "2025-01-01", "amount": 5}), &schema).is_ok());

        let err = ensure_required(&json!({"date": "2025-01-01", "amount": null}), &schema)
            .unwrap_err()
            .to_string();
        assert!(err.contains("amount"));
    }

    #[tokio::test]
    async fn test_unconfigured_api_is_tool_error() {
        let registry = create_finance_registry(None);
        let tool = registry.get("get_latest_movements").unwrap();
        let result = tool.invoke(&json!({"limit": 3})).await;
        assert!(matches!(result, Err(OrchestrationError::ToolError(_))));
    }

    #[tokio::test]
    async fn test_non_object_arguments_rejected() {
        let api = FinanceApiClient::new("http://127.0.0.1:9").unwrap();
        let registry = create_finance_registry(Some(api));
        let tool = registry.get("get_latest_movements").unwrap();
        let result = tool.invoke(&json!([1, 2])).await;
        assert!(matches!(result, Err(OrchestrationError::InvalidToolInput(_))));
    }
}
