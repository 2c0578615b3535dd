//! OpenAI-compatible chat completions client
//!
//! Uses a long-lived reqwest::Client for connection pooling. Works with any
//! endpoint implementing the chat completions API with function tools.

use crate::error::OrchestrationError;
use crate::llm::ChatModel;
use crate::models::{Invocation, Turn};
use crate::tools::ToolDefinition;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat model bound to one model name and an optional tool set
pub struct OpenAiChatModel {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    tools: Vec<ToolDefinition>,
}

impl OpenAiChatModel {
    pub fn new(api_key: impl Into<String>, base_url: &str, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.0,
            tools: Vec::new(),
        })
    }

    /// Advertise these tools on every request
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_request(&self, turns: &[Turn]) -> Result<ChatRequest> {
        let messages = turns
            .iter()
            .map(convert_turn)
            .collect::<Result<Vec<_>>>()?;

        let tools = self
            .tools
            .iter()
            .map(|def| ToolSpec {
                kind: "function",
                function: FunctionSpec {
                    name: def.name.clone(),
                    description: def.description.clone(),
                    parameters: def.parameters.clone(),
                },
            })
            .collect();

        Ok(ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            tools,
        })
    }
}

#[async_trait::async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, turns: &[Turn]) -> Result<Turn> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::LlmError(
                "OPENAI_API_KEY not configured".to_string(),
            ));
        }

        let request = self.build_request(turns)?;
        let url = format!("{}/chat/completions", self.base_url);

        info!(model = %self.model, messages = request.messages.len(), "Calling chat completions API");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Chat completions request failed: {}", e);
                OrchestrationError::LlmError(format!("Chat completions error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Chat completions error response: {}", error_text);
            return Err(OrchestrationError::LlmError(format!(
                "Chat completions returned {}: {}",
                status, error_text
            )));
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            error!("Failed to parse chat completions response: {}", e);
            OrchestrationError::LlmError(format!("Chat completions parse error: {}", e))
        })?;

        let turn = parse_response(body)?;
        debug!(
            model = %self.model,
            invocations = turn.invocations().len(),
            "Model response received"
        );
        Ok(turn)
    }
}

fn convert_turn(turn: &Turn) -> Result<WireMessage> {
    let message = match turn {
        Turn::System { content } => WireMessage::text("system", content),
        Turn::User { content } => WireMessage::text("user", content),
        Turn::Assistant {
            content,
            invocations,
        } => {
            let tool_calls = invocations
                .iter()
                .map(|call| {
                    Ok(WireToolCall {
                        id: call.id.clone(),
                        kind: "function".to_string(),
                        function: WireFunctionCall {
                            name: call.name.clone(),
                            arguments: serde_json::to_string(&call.arguments)?,
                        },
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            WireMessage {
                role: "assistant".to_string(),
                content: if content.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(content.clone())
                },
                tool_calls,
                tool_call_id: None,
            }
        }
        Turn::ToolResult {
            content,
            correlation_id,
            ..
        } => WireMessage {
            role: "tool".to_string(),
            content: Some(content.clone()),
            tool_calls: Vec::new(),
            tool_call_id: Some(correlation_id.clone()),
        },
    };

    Ok(message)
}

fn parse_response(body: ChatResponse) -> Result<Turn> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| OrchestrationError::LlmError("No choices in response".to_string()))?;

    let content = choice.message.content.unwrap_or_default();

    let invocations = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| {
            // Arguments arrive as a JSON-encoded string
            let arguments = if call.function.arguments.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&call.function.arguments).map_err(|e| {
                    OrchestrationError::LlmError(format!(
                        "Invalid arguments for {}: {}",
                        call.function.name, e
                    ))
                })?
            };
            Ok(Invocation::new(call.id, call.function.name, arguments))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Turn::assistant_with_invocations(content, invocations))
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec>,
}

#[derive(Debug, Serialize)]
struct ToolSpec {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionSpec,
}

#[derive(Debug, Serialize)]
struct FunctionSpec {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}
