//! REST API server for the finance assistant
//!
//! Exposes the compiled graph over HTTP. Threads are addressed by the
//! caller's thread id; a new id is issued when none is given.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::OrchestrationError;
use crate::graph::CompiledGraph;
use crate::models::{ConversationState, Turn};

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub thread_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub thread_id: String,
    pub reply: Option<String>,
    pub route: Option<String>,
    pub turns: usize,
}

impl ChatReply {
    fn from_state(state: &ConversationState) -> Self {
        Self {
            thread_id: state.thread_id.clone(),
            reply: state.final_reply().map(str::to_string),
            route: state.next.map(|r| r.to_string()),
            turns: state.turns.len(),
        }
    }
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Error that still carries a payload (e.g. the explanatory reply)
    pub fn failure<T: Serialize>(message: String, data: T) -> Self {
        Self {
            data: serde_json::to_value(data).ok(),
            ..Self::error(message)
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub graph: Arc<CompiledGraph>,
}

fn error_status(err: &OrchestrationError) -> StatusCode {
    match err {
        e if e.is_internal() => StatusCode::INTERNAL_SERVER_ERROR,
        OrchestrationError::StepLimitExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestrationError::StateError(_) | OrchestrationError::DatabaseError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let message = req.message.trim();
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Message must not be empty".into())),
        );
    }

    let thread_id = req
        .thread_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    info!(thread_id = %thread_id, "Received chat message");

    match state.graph.invoke(&thread_id, Turn::user(message)).await {
        Ok(conversation) => (
            StatusCode::OK,
            Json(ApiResponse::success(ChatReply::from_state(&conversation))),
        ),
        Err(e) => {
            warn!(thread_id = %thread_id, error = %e, "Chat run failed");

            // The failed run stored an explanatory turn; hand it back too.
            let stored = state.graph.get_state(&thread_id).await.ok().flatten();
            let reply = stored.as_ref().map(ChatReply::from_state);

            (
                error_status(&e),
                Json(ApiResponse::failure(format!("Chat run failed: {}", e), reply)),
            )
        }
    }
}

async fn get_thread(
    State(state): State<ApiState>,
    Path(thread_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.graph.get_state(&thread_id).await {
        Ok(Some(conversation)) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "thread_id": conversation.thread_id,
                "turns": conversation.turns,
                "phase": conversation.phase,
                "updated_at": conversation.updated_at,
            }))),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Thread {} not found", thread_id))),
        ),
        Err(e) => (
            error_status(&e),
            Json(ApiResponse::error(format!("Failed to load thread: {}", e))),
        ),
    }
}

async fn delete_thread(
    State(state): State<ApiState>,
    Path(thread_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.graph.delete_thread(&thread_id).await {
        Ok(true) => {
            info!(thread_id = %thread_id, "Thread deleted");
            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({ "deleted": thread_id }))),
            )
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Thread {} not found", thread_id))),
        ),
        Err(e) => (
            error_status(&e),
            Json(ApiResponse::error(format!("Failed to delete thread: {}", e))),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(graph: Arc<CompiledGraph>) -> Router {
    let state = ApiState { graph };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/threads/:id", get(get_thread).delete(delete_thread))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    graph: Arc<CompiledGraph>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(graph);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, Node, RunContext, END};
    use crate::memory::InMemoryCheckpointer;
    use crate::models::StateUpdate;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    struct Echo;

    #[async_trait::async_trait]
    impl Node for Echo {
        async fn run(
            &self,
            state: &ConversationState,
            _: &mut RunContext,
        ) -> crate::Result<StateUpdate> {
            let text = state.last_user_turn().map(|t| t.content()).unwrap_or_default();
            Ok(StateUpdate::turn(Turn::assistant(format!("echo: {}", text))))
        }
    }

    fn app() -> Router {
        let graph = GraphBuilder::new()
            .add_node("echo", Arc::new(Echo))
            .set_entry("echo")
            .add_edge("echo", END)
            .compile(Arc::new(InMemoryCheckpointer::new()), 5)
            .unwrap();
        create_router(Arc::new(graph))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn chat(body: &str) -> Request<Body> {
        Request::post("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_chat_issues_thread_and_replies() {
        let response = app()
            .oneshot(chat(r#"{"message": "What is my balance?"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["reply"], "echo: What is my balance?");
        assert_eq!(json["data"]["turns"], 2);
        assert!(!json["data"]["thread_id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let response = app().oneshot(chat(r#"{"message": "   "}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_thread_lifecycle() {
        let app = app();

        let response = app
            .clone()
            .oneshot(chat(r#"{"thread_id": "t-42", "message": "hola"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::get("/api/threads/t-42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["turns"][0]["role"], "user");

        let response = app
            .clone()
            .oneshot(Request::delete("/api/threads/t-42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/api/threads/t-42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
