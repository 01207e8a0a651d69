//! Streaming chat HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer the last message, streamed as it is generated |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `POST /chat` takes `{"messages": [{"role", "content"}...], "source"?: "docs"|"code"|"combined"}`
//! (default source `combined`). The answer is streamed as raw text chunks
//! with `Content-Type: text/event-stream`, `Cache-Control: no-cache` and
//! `X-Accel-Buffering: no`. When the client disconnects the response body is
//! dropped, which drops the upstream model request with it.
//!
//! Errors are JSON: `{ "error": { "code": "bad_request", "message": "..." } }`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{future, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::gateway::{ChatMessage, ModelGateway, OllamaGateway};
use crate::models::Collection;
use crate::rag::{RagService, RagSettings};
use crate::store::{SqliteStore, VectorStore};

#[derive(Clone)]
struct AppState {
    rag: Arc<RagService>,
}

/// Start the server on `[server].bind` with the Ollama gateway and SQLite store.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let gateway: Arc<dyn ModelGateway> = Arc::new(OllamaGateway::new(&config.ollama)?);
    let store: Arc<dyn VectorStore> = Arc::new(SqliteStore::open(config).await?);
    let rag = Arc::new(RagService::new(
        gateway,
        store,
        RagSettings::from_config(config),
    ));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("chat server listening on http://{}", config.server.bind);
    info!(bind = %config.server.bind, "server started");

    axum::serve(listener, router(rag)).await?;
    Ok(())
}

/// Routes with CORS open to all origins.
pub fn router(rag: Arc<RagService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { rag })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatBody {
    messages: Vec<ChatMessage>,
    #[serde(default)]
    source: Option<String>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Response, AppError> {
    let question = body
        .messages
        .last()
        .map(|m| m.content.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| bad_request("messages must end with a non-empty message"))?;

    let source = match body.source.as_deref() {
        Some(s) => s
            .parse::<Collection>()
            .map_err(|e| bad_request(e.to_string()))?,
        None => Collection::Combined,
    };

    let tokens = state.rag.answer_stream(&question, source).await;
    let chunks = tokens
        .take_while(|item| {
            if let Err(e) = item {
                warn!(error = %e, "upstream stream ended with an error");
            }
            future::ready(item.is_ok())
        })
        .filter_map(|item| future::ready(item.ok().map(Bytes::from)))
        .map(Ok::<Bytes, Infallible>);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(chunks))
        .map_err(|e| internal(e.to_string()))
}
