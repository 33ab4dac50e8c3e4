//! Memchat HTTP API
//!
//! 启动: cargo run --bin memchat-web --features web
//! 接口:
//! - GET  /api/health
//! - POST /api/chat              {"message": "...", "user_id": "..."}
//! - GET  /api/memories/:user_id ?limit=N

#![cfg(feature = "web")]

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use memchat::agent::{Assistant, SharedAssistant, DEFAULT_LIST_LIMIT};
use memchat::config::load_config;
use memchat::core::{resolve_user_id, Persistence};
use memchat::memory::MemoryRecord;
use memchat::observability;

struct AppState {
    assistant: SharedAssistant,
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    user_id: String,
    memory_written: bool,
    persistence: Persistence,
}

#[derive(Deserialize)]
struct MemoriesQuery {
    limit: Option<usize>,
}

/// 未提供 user_id 的请求各自分配一个临时用户
fn anonymous_user_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("web_user_{}", &id[..8])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_config(None)?;
    if let Err(e) = observability::init(cfg.app.log_file.as_deref()) {
        eprintln!("Warning: could not open log file ({e}), logging to stderr only");
        observability::init(None)?;
    }

    let assistant = match Assistant::from_config(&cfg).await {
        Ok(a) => Arc::new(a),
        Err(e) => {
            tracing::error!("configuration error: {}", e);
            return Err(e.into());
        }
    };

    let state = Arc::new(AppState {
        assistant: Arc::clone(&assistant),
    });

    let app = Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/chat", post(api_chat))
        .route("/api/memories/:user_id", get(api_memories))
        .with_state(state);

    let port = std::env::var("MEMCHAT_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(cfg.web.port);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Memchat API: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    assistant.shutdown().await;
    tracing::info!("Memchat API stopped");
    Ok(())
}

/// POST /api/chat：跑一轮对话；生成失败也返回 200，回复以失败前缀开头
async fn api_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }

    // 回显与存储使用同一个（去空白后的）ID
    let user_id = req
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| resolve_user_id(s).to_string())
        .unwrap_or_else(anonymous_user_id);

    let result = state.assistant.process_message(message, &user_id).await;
    Ok(Json(ChatResponse {
        response: result.response,
        user_id,
        memory_written: result.memory_written,
        persistence: result.persistence,
    }))
}

/// GET /api/memories/:user_id：最近的记忆
async fn api_memories(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(q): Query<MemoriesQuery>,
) -> Result<Json<Vec<MemoryRecord>>, (StatusCode, String)> {
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1);
    state
        .assistant
        .user_memories(&user_id, limit)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::warn!(user_id = %user_id, "listing memories failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use memchat::core::{Backends, TurnConfig};
    use memchat::llm::MockLlmClient;
    use memchat::memory::LocalMemory;

    fn state() -> Arc<AppState> {
        let backends = Backends {
            llm: Arc::new(MockLlmClient),
            memory: Arc::new(LocalMemory::in_memory()),
        };
        Arc::new(AppState {
            assistant: Arc::new(Assistant::from_backends(&backends, TurnConfig::default())),
        })
    }

    fn request(message: &str, user_id: Option<&str>) -> Json<ChatRequest> {
        Json(ChatRequest {
            message: message.to_string(),
            user_id: user_id.map(String::from),
        })
    }

    #[tokio::test]
    async fn test_chat_returns_trimmed_user_id() {
        let state = state();
        let Json(resp) = api_chat(State(Arc::clone(&state)), request("I like tea", Some("  alice  ")))
            .await
            .unwrap();
        assert_eq!(resp.user_id, "alice");
        assert!(resp.memory_written);

        let Json(memories) = api_memories(
            State(state),
            Path(resp.user_id.clone()),
            Query(MemoriesQuery { limit: None }),
        )
        .await
        .unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].owner, "alice");
    }

    #[tokio::test]
    async fn test_chat_anonymous_and_blank_message() {
        let Json(resp) = api_chat(State(state()), request("hello", Some("   ")))
            .await
            .unwrap();
        assert!(resp.user_id.starts_with("web_user_"));
        assert_eq!(resp.user_id.len(), "web_user_".len() + 8);

        let (status, _) = api_chat(State(state()), request("  ", None))
            .await
            .err()
            .unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
