use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use palaver_agent::{AgentConfig, ChatClient, QueryAgent};
use palaver_api::{AppState, AppStateInner, ask, groups, messages, users};
use palaver_db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "palaver=debug,palaver_api=debug,palaver_agent=debug,palaver_db=debug,tower_http=debug"
                .into()
        }))
        .init();

    let db_path = std::env::var("PALAVER_DB_PATH").unwrap_or_else(|_| "palaver.db".to_string());
    let host = std::env::var("PALAVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PALAVER_PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse()?;

    let base_url = std::env::var("PALAVER_LLM_BASE_URL")
        .unwrap_or_else(|_| "https://api.deepseek.com/v1".to_string());
    let api_key = std::env::var("PALAVER_LLM_API_KEY").unwrap_or_default();
    if api_key.is_empty() {
        warn!("PALAVER_LLM_API_KEY is not set; completion requests will fail upstream");
    }

    let config = AgentConfig {
        model: std::env::var("PALAVER_LLM_MODEL").unwrap_or_else(|_| "deepseek-chat".to_string()),
        max_prompt_chars: env_parsed("PALAVER_MAX_PROMPT_CHARS", 6000),
        row_ceiling: env_parsed("PALAVER_ROW_CEILING", 200),
        exec_timeout_ms: env_parsed("PALAVER_EXEC_TIMEOUT_MS", 2000),
        completion_timeout_ms: env_parsed("PALAVER_LLM_TIMEOUT_MS", 20_000),
        retry_bound: env_parsed("PALAVER_RETRY_BOUND", 2),
    };

    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);
    let provider = Arc::new(ChatClient::new(base_url, api_key));
    let agent = QueryAgent::new(Arc::clone(&db), provider, config);
    let state: AppState = Arc::new(AppStateInner { db, agent });

    // Routes
    let app = Router::new()
        .route("/health", get(health))
        .route("/users", post(users::create_user))
        .route("/users", get(users::list_users))
        .route("/groups", post(groups::create_group))
        .route("/groups", get(groups::list_groups))
        .route("/groups/{group_name}/members", post(groups::join_group))
        .route("/groups/{group_name}/messages", post(messages::post_message))
        .route("/groups/{group_name}/messages", get(messages::get_messages))
        .route("/ask", post(ask::ask))
        .route("/schema/refresh", post(ask::refresh_schema))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Palaver server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
