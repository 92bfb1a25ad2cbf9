//! HTTP API gateway for Lantern.
//!
//! Exposes the chat operation, cancellation and stored chats to a local front
//! end. Built on Axum.

pub mod api;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, header};
use axum::{
    Router,
    extract::State,
    response::Json,
    routing::{get, post},
};
use lantern_config::AppConfig;
use lantern_context::{ContextBudgetManager, ContextLimits};
use lantern_runtime::{ChatService, Scheduler};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub service: Arc<ChatService>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ask", post(api::ask_handler))
        .route("/stop", post(api::stop_handler))
        .route("/chats", get(api::list_chats_handler))
        .route("/chats/{id}", get(api::get_chat_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire tokenizer, budget manager, store and scheduler into a chat service.
pub fn build_service(config: &AppConfig) -> Result<ChatService, Box<dyn std::error::Error>> {
    let tokenizer = lantern_engine::build_tokenizer(&config.engine)?;
    let budget = ContextBudgetManager::new(tokenizer, ContextLimits::from(&config.context));
    let store = lantern_store::open_store(&config.store)?;
    let scheduler = Arc::new(Scheduler::from_config(&config.worker)?);

    info!(
        engine = %config.engine.kind,
        model = %config.engine.model,
        effective_context = budget.effective_context(),
        store = store.name(),
        "Chat service ready"
    );

    Ok(ChatService::new(
        scheduler,
        budget,
        store,
        config.chat.clone(),
        config.context.desired_output_tokens,
    ))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let service = Arc::new(build_service(&config)?);
    let app = build_router(
        Arc::new(GatewayState { service }),
        config.gateway.max_body_bytes,
    );

    info!(address = %addr, "Gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Request id of the worker currently generating
    pub in_flight: Option<String>,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        in_flight: state.service.scheduler().in_flight().await,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::time::Duration;

    use lantern_config::ChatConfig;
    use lantern_engine::{ChatTemplate, HeuristicTokenizer};
    use lantern_runtime::WorkerCommand;
    use lantern_store::InMemoryStore;

    use super::*;

    /// Sleeps on "slow", otherwise replies "pong".
    const ENGINE: &str = r#"
if grep -q slow "$2"; then exec sleep 30; fi
printf '{"status":"success","text":"pong","metadata":{"engine":"sh","duration_ms":2}}' > "$4"
"#;

    pub fn state(dir: &Path) -> SharedState {
        let command = WorkerCommand::new("sh", vec!["-c".into(), ENGINE.into(), "worker".into()]);
        let scheduler = Arc::new(Scheduler::new(command, dir, Duration::from_secs(2)));
        let budget = ContextBudgetManager::new(
            Arc::new(HeuristicTokenizer::new(ChatTemplate::ChatML)),
            ContextLimits::default(),
        );
        let service = ChatService::new(
            scheduler,
            budget,
            Arc::new(InMemoryStore::new()),
            ChatConfig::default(),
            8000,
        );
        Arc::new(GatewayState {
            service: Arc::new(service),
        })
    }

    pub fn router(dir: &Path) -> Router {
        build_router(state(dir), 1024 * 1024)
    }
}
