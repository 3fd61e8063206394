use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use relay::{parse_http_url, relay_conversation, HttpInterpreter, RelayContext, RelayOutcome};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{ChatReply, ChatRequest},
};
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::load_settings;

const MAX_CHAT_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let endpoint = parse_http_url(&settings.upstream_url).context("upstream_url")?;
    let interpreter = HttpInterpreter::new(
        endpoint.clone(),
        Duration::from_secs(settings.upstream_timeout_secs),
    )?;
    let relay =
        RelayContext::new(Arc::new(interpreter)).with_fallback_message(settings.fallback_message);
    let shutdown = CancellationToken::new();

    let state = AppState {
        relay,
        shutdown: shutdown.clone(),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.bind_addr))?;
    info!(%addr, upstream = %endpoint, "relay listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await?;
    info!("relay stopped");
    Ok(())
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to install ctrl-c handler; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested; cancelling in-flight relays");
    shutdown.cancel();
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/chat", post(chat))
        .layer(RequestBodyLimitLayer::new(MAX_CHAT_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Fail-soft: an upstream failure still answers with a renderable assistant
/// message, only the status code changes.
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<(StatusCode, Json<ChatReply>), (StatusCode, Json<ApiError>)> {
    let cancel = state.shutdown.child_token();
    let outcome = relay_conversation(&state.relay, &req.messages, &cancel)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(e)))?;

    match outcome {
        RelayOutcome::Reply(envelope) => {
            let status = if envelope.is_success() {
                StatusCode::OK
            } else {
                warn!(status = ?envelope.status, "answering chat request with fallback message");
                StatusCode::INTERNAL_SERVER_ERROR
            };
            Ok((status, Json(envelope.into_chat_reply())))
        }
        RelayOutcome::Cancelled => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(
                ErrorCode::Unavailable,
                "relay is shutting down",
            )),
        )),
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
