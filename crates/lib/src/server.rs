//! Callback listener server (HTTP, single port).
//!
//! Owns the inbound endpoint the platform POSTs event callbacks to, answers
//! the url_verification handshake, checks the verification token, and feeds
//! decoded callbacks to the event router. The platform is acknowledged
//! immediately; all business logic runs in detached tasks.

use crate::bot::LarkBot;
use crate::config::{self, Config};
use crate::engine::ProcessEngine;
use crate::lark::LarkClient;
use crate::router::EventRouter;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared state for the listener (router and callback verification).
#[derive(Clone)]
struct BotState {
    router: Arc<EventRouter>,
    /// When Some, callbacks must carry a matching `token` field.
    verification_token: Option<String>,
    port: u16,
    message_path: String,
}

/// Run the bot: construct the Lark client, engine, and router from config,
/// then serve the callback endpoint until shutdown (e.g. Ctrl+C).
/// A bind failure is fatal; the caller logs it and terminates.
pub async fn run_bot(config: Config) -> Result<()> {
    let lark = &config.communications.lark;
    let app_id = config::resolve_app_id(&config)
        .context("lark app id not configured (communications.lark.appId or LARKOPS_APP_ID)")?;
    let app_secret = config::resolve_app_secret(&config).context(
        "lark app secret not configured (communications.lark.appSecret or LARKOPS_APP_SECRET)",
    )?;
    let message_path = lark.message_path.clone();
    if !message_path.starts_with('/') {
        anyhow::bail!("communications.lark.messagePath must start with '/': {}", message_path);
    }

    let client = Arc::new(LarkClient::new(lark.endpoint.clone(), app_id, app_secret));
    let engine = Arc::new(ProcessEngine::new(config.executor.clone()));
    let bot = Arc::new(LarkBot::new(&config.settings, client, engine));
    let router = Arc::new(bot.router());

    if config.executor.command.is_none() {
        log::warn!("no executor configured; commands will be answered with a hint");
    }

    let state = BotState {
        router,
        verification_token: config::resolve_verification_token(&config),
        port: lark.port,
        message_path: message_path.clone(),
    };

    let app = Router::new()
        .route("/", get(health_http))
        .route(&message_path, post(event_callback))
        .with_state(state);

    let bind_addr = format!("{}:{}", lark.bind.trim(), lark.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("lark bot listening on {}{}", bind_addr, message_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("listener server exited")?;
    log::info!("lark bot stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// POST {message_path} — receives a platform callback. Answers the
/// url_verification handshake, verifies the token when configured, then
/// routes the event and acknowledges regardless of whether the event was
/// recognized or well-formed.
async fn event_callback(
    State(state): State<BotState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(json!({}))),
    };
    if let Some(ref expected) = state.verification_token {
        let provided = raw.get("token").and_then(Value::as_str).unwrap_or("");
        if provided != expected.as_str() {
            log::warn!("callback with invalid verification token, rejecting");
            return (StatusCode::FORBIDDEN, Json(json!({})));
        }
    }
    if raw.get("type").and_then(Value::as_str) == Some("url_verification") {
        let challenge = raw.get("challenge").cloned().unwrap_or(Value::Null);
        return (StatusCode::OK, Json(json!({ "challenge": challenge })));
    }
    let request_id = headers
        .get("X-Request-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    log::info!("received callback (request {})", request_id);
    log::debug!("callback payload (request {}): {}", request_id, raw);
    state.router.dispatch(&request_id, raw);
    (StatusCode::OK, Json(json!({})))
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<BotState>) -> Json<Value> {
    Json(json!({
        "runtime": "running",
        "port": state.port,
        "messagePath": state.message_path,
    }))
}
