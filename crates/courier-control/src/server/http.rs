//! HTTP JSON control server.
//!
//! Disabled when `http_listen` is empty. When an API key is configured every
//! request must carry `Authorization: Bearer <key>`.
//!
//! - `GET /v1/status` → `{running, error, deploymentId, ...}`
//! - `POST /v1/start` with optional `{"token": "..."}` → `{ok, error?}`
//! - `POST /v1/stop` → `{ok, wasRunning}`

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::info;

use courier_types::{StartResult, StopResult};

use crate::command::{ControlCommand, ControlResponse};
use crate::server::handler::handle_command;
use crate::server::{wait_for_shutdown, CommandTx, StatusSource};

struct AppState {
    command_tx: CommandTx,
    status: Arc<dyn StatusSource>,
    api_key: String,
}

/// Serve until `shutdown` is set.
pub async fn serve(
    listen_addr: String,
    command_tx: CommandTx,
    status: Arc<dyn StatusSource>,
    api_key: String,
    shutdown: Arc<AtomicBool>,
) -> Result<(), String> {
    let addr: SocketAddr = listen_addr
        .parse()
        .map_err(|e| format!("invalid listen address {listen_addr:?}: {e}"))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("failed to bind {addr}: {e}"))?;
    info!(addr = %addr, auth = !api_key.is_empty(), "HTTP control server listening");

    axum::serve(listener, router(command_tx, status, api_key))
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await
        .map_err(|e| format!("HTTP server error: {e}"))
}

fn router(command_tx: CommandTx, status: Arc<dyn StatusSource>, api_key: String) -> Router {
    let state = Arc::new(AppState {
        command_tx,
        status,
        api_key,
    });
    Router::new()
        .route("/v1/status", get(status_handler))
        .route("/v1/start", post(start_handler))
        .route("/v1/stop", post(stop_handler))
        .with_state(state)
}

/// Constant-time comparison of the bearer token.
fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    if state.api_key.is_empty() {
        return Ok(());
    }

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let expected = format!("Bearer {}", state.api_key);

    let matches = provided.len() == expected.len()
        && bool::from(provided.as_bytes().ct_eq(expected.as_bytes()));
    if !matches {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ControlResponse::error("invalid or missing API key")),
        )
            .into_response());
    }
    Ok(())
}

async fn status_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    Json(state.status.status()).into_response()
}

#[derive(Debug, Default, Deserialize)]
struct StartBody {
    #[serde(default)]
    token: Option<String>,
}

async fn start_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<StartBody>>,
) -> Response {
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let token = body.and_then(|Json(b)| b.token);
    let resp = handle_command(
        &state.command_tx,
        state.status.as_ref(),
        ControlCommand::Start { token },
    )
    .await;
    let result = resp
        .data_as::<StartResult>()
        .unwrap_or_else(|| StartResult::failed(resp.message.clone()));
    Json(result).into_response()
}

async fn stop_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let resp = handle_command(&state.command_tx, state.status.as_ref(), ControlCommand::Stop).await;
    match resp.data_as::<StopResult>() {
        Some(result) => Json(result).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, Json(resp)).into_response(),
    }
}
