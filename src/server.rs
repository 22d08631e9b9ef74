//! HTTP read/trigger boundary.
//!
//! Exposes the two contracts UI and scheduler collaborators depend on:
//! polling a scope's joined status, and triggering a sync. Everything else
//! (rendering, polling cadence, auth) lives with the callers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check (returns version) |
//! | `GET`  | `/scopes` | List configured scopes |
//! | `GET`  | `/scopes/{scope}/status` | Joined job + run + progress + counts |
//! | `POST` | `/scopes/{scope}/sync` | Enqueue a sync job for the scope |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "already_running", "message": "..." } }
//! ```
//!
//! Error codes: `already_running` (409), `unknown_scope` (404),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based status
//! widgets can poll directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::error::SyncError;
use crate::ledger;
use crate::status::scope_status;

/// Shared state for all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
}

/// Start the status server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(config: &Config, pool: SqlitePool) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/scopes", get(list_scopes))
        .route("/scopes/{scope}/status", get(get_status))
        .route("/scopes/{scope}/sync", post(trigger_sync))
        .layer(cors)
        .with_state(state);

    info!(bind = %bind_addr, "status server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_scopes(State(state): State<AppState>) -> impl IntoResponse {
    let scopes: Vec<_> = state
        .config
        .scopes
        .iter()
        .map(|(id, cfg)| {
            json!({
                "scope_id": id,
                "connector": cfg.connector,
                "workspace": cfg.workspace,
            })
        })
        .collect();
    Json(json!({ "scopes": scopes }))
}

async fn get_status(
    State(state): State<AppState>,
    Path(scope): Path<String>,
) -> Response {
    match scope_status(&state.pool, &scope).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            &e.to_string(),
        ),
    }
}

async fn trigger_sync(
    State(state): State<AppState>,
    Path(scope): Path<String>,
) -> Response {
    let Some(scope_cfg) = state.config.scopes.get(&scope) else {
        return error_response(
            StatusCode::NOT_FOUND,
            "unknown_scope",
            &format!("scope '{}' is not configured", scope),
        );
    };
    let kind = match scope_cfg.connector_kind() {
        Ok(kind) => kind,
        Err(e) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", &e.to_string())
        }
    };

    match ledger::enqueue(&state.pool, &scope_cfg.workspace, &scope, kind).await {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(json!({ "job_id": job.id, "status": job.status })),
        )
            .into_response(),
        Err(SyncError::AlreadyRunning { .. }) => error_response(
            StatusCode::CONFLICT,
            "already_running",
            &format!("a sync job is already running for scope '{}'", scope),
        ),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            &e.to_string(),
        ),
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "code": code, "message": message } })),
    )
        .into_response()
}
