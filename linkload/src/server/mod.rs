/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! HTTP front end.
//!
//! | Method | Path | Success | Errors |
//! |---|---|---|---|
//! | `POST` | `/execute` | `200 {status: "Queued", exec_id}` | 404 unknown node, 422 bad input, 503 shutting down |
//! | `DELETE` | `/execute/{exec_id}` | `200 {status: "Cancelled", exec_id}` | 409 running, 404 unknown |
//! | `GET` | `/health` | `200 {status: "healthy", timestamp}` | |
//!
//! Error bodies are `{"detail": "<message>"}`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::scheduler::{CancelOutcome, LinkScheduler, SchedulerError};
use crate::workload::{parse_start_time, Workload};

// ── Request / error types ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    destination_node: String,
    bandwidth: String,
    data_amount: String,
    #[serde(default)]
    start_time: Option<String>,
}

#[derive(Debug)]
enum ApiError {
    Scheduler(SchedulerError),
    InvalidStartTime(String),
    Body(String),
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        ApiError::Scheduler(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Scheduler(SchedulerError::UnknownDestination { .. }) => (
                StatusCode::NOT_FOUND,
                "Destination node not found".to_string(),
            ),
            ApiError::Scheduler(e @ SchedulerError::InvalidWorkload(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            ApiError::Scheduler(e @ SchedulerError::ShuttingDown) => {
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            ApiError::InvalidStartTime(input) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("invalid start_time format: '{input}'"),
            ),
            ApiError::Body(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn execute(
    State(scheduler): State<Arc<LinkScheduler>>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::Body(e.body_text()))?;

    let start_time = match req.start_time.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            parse_start_time(raw).ok_or_else(|| ApiError::InvalidStartTime(raw.to_string()))?,
        ),
    };

    let workload = Workload {
        destination_node: req.destination_node,
        bandwidth: req.bandwidth,
        data_amount: req.data_amount,
        start_time,
    };
    let exec_id = scheduler.enqueue(workload).inspect_err(|e| {
        warn!("workload rejected: {e}");
    })?;

    Ok(Json(json!({ "status": "Queued", "exec_id": exec_id })))
}

async fn cancel(
    State(scheduler): State<Arc<LinkScheduler>>,
    Path(exec_id): Path<String>,
) -> Response {
    match scheduler.cancel(&exec_id) {
        CancelOutcome::Removed => (
            StatusCode::OK,
            Json(json!({ "status": "Cancelled", "exec_id": exec_id })),
        )
            .into_response(),
        CancelOutcome::Running => (
            StatusCode::CONFLICT,
            Json(json!({ "detail": "Execution already running" })),
        )
            .into_response(),
        CancelOutcome::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Execution not found" })),
        )
            .into_response(),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "timestamp": Utc::now().to_rfc3339() }))
}

// ── Router / serve ────────────────────────────────────────────────────────────

pub fn router(scheduler: Arc<LinkScheduler>) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/execute/:exec_id", delete(cancel))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(scheduler)
}

/// Serve `app` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP API listening on {}", addr);
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
