//! API route definitions.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use super::error::ApiError;
use super::state::AppState;
use crate::execution::{JobEvent, LifecycleSnapshot, RunConfig, RunHandle};
use crate::logparse::{self, render};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/runs", post(start_run))
        .route("/runs/stop", post(stop_run))
        .route("/runs/current", get(current_run))
        .route("/runs/current/tree", get(current_run_tree))
        .route("/install", post(start_install))
        .route("/install/stop", post(stop_install))
        .route("/install/current", get(current_install))
        .route("/events", get(events))
        .route("/history", get(list_history))
        .route("/history/stats", get(history_stats))
        .route("/history/{id}", get(get_record).delete(remove_record))
        .route("/history/{id}/tree", get(record_tree))
        .route("/logs/tree", post(build_tree))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

// ---------------------------------------------------------------------------
// Runs and installs
// ---------------------------------------------------------------------------

fn accepted(handle: &RunHandle) -> (StatusCode, Json<Value>) {
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "data": {
                "job": handle.job,
                "label": handle.label,
                "started_at": handle.started_at.to_rfc3339(),
            },
            "meta": { "state": "running" }
        })),
    )
}

fn snapshot_body(snapshot: LifecycleSnapshot) -> Json<Value> {
    let lines = snapshot.live.logs.len();
    Json(json!({ "data": snapshot, "meta": { "lines": lines } }))
}

async fn start_run(
    State(state): State<AppState>,
    Json(config): Json<RunConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = state.runs.start(config).await?;
    Ok(accepted(&handle))
}

async fn stop_run(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let message = state.runs.stop().await?;
    Ok(Json(json!({ "data": { "message": message } })))
}

async fn current_run(State(state): State<AppState>) -> Json<Value> {
    snapshot_body(state.runs.snapshot())
}

async fn current_run_tree(State(state): State<AppState>) -> Json<Value> {
    let logs = state.runs.watch_logs().borrow().logs.clone();
    tree_body(&logs)
}

#[derive(Deserialize)]
struct InstallRequest {
    missing_packages: Vec<String>,
}

async fn start_install(
    State(state): State<AppState>,
    Json(req): Json<InstallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = state.installs.start(req.missing_packages).await?;
    Ok(accepted(&handle))
}

async fn stop_install(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let message = state.installs.stop().await?;
    Ok(Json(json!({ "data": { "message": message } })))
}

async fn current_install(State(state): State<AppState>) -> Json<Value> {
    snapshot_body(state.installs.snapshot())
}

/// Lifecycle events from both jobs as a server-sent event stream.
async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let merged = stream::select(
        event_stream(state.runs.subscribe()),
        event_stream(state.installs.subscribe()),
    );
    Sse::new(merged).keep_alive(KeepAlive::default())
}

fn event_stream(
    rx: broadcast::Receiver<JobEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().json_data(&event) {
                    Ok(sse) => return Some((Ok::<_, Infallible>(sse), rx)),
                    Err(e) => warn!(error = %e, "dropping unserializable event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct HistoryQuery {
    /// Return only the latest `limit` records, newest first.
    limit: Option<usize>,
}

async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Value> {
    let records = match query.limit {
        Some(n) => state.history.recent(n).await,
        None => state.history.list().await,
    };
    let total = records.len();
    Json(json!({ "data": records, "meta": { "total": total } }))
}

async fn history_stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.history.stats().await;
    Json(json!({ "data": stats }))
}

async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .history
        .get(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("no run with id {}", id)))?;
    Ok(Json(json!({ "data": record })))
}

async fn record_tree(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .history
        .get(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("no run with id {}", id)))?;
    Ok(tree_body(&record.raw_logs))
}

async fn remove_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let report = state.history.remove(&id).await.map_err(ApiError::internal)?;
    if !report.removed {
        return Err(ApiError::not_found(format!("no run with id {}", id)));
    }
    let warnings = report.artifact_warnings.len();
    Ok(Json(json!({ "data": report, "meta": { "warnings": warnings } })))
}

// ---------------------------------------------------------------------------
// Log trees
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TreeRequest {
    lines: Vec<String>,
}

async fn build_tree(Json(req): Json<TreeRequest>) -> Json<Value> {
    tree_body(&req.lines)
}

fn tree_body(lines: &[String]) -> Json<Value> {
    let tree = logparse::build(lines);
    let (pass, fail) = render::tally(&tree);
    Json(json!({
        "data": tree,
        "meta": { "roots": tree.len(), "pass": pass, "fail": fail }
    }))
}
