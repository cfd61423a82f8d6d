use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use nanoclaw_dispatch::verify;
use nanoclaw_types::{
    DispatchEnvelope, DispatchResponse, Run, RunStatus, RunUpdate, DISPATCH_ID_HEADER,
    RUNNER_SECRET_HEADER, SIGNATURE_HEADER, SIGNATURE_TS_HEADER,
};

use crate::exec::execute_dispatch;
use crate::RunnerState;

#[derive(Debug, Deserialize, Default)]
struct ListRunsQuery {
    limit: Option<usize>,
}

pub fn app_router(state: Arc<RunnerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/dispatch", post(dispatch))
        .route("/runs", get(list_runs))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/cancel", post(cancel_run))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: Arc<RunnerState>) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("runner listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

/// Signed dispatch ingress. With a secret configured, a missing or
/// mismatching signature header pair is a 401 with no side effects.
async fn dispatch(
    State(state): State<Arc<RunnerState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<DispatchResponse>, StatusCode> {
    let secret = &state.config.dispatch_secret;
    if !secret.is_empty() {
        let ts = headers
            .get(SIGNATURE_TS_HEADER)
            .and_then(|v| v.to_str().ok());
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        match (ts, signature) {
            (Some(ts), Some(signature)) if verify(ts, &body, secret, signature) => {}
            _ => {
                warn!("dispatch rejected: bad or missing signature");
                return Err(StatusCode::UNAUTHORIZED);
            }
        }
    }

    let envelope: DispatchEnvelope =
        serde_json::from_str(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let dispatch_id = headers
        .get(DISPATCH_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&envelope.dispatch_id)
        .to_string();

    info!(dispatch_id = %dispatch_id, actions = envelope.actions.len(), "dispatch accepted");
    let results = execute_dispatch(state.clone(), envelope.actions).await;
    let success = results.iter().all(|r| r.exit_code == 0);
    Ok(Json(DispatchResponse {
        success,
        dispatch_id,
        results,
    }))
}

fn check_runner_secret(state: &RunnerState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let expected = &state.config.runner_secret;
    if expected.is_empty() {
        return Ok(());
    }
    let presented = headers
        .get(RUNNER_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented == expected {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn list_runs(
    State(state): State<Arc<RunnerState>>,
    headers: HeaderMap,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<Vec<Run>>, StatusCode> {
    check_runner_secret(&state, &headers)?;
    let limit = query.limit.unwrap_or(20);
    let runs = state.runs.list(limit).await.map_err(|e| {
        warn!("listing runs failed: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(runs))
}

async fn get_run(
    State(state): State<Arc<RunnerState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Run>, StatusCode> {
    check_runner_secret(&state, &headers)?;
    let run = state
        .runs
        .get(&id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(run))
}

/// Flag the run, trip the abort handle when one is live, and write the
/// terminal state. The monotone status guard makes the race with the worker
/// harmless.
async fn cancel_run(
    State(state): State<Arc<RunnerState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Run>, StatusCode> {
    check_runner_secret(&state, &headers)?;
    let run = state
        .runs
        .request_cancel(&id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let aborted = state.aborts.cancel(&id);
    if !run.status.is_terminal() {
        let _ = state
            .runs
            .update(
                &id,
                RunUpdate {
                    status: Some(RunStatus::Cancelled),
                    completed_at: Some(Utc::now()),
                    ..RunUpdate::default()
                },
            )
            .await;
    }
    info!(run_id = %id, aborted, "cancel requested");

    let run = state
        .runs
        .get(&id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(run))
}
