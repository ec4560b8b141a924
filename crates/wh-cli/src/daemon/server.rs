//! Local HTTP ingress and query surface.
//!
//! `POST /activity` is the hook channel: submissions are validated here and
//! queued to the engine like any other signal. Everything else reads the
//! registry under the shared lock or asks the persistence gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use wh_core::{
    ActivitySubmission, CorrelatorStats, Dropped, PendingSession, RawSignal, Session, SessionId,
    StateRegistry, UserId, WorkBlock, WorkSummary,
};

use super::engine::{Signal, SignalOutcome};
use super::gateway::{Gateway, GatewayError};
use crate::api::{
    CloseAllResponse, ErrorResponse, HealthReport, SubmitResponse, SubmitStatus, utc_day_range,
};

/// Shared handler state.
#[derive(Debug)]
pub struct AppState {
    pub registry: Arc<RwLock<StateRegistry>>,
    pub gateway: Gateway,
    pub hook: mpsc::Sender<Signal>,
    pub stats: watch::Receiver<CorrelatorStats>,
    pub user_id: UserId,
    pub started: Instant,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(status: StatusCode, code: &str, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

fn gateway_error(e: &GatewayError) -> ApiError {
    tracing::warn!(error = %e, "storage request failed");
    match e {
        GatewayError::Closed => api_error(StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN", e),
        GatewayError::Store(_) => api_error(StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", e),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/activity", post(submit_activity))
        .route("/sessions/active", get(active_sessions))
        .route("/sessions/pending", get(pending_sessions))
        .route("/sessions/close-all", post(close_all))
        .route("/sessions/:id/work-blocks", get(work_blocks))
        .route("/reports/summary", get(report_summary))
        .with_state(Arc::new(state))
}

/// Bind the ingress. Failure here is fatal to the daemon.
pub async fn bind(addr: &str) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Serve until `shutdown` flips to true, then finish in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    tracing::info!(?addr, "HTTP ingress listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    let (active_sessions, active_work_blocks) = {
        let registry = state.registry.read().await;
        (
            registry.active_session_count(),
            registry.active_work_block_count(),
        )
    };
    Json(HealthReport {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        active_sessions,
        active_work_blocks,
        correlator: *state.stats.borrow(),
    })
}

/// POST /activity
async fn submit_activity(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<ActivitySubmission>,
) -> ApiResult<SubmitResponse> {
    let event = submission
        .into_event(&state.user_id, Utc::now())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "INVALID_SUBMISSION", e))?;

    let (reply, outcome) = oneshot::channel();
    state
        .hook
        .send(Signal {
            raw: RawSignal::Submission(event),
            reply: Some(reply),
        })
        .await
        .map_err(|_| api_error(StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN", "engine stopped"))?;
    let outcome = outcome
        .await
        .map_err(|_| api_error(StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN", "engine stopped"))?;

    let response = match outcome {
        SignalOutcome::Recorded {
            session_id,
            work_block_id,
        } => SubmitResponse {
            status: SubmitStatus::Recorded,
            session_id: Some(session_id),
            work_block_id: Some(work_block_id),
        },
        SignalOutcome::Dropped(Dropped::Suppressed) => SubmitResponse {
            status: SubmitStatus::Suppressed,
            session_id: None,
            work_block_id: None,
        },
        SignalOutcome::Dropped(Dropped::Filtered) => SubmitResponse {
            status: SubmitStatus::Filtered,
            session_id: None,
            work_block_id: None,
        },
        SignalOutcome::Dropped(Dropped::Malformed) => {
            return Err(api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "MALFORMED",
                "submission could not be attributed",
            ));
        }
        SignalOutcome::Rejected(reason) => {
            return Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, "REJECTED", reason));
        }
    };
    Ok(Json(response))
}

/// GET /sessions/active
async fn active_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<Session>> {
    Json(state.registry.read().await.active_sessions())
}

/// GET /sessions/pending
async fn pending_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<PendingSession>> {
    Json(state.registry.read().await.pending_sessions_summary())
}

/// POST /sessions/close-all
async fn close_all(State(state): State<Arc<AppState>>) -> ApiResult<CloseAllResponse> {
    let now = Utc::now();
    let (live, reply) = {
        // Queue under the lock so no engine write can slip in ahead of the
        // storage pass.
        let mut registry = state.registry.write().await;
        let config = *registry.config();
        let (summary, changes) = registry.close_all_at(now);
        let reply = state
            .gateway
            .close_all(changes, now, config)
            .await
            .map_err(|e| gateway_error(&e))?;
        (summary, reply)
    };
    let stored = reply
        .await
        .map_err(|_| gateway_error(&GatewayError::Closed))?
        .map_err(|e| gateway_error(&GatewayError::Store(e)))?;
    tracing::info!(
        live_sessions = live.sessions_closed,
        live_work_blocks = live.work_blocks_closed,
        stored_sessions = stored.sessions_closed,
        stored_work_blocks = stored.work_blocks_closed,
        "closed all active sessions"
    );
    Ok(Json(CloseAllResponse { live, stored }))
}

/// GET /sessions/{id}/work-blocks
///
/// Stored blocks, with live ones from the registry taking precedence.
async fn work_blocks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<WorkBlock>> {
    let session_id = SessionId::new(id)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "INVALID_SESSION_ID", e))?;
    let mut blocks = state
        .gateway
        .work_blocks(session_id.clone())
        .await
        .map_err(|e| gateway_error(&e))?;

    let live = state.registry.read().await.active_work_blocks(&session_id);
    for block in live {
        match blocks.iter_mut().find(|b| b.id == block.id) {
            Some(stored) => *stored = block,
            None => blocks.push(block),
        }
    }
    blocks.sort_by(|a, b| a.start_time.cmp(&b.start_time));
    Ok(Json(blocks))
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    start: NaiveDate,
    /// Inclusive; defaults to `start`.
    end: Option<NaiveDate>,
}

/// GET /reports/summary?start=YYYY-MM-DD&end=YYYY-MM-DD
async fn report_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<WorkSummary> {
    let end = query.end.unwrap_or(query.start);
    let (start, end) = utc_day_range(query.start, end).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_RANGE",
            "end date must not precede start date",
        )
    })?;
    let summary = state
        .gateway
        .summary(start, end)
        .await
        .map_err(|e| gateway_error(&e))?;
    Ok(Json(summary))
}
