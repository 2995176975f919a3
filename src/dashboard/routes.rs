//! Status API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<StatusState>`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

use crate::engine::balance::{BalanceSnapshot, BalanceWatch};
use crate::engine::betting_loop::{LoopStatus, Phase};
use crate::storage::PositionStore;
use crate::types::{Decision, Position};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Read handles onto the running agent. Nothing here is written by routes.
pub struct StatusState {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub loop_status: watch::Receiver<LoopStatus>,
    pub balance: BalanceWatch,
    pub store: PositionStore,
}

impl StatusState {
    pub fn new(
        name: String,
        loop_status: watch::Receiver<LoopStatus>,
        balance: BalanceWatch,
        store: PositionStore,
    ) -> Self {
        Self {
            name,
            started_at: Utc::now(),
            loop_status,
            balance,
            store,
        }
    }
}

pub type AppState = Arc<StatusState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub agent: String,
    pub epoch: Option<u64>,
    pub phase: Phase,
    pub last_decision: Option<Decision>,
    pub position: Option<Position>,
    pub balance: Option<BalanceSnapshot>,
    pub updated_at: DateTime<Utc>,
    pub uptime_secs: i64,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.loop_status.borrow().clone();
    let balance = state.balance.borrow().clone();

    Json(StatusResponse {
        agent: state.name.clone(),
        epoch: status.epoch,
        phase: status.phase,
        last_decision: status.last_decision,
        position: status.position,
        balance,
        updated_at: status.updated_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /api/positions/:epoch
pub async fn get_position(
    State(state): State<AppState>,
    Path(epoch): Path<u64>,
) -> Result<Json<Position>, StatusCode> {
    match state.store.position_for_epoch(epoch).await {
        Ok(Some(position)) => Ok(Json(position)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            warn!(epoch, error = %e, "Position lookup failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
