//! Observational control endpoints: force an immediate claimer tick and
//! report outbox counts. Not part of the delivery guarantee, useful for
//! tests and for low-latency dispatch right after a create.

use axum::{Json, Router, extract::State, routing::{get, post}};
use notifier_core::models::OutboxStats;
use serde::Serialize;

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub claimed: usize,
}

/// Claim the due batch right now and drive each row through this
/// process's own processor, rather than waiting for a worker process's
/// next scheduled tick.
async fn trigger_processing(State(state): State<AppState>) -> Result<Json<TriggerResponse>, ApiError> {
    let claimed = state
        .repo
        .claim_pending_batch(state.dispatcher.batch_size, state.dispatcher.stale_lease)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to claim pending batch: {e}")))?;

    let claimed_count = claimed.len();
    for msg in claimed {
        let processor = state.processor.clone();
        tokio::spawn(async move {
            processor.process(msg.id).await;
        });
    }

    Ok(Json(TriggerResponse {
        claimed: claimed_count,
    }))
}

async fn stats(State(state): State<AppState>) -> Result<Json<OutboxStats>, ApiError> {
    let stats = state
        .repo
        .stats()
        .await
        .map_err(|e| ApiError::Internal(format!("failed to gather outbox stats: {e}")))?;
    Ok(Json(stats))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/control/trigger", post(trigger_processing))
        .route("/control/stats", get(stats))
}
