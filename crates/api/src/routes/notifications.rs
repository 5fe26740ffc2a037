//! Notification ingress endpoint

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use notifier_core::models::{DeliveryMethod, Notification};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, db, error::ApiError};

/// Default fallback-chain head used when `methods` is omitted from the
/// request body.
fn default_methods() -> Vec<DeliveryMethod> {
    vec![DeliveryMethod::Sms]
}

#[derive(Debug, Deserialize)]
pub struct CreateNotificationRequest {
    pub user_id: i64,
    pub title: String,
    pub message: String,
    /// Delivery methods to attempt, each synthesizing its own outbox row.
    /// Omit to default to a single `SMS` row (the head of the fallback
    /// chain).
    #[serde(default = "default_methods")]
    pub methods: Vec<DeliveryMethod>,
}

#[derive(Debug, Serialize)]
pub struct CreateNotificationResponse {
    pub id: Uuid,
    pub user_id: i64,
    pub title: String,
    pub is_sent: bool,
}

impl From<Notification> for CreateNotificationResponse {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            user_id: n.user_id,
            title: n.title,
            is_sent: n.is_sent,
        }
    }
}

async fn create_notification(
    State(state): State<AppState>,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let notification = db::notifications::create_notification(
        &state.pool,
        &state.contacts,
        req.user_id,
        req.title,
        req.message,
        &req.methods,
        state.dispatcher.max_retries,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(CreateNotificationResponse::from(notification))))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/notifications", post(create_notification))
}
