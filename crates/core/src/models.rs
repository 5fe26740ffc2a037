//! Core domain models for the notification dispatcher
//!
//! These models represent the core business entities and map to database
//! tables (`notifications`, `outbox_messages`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user-addressed notification. The root aggregate.
///
/// `is_sent` is monotonic: once any of its outbox messages reaches `SENT`
/// it becomes `true` and never reverts.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub is_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Delivery method for an outbox message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "delivery_method", rename_all = "UPPERCASE")]
pub enum DeliveryMethod {
    Email,
    Sms,
    Telegram,
}

impl DeliveryMethod {
    /// Canonical fallback order: `SMS -> TELEGRAM -> EMAIL`.
    pub const FALLBACK_CHAIN: [DeliveryMethod; 3] = [
        DeliveryMethod::Sms,
        DeliveryMethod::Telegram,
        DeliveryMethod::Email,
    ];

    /// The method tried next if this one's retries are exhausted, if any.
    pub fn next_in_chain(self) -> Option<DeliveryMethod> {
        let pos = Self::FALLBACK_CHAIN.iter().position(|m| *m == self)?;
        Self::FALLBACK_CHAIN.get(pos + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMethod::Email => "EMAIL",
            DeliveryMethod::Sms => "SMS",
            DeliveryMethod::Telegram => "TELEGRAM",
        }
    }
}

impl std::fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of an outbox message.
///
/// `SENT` and `FAILED` are absorbing: no transition ever leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "outbox_status", rename_all = "UPPERCASE")]
pub enum OutboxStatus {
    Pending,
    Enqueued,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Sent | OutboxStatus::Failed)
    }
}

/// A single delivery attempt record belonging to a `Notification`.
///
/// `payload` is immutable after insert: retries reuse it verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub method: DeliveryMethod,
    pub status: OutboxStatus,
    pub payload: serde_json::Value,
    pub attempt_count: i32,
    pub max_retries: i32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub next_attempt_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// True while another attempt is still allowed under `max_retries`.
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_retries
    }
}

/// A read-only view of a notification handed to `ChannelSender::send`.
///
/// Channel implementations only ever need to read notification fields, never
/// mutate them; this keeps the sender boundary decoupled from the
/// persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationView {
    pub id: Uuid,
    pub user_id: i64,
    pub title: String,
    pub message: String,
}

impl From<&Notification> for NotificationView {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id,
            user_id: n.user_id,
            title: n.title.clone(),
            message: n.message.clone(),
        }
    }
}

/// Aggregate counts used by the `stats` control endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboxStats {
    pub pending: i64,
    pub enqueued: i64,
    pub sent: i64,
    pub failed: i64,
    pub by_method: std::collections::BTreeMap<String, i64>,
}
