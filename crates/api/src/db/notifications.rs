//! Notification ingress: inserting a notification and its initial outbox
//! rows in a single transaction.

use std::sync::Arc;

use notifier_core::contacts::ContactDirectory;
use notifier_core::models::{DeliveryMethod, Notification, NotificationView};
use notifier_core::payload::build_payload;
use sqlx::PgPool;

use crate::error::ApiError;

/// Insert a notification and one outbox row per requested method.
///
/// `methods` must be non-empty; each entry gets its own outbox row sharing
/// the notification but carrying a payload built for that method.
pub async fn create_notification(
    pool: &PgPool,
    contacts: &Arc<dyn ContactDirectory>,
    user_id: i64,
    title: String,
    message: String,
    methods: &[DeliveryMethod],
    max_retries: i32,
) -> Result<Notification, ApiError> {
    if methods.is_empty() {
        return Err(ApiError::BadRequest("methods list must not be empty".to_string()));
    }
    if title.trim().is_empty() || title.len() > 200 {
        return Err(ApiError::BadRequest(
            "title must be non-empty and at most 200 characters".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let notification = sqlx::query_as::<_, Notification>(
        r#"
        INSERT INTO notifications (user_id, title, message)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(&title)
    .bind(&message)
    .fetch_one(&mut *tx)
    .await?;

    let contact = contacts.lookup(user_id);
    let view = NotificationView::from(&notification);

    for &method in methods {
        let payload = build_payload(method, &view, &contact);
        sqlx::query(
            r#"
            INSERT INTO outbox_messages
                (notification_id, method, status, payload, attempt_count, max_retries, next_attempt_at)
            VALUES
                ($1, $2, 'PENDING', $3, 0, $4, now())
            "#,
        )
        .bind(notification.id)
        .bind(method)
        .bind(payload)
        .bind(max_retries)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(notification)
}

