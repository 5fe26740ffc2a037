//! Persistence for the outbox: every read/write of `outbox_messages` and
//! `notifications`, including the locking semantics the scheduler and
//! worker rely on to claim rows safely across processes.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use notifier_core::models::{DeliveryMethod, Notification, OutboxMessage, OutboxStats};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a new outbox row in `PENDING`, ready for immediate claim.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        notification_id: Uuid,
        method: DeliveryMethod,
        payload: serde_json::Value,
        max_retries: i32,
    ) -> Result<OutboxMessage, sqlx::Error> {
        sqlx::query_as::<_, OutboxMessage>(
            r#"
            INSERT INTO outbox_messages
                (notification_id, method, status, payload, attempt_count, max_retries, next_attempt_at)
            VALUES
                ($1, $2, 'PENDING', $3, 0, $4, now())
            RETURNING *
            "#,
        )
        .bind(notification_id)
        .bind(method)
        .bind(payload)
        .bind(max_retries)
        .fetch_one(&mut **tx)
        .await
    }

    /// Claim up to `limit` due `PENDING` rows, plus `ENQUEUED` rows whose
    /// lease has expired, transitioning them all to `ENQUEUED`.
    ///
    /// `FOR UPDATE SKIP LOCKED` means two concurrent claimers never hand out
    /// the same row. Ordered by `created_at` so older work drains first.
    pub async fn claim_pending_batch(
        &self,
        limit: i64,
        stale_lease: Duration,
    ) -> Result<Vec<OutboxMessage>, sqlx::Error> {
        let stale_lease_secs = stale_lease.as_secs() as f64;
        sqlx::query_as::<_, OutboxMessage>(
            r#"
            UPDATE outbox_messages
            SET status = 'ENQUEUED', status_changed_at = now(), updated_at = now()
            WHERE id IN (
                SELECT id FROM outbox_messages
                WHERE (status = 'PENDING' AND next_attempt_at <= now())
                   OR (status = 'ENQUEUED' AND status_changed_at <= now() - make_interval(secs => $2))
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(limit)
        .bind(stale_lease_secs)
        .fetch_all(&self.pool)
        .await
    }

    /// Lock-and-fetch a single row only if it is currently `ENQUEUED`.
    /// Returns `None` if missing, locked by another claimer, or in another
    /// state — a duplicate worker invocation on the same id is then a no-op.
    pub async fn claim_for_processing(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<OutboxMessage>, sqlx::Error> {
        sqlx::query_as::<_, OutboxMessage>(
            r#"
            SELECT * FROM outbox_messages
            WHERE id = $1 AND status = 'ENQUEUED'
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
    }

    /// Persist the attempt_count/last_attempt bump made at the start of
    /// Phase A. Status stays `ENQUEUED`.
    pub async fn record_attempt_start(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        attempt_count: i32,
        started_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET attempt_count = $2, last_attempt = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempt_count)
        .bind(started_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Transition a row to `SENT`, but only if it is still `ENQUEUED`.
    ///
    /// Returns `false` without touching the row if a concurrent sibling's
    /// success (or another settle) already moved it out of `ENQUEUED` —
    /// `SENT`/`FAILED` are absorbing (I4) and must never be overwritten by a
    /// stale in-flight settle.
    pub async fn finalize_success(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'SENT', status_changed_at = now(), updated_at = now()
            WHERE id = $1 AND status = 'ENQUEUED'
            "#,
        )
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Transition a row to `FAILED` with a reason, but only if it is still
    /// `ENQUEUED`. Terminal: no further retries or reschedules touch this
    /// row again. Returns `false` if the row had already left `ENQUEUED`
    /// (e.g. a sibling short-circuit beat this settle to the row).
    pub async fn finalize_failure(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'FAILED', status_changed_at = now(), updated_at = now(), error_message = $2
            WHERE id = $1 AND status = 'ENQUEUED'
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reopen a row to `PENDING` for a later retry, with exponential
    /// backoff capped at `retry_max_delay` so a long-failing channel
    /// doesn't push attempts arbitrarily far into the future. Only applies
    /// if the row is still `ENQUEUED`; returns `None` if a concurrent
    /// settle already moved it to a terminal state.
    pub async fn reschedule_for_retry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        attempt_count: i32,
        reason: &str,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        let backoff = base_delay
            .checked_mul(1u32.checked_shl(attempt_count as u32).unwrap_or(u32::MAX))
            .unwrap_or(max_delay)
            .min(max_delay);
        let next_attempt_at = Utc::now() + ChronoDuration::from_std(backoff).unwrap_or_default();

        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'PENDING', status_changed_at = now(), updated_at = now(),
                next_attempt_at = $2, error_message = $3
            WHERE id = $1 AND status = 'ENQUEUED'
            "#,
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(reason)
        .execute(&mut **tx)
        .await?;

        Ok((result.rows_affected() > 0).then_some(next_attempt_at))
    }

    /// Set all non-terminal siblings of `notification_id` (other than
    /// `winner_id`) to `SENT`. Once one channel succeeds there is no point
    /// letting a sibling keep retrying or later get marked failed.
    pub async fn mark_siblings_sent(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        notification_id: Uuid,
        winner_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'SENT', status_changed_at = now(), updated_at = now()
            WHERE notification_id = $1
              AND id != $2
              AND status NOT IN ('SENT', 'FAILED')
            "#,
        )
        .bind(notification_id)
        .bind(winner_id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Fetch a notification by id within a transaction.
    pub async fn fetch_notification(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<Notification>, sqlx::Error> {
        sqlx::query_as::<_, Notification>("SELECT * FROM notifications WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Mark the owning notification as sent. Monotonic: the `WHERE` guard
    /// makes this a no-op once `is_sent` is already `true`.
    pub async fn mark_notification_sent(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        notification_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE notifications
            SET is_sent = TRUE, updated_at = now()
            WHERE id = $1 AND is_sent = FALSE
            "#,
        )
        .bind(notification_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Clean up terminal `SENT` rows older than `retention`.
    ///
    /// An operator-invoked maintenance path; not run automatically by the
    /// scheduler loop.
    pub async fn cleanup_sent_messages(&self, retention: Duration) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - ChronoDuration::from_std(retention).unwrap_or_default();
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_messages
            WHERE status = 'SENT' AND status_changed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Aggregate counts by status and method, for the `stats` control
    /// endpoint.
    pub async fn stats(&self) -> Result<OutboxStats, sqlx::Error> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT status::text, method::text, count(*) FROM outbox_messages
            GROUP BY status, method
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = OutboxStats::default();
        for (status, method, count) in rows {
            match status.as_str() {
                "PENDING" => stats.pending += count,
                "ENQUEUED" => stats.enqueued += count,
                "SENT" => stats.sent += count,
                "FAILED" => stats.failed += count,
                _ => {}
            }
            *stats.by_method.entry(method).or_insert(0) += count;
        }
        Ok(stats)
    }
}
