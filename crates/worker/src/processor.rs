//! Per-message processing: claim, send, and record the outcome.
//!
//! Each claimed outbox row goes through three phases, split across two
//! database transactions so the channel send itself never holds a lock:
//!
//! - Phase A (tx1): re-lock the row, short-circuit if the notification is
//!   already sent, otherwise bump the attempt counter and commit.
//! - Phase B (no tx): call the channel sender.
//! - Phase C (tx2): on success mark the row and its siblings sent; on
//!   failure either reschedule for retry or fail the row out and
//!   synthesize the next fallback row.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use notifier_core::contacts::ContactDirectory;
use notifier_core::models::{DeliveryMethod, NotificationView, OutboxMessage};
use notifier_core::payload::build_payload;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channels::ChannelSender;
use crate::db::OutboxRepository;

pub struct Processor {
    repo: OutboxRepository,
    senders: HashMap<DeliveryMethod, Arc<dyn ChannelSender>>,
    contacts: Arc<dyn ContactDirectory>,
    channel_timeout: Duration,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

impl Processor {
    pub fn new(
        repo: OutboxRepository,
        senders: HashMap<DeliveryMethod, Arc<dyn ChannelSender>>,
        contacts: Arc<dyn ContactDirectory>,
        channel_timeout: Duration,
        retry_base_delay: Duration,
        retry_max_delay: Duration,
    ) -> Self {
        Self {
            repo,
            senders,
            contacts,
            channel_timeout,
            retry_base_delay,
            retry_max_delay,
        }
    }

    /// Drive a single claimed row through Phase A/B/C.
    pub async fn process(&self, id: Uuid) {
        let Some(claimed) = self.phase_a(id).await else {
            return;
        };

        let outcome = self.phase_b(&claimed).await;
        self.phase_c(claimed, outcome).await;
    }

    async fn phase_a(&self, id: Uuid) -> Option<OutboxMessage> {
        let pool = self.repo.pool().clone();
        let mut tx = match pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(%id, error = %e, "failed to open transaction for phase A");
                return None;
            }
        };

        let msg = match self.repo.claim_for_processing(&mut tx, id).await {
            Ok(Some(msg)) => msg,
            Ok(None) => return None,
            Err(e) => {
                warn!(%id, error = %e, "failed to claim row for processing");
                return None;
            }
        };

        let notification = match self.repo.fetch_notification(&mut tx, msg.notification_id).await {
            Ok(Some(n)) => n,
            Ok(None) => {
                warn!(%id, notification_id = %msg.notification_id, "notification missing, failing row");
                if let Err(e) = self
                    .repo
                    .finalize_failure(&mut tx, id, "notification not found")
                    .await
                {
                    warn!(%id, error = %e, "failed to finalize missing-notification row");
                }
                let _ = tx.commit().await;
                return None;
            }
            Err(e) => {
                warn!(%id, error = %e, "failed to fetch notification");
                return None;
            }
        };

        if notification.is_sent {
            info!(%id, notification_id = %notification.id, "notification already sent, short-circuiting sibling");
            if let Err(e) = self.repo.finalize_success(&mut tx, id).await {
                warn!(%id, error = %e, "failed to finalize short-circuited sibling");
            }
            if let Err(e) = tx.commit().await {
                warn!(%id, error = %e, "failed to commit short-circuit");
            }
            return None;
        }

        if !msg.can_retry() {
            warn!(%id, attempt_count = msg.attempt_count, max_retries = msg.max_retries, "row re-claimed already at retry limit, failing out");
            if let Err(e) = self
                .repo
                .finalize_failure(&mut tx, id, "retry limit reached before re-claim")
                .await
            {
                warn!(%id, error = %e, "failed to finalize retry-limit row");
                return None;
            }
            if let Err(e) = self.synthesize_fallback(&mut tx, &msg).await {
                warn!(%id, error = %e, "failed to synthesize fallback for retry-limit row");
            }
            if let Err(e) = tx.commit().await {
                warn!(%id, error = %e, "failed to commit retry-limit row");
            }
            return None;
        }

        let attempt_count = msg.attempt_count + 1;
        if let Err(e) = self
            .repo
            .record_attempt_start(&mut tx, id, attempt_count, chrono::Utc::now())
            .await
        {
            warn!(%id, error = %e, "failed to record attempt start");
            return None;
        }

        if let Err(e) = tx.commit().await {
            warn!(%id, error = %e, "failed to commit phase A");
            return None;
        }

        Some(OutboxMessage {
            attempt_count,
            ..msg
        })
    }

    async fn phase_b(&self, msg: &OutboxMessage) -> Result<(), String> {
        let Some(sender) = self.senders.get(&msg.method) else {
            return Err(format!("no channel sender registered for {}", msg.method));
        };

        match tokio::time::timeout(self.channel_timeout, sender.send(&msg.payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("channel send timed out after {:?}", self.channel_timeout)),
        }
    }

    /// Insert the next fallback-chain row for a just-failed message, unless
    /// the notification already got delivered another way or `method` is the
    /// chain's tail.
    async fn synthesize_fallback(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        msg: &OutboxMessage,
    ) -> Result<(), sqlx::Error> {
        let Some(next_method) = msg.method.next_in_chain() else {
            return Ok(());
        };

        match self.repo.fetch_notification(tx, msg.notification_id).await? {
            Some(notification) if !notification.is_sent => {
                let contact = self.contacts.lookup(notification.user_id);
                let view = NotificationView::from(&notification);
                let payload = build_payload(next_method, &view, &contact);
                self.repo
                    .insert(tx, notification.id, next_method, payload, msg.max_retries)
                    .await?;
                info!(id = %msg.id, %next_method, "synthesized fallback row");
            }
            Some(_) => {
                info!(id = %msg.id, "notification already sent, no fallback needed");
            }
            None => {
                warn!(id = %msg.id, "notification missing, cannot synthesize fallback");
            }
        }
        Ok(())
    }

    async fn phase_c(&self, msg: OutboxMessage, outcome: Result<(), String>) {
        let pool = self.repo.pool().clone();
        let mut tx = match pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(id = %msg.id, error = %e, "failed to open transaction for phase C");
                return;
            }
        };

        match outcome {
            Ok(()) => {
                let applied = match self.repo.finalize_success(&mut tx, msg.id).await {
                    Ok(applied) => applied,
                    Err(e) => {
                        warn!(id = %msg.id, error = %e, "failed to finalize success");
                        return;
                    }
                };
                if !applied {
                    info!(id = %msg.id, "row left ENQUEUED before settle, a sibling already settled it");
                    let _ = tx.commit().await;
                    return;
                }
                info!(id = %msg.id, method = %msg.method, "delivery succeeded");
                if let Err(e) = self
                    .repo
                    .mark_notification_sent(&mut tx, msg.notification_id)
                    .await
                {
                    warn!(id = %msg.id, error = %e, "failed to mark notification sent");
                    return;
                }
                if let Err(e) = self
                    .repo
                    .mark_siblings_sent(&mut tx, msg.notification_id, msg.id)
                    .await
                {
                    warn!(id = %msg.id, error = %e, "failed to mark siblings sent");
                    return;
                }
            }
            Err(reason) => {
                if msg.can_retry() {
                    let rescheduled = match self
                        .repo
                        .reschedule_for_retry(
                            &mut tx,
                            msg.id,
                            msg.attempt_count,
                            &reason,
                            self.retry_base_delay,
                            self.retry_max_delay,
                        )
                        .await
                    {
                        Ok(rescheduled) => rescheduled,
                        Err(e) => {
                            warn!(id = %msg.id, error = %e, "failed to reschedule for retry");
                            return;
                        }
                    };
                    if rescheduled.is_none() {
                        info!(id = %msg.id, "row left ENQUEUED before settle, a sibling already settled it");
                        let _ = tx.commit().await;
                        return;
                    }
                    warn!(id = %msg.id, method = %msg.method, %reason, "delivery failed, scheduling retry");
                } else {
                    let applied = match self.repo.finalize_failure(&mut tx, msg.id, &reason).await {
                        Ok(applied) => applied,
                        Err(e) => {
                            warn!(id = %msg.id, error = %e, "failed to finalize failure");
                            return;
                        }
                    };
                    if !applied {
                        info!(id = %msg.id, "row left ENQUEUED before settle, a sibling already settled it");
                        let _ = tx.commit().await;
                        return;
                    }
                    warn!(id = %msg.id, method = %msg.method, %reason, "retries exhausted, failing row");
                    if let Err(e) = self.synthesize_fallback(&mut tx, &msg).await {
                        warn!(id = %msg.id, error = %e, "failed to synthesize fallback row");
                        return;
                    }
                }
            }
        }

        if let Err(e) = tx.commit().await {
            warn!(id = %msg.id, error = %e, "failed to commit phase C");
        }
    }
}
