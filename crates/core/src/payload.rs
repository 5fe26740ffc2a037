//! Payload construction
//!
//! At insert time (and again when a fallback row is synthesized) the
//! dispatcher composes an outbox message's `payload` from
//! `(method, notification, user_contact)`. `payload` is immutable after
//! insert: retries reuse it verbatim.

use crate::contacts::UserContact;
use crate::models::{DeliveryMethod, NotificationView};
use serde_json::{Value, json};

/// Build the method-specific payload shape for an outbox row.
///
/// Missing contact fields produce `null` payload slots rather than an
/// error; the channel sender is responsible for failing those attempts,
/// which then flow through the normal retry/fallback path.
pub fn build_payload(
    method: DeliveryMethod,
    notification: &NotificationView,
    contact: &UserContact,
) -> Value {
    match method {
        DeliveryMethod::Email => json!({
            "to_email": contact.email,
            "subject": notification.title,
            "message": notification.message,
        }),
        DeliveryMethod::Sms => json!({
            "phone": contact.phone,
            "message": format!("{}: {}", notification.title, notification.message),
        }),
        DeliveryMethod::Telegram => json!({
            "chat_id": contact.telegram_chat_id,
            "message": format!("*{}*\n{}", notification.title, notification.message),
        }),
    }
}
