//! Channel senders: the transports that actually deliver a notification.
//!
//! Each implementation receives the already-built payload for its method
//! and is responsible only for the send itself; retry/fallback decisions
//! live one layer up in the processor.

use async_trait::async_trait;
use notifier_core::models::DeliveryMethod;
use serde_json::Value;
use thiserror::Error;

use crate::mailer::{Mailer, MailerError};

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("payload missing or malformed field: {0}")]
    BadPayload(&'static str),

    #[error("no contact on file for this method")]
    NoContact,

    #[error("email send failed: {0}")]
    Email(#[from] MailerError),

    #[error("telegram send failed: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("sms gateway request failed: {0}")]
    Sms(#[from] reqwest::Error),

    #[error("sms gateway rejected the message: {0}")]
    SmsRejected(String),
}

/// A transport capable of delivering one [`DeliveryMethod`].
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn method(&self) -> DeliveryMethod;
    async fn send(&self, payload: &Value) -> Result<(), ChannelError>;
}

fn require_str<'a>(payload: &'a Value, field: &'static str) -> Result<&'a str, ChannelError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or(ChannelError::BadPayload(field))
}

pub struct EmailSender {
    mailer: Mailer,
}

impl EmailSender {
    pub fn new(mailer: Mailer) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Email
    }

    async fn send(&self, payload: &Value) -> Result<(), ChannelError> {
        let to = payload
            .get("to_email")
            .and_then(Value::as_str)
            .ok_or(ChannelError::NoContact)?;
        let subject = require_str(payload, "subject")?;
        let body = require_str(payload, "message")?;

        self.mailer.send(to, subject, body).await?;
        Ok(())
    }
}

pub struct TelegramSender {
    bot: teloxide::Bot,
}

impl TelegramSender {
    pub fn new(bot: teloxide::Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChannelSender for TelegramSender {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Telegram
    }

    async fn send(&self, payload: &Value) -> Result<(), ChannelError> {
        use teloxide::prelude::*;
        use teloxide::types::ParseMode;

        let chat_id = payload
            .get("chat_id")
            .and_then(Value::as_i64)
            .ok_or(ChannelError::NoContact)?;
        let text = require_str(payload, "message")?;

        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Markdown)
            .await?;
        Ok(())
    }
}

/// SMS gateway client speaking an sms.ru-shaped HTTP API: a GET request
/// with `api_id`, `to`, `msg`, `from` query params, returning one status
/// line per recipient.
pub struct SmsSender {
    client: reqwest::Client,
    gateway_url: String,
    api_id: String,
    from: String,
}

impl SmsSender {
    pub fn new(gateway_url: String, api_id: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            gateway_url,
            api_id,
            from,
        }
    }

    /// Normalize to the gateway's expected `7XXXXXXXXXX` digit string,
    /// stripping a leading `+` and any formatting punctuation.
    fn normalize_phone(raw: &str) -> String {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.starts_with('8') && digits.len() == 11 {
            format!("7{}", &digits[1..])
        } else {
            digits
        }
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Sms
    }

    async fn send(&self, payload: &Value) -> Result<(), ChannelError> {
        let phone = payload
            .get("phone")
            .and_then(Value::as_str)
            .ok_or(ChannelError::NoContact)?;
        let message = require_str(payload, "message")?;
        let phone = Self::normalize_phone(phone);

        let response = self
            .client
            .get(&self.gateway_url)
            .query(&[
                ("api_id", self.api_id.as_str()),
                ("to", phone.as_str()),
                ("msg", message),
                ("from", self.from.as_str()),
                ("json", "1"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        match body.get("status").and_then(Value::as_str) {
            Some("OK") => Ok(()),
            _ => Err(ChannelError::SmsRejected(body.to_string())),
        }
    }
}
