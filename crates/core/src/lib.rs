//! Notifier Core - Domain logic and models
//!
//! This crate contains pure domain logic with no I/O operations beyond
//! `sqlx` row mapping. Database models, the fallback-chain policy, payload
//! construction, and error types are defined here.

pub mod config;
pub mod contacts;
pub mod error;
pub mod models;
pub mod payload;

pub use error::DispatcherError;
pub use models::{DeliveryMethod, Notification, NotificationView, OutboxMessage, OutboxStatus};
pub use payload::build_payload;
