//! Database access for the ingress API.

pub mod notifications;
