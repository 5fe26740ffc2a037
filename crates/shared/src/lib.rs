//! Shared process bootstrap: environment loading, tracing setup, and DB
//! pool construction, reused identically by the API and worker binaries.

pub mod bootstrap;
