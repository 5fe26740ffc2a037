//! Notification ingress API
//!
//! A thin HTTP front door: validates a notification request, writes it and
//! its initial outbox rows in one transaction, and leaves everything else
//! to the worker.

pub mod config;
mod db;
pub mod error;
mod middleware;
mod routes;

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware};
use notifier_core::config::DispatcherConfig;
use notifier_core::contacts::ContactDirectory;
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use worker::db::OutboxRepository;
use worker::processor::Processor;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub contacts: Arc<dyn ContactDirectory>,
    pub dispatcher: DispatcherConfig,
    /// Reuses the worker crate's repository and processor so the
    /// `/control` endpoints can claim and drive outbox rows without
    /// waiting on a separately running worker process's tick.
    pub repo: OutboxRepository,
    pub processor: Arc<Processor>,
}

/// Create the application router
pub fn create_router(state: AppState, cors_origin: &str) -> Router {
    let cors = if cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        match cors_origin.parse::<axum::http::HeaderValue>() {
            Ok(origin) => CorsLayer::new()
                .allow_origin(AllowOrigin::exact(origin))
                .allow_methods(Any)
                .allow_headers(Any),
            Err(e) => {
                panic!("invalid CORS origin configuration: {e}");
            }
        }
    };

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::notifications::routes())
        .merge(routes::control::routes())
        .layer(cors)
        .layer(axum_middleware::from_fn(
            crate::middleware::security_headers::security_headers,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::info!(
                            latency_ms = %latency.as_millis(),
                            status = %response.status(),
                            "finished processing request"
                        );
                    },
                ),
        )
        .with_state(state)
}

/// Run the API server. Blocks until it exits.
pub async fn run_api(state: AppState, config: &config::Config) -> Result<(), std::io::Error> {
    let app = create_router(state, &config.cors_allowed_origin);
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!(%addr, "API server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
}
