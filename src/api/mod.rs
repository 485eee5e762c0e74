//! HTTP management API.
//!
//! A thin, versioned surface over storage and the scheduler handle: CRUD
//! for jobs and schedules, manual triggers, history queries, and
//! scheduler control. Execution itself never goes through here.

mod errors;
mod handlers;
mod responses;

pub use errors::ApiError;
pub use handlers::ApiState;
pub use responses::*;

use axum::{
    Router,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::scheduler::SchedulerHandle;
use crate::storage::Storage;

/// Configuration for the API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ApiConfig {
    /// Create a new API config with custom host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("invalid socket address")
    }
}

/// Build the API router with all endpoints.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        // Health check
        .route("/api/v1/health", get(handlers::health))
        // Scheduler control
        .route("/api/v1/scheduler/state", get(handlers::scheduler_state))
        .route("/api/v1/scheduler/pause", post(handlers::pause_scheduler))
        .route("/api/v1/scheduler/resume", post(handlers::resume_scheduler))
        // Jobs
        .route(
            "/api/v1/jobs",
            get(handlers::list_jobs).post(handlers::create_job),
        )
        .route(
            "/api/v1/jobs/{job_id}",
            get(handlers::get_job)
                .put(handlers::update_job)
                .delete(handlers::delete_job),
        )
        .route("/api/v1/jobs/{job_id}/trigger", post(handlers::trigger_job))
        .route("/api/v1/jobs/{job_id}/history", get(handlers::job_history))
        // Schedules
        .route(
            "/api/v1/schedules",
            get(handlers::list_schedules).post(handlers::create_schedule),
        )
        .route(
            "/api/v1/schedules/{schedule_id}",
            get(handlers::get_schedule)
                .put(handlers::update_schedule)
                .delete(handlers::delete_schedule),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the API state over a scheduler handle and shared storage.
pub fn create_api_state(handle: SchedulerHandle, storage: Arc<dyn Storage>) -> ApiState {
    ApiState { handle, storage }
}

/// Start the API server.
///
/// The server runs until `shutdown` flips to `true` or its sender is
/// dropped; in-flight requests finish before the task resolves.
pub async fn start_server(
    config: ApiConfig,
    state: ApiState,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);
    let addr = config.socket_addr();

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("API server listening on http://{}", addr);

    let handle = tokio::spawn(async move {
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            wait_for_shutdown(shutdown).await;
        });
        if let Err(e) = serve.await {
            tracing::error!("API server error: {}", e);
        }
        tracing::info!("API server stopped");
    });

    Ok(handle)
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
