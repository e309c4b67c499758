//! HTTP surface of the monitoring hub
//!
//! Only the on-demand entry points of the scheduler and the live update
//! stream are exposed here; record management lives elsewhere.
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check
//! - `POST /api/v1/nodes/:id/check` - Poll one node now
//! - `POST /api/v1/nodes/:id/sync` - Sync the guests of one node now
//! - `POST /api/v1/services/:id/check` - Probe one service now
//! - `GET /api/v1/services/:id/uptime` - Service uptime over a window
//! - `POST /api/v1/jobs/:job/run` - Run a whole periodic job now
//! - `WS /api/v1/stream` - Live updates

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ApiSettings;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,

    /// Bearer token required on every request when set
    pub auth_token: Option<String>,

    /// Enable CORS for dashboards served elsewhere
    pub enable_cors: bool,
}

impl From<&ApiSettings> for ApiConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            bind_addr: crate::util::get_api_addr(settings.bind_addr),
            auth_token: crate::util::get_api_token().or_else(|| settings.auth_token.clone()),
            enable_cors: settings.enable_cors,
        }
    }
}

/// Build the router with all routes and layers
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/nodes/:id/check", post(routes::nodes::check_node))
        .route("/api/v1/nodes/:id/sync", post(routes::nodes::sync_vms))
        .route(
            "/api/v1/services/:id/check",
            post(routes::services::check_service),
        )
        .route(
            "/api/v1/services/:id/uptime",
            get(routes::services::get_uptime),
        )
        .route("/api/v1/jobs/:job/run", post(routes::jobs::run_job))
        .route("/api/v1/stream", get(websocket::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    if let Some(token) = config.auth_token.clone() {
        app = app.layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::auth_middleware,
        ));
    }

    app
}

/// Bind and serve the API in a background task, returning the local address
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;
    info!("API server listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("API server error: {e}");
        }
    });

    Ok(addr)
}
