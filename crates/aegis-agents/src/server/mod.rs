//! HTTP surface: citizen intake, station callbacks, and manager operations.
//!
//! ## Endpoints
//!
//! ### Intake (rate limited per client)
//! - `POST /api/reports`
//! - `POST /api/needs`
//! - `POST /api/needs/:id/verify`, `POST /api/needs/:id/flag`
//!
//! ### Incidents
//! - `GET /api/incidents/:id`
//! - `POST /api/incidents/:id/reroute` - manual override to one station
//! - `POST /api/incidents/:id/requeue` - restart analysis of a failed report
//! - `GET /api/alerts/:id`
//!
//! ### Stations
//! - `GET /api/stations?type=`, `POST /api/stations`
//! - `POST /api/stations/:id/status`
//! - `POST /api/stations/callback/:event` - `acknowledged`, `dispatched`,
//!   `rejected` or `resolved`

pub mod error;
pub mod handlers;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Intake
        .route("/api/reports", post(handlers::submit_report))
        .route("/api/needs", post(handlers::submit_need))
        .route("/api/needs/:id/verify", post(handlers::verify_need))
        .route("/api/needs/:id/flag", post(handlers::flag_need))
        // Incidents and alerts
        .route("/api/incidents/:id", get(handlers::get_incident))
        .route("/api/incidents/:id/reroute", post(handlers::reroute_incident))
        .route("/api/incidents/:id/requeue", post(handlers::requeue_incident))
        .route("/api/alerts/:id", get(handlers::get_alert))
        // Stations
        .route(
            "/api/stations",
            get(handlers::list_stations).post(handlers::register_station),
        )
        .route("/api/stations/:id/status", post(handlers::set_station_status))
        .route("/api/stations/callback/:event", post(handlers::station_callback))
        .layer(middleware::map_response_with_state(
            state.clone(),
            error::expose_details,
        ))
        .with_state(state)
}

/// Serve until `cancel` fires, then drain in-flight requests.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    cancel: Arc<CancellationToken>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr().context("listener has no local address")?;
    tracing::info!(%addr, "HTTP server listening");

    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("HTTP server failed")?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
