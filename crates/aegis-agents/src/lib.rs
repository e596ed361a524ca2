//! Aegis runtime: configuration, HTTP clients for the external analysis
//! and geocoding services, the polling loops, and the axum HTTP surface.
//!
//! The orchestration rules themselves live in the `coordination` crate.

pub mod analysis_client;
pub mod config;
pub mod geocode;
pub mod rate_limit;
pub mod runtime;
pub mod seed;
pub mod server;
pub mod workers;
