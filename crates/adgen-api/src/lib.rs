//! Axum HTTP API server.
//!
//! This crate provides:
//! - Product image analysis into an editable script
//! - Script approval, status polling and cancellation of generations
//! - Security headers, request ids and Prometheus metrics
//! - Startup wiring of storage, collaborators and engine recovery

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
