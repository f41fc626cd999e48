//! HTTP API for health, metrics, opportunities and orders.

pub mod handlers;
pub mod routes;

pub use handlers::{ApiError, AppState};
pub use routes::create_router;
