//! Furrow API crate - axum HTTP transport for the retrieval engine.
//!
//! Exposes visit sync, media upload and serving, text and cross-modal
//! image search, photo ingestion, reconciliation and health checks.

pub mod error;
pub mod handlers;
pub mod input;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
