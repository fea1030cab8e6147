//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, request tracing, the upload body
//! limit and all endpoint handlers.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use furrow_core::config::FurrowConfig;
use furrow_core::error::FurrowError;

use crate::handlers;
use crate::state::AppState;

/// Largest accepted request body (photo uploads, inline base64 images).
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/sync/visits/upsert", post(handlers::sync_visit))
        .route("/sync/media/upload", post(handlers::upload_media))
        .route("/media/{visit_id}/{filename}", get(handlers::get_media))
        .route("/visits/{id}", get(handlers::get_visit))
        .route("/rag/upsert", post(handlers::rag_upsert))
        .route("/rag/search", post(handlers::rag_search))
        .route("/rag/embed-image", post(handlers::embed_image))
        .route("/rag/embed-image/inline", post(handlers::embed_image_inline))
        .route("/rag/search-images", post(handlers::search_images))
        .route("/rag/reconcile", post(handlers::reconcile))
        .route("/photos/{visit_id}", get(handlers::list_photos))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind to the configured host and port and serve until the process exits.
pub async fn start_server(config: &FurrowConfig, state: AppState) -> Result<(), FurrowError> {
    let addr = format!("{}:{}", config.general.host, config.general.port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to bind");
        FurrowError::Api(format!("Failed to bind {}: {}", addr, e))
    })?;

    axum::serve(listener, router)
        .await
        .map_err(|e| FurrowError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
