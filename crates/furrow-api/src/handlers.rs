//! Route handler functions for all API endpoints.
//!
//! Each handler extracts its inputs via axum extractors, calls the
//! retrieval engine and returns JSON.

use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use furrow_core::types::{IngestStatus, SearchFilters, SearchHit, Searchability, VisitRecord};
use furrow_vector::{
    EngineHealth, ImageInput, ImageSearchResults, ImageUpload, PhotoIngest, PhotoListing,
    ReconcileReport, VisitView,
};

use crate::error::ApiError;
use crate::input::{resolve_media_path, sniff_image_string};
use crate::state::AppState;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub filters: Option<SearchFilters>,
}

#[derive(Debug, Deserialize)]
pub struct ImageSearchRequest {
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub visit_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InlineImageRequest {
    pub visit_id: String,
    /// Data URL, bare base64, or a path inside media storage.
    pub image: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default = "default_true")]
    pub generate_embedding: bool,
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub uptime_secs: u64,
    #[serde(flatten)]
    pub engine: EngineHealth,
    pub db_path: String,
    pub media_dir: String,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub status: String,
    pub id: String,
    pub indexing: IngestStatus,
    pub searchability: Searchability,
}

#[derive(Debug, Serialize)]
pub struct MediaUploadResponse {
    pub uri: String,
    pub path: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health - provider, CLIP and index status.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        engine: state.engine.health().await,
        db_path: state.config.db_path().display().to_string(),
        media_dir: state.config.media_dir().display().to_string(),
    })
}

/// POST /sync/visits/upsert - store a visit and index it.
pub async fn sync_visit(
    State(state): State<AppState>,
    Json(visit): Json<VisitRecord>,
) -> Result<Json<SyncResponse>, ApiError> {
    let outcome = state.engine.sync_visit(&visit).await?;
    Ok(Json(SyncResponse {
        status: "ok".to_string(),
        id: outcome.id,
        indexing: outcome.ingest,
        searchability: outcome.searchability,
    }))
}

/// POST /rag/upsert - index a visit without storing it.
pub async fn rag_upsert(
    State(state): State<AppState>,
    Json(visit): Json<VisitRecord>,
) -> Result<Json<IngestStatus>, ApiError> {
    visit.validate()?;
    let status = state.engine.ingest_text_record(&visit).await?;
    Ok(Json(status))
}

/// POST /rag/search - semantic search over visits.
pub async fn rag_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let k = state.clamp_k(request.k);
    let filters = request.filters.unwrap_or_default();
    debug!(k, ?filters, "Text search");

    let hits = state
        .engine
        .search_text(&request.query, k, &filters)
        .await
        .map_err(|e| ApiError::from_provider(e, state.engine.provider()))?;
    Ok(Json(hits))
}

/// GET /visits/{id} - full visit record with media URIs.
pub async fn get_visit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VisitView>, ApiError> {
    let view = state
        .engine
        .get_visit(&id)
        .map_err(|e| match e {
            furrow_core::FurrowError::NotFound(_) => ApiError::NotFound("Visit not found".to_string()),
            other => other.into(),
        })?;
    Ok(Json(view))
}

/// POST /sync/media/upload - store an audio or photo file for a visit.
pub async fn upload_media(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<MediaUploadResponse>, ApiError> {
    let form = read_form(multipart).await?;
    let visit_id = form.require_text("visit_id")?;
    let kind = form.require_text("type")?;
    let file = form.require_file()?;

    let stored = state
        .engine
        .store_media(&visit_id, &kind, &file.filename, &file.bytes)?;
    Ok(Json(MediaUploadResponse {
        uri: stored.uri,
        path: stored.path.display().to_string(),
    }))
}

/// GET /media/{visit_id}/{filename} - serve a stored file.
pub async fn get_media(
    State(state): State<AppState>,
    Path((visit_id, filename)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state
        .engine
        .read_media(&visit_id, &filename)
        .map_err(|e| match e {
            furrow_core::FurrowError::NotFound(_) => ApiError::NotFound("File not found".to_string()),
            other => other.into(),
        })?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&filename))], bytes))
}

/// POST /rag/embed-image - upload a photo and generate its CLIP embedding.
pub async fn embed_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<PhotoIngest>, ApiError> {
    let form = read_form(multipart).await?;
    let visit_id = form.require_text("visit_id")?;
    let generate_embedding = match form.text("generate_embedding") {
        Some(raw) => parse_bool(&raw)?,
        None => true,
    };
    let file = form.require_file()?;

    let result = state
        .engine
        .ingest_image(ImageUpload {
            visit_id,
            filename: file.filename,
            content_type: file.content_type,
            bytes: file.bytes,
            generate_embedding,
        })
        .await?;
    Ok(Json(result))
}

/// POST /rag/embed-image/inline - same as `/rag/embed-image`, image in a JSON string.
pub async fn embed_image_inline(
    State(state): State<AppState>,
    Json(request): Json<InlineImageRequest>,
) -> Result<Json<PhotoIngest>, ApiError> {
    let input = match sniff_image_string(&request.image) {
        ImageInput::Path(path) => {
            ImageInput::Path(resolve_media_path(state.engine.media().root(), &path)?)
        }
        other => other,
    };
    let filename = request.filename.unwrap_or_else(|| match &input {
        ImageInput::Path(path) => path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("inline")
            .to_string(),
        _ => "inline".to_string(),
    });
    let bytes = input.into_bytes()?;

    let result = state
        .engine
        .ingest_image(ImageUpload {
            visit_id: request.visit_id,
            filename,
            content_type: request.content_type,
            bytes,
            generate_embedding: request.generate_embedding,
        })
        .await?;
    Ok(Json(result))
}

/// POST /rag/search-images - text query against photo embeddings.
pub async fn search_images(
    State(state): State<AppState>,
    Json(request): Json<ImageSearchRequest>,
) -> Result<Json<ImageSearchResults>, ApiError> {
    let k = state.clamp_k(request.k);
    let results = state
        .engine
        .search_images_by_text(&request.query, k, request.visit_id.as_deref())
        .await
        .map_err(|e| match e {
            furrow_core::FurrowError::ProviderUnavailable(msg) => ApiError::ServiceUnavailable {
                message: "CLIP embedding unavailable".to_string(),
                details: Some(serde_json::json!({ "error": msg })),
            },
            furrow_core::FurrowError::EmptyInput => {
                ApiError::BadRequest("query must not be empty".to_string())
            }
            other => other.into(),
        })?;
    Ok(Json(results))
}

/// GET /photos/{visit_id} - photos of a visit with embedding status.
pub async fn list_photos(
    State(state): State<AppState>,
    Path(visit_id): Path<String>,
) -> Result<Json<PhotoListing>, ApiError> {
    Ok(Json(state.engine.list_photos(&visit_id)?))
}

/// POST /rag/reconcile - index stored visits that have no index entry.
pub async fn reconcile(State(state): State<AppState>) -> Result<Json<ReconcileReport>, ApiError> {
    Ok(Json(state.engine.reconcile().await?))
}

// =============================================================================
// Multipart helpers
// =============================================================================

struct UploadedFile {
    filename: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct UploadForm {
    texts: Vec<(String, String)>,
    file: Option<UploadedFile>,
}

impl UploadForm {
    fn text(&self, name: &str) -> Option<String> {
        self.texts
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.trim().to_string())
    }

    fn require_text(&self, name: &str) -> Result<String, ApiError> {
        self.text(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::BadRequest(format!("Form field '{}' is required", name)))
    }

    fn require_file(self) -> Result<UploadedFile, ApiError> {
        self.file
            .ok_or_else(|| ApiError::BadRequest("Form field 'file' is required".to_string()))
    }
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or("upload").to_string();
            let content_type = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?;
            form.file = Some(UploadedFile {
                filename,
                content_type,
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Invalid field '{}': {}", name, e)))?;
            form.texts.push((name, value));
        }
    }
    Ok(form)
}

fn parse_bool(raw: &str) -> Result<bool, ApiError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ApiError::BadRequest(format!(
            "generate_embedding must be a boolean, got '{}'",
            other
        ))),
    }
}

fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, e)| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "webm" => "audio/webm",
        "m4a" | "mp4" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}
