//! Retrieval engine: ingestion and search over the text and image indexes.
//!
//! The record store is the durable source of truth. Both vector indexes are
//! derived from it and can be rebuilt with [`RetrievalEngine::reconcile`].
//! There is no transaction spanning the store and an index, so a record may
//! be stored without being searchable yet.

use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use furrow_core::config::FurrowConfig;
use furrow_core::error::FurrowError;
use furrow_core::types::{
    media_uri, now_millis, snippet, EmbeddingLink, ImageSearchHit, IngestStatus, PhotoRecord,
    SearchFilters, SearchHit, Searchability, VisitRecord,
};
use furrow_storage::{
    sanitize_filename, Database, MediaStore, PhotoRepository, StoredMedia, VisitRepository,
};

use crate::clip::{ClipStatus, DisabledClipEncoder, DynClipEncoder, ImageInput, OnnxClipEncoder};
use crate::digest::{embedding_text, text_metadata};
use crate::image_meta::{extract_image_metadata, ImageMetadata};
use crate::index::{MetadataFilter, VectorIndex};
use crate::provider::{EmbeddingProvider, ProviderStatus};

/// Collection backing the visit text index.
pub const TEXT_COLLECTION: &str = "visits_text";
/// Collection backing the photo image index.
pub const IMAGE_COLLECTION: &str = "visits_images";

/// Candidate multiplier applied when a post-retrieval filter is active.
const OVERFETCH_FACTOR: usize = 2;

// =============================================================================
// Outcome types
// =============================================================================

/// Result of syncing one visit: store write plus text ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub id: String,
    pub stored: bool,
    pub ingest: IngestStatus,
    pub searchability: Searchability,
}

/// A photo to ingest.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub visit_id: String,
    /// Client-supplied filename, before sanitising.
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub generate_embedding: bool,
}

/// What happened to the image embedding of an ingested photo.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EmbeddingOutcome {
    Generated {
        embedding_id: String,
        dims: usize,
        model: String,
        device: Option<String>,
    },
    Failed {
        error: String,
    },
    NotRequested,
}

/// Result of one photo ingestion. Partial failure is a normal outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoIngest {
    pub photo_id: String,
    pub visit_id: String,
    pub filename: String,
    pub file_path: String,
    pub file_size: u64,
    pub uri: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub exif_lat: Option<f64>,
    pub exif_lon: Option<f64>,
    pub exif_timestamp: Option<i64>,
    pub metadata_error: Option<String>,
    /// Set when the photo row (or its embedding link) could not be written.
    pub record_error: Option<String>,
    pub embedding_generated: bool,
    pub embedding: EmbeddingOutcome,
    pub searchability: Searchability,
}

/// A visit with the URIs of its stored media.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitView {
    #[serde(flatten)]
    pub visit: VisitRecord,
    pub photo_uris: Vec<String>,
    pub audio_uris: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoView {
    #[serde(flatten)]
    pub photo: PhotoRecord,
    pub has_embedding: bool,
    pub uri: String,
}

/// Photos of one visit, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoListing {
    pub visit_id: String,
    pub photos: Vec<PhotoView>,
    pub total: usize,
    pub with_embeddings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSearchResults {
    pub query: String,
    pub results: Vec<ImageSearchHit>,
    pub total: usize,
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub already_indexed: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextEmbeddingHealth {
    #[serde(flatten)]
    pub provider: ProviderStatus,
    pub collection_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClipEmbeddingHealth {
    #[serde(flatten)]
    pub clip: ClipStatus,
    pub collection_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub text_embedding: TextEmbeddingHealth,
    pub clip_embedding: ClipEmbeddingHealth,
    pub credential_set: bool,
}

// =============================================================================
// RetrievalEngine
// =============================================================================

pub struct RetrievalEngine {
    visits: VisitRepository,
    photos: PhotoRepository,
    media: MediaStore,
    text_index: VectorIndex,
    image_index: VectorIndex,
    provider: EmbeddingProvider,
    clip: Arc<dyn DynClipEncoder>,
    snippet_chars: usize,
}

impl RetrievalEngine {
    /// Assemble an engine over `db`, opening both durable indexes.
    pub fn new(
        db: Arc<Database>,
        media: MediaStore,
        provider: EmbeddingProvider,
        clip: Arc<dyn DynClipEncoder>,
    ) -> Result<Self, FurrowError> {
        let text_index = VectorIndex::open(Arc::clone(&db), TEXT_COLLECTION)?;
        let image_index = VectorIndex::open(Arc::clone(&db), IMAGE_COLLECTION)?;
        Ok(Self {
            visits: VisitRepository::new(Arc::clone(&db)),
            photos: PhotoRepository::new(db),
            media,
            text_index,
            image_index,
            provider,
            clip,
            snippet_chars: 200,
        })
    }

    /// Build everything from configuration. `api_key` is the remote credential, if any.
    pub fn from_config(
        config: &FurrowConfig,
        api_key: Option<SecretString>,
    ) -> Result<Self, FurrowError> {
        let db = Arc::new(Database::new(&config.db_path())?);
        let media = MediaStore::new(config.media_dir())?;
        let provider =
            EmbeddingProvider::from_config(&config.embedding, config.local_model_dir(), api_key)?;

        let clip: Arc<dyn DynClipEncoder> = if config.clip.enabled {
            Arc::new(OnnxClipEncoder::from_config(&config.clip, config.clip_model_dir()))
        } else {
            Arc::new(DisabledClipEncoder::new(config.clip.model_name.clone()))
        };

        Ok(Self::new(db, media, provider, clip)?.with_snippet_chars(config.search.snippet_chars))
    }

    pub fn with_snippet_chars(mut self, snippet_chars: usize) -> Self {
        self.snippet_chars = snippet_chars;
        self
    }

    pub fn provider(&self) -> &EmbeddingProvider {
        &self.provider
    }

    pub fn text_index(&self) -> &VectorIndex {
        &self.text_index
    }

    pub fn image_index(&self) -> &VectorIndex {
        &self.image_index
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    // -------------------------------------------------------------------------
    // Text ingestion
    // -------------------------------------------------------------------------

    /// Embed a visit and upsert its text-index entry.
    ///
    /// Records with no embeddable content are skipped; an unavailable
    /// provider leaves the record pending. Neither is an error.
    pub async fn ingest_text_record(&self, visit: &VisitRecord) -> Result<IngestStatus, FurrowError> {
        let text = embedding_text(visit);
        if text.is_empty() {
            debug!(id = %visit.id, "No embedding text generated");
            return Ok(IngestStatus::skipped_no_content());
        }

        let vector = match self.provider.embed(&text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(id = %visit.id, error = %e, "Embedding provider unavailable, visit left pending");
                return Ok(IngestStatus::pending("Embedding provider unavailable"));
            }
        };

        self.text_index
            .upsert(&visit.id, vector, text, text_metadata(visit))?;
        debug!(id = %visit.id, "Visit indexed");
        Ok(IngestStatus::Indexed {
            id: visit.id.clone(),
        })
    }

    /// Store a visit, then index it.
    ///
    /// Once the store write succeeds the visit is never reported as lost: an
    /// indexing failure after that point is reported as pending.
    pub async fn sync_visit(&self, visit: &VisitRecord) -> Result<SyncOutcome, FurrowError> {
        visit.validate()?;
        self.visits.upsert(visit)?;

        let ingest = match self.ingest_text_record(visit).await {
            Ok(status) => status,
            Err(e) => {
                warn!(id = %visit.id, error = %e, "Index write failed after store write");
                IngestStatus::pending(format!("Index write failed: {}", e))
            }
        };
        info!(id = %visit.id, indexed = ingest.is_indexed(), "Visit synced");

        Ok(SyncOutcome {
            id: visit.id.clone(),
            stored: true,
            searchability: ingest.searchability(true),
            ingest,
        })
    }

    // -------------------------------------------------------------------------
    // Text search
    // -------------------------------------------------------------------------

    /// Semantic search over visits.
    ///
    /// `field_id` is evaluated by the index. `created_at_min` is applied after
    /// retrieval on a candidate set twice the size of `k`, so fewer than `k`
    /// hits may come back.
    pub async fn search_text(
        &self,
        query: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, FurrowError> {
        if query.trim().is_empty() {
            return Err(FurrowError::EmptyInput);
        }
        let vector = self.provider.embed(query).await?;

        let mut index_filter = MetadataFilter::new();
        if let Some(field_id) = &filters.field_id {
            index_filter.insert("field_id".into(), json!(field_id));
        }
        let fetch = match filters.created_at_min {
            Some(_) => k.saturating_mul(OVERFETCH_FACTOR),
            None => k,
        };

        let matches = self.text_index.query(&vector, fetch, &index_filter)?;
        let candidates = matches.len();

        let hits: Vec<SearchHit> = matches
            .into_iter()
            .filter(|m| match filters.created_at_min {
                Some(min) => created_at_of(&m.metadata) >= min,
                None => true,
            })
            .take(k)
            .map(|m| SearchHit {
                score: 1.0 - m.distance,
                snippet: snippet(&m.document, self.snippet_chars),
                id: m.id,
                metadata: m.metadata,
            })
            .collect();

        debug!(k, candidates, returned = hits.len(), "Text search complete");
        Ok(hits)
    }

    // -------------------------------------------------------------------------
    // Images
    // -------------------------------------------------------------------------

    /// Store a photo, extract its metadata and, if requested, embed it.
    ///
    /// The photo row is written before any index entry exists, so an image
    /// vector never points at a missing row. Metadata extraction, embedding
    /// and the row writes fail independently and are reported in the
    /// outcome; only a failure to save the file itself is an error.
    pub async fn ingest_image(&self, upload: ImageUpload) -> Result<PhotoIngest, FurrowError> {
        let photo_id = Uuid::new_v4().to_string();
        let created_at = now_millis();
        let original = sanitize_filename(&upload.filename);
        let filename = format!("photo_{}_{}", photo_id, original);
        let stored = self.media.save(&upload.visit_id, &filename, &upload.bytes)?;
        let file_size = upload.bytes.len() as u64;

        let (meta, metadata_error) = match extract_image_metadata(&upload.bytes) {
            Ok(meta) => (meta, None),
            Err(e) => {
                warn!(photo_id = %photo_id, error = %e, "Image metadata extraction failed");
                (ImageMetadata::default(), Some(e.to_string()))
            }
        };

        let record = PhotoRecord {
            id: photo_id.clone(),
            visit_id: upload.visit_id.clone(),
            filename: filename.clone(),
            file_path: stored.path.display().to_string(),
            file_size,
            mime_type: upload.content_type.clone(),
            width: meta.width,
            height: meta.height,
            embedding: None,
            exif_lat: meta.exif_lat,
            exif_lon: meta.exif_lon,
            exif_timestamp: meta.exif_timestamp,
            created_at,
        };

        let mut record_error = None;
        let embedding = match self.photos.insert(&record) {
            Err(e) => {
                warn!(photo_id = %photo_id, error = %e, "Photo record write failed");
                let outcome = if upload.generate_embedding {
                    EmbeddingOutcome::Failed {
                        error: "photo record not stored".to_string(),
                    }
                } else {
                    EmbeddingOutcome::NotRequested
                };
                record_error = Some(e.to_string());
                outcome
            }
            Ok(()) if upload.generate_embedding => {
                let outcome = self
                    .embed_photo(&photo_id, &upload, &filename, &original, &meta, created_at)
                    .await;
                if let EmbeddingOutcome::Generated {
                    embedding_id,
                    dims,
                    model,
                    ..
                } = &outcome
                {
                    let link = EmbeddingLink {
                        embedding_id: embedding_id.clone(),
                        model: model.clone(),
                        dims: *dims,
                        generated_at: now_millis(),
                    };
                    if let Err(e) = self.photos.set_embedding(&photo_id, &link) {
                        warn!(photo_id = %photo_id, error = %e, "Photo embedding link write failed");
                        record_error = Some(e.to_string());
                    }
                }
                outcome
            }
            Ok(()) => EmbeddingOutcome::NotRequested,
        };

        let embedding_generated = matches!(embedding, EmbeddingOutcome::Generated { .. });
        let searchability = if embedding_generated {
            Searchability::Searchable
        } else if record_error.is_some() {
            Searchability::NotStored
        } else {
            Searchability::StoredPending
        };
        info!(
            photo_id = %photo_id,
            visit_id = %upload.visit_id,
            embedded = embedding_generated,
            stored = record_error.is_none(),
            "Photo ingested"
        );

        Ok(PhotoIngest {
            photo_id,
            visit_id: upload.visit_id,
            filename,
            file_path: record.file_path,
            file_size,
            uri: stored.uri,
            width: meta.width,
            height: meta.height,
            format: meta.format,
            exif_lat: meta.exif_lat,
            exif_lon: meta.exif_lon,
            exif_timestamp: meta.exif_timestamp,
            metadata_error,
            record_error,
            embedding_generated,
            embedding,
            searchability,
        })
    }

    async fn embed_photo(
        &self,
        photo_id: &str,
        upload: &ImageUpload,
        filename: &str,
        original: &str,
        meta: &ImageMetadata,
        created_at: i64,
    ) -> EmbeddingOutcome {
        let input = ImageInput::Bytes(upload.bytes.clone());
        let vector = match self.clip.embed_image_boxed(&input).await {
            Ok(v) => v,
            Err(e) => {
                warn!(photo_id, error = %e, "Image embedding failed");
                return EmbeddingOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let embedding_id = format!("img_{}", photo_id);
        let dims = vector.len();
        let mut metadata = Map::new();
        metadata.insert("photo_id".into(), json!(photo_id));
        metadata.insert("visit_id".into(), json!(upload.visit_id));
        metadata.insert("filename".into(), json!(filename));
        metadata.insert("width".into(), json!(meta.width));
        metadata.insert("height".into(), json!(meta.height));
        metadata.insert("created_at".into(), json!(created_at));

        let document = format!("Photo from visit {}: {}", upload.visit_id, original);
        if let Err(e) = self
            .image_index
            .upsert(&embedding_id, vector, document, metadata)
        {
            warn!(photo_id, error = %e, "Image index write failed");
            return EmbeddingOutcome::Failed {
                error: e.to_string(),
            };
        }

        EmbeddingOutcome::Generated {
            embedding_id,
            dims,
            model: self.clip.model_name().to_string(),
            device: self.clip.status_boxed().await.device,
        }
    }

    /// Cross-modal search: a text query against photo embeddings.
    ///
    /// The query is embedded by the CLIP text tower, never by the text
    /// provider, whose vectors live in a different space.
    pub async fn search_images_by_text(
        &self,
        query: &str,
        k: usize,
        visit_id: Option<&str>,
    ) -> Result<ImageSearchResults, FurrowError> {
        if query.trim().is_empty() {
            return Err(FurrowError::EmptyInput);
        }
        let vector = self.clip.embed_query_text_boxed(query).await?;

        let mut filter = MetadataFilter::new();
        if let Some(visit_id) = visit_id {
            filter.insert("visit_id".into(), json!(visit_id));
        }

        let results: Vec<ImageSearchHit> = self
            .image_index
            .query(&vector, k, &filter)?
            .into_iter()
            .map(|m| {
                let visit_id = str_field(&m.metadata, "visit_id");
                let filename = str_field(&m.metadata, "filename");
                ImageSearchHit {
                    photo_uri: media_uri(
                        visit_id.as_deref().unwrap_or_default(),
                        filename.as_deref().unwrap_or_default(),
                    ),
                    photo_id: str_field(&m.metadata, "photo_id"),
                    score: 1.0 - m.distance,
                    width: u32_field(&m.metadata, "width"),
                    height: u32_field(&m.metadata, "height"),
                    embedding_id: m.id,
                    visit_id,
                    filename,
                }
            })
            .collect();

        Ok(ImageSearchResults {
            query: query.to_string(),
            total: results.len(),
            results,
        })
    }

    // -------------------------------------------------------------------------
    // Lookups and media
    // -------------------------------------------------------------------------

    pub fn get_visit(&self, id: &str) -> Result<VisitView, FurrowError> {
        let visit = self.visits.get(id)?;
        // Ids that are not valid path components can never have media.
        let files = match self.media.list(id) {
            Ok(files) => files,
            Err(FurrowError::InvalidInput(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        let uris_with_prefix = |prefix: &str| -> Vec<String> {
            files
                .iter()
                .filter(|f| f.starts_with(prefix))
                .map(|f| media_uri(id, f))
                .collect()
        };

        Ok(VisitView {
            photo_uris: uris_with_prefix("photo_"),
            audio_uris: uris_with_prefix("audio_"),
            visit,
        })
    }

    pub fn list_photos(&self, visit_id: &str) -> Result<PhotoListing, FurrowError> {
        let photos: Vec<PhotoView> = self
            .photos
            .list_for_visit(visit_id)?
            .into_iter()
            .map(|photo| PhotoView {
                has_embedding: photo.has_embedding(),
                uri: photo.uri(),
                photo,
            })
            .collect();
        let with_embeddings = photos.iter().filter(|p| p.has_embedding).count();

        Ok(PhotoListing {
            visit_id: visit_id.to_string(),
            total: photos.len(),
            with_embeddings,
            photos,
        })
    }

    /// Store a generic upload as `{kind}_{original}`.
    pub fn store_media(
        &self,
        visit_id: &str,
        kind: &str,
        original: &str,
        bytes: &[u8],
    ) -> Result<StoredMedia, FurrowError> {
        let filename = format!("{}_{}", sanitize_filename(kind), sanitize_filename(original));
        self.media.save(visit_id, &filename, bytes)
    }

    pub fn read_media(&self, visit_id: &str, filename: &str) -> Result<Vec<u8>, FurrowError> {
        self.media.read(visit_id, filename)
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Index every stored visit that has no text-index entry.
    pub async fn reconcile(&self) -> Result<ReconcileReport, FurrowError> {
        let mut report = ReconcileReport::default();

        for visit in self.visits.list_all()? {
            report.examined += 1;
            if self.text_index.contains(&visit.id) {
                report.already_indexed += 1;
                continue;
            }
            match self.ingest_text_record(&visit).await {
                Ok(IngestStatus::Indexed { .. }) => report.indexed += 1,
                Ok(IngestStatus::Skipped { .. }) => report.skipped += 1,
                Ok(IngestStatus::Pending { .. }) => report.pending += 1,
                Err(e) => {
                    warn!(id = %visit.id, error = %e, "Reconcile failed for visit");
                    report.pending += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            indexed = report.indexed,
            skipped = report.skipped,
            pending = report.pending,
            "Reconciliation complete"
        );
        Ok(report)
    }

    pub async fn health(&self) -> EngineHealth {
        EngineHealth {
            text_embedding: TextEmbeddingHealth {
                provider: self.provider.status().await,
                collection_count: self.text_index.count(),
            },
            clip_embedding: ClipEmbeddingHealth {
                clip: self.clip.status_boxed().await,
                collection_count: self.image_index.count(),
            },
            credential_set: self.provider.credential_set(),
        }
    }
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("provider", &self.provider)
            .field("text_index", &self.text_index)
            .field("image_index", &self.image_index)
            .finish()
    }
}

/// `created_at` as stored in metadata. Older entries may carry it as a string.
fn created_at_of(metadata: &Map<String, Value>) -> i64 {
    match metadata.get("created_at") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn str_field(metadata: &Map<String, Value>, key: &str) -> Option<String> {
    metadata.get(key).and_then(Value::as_str).map(str::to_string)
}

fn u32_field(metadata: &Map<String, Value>, key: &str) -> Option<u32> {
    metadata
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
}
