use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{FurrowError, Result};

// =============================================================================
// Enums
// =============================================================================

/// Configured text embedding provider mode.
///
/// Parsed once from configuration; unrecognised values resolve to `Local`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    /// Prefer remote when a credential is configured, else local.
    #[default]
    Auto,
    /// Remote only; never falls back.
    #[serde(rename = "openai", alias = "remote")]
    Remote,
    /// Local model only.
    Local,
}

impl ProviderMode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "auto" => ProviderMode::Auto,
            "openai" | "remote" => ProviderMode::Remote,
            _ => ProviderMode::Local,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderMode::Auto => "auto",
            ProviderMode::Remote => "openai",
            ProviderMode::Local => "local",
        }
    }
}

impl std::fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The provider actually used for embedding, resolved at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveProvider {
    #[serde(rename = "openai")]
    Remote,
    Local,
}

impl ActiveProvider {
    /// Resolve the active provider from the configured mode and credential presence.
    pub fn resolve(mode: ProviderMode, credential_present: bool) -> Self {
        match mode {
            ProviderMode::Auto if credential_present => ActiveProvider::Remote,
            ProviderMode::Auto => ActiveProvider::Local,
            ProviderMode::Remote => ActiveProvider::Remote,
            ProviderMode::Local => ActiveProvider::Local,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActiveProvider::Remote => "openai",
            ActiveProvider::Local => "local",
        }
    }
}

impl std::fmt::Display for ActiveProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a record ended up durable and/or retrievable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Searchability {
    /// Nothing was stored.
    NotStored,
    /// Stored in the record store, but no index entry (yet).
    StoredPending,
    /// Stored and present in the vector index.
    Searchable,
}

/// Result of running one record through the text ingestion path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestStatus {
    /// The record had no embeddable content; the index was not touched.
    Skipped { reason: String },
    /// No embedding could be produced right now; the record can be indexed later.
    Pending { reason: String },
    /// The index entry for `id` was written (created or overwritten).
    #[serde(rename = "ok")]
    Indexed { id: String },
}

impl IngestStatus {
    pub fn skipped_no_content() -> Self {
        IngestStatus::Skipped {
            reason: "No embedding text generated".to_string(),
        }
    }

    pub fn pending(reason: impl Into<String>) -> Self {
        IngestStatus::Pending {
            reason: reason.into(),
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, IngestStatus::Indexed { .. })
    }

    /// Classify the outcome given whether the record itself was persisted.
    pub fn searchability(&self, stored: bool) -> Searchability {
        match (self, stored) {
            (IngestStatus::Indexed { .. }, _) => Searchability::Searchable,
            (_, true) => Searchability::StoredPending,
            (_, false) => Searchability::NotStored,
        }
    }
}

// =============================================================================
// Entity Structs
// =============================================================================

/// A field visit as synced from a client.
///
/// The JSON shape uses the client's field names (`createdAt`, `updatedAt`,
/// `aiStatus`). `id` is the join key across the record store and the text index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub id: String,
    /// Epoch milliseconds.
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    /// Epoch milliseconds.
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
    pub task_type: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    /// Location accuracy in metres.
    #[serde(default)]
    pub acc: Option<i64>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub photo_present: bool,
    #[serde(default)]
    pub audio_present: bool,
    #[serde(default)]
    pub photo_caption: Option<String>,
    #[serde(default)]
    pub audio_transcript: Option<String>,
    #[serde(default)]
    pub audio_summary: Option<String>,
    /// Opaque client-side AI processing state.
    #[serde(default, rename = "aiStatus")]
    pub ai_status: Option<serde_json::Value>,
    #[serde(default)]
    pub field_id: Option<String>,
    #[serde(default)]
    pub crop: Option<String>,
    #[serde(default)]
    pub issue: Option<String>,
    /// 0 (none) to 5 (critical).
    #[serde(default)]
    pub severity: Option<u8>,
}

impl VisitRecord {
    pub const MAX_SEVERITY: u8 = 5;

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(FurrowError::InvalidInput("visit id must not be empty".into()));
        }
        if let Some(severity) = self.severity {
            if severity > Self::MAX_SEVERITY {
                return Err(FurrowError::InvalidInput(format!(
                    "severity must be between 0 and {}, got {}",
                    Self::MAX_SEVERITY,
                    severity
                )));
            }
        }
        Ok(())
    }
}

/// Link between a stored photo and its image-index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingLink {
    pub embedding_id: String,
    pub model: String,
    pub dims: usize,
    /// Epoch milliseconds.
    pub generated_at: i64,
}

/// A stored photograph belonging to a visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: String,
    pub visit_id: String,
    /// Stored filename under the visit's media directory.
    pub filename: String,
    pub file_path: String,
    pub file_size: u64,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub embedding: Option<EmbeddingLink>,
    pub exif_lat: Option<f64>,
    pub exif_lon: Option<f64>,
    /// Capture time from EXIF, epoch milliseconds.
    pub exif_timestamp: Option<i64>,
    /// Epoch milliseconds.
    pub created_at: i64,
}

impl PhotoRecord {
    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }

    pub fn embedding_id(&self) -> Option<&str> {
        self.embedding.as_ref().map(|e| e.embedding_id.as_str())
    }

    pub fn uri(&self) -> String {
        media_uri(&self.visit_id, &self.filename)
    }
}

// =============================================================================
// Search
// =============================================================================

/// Filters accepted by text search. Unknown keys in the request are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Equality filter, evaluated by the index.
    #[serde(default)]
    pub field_id: Option<String>,
    /// Lower bound on `created_at` (epoch ms), evaluated after retrieval.
    #[serde(default)]
    pub created_at_min: Option<i64>,
}

/// One text search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    /// `1 - cosine distance`.
    pub score: f32,
    pub snippet: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// One cross-modal image search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSearchHit {
    pub embedding_id: String,
    pub photo_id: Option<String>,
    pub visit_id: Option<String>,
    pub filename: Option<String>,
    pub photo_uri: String,
    pub score: f32,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

// =============================================================================
// Helpers
// =============================================================================

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// URI under which a stored media file is served. Computed, never persisted.
pub fn media_uri(visit_id: &str, filename: &str) -> String {
    format!("/media/{}/{}", visit_id, filename)
}

/// Truncate `text` to `max_chars` characters, appending `...` when cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_mode_parse() {
        assert_eq!(ProviderMode::parse("auto"), ProviderMode::Auto);
        assert_eq!(ProviderMode::parse("AUTO"), ProviderMode::Auto);
        assert_eq!(ProviderMode::parse("openai"), ProviderMode::Remote);
        assert_eq!(ProviderMode::parse("remote"), ProviderMode::Remote);
        assert_eq!(ProviderMode::parse("local"), ProviderMode::Local);
        assert_eq!(ProviderMode::parse("huggingface"), ProviderMode::Local);
        assert_eq!(ProviderMode::parse(""), ProviderMode::Local);
    }

    #[test]
    fn test_active_provider_resolution() {
        assert_eq!(
            ActiveProvider::resolve(ProviderMode::Auto, true),
            ActiveProvider::Remote
        );
        assert_eq!(
            ActiveProvider::resolve(ProviderMode::Auto, false),
            ActiveProvider::Local
        );
        assert_eq!(
            ActiveProvider::resolve(ProviderMode::Remote, false),
            ActiveProvider::Remote
        );
        assert_eq!(
            ActiveProvider::resolve(ProviderMode::Local, true),
            ActiveProvider::Local
        );
    }

    #[test]
    fn test_provider_serialization_labels() {
        assert_eq!(
            serde_json::to_string(&ProviderMode::Remote).unwrap(),
            "\"openai\""
        );
        let mode: ProviderMode = serde_json::from_str("\"remote\"").unwrap();
        assert_eq!(mode, ProviderMode::Remote);
        assert_eq!(
            serde_json::to_string(&ActiveProvider::Local).unwrap(),
            "\"local\""
        );
    }

    #[test]
    fn test_ingest_status_serialization() {
        let json = serde_json::to_value(IngestStatus::Indexed { id: "v1".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "ok", "id": "v1"}));

        let json = serde_json::to_value(IngestStatus::skipped_no_content()).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "No embedding text generated");

        let json = serde_json::to_value(IngestStatus::pending("Embedding provider unavailable"))
            .unwrap();
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn test_searchability_classification() {
        let indexed = IngestStatus::Indexed { id: "v1".into() };
        let pending = IngestStatus::pending("down");
        let skipped = IngestStatus::skipped_no_content();

        assert_eq!(indexed.searchability(true), Searchability::Searchable);
        assert_eq!(pending.searchability(true), Searchability::StoredPending);
        assert_eq!(pending.searchability(false), Searchability::NotStored);
        assert_eq!(skipped.searchability(false), Searchability::NotStored);
        assert!(!skipped.is_indexed());
    }

    #[test]
    fn test_visit_record_client_field_names() {
        let json = serde_json::json!({
            "id": "visit-1",
            "createdAt": 1700000000000i64,
            "updatedAt": 1700000000500i64,
            "task_type": "field_visit",
            "note": "Aphids on lower leaves",
            "aiStatus": {"transcribed": true},
            "severity": 3
        });
        let visit: VisitRecord = serde_json::from_value(json).unwrap();
        assert_eq!(visit.created_at, 1700000000000);
        assert_eq!(visit.updated_at, 1700000000500);
        assert_eq!(visit.severity, Some(3));
        assert!(!visit.photo_present);
        assert!(visit.ai_status.is_some());

        let back = serde_json::to_value(&visit).unwrap();
        assert!(back.get("createdAt").is_some());
        assert!(back.get("created_at").is_none());
    }

    #[test]
    fn test_visit_validation() {
        let mut visit = VisitRecord {
            id: "v1".into(),
            severity: Some(5),
            ..Default::default()
        };
        assert!(visit.validate().is_ok());

        visit.severity = Some(6);
        assert!(matches!(visit.validate(), Err(FurrowError::InvalidInput(_))));

        visit.severity = None;
        visit.id = "  ".into();
        assert!(visit.validate().is_err());
    }

    #[test]
    fn test_search_filters_ignore_unknown_keys() {
        let filters: SearchFilters = serde_json::from_value(serde_json::json!({
            "field_id": "north-40",
            "created_at_min": 150,
            "crop": "corn"
        }))
        .unwrap();
        assert_eq!(filters.field_id.as_deref(), Some("north-40"));
        assert_eq!(filters.created_at_min, Some(150));
    }

    #[test]
    fn test_snippet_truncation() {
        let short = "short text";
        assert_eq!(snippet(short, 200), short);

        let exact = "a".repeat(200);
        assert_eq!(snippet(&exact, 200), exact);

        let long = "b".repeat(250);
        let s = snippet(&long, 200);
        assert_eq!(s.len(), 203);
        assert!(s.ends_with("..."));
    }

    #[test]
    fn test_snippet_respects_char_boundaries() {
        let text = "é".repeat(10);
        let s = snippet(&text, 4);
        assert_eq!(s, "éééé...");
    }

    #[test]
    fn test_photo_uri_and_embedding_accessors() {
        let mut photo = PhotoRecord {
            id: "p1".into(),
            visit_id: "v1".into(),
            filename: "photo_p1_leaf.jpg".into(),
            file_path: "/data/media/v1/photo_p1_leaf.jpg".into(),
            file_size: 10,
            mime_type: Some("image/jpeg".into()),
            width: Some(4),
            height: Some(3),
            embedding: None,
            exif_lat: None,
            exif_lon: None,
            exif_timestamp: None,
            created_at: 1,
        };
        assert_eq!(photo.uri(), "/media/v1/photo_p1_leaf.jpg");
        assert!(!photo.has_embedding());

        photo.embedding = Some(EmbeddingLink {
            embedding_id: "img_p1".into(),
            model: "clip-vit-base-patch32".into(),
            dims: 512,
            generated_at: 2,
        });
        assert_eq!(photo.embedding_id(), Some("img_p1"));
    }

    #[test]
    fn test_now_millis_is_millisecond_scale() {
        // 2020-01-01 in ms
        assert!(now_millis() > 1_577_836_800_000);
    }
}
