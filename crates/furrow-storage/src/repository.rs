//! Repository implementations for SQLite-backed persistence.
//!
//! Provides VisitRepository and PhotoRepository operating on the Database
//! struct using raw SQL.

use std::sync::Arc;

use furrow_core::error::FurrowError;
use furrow_core::types::{now_millis, EmbeddingLink, PhotoRecord, VisitRecord};

use crate::db::Database;

/// Repository for synced visit records. The visit table is authoritative;
/// vector indexes are derived from it.
pub struct VisitRepository {
    db: Arc<Database>,
}

impl VisitRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or overwrite a visit and mark it synced.
    pub fn upsert(&self, visit: &VisitRecord) -> Result<(), FurrowError> {
        let data = serde_json::to_string(visit)?;
        let ai_status = visit
            .ai_status
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO visits (
                    id, created_at, updated_at, task_type, lat, lon, acc,
                    note, photo_present, audio_present, photo_caption,
                    audio_transcript, audio_summary, ai_status, sync_status, synced_at,
                    field_id, crop, issue, severity, data
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                           'synced', ?15, ?16, ?17, ?18, ?19, ?20)",
                rusqlite::params![
                    visit.id,
                    visit.created_at,
                    visit.updated_at,
                    visit.task_type,
                    visit.lat,
                    visit.lon,
                    visit.acc,
                    visit.note,
                    visit.photo_present as i32,
                    visit.audio_present as i32,
                    visit.photo_caption,
                    visit.audio_transcript,
                    visit.audio_summary,
                    ai_status,
                    now_millis(),
                    visit.field_id,
                    visit.crop,
                    visit.issue,
                    visit.severity,
                    data,
                ],
            )
            .map_err(|e| FurrowError::Storage(format!("Failed to upsert visit: {}", e)))?;
            Ok(())
        })
    }

    /// Find a visit by ID.
    pub fn find_by_id(&self, id: &str) -> Result<Option<VisitRecord>, FurrowError> {
        let data: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT data FROM visits WHERE id = ?1",
                rusqlite::params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| FurrowError::Storage(e.to_string()))
        })?;

        data.map(|json| serde_json::from_str(&json).map_err(FurrowError::from))
            .transpose()
    }

    /// Get a visit by ID, failing with `NotFound` when absent.
    pub fn get(&self, id: &str) -> Result<VisitRecord, FurrowError> {
        self.find_by_id(id)?
            .ok_or_else(|| FurrowError::NotFound(format!("visit {}", id)))
    }

    /// All stored visits, newest first.
    pub fn list_all(&self) -> Result<Vec<VisitRecord>, FurrowError> {
        let rows: Vec<String> = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT data FROM visits ORDER BY created_at DESC, id ASC")
                .map_err(|e| FurrowError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| FurrowError::Storage(e.to_string()))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| FurrowError::Storage(e.to_string()))?);
            }
            Ok(out)
        })?;

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(FurrowError::from))
            .collect()
    }

    /// Count stored visits.
    pub fn count(&self) -> Result<u64, FurrowError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM visits", [], |row| row.get(0))
                .map_err(|e| FurrowError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

/// Repository for photo rows.
pub struct PhotoRepository {
    db: Arc<Database>,
}

const PHOTO_COLUMNS: &str = "id, visit_id, filename, file_path, file_size, mime_type, width, height,
     embedding_id, embedding_model, embedding_dims, embedding_generated_at,
     exif_lat, exif_lon, exif_timestamp, created_at";

impl PhotoRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a new photo row.
    pub fn insert(&self, photo: &PhotoRecord) -> Result<(), FurrowError> {
        let link = photo.embedding.as_ref();
        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO photos ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                    PHOTO_COLUMNS
                ),
                rusqlite::params![
                    photo.id,
                    photo.visit_id,
                    photo.filename,
                    photo.file_path,
                    photo.file_size as i64,
                    photo.mime_type,
                    photo.width,
                    photo.height,
                    link.map(|l| l.embedding_id.as_str()),
                    link.map(|l| l.model.as_str()),
                    link.map(|l| l.dims as i64),
                    link.map(|l| l.generated_at),
                    photo.exif_lat,
                    photo.exif_lon,
                    photo.exif_timestamp,
                    photo.created_at,
                ],
            )
            .map_err(|e| FurrowError::Storage(format!("Failed to save photo: {}", e)))?;
            Ok(())
        })
    }

    /// Find a photo by ID.
    pub fn find_by_id(&self, id: &str) -> Result<Option<PhotoRecord>, FurrowError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {} FROM photos WHERE id = ?1", PHOTO_COLUMNS))
                .map_err(|e| FurrowError::Storage(e.to_string()))?;

            stmt.query_row(rusqlite::params![id], row_to_photo_record)
                .optional()
                .map_err(|e| FurrowError::Storage(e.to_string()))
        })
    }

    /// Record the image-index entry for an existing photo.
    pub fn set_embedding(&self, photo_id: &str, link: &EmbeddingLink) -> Result<(), FurrowError> {
        let updated = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE photos SET embedding_id = ?2, embedding_model = ?3,
                        embedding_dims = ?4, embedding_generated_at = ?5
                 WHERE id = ?1",
                rusqlite::params![
                    photo_id,
                    link.embedding_id,
                    link.model,
                    link.dims as i64,
                    link.generated_at,
                ],
            )
            .map_err(|e| FurrowError::Storage(format!("Failed to link photo embedding: {}", e)))
        })?;
        if updated == 0 {
            return Err(FurrowError::NotFound(format!("photo {}", photo_id)));
        }
        Ok(())
    }

    /// Photos belonging to a visit, newest first.
    pub fn list_for_visit(&self, visit_id: &str) -> Result<Vec<PhotoRecord>, FurrowError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM photos WHERE visit_id = ?1 ORDER BY created_at DESC, id ASC",
                    PHOTO_COLUMNS
                ))
                .map_err(|e| FurrowError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![visit_id], row_to_photo_record)
                .map_err(|e| FurrowError::Storage(e.to_string()))?;

            let mut photos = Vec::new();
            for row in rows {
                photos.push(row.map_err(|e| FurrowError::Storage(e.to_string()))?);
            }
            Ok(photos)
        })
    }

    /// Count stored photos.
    pub fn count(&self) -> Result<u64, FurrowError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))
                .map_err(|e| FurrowError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

// ============================================================================
// Helper functions for row-to-entity conversion.
// ============================================================================

fn row_to_photo_record(row: &rusqlite::Row<'_>) -> Result<PhotoRecord, rusqlite::Error> {
    let embedding_id: Option<String> = row.get(8)?;
    let embedding = match embedding_id {
        Some(embedding_id) => Some(EmbeddingLink {
            embedding_id,
            model: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            dims: row.get::<_, Option<i64>>(10)?.unwrap_or(0) as usize,
            generated_at: row.get::<_, Option<i64>>(11)?.unwrap_or(0),
        }),
        None => None,
    };

    Ok(PhotoRecord {
        id: row.get(0)?,
        visit_id: row.get(1)?,
        filename: row.get(2)?,
        file_path: row.get(3)?,
        file_size: row.get::<_, i64>(4)? as u64,
        mime_type: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
        embedding,
        exif_lat: row.get(12)?,
        exif_lon: row.get(13)?,
        exif_timestamp: row.get(14)?,
        created_at: row.get(15)?,
    })
}

/// Extension trait for rusqlite to support optional query results.
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
