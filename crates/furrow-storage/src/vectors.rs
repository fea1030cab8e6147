//! Durable backing for vector-index collections.
//!
//! Each collection ("visits_text", "visits_images", ...) is a namespace in
//! the `vector_entries` table. Vectors are stored as little-endian f32 blobs.

use std::sync::Arc;

use furrow_core::error::FurrowError;
use furrow_core::types::now_millis;

use crate::db::Database;

/// One persisted index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVector {
    pub id: String,
    pub vector: Vec<f32>,
    pub document: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Repository scoped to a single collection.
pub struct VectorEntryRepository {
    db: Arc<Database>,
    collection: String,
}

impl VectorEntryRepository {
    pub fn new(db: Arc<Database>, collection: impl Into<String>) -> Self {
        Self {
            db,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Insert or overwrite the entry for `entry.id`.
    pub fn upsert(&self, entry: &StoredVector) -> Result<(), FurrowError> {
        let metadata = serde_json::to_string(&entry.metadata)?;
        let blob = encode_vector(&entry.vector);
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO vector_entries (collection, id, vector, dims, document, metadata, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (collection, id) DO UPDATE SET
                    vector = excluded.vector,
                    dims = excluded.dims,
                    document = excluded.document,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    self.collection,
                    entry.id,
                    blob,
                    entry.vector.len() as i64,
                    entry.document,
                    metadata,
                    now_millis(),
                ],
            )
            .map_err(|e| FurrowError::Storage(format!("Failed to upsert vector entry: {}", e)))?;
            Ok(())
        })
    }

    /// Load every entry in the collection.
    pub fn load_all(&self) -> Result<Vec<StoredVector>, FurrowError> {
        let rows: Vec<(String, Vec<u8>, String, String)> = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, vector, document, metadata FROM vector_entries
                     WHERE collection = ?1 ORDER BY id ASC",
                )
                .map_err(|e| FurrowError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![self.collection], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })
                .map_err(|e| FurrowError::Storage(e.to_string()))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| FurrowError::Storage(e.to_string()))?);
            }
            Ok(out)
        })?;

        rows.into_iter()
            .map(|(id, blob, document, metadata)| {
                Ok(StoredVector {
                    vector: decode_vector(&blob)?,
                    metadata: serde_json::from_str(&metadata)?,
                    id,
                    document,
                })
            })
            .collect()
    }

    /// Count entries in the collection.
    pub fn count(&self) -> Result<u64, FurrowError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM vector_entries WHERE collection = ?1",
                    rusqlite::params![self.collection],
                    |row| row.get(0),
                )
                .map_err(|e| FurrowError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Result<Vec<f32>, FurrowError> {
    if blob.len() % 4 != 0 {
        return Err(FurrowError::Storage(format!(
            "Corrupt vector blob: {} bytes is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, vector: Vec<f32>, created_at: i64) -> StoredVector {
        let mut metadata = serde_json::Map::new();
        metadata.insert("id".into(), serde_json::json!(id));
        metadata.insert("created_at".into(), serde_json::json!(created_at));
        StoredVector {
            id: id.to_string(),
            vector,
            document: format!("Notes: {}", id),
            metadata,
        }
    }

    #[test]
    fn test_upsert_and_load() {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = VectorEntryRepository::new(db, "visits_text");

        let e = entry("v1", vec![0.25, -1.5, 3.0], 100);
        repo.upsert(&e).unwrap();

        let loaded = repo.load_all().unwrap();
        assert_eq!(loaded, vec![e]);
        // created_at stays an integer through the JSON column
        assert!(loaded[0].metadata["created_at"].is_i64());
    }

    #[test]
    fn test_upsert_overwrites_same_id() {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = VectorEntryRepository::new(db, "visits_text");

        repo.upsert(&entry("v1", vec![1.0, 0.0], 100)).unwrap();
        repo.upsert(&entry("v1", vec![0.0, 1.0], 200)).unwrap();

        assert_eq!(repo.count().unwrap(), 1);
        let loaded = repo.load_all().unwrap();
        assert_eq!(loaded[0].vector, vec![0.0, 1.0]);
        assert_eq!(loaded[0].metadata["created_at"], 200);
    }

    #[test]
    fn test_collections_are_disjoint() {
        let db = Arc::new(Database::in_memory().unwrap());
        let text = VectorEntryRepository::new(db.clone(), "visits_text");
        let images = VectorEntryRepository::new(db, "visits_images");

        text.upsert(&entry("x", vec![1.0], 1)).unwrap();
        images.upsert(&entry("img_x", vec![1.0], 1)).unwrap();
        images.upsert(&entry("img_y", vec![1.0], 1)).unwrap();

        assert_eq!(text.count().unwrap(), 1);
        assert_eq!(images.count().unwrap(), 2);
        assert_eq!(text.load_all().unwrap()[0].id, "x");
    }

    #[test]
    fn test_decode_rejects_truncated_blob() {
        assert!(decode_vector(&[0, 0, 128]).is_err());
        assert_eq!(decode_vector(&encode_vector(&[1.5, 2.0])).unwrap(), vec![1.5, 2.0]);
    }
}
