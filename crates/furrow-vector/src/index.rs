//! Vector index with brute-force cosine distance search.
//!
//! Entries live in memory behind an `RwLock`; an index opened against a
//! database also writes every upsert through to `vector_entries`, so the
//! collection survives restarts. Search is O(n), which is fine at the
//! scale of a single farm's visit history.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use tracing::info;

use furrow_core::error::FurrowError;
use furrow_storage::{Database, StoredVector, VectorEntryRepository};

/// Equality-only metadata predicate. Every key must match exactly.
pub type MetadataFilter = Map<String, Value>;

/// A single ranked match.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub id: String,
    /// Cosine distance in `[0, 2]`; smaller is closer.
    pub distance: f32,
    pub document: String,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    vector: Vec<f32>,
    document: String,
    metadata: Map<String, Value>,
}

/// Named vector collection.
#[derive(Clone)]
pub struct VectorIndex {
    name: String,
    entries: Arc<RwLock<HashMap<String, IndexEntry>>>,
    store: Option<Arc<VectorEntryRepository>>,
}

impl VectorIndex {
    /// An index that is never persisted.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Arc::new(RwLock::new(HashMap::new())),
            store: None,
        }
    }

    /// Open the named collection, loading any entries already stored.
    pub fn open(db: Arc<Database>, name: impl Into<String>) -> Result<Self, FurrowError> {
        let name = name.into();
        let store = VectorEntryRepository::new(db, name.clone());

        let entries: HashMap<String, IndexEntry> = store
            .load_all()?
            .into_iter()
            .map(|stored| {
                (
                    stored.id,
                    IndexEntry {
                        vector: stored.vector,
                        document: stored.document,
                        metadata: stored.metadata,
                    },
                )
            })
            .collect();
        info!(collection = %name, entries = entries.len(), "Vector index loaded");

        Ok(Self {
            name,
            entries: Arc::new(RwLock::new(entries)),
            store: Some(Arc::new(store)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or overwrite the entry for `id`.
    pub fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        document: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Result<(), FurrowError> {
        if vector.is_empty() {
            return Err(FurrowError::InvalidInput(format!(
                "empty vector for entry {}",
                id
            )));
        }
        let entry = IndexEntry {
            vector,
            document: document.into(),
            metadata,
        };

        if let Some(store) = &self.store {
            store.upsert(&StoredVector {
                id: id.to_string(),
                vector: entry.vector.clone(),
                document: entry.document.clone(),
                metadata: entry.metadata.clone(),
            })?;
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|e| FurrowError::Search(format!("Lock poisoned: {}", e)))?;
        entries.insert(id.to_string(), entry);
        Ok(())
    }

    /// The `k` nearest entries matching `filter`, by ascending distance.
    pub fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<IndexMatch>, FurrowError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let entries = self
            .entries
            .read()
            .map_err(|e| FurrowError::Search(format!("Lock poisoned: {}", e)))?;

        let mut matches: Vec<IndexMatch> = entries
            .iter()
            .filter(|(_, entry)| matches_filter(&entry.metadata, filter))
            .map(|(id, entry)| IndexMatch {
                id: id.clone(),
                distance: cosine_distance(vector, &entry.vector),
                document: entry.document.clone(),
                metadata: entry.metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);

        Ok(matches)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(id))
            .unwrap_or(false)
    }

    /// Stored vector, document and metadata for `id`.
    pub fn get(&self, id: &str) -> Option<(Vec<f32>, String, Map<String, Value>)> {
        let entries = self.entries.read().ok()?;
        entries
            .get(id)
            .map(|e| (e.vector.clone(), e.document.clone(), e.metadata.clone()))
    }

    pub fn count(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("name", &self.name)
            .field("count", &self.count())
            .field("durable", &self.store.is_some())
            .finish()
    }
}

fn matches_filter(metadata: &Map<String, Value>, filter: &MetadataFilter) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

/// Cosine distance `1 - cos(a, b)`.
///
/// Zero-magnitude or mismatched-length vectors are treated as orthogonal.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();
    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 1.0;
    }

    (1.0 - dot / (mag_a * mag_b)).clamp(0.0, 2.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn unit(dim: usize, at: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[at] = 1.0;
        v
    }

    #[test]
    fn test_upsert_and_query_ordering() {
        let index = VectorIndex::in_memory("test");
        index.upsert("close", vec![1.0, 0.1, 0.0], "close doc", Map::new()).unwrap();
        index.upsert("far", vec![-1.0, 0.0, 0.0], "far doc", Map::new()).unwrap();
        index.upsert("ortho", vec![0.0, 1.0, 0.0], "ortho doc", Map::new()).unwrap();

        let hits = index.query(&[1.0, 0.0, 0.0], 10, &Map::new()).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["close", "ortho", "far"]);
        assert!(hits[0].distance < 0.01);
        assert!((hits[1].distance - 1.0).abs() < 1e-6);
        assert!((hits[2].distance - 2.0).abs() < 1e-6);
        assert_eq!(hits[0].document, "close doc");
    }

    #[test]
    fn test_upsert_overwrites() {
        let index = VectorIndex::in_memory("test");
        index.upsert("v1", unit(4, 0), "old", meta(json!({"n": 1}))).unwrap();
        index.upsert("v1", unit(4, 1), "new", meta(json!({"n": 2}))).unwrap();

        assert_eq!(index.count(), 1);
        let (vector, document, metadata) = index.get("v1").unwrap();
        assert_eq!(vector, unit(4, 1));
        assert_eq!(document, "new");
        assert_eq!(metadata["n"], 2);
    }

    #[test]
    fn test_query_respects_k_and_filter() {
        let index = VectorIndex::in_memory("test");
        for i in 0..10 {
            let field = if i % 2 == 0 { "north" } else { "south" };
            index
                .upsert(&format!("v{}", i), vec![1.0, i as f32], "doc", meta(json!({"field_id": field})))
                .unwrap();
        }

        assert_eq!(index.query(&[1.0, 0.0], 3, &Map::new()).unwrap().len(), 3);

        let filter = meta(json!({"field_id": "south"}));
        let hits = index.query(&[1.0, 0.0], 100, &filter).unwrap();
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|h| h.metadata["field_id"] == "south"));
    }

    #[test]
    fn test_filter_requires_exact_type() {
        let index = VectorIndex::in_memory("test");
        index.upsert("a", unit(2, 0), "", meta(json!({"created_at": 5}))).unwrap();

        let as_string = meta(json!({"created_at": "5"}));
        assert!(index.query(&unit(2, 0), 5, &as_string).unwrap().is_empty());
        let as_int = meta(json!({"created_at": 5}));
        assert_eq!(index.query(&unit(2, 0), 5, &as_int).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_index_and_zero_k() {
        let index = VectorIndex::in_memory("test");
        assert!(index.is_empty());
        assert!(index.query(&[1.0], 10, &Map::new()).unwrap().is_empty());

        index.upsert("a", vec![1.0], "", Map::new()).unwrap();
        assert!(index.query(&[1.0], 0, &Map::new()).unwrap().is_empty());
    }

    #[test]
    fn test_empty_vector_rejected() {
        let index = VectorIndex::in_memory("test");
        assert!(matches!(
            index.upsert("a", Vec::new(), "", Map::new()),
            Err(FurrowError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_cosine_distance_edge_cases() {
        assert!(cosine_distance(&unit(8, 2), &unit(8, 2)).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0; 4], &[1.0; 4]), 1.0);
        assert_eq!(cosine_distance(&[1.0; 4], &[1.0; 8]), 1.0);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_durable_index_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visits.db");

        {
            let db = Arc::new(Database::new(&path).unwrap());
            let index = VectorIndex::open(db, "visits_text").unwrap();
            index.upsert("v1", vec![0.6, 0.8], "Crop: corn", meta(json!({"id": "v1"}))).unwrap();
            index.upsert("v1", vec![0.8, 0.6], "Crop: soy", meta(json!({"id": "v1"}))).unwrap();
        }

        let db = Arc::new(Database::new(&path).unwrap());
        let reopened = VectorIndex::open(db.clone(), "visits_text").unwrap();
        assert_eq!(reopened.count(), 1);
        let (vector, document, _) = reopened.get("v1").unwrap();
        assert_eq!(vector, vec![0.8, 0.6]);
        assert_eq!(document, "Crop: soy");

        let other = VectorIndex::open(db, "visits_images").unwrap();
        assert!(other.is_empty());
        assert!(!other.contains("v1"));
    }
}
