//! Furrow Storage crate - SQLite record store, media files, durable vector entries.
//!
//! Provides a WAL-mode SQLite database with migrations, repositories for
//! visits, photos and vector-index entries, and the on-disk media store.

pub mod db;
pub mod media;
pub mod migrations;
pub mod repository;
pub mod vectors;

pub use db::Database;
pub use media::{sanitize_filename, MediaStore, StoredMedia};
pub use repository::{PhotoRepository, VisitRepository};
pub use vectors::{StoredVector, VectorEntryRepository};
