//! Database schema migrations.
//!
//! Forward-only, versioned. Version 1 creates the visits and photos tables;
//! version 2 adds durable storage for vector-index entries.

use rusqlite::Connection;
use tracing::info;

use furrow_core::error::FurrowError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), FurrowError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| FurrowError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| FurrowError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: visits_and_photos");
    }
    if current_version < 2 {
        apply_v2(conn)?;
        info!("Applied migration v2: vector_entries");
    }

    Ok(())
}

/// Version 1: visits and photos.
fn apply_v1(conn: &Connection) -> Result<(), FurrowError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS visits (
            id               TEXT PRIMARY KEY NOT NULL,
            created_at       INTEGER NOT NULL,
            updated_at       INTEGER NOT NULL,
            task_type        TEXT NOT NULL,
            lat              REAL,
            lon              REAL,
            acc              INTEGER,
            note             TEXT,
            photo_present    INTEGER NOT NULL DEFAULT 0,
            audio_present    INTEGER NOT NULL DEFAULT 0,
            photo_caption    TEXT,
            audio_transcript TEXT,
            audio_summary    TEXT,
            ai_status        TEXT,
            sync_status      TEXT NOT NULL DEFAULT 'pending',
            synced_at        INTEGER,
            field_id         TEXT,
            crop             TEXT,
            issue            TEXT,
            severity         INTEGER CHECK (severity IS NULL OR severity BETWEEN 0 AND 5),
            data             TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_visits_created_at
            ON visits (created_at);

        CREATE INDEX IF NOT EXISTS idx_visits_sync_status
            ON visits (sync_status);

        -- visit_id is not a foreign key: photos may arrive before their visit syncs.
        CREATE TABLE IF NOT EXISTS photos (
            id                     TEXT PRIMARY KEY NOT NULL,
            visit_id               TEXT NOT NULL,
            filename               TEXT NOT NULL,
            file_path              TEXT NOT NULL,
            file_size              INTEGER NOT NULL,
            mime_type              TEXT,
            width                  INTEGER,
            height                 INTEGER,
            embedding_id           TEXT,
            embedding_model        TEXT,
            embedding_dims         INTEGER,
            embedding_generated_at INTEGER,
            exif_lat               REAL,
            exif_lon               REAL,
            exif_timestamp         INTEGER,
            created_at             INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_photos_visit_id
            ON photos (visit_id, created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_photos_embedding_id
            ON photos (embedding_id)
            WHERE embedding_id IS NOT NULL;

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'visits_and_photos');
        ",
    )
    .map_err(|e| FurrowError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

/// Version 2: vector-index entries, one namespace per collection.
fn apply_v2(conn: &Connection) -> Result<(), FurrowError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS vector_entries (
            collection  TEXT NOT NULL,
            id          TEXT NOT NULL,
            vector      BLOB NOT NULL,
            dims        INTEGER NOT NULL,
            document    TEXT NOT NULL DEFAULT '',
            metadata    TEXT NOT NULL DEFAULT '{}',
            updated_at  INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (2, 'vector_entries');
        ",
    )
    .map_err(|e| FurrowError::Storage(format!("Failed to apply migration v2: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_visits_table_exists() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO visits (id, created_at, updated_at, task_type, data)
             VALUES ('v1', 100, 100, 'field_visit', '{}')",
            [],
        )
        .unwrap();

        let status: String = conn
            .query_row("SELECT sync_status FROM visits WHERE id = 'v1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(status, "pending");
    }

    #[test]
    fn test_visits_severity_check() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO visits (id, created_at, updated_at, task_type, severity, data)
             VALUES ('bad', 0, 0, 'field_visit', 9, '{}')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_photos_do_not_require_visit() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO photos (id, visit_id, filename, file_path, file_size, created_at)
             VALUES ('p1', 'not-synced-yet', 'photo_p1_a.jpg', '/tmp/a.jpg', 3, 1)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_vector_entries_primary_key() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let insert = "INSERT INTO vector_entries (collection, id, vector, dims, updated_at)
                      VALUES (?1, 'x', X'00000000', 1, 0)";
        conn.execute(insert, ["text"]).unwrap();
        conn.execute(insert, ["image"]).unwrap();
        assert!(conn.execute(insert, ["text"]).is_err());
    }
}
