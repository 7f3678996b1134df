//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_jobs_table",
        sql: "CREATE TABLE jobs (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 5,
                merge_requested INTEGER NOT NULL DEFAULT 0,
                merge_format TEXT,
                total_files INTEGER NOT NULL DEFAULT 0,
                processed_files INTEGER NOT NULL DEFAULT 0,
                failed_files INTEGER NOT NULL DEFAULT 0,
                total_pages INTEGER NOT NULL DEFAULT 0,
                processed_pages INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );
            CREATE INDEX idx_jobs_scheduling ON jobs (status, priority, created_at);",
    },
    Migration {
        version: 2,
        description: "create_files_table",
        sql: "CREATE TABLE files (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                filename TEXT NOT NULL,
                byte_size INTEGER NOT NULL DEFAULT 0,
                mime_type TEXT,
                estimated_pages INTEGER NOT NULL DEFAULT 1,
                actual_pages INTEGER,
                status TEXT NOT NULL DEFAULT 'pending',
                error_code TEXT,
                error_message TEXT,
                text_ref TEXT,
                processing_started_at TEXT,
                processing_completed_at TEXT
            );
            CREATE INDEX idx_files_claim ON files (status, job_id, seq);
            CREATE INDEX idx_files_job ON files (job_id, seq);",
    },
    Migration {
        version: 3,
        description: "create_outputs_table",
        sql: "CREATE TABLE outputs (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                format TEXT NOT NULL,
                storage_ref TEXT NOT NULL,
                byte_size INTEGER NOT NULL DEFAULT 0,
                download_token TEXT NOT NULL UNIQUE,
                expires_at TEXT NOT NULL,
                download_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX idx_outputs_token ON outputs (download_token);
            CREATE INDEX idx_outputs_expiry ON outputs (expires_at);",
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    // Create the migrations tracking table.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}
