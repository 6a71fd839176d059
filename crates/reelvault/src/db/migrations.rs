//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_pending_media_table",
        sql: include_str!("sql/001_create_pending_media.sql"),
    },
    Migration {
        version: 2,
        description: "create_processed_media_table",
        sql: include_str!("sql/002_create_processed_media.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        // Running again should be a no-op.
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_pending_media_path_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO pending_media (original_path, original_filename, file_size, detected_at)
             VALUES ('/d/a.mkv', 'a.mkv', 1, '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let duplicate = conn.execute(
            "INSERT INTO pending_media (original_path, original_filename, file_size, detected_at)
             VALUES ('/d/a.mkv', 'a.mkv', 1, '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_status_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let bad = conn.execute(
            "INSERT INTO pending_media (original_path, original_filename, file_size, detected_at, status)
             VALUES ('/d/b.mkv', 'b.mkv', 1, '2026-01-01T00:00:00Z', 'approved')",
            [],
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_action_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let bad = conn.execute(
            "INSERT INTO processed_media (source_entry_id, original_path, original_filename,
             file_size, detected_at, processed_at, action)
             VALUES (1, '/d/c.mkv', 'c.mkv', 1, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z', 'pending')",
            [],
        );
        assert!(bad.is_err());
    }
}
