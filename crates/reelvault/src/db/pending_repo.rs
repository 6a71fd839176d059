//! Repository for the `pending_media` table.
//!
//! Status mutations go through guarded UPDATEs whose WHERE clause admits
//! only the states [`Status::can_transition_to`] allows, so a competing
//! writer can never double-claim a row.

use rusqlite::params;

use super::record::{PendingRecord, Status};
use super::{Database, DatabaseError};

/// Fields for a freshly detected file.
#[derive(Debug, Clone)]
pub struct NewPending {
    pub original_path: String,
    pub original_filename: String,
    pub file_size: i64,
    pub detected_at: String,
}

/// Inserts a new pending row in state `pending`.
///
/// Returns the new id, or `None` when a row for the same source path
/// already exists (a duplicate notification, absorbed silently).
pub fn insert(db: &Database, entry: &NewPending) -> Result<Option<i64>, DatabaseError> {
    db.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO pending_media
             (original_path, original_filename, file_size, detected_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.original_path,
                entry.original_filename,
                entry.file_size,
                entry.detected_at,
                Status::Pending.as_str(),
            ],
        )?;
        if inserted == 0 {
            Ok(None)
        } else {
            Ok(Some(conn.last_insert_rowid()))
        }
    })
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<PendingRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM pending_media WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], PendingRecord::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

pub fn find_by_path(db: &Database, path: &str) -> Result<Option<PendingRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM pending_media WHERE original_path = ?1")?;
        let mut rows = stmt.query_map(params![path], PendingRecord::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// All rows, newest detection first.
pub fn list(db: &Database) -> Result<Vec<PendingRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM pending_media ORDER BY detected_at DESC, id DESC")?;
        let rows = stmt
            .query_map([], PendingRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_by_status(db: &Database, status: Status) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_media WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Atomically claims a row for processing. Only rows whose current
/// status may legally enter `processing` are claimed; the accepted retry
/// clears any previous error message.
///
/// Returns `false` when the row is absent or in a non-claimable state;
/// the caller decides which of the two it was.
pub fn try_claim(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    let sources = Status::sources_of(Status::Processing);
    db.with_conn(|conn| {
        let placeholders = placeholder_list(2, sources.len());
        let sql = format!(
            "UPDATE pending_media SET status = '{}', error_message = NULL
             WHERE id = ?1 AND status IN ({})",
            Status::Processing.as_str(),
            placeholders
        );
        let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&id];
        let source_strs: Vec<&'static str> = sources.iter().map(|s| s.as_str()).collect();
        for s in &source_strs {
            values.push(s);
        }
        let updated = conn.execute(&sql, values.as_slice())?;
        Ok(updated == 1)
    })
}

/// Records a failed processing attempt: status becomes `failed`, the
/// error message is stored and the retry counter advances. Guarded by
/// the legal-transition set for `failed`.
pub fn mark_failed(db: &Database, id: i64, message: &str) -> Result<bool, DatabaseError> {
    let sources = Status::sources_of(Status::Failed);
    db.with_conn(|conn| {
        let placeholders = placeholder_list(3, sources.len());
        let sql = format!(
            "UPDATE pending_media
             SET status = '{}', error_message = ?2, retry_count = retry_count + 1
             WHERE id = ?1 AND status IN ({})",
            Status::Failed.as_str(),
            placeholders
        );
        let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&id, &message];
        let source_strs: Vec<&'static str> = sources.iter().map(|s| s.as_str()).collect();
        for s in &source_strs {
            values.push(s);
        }
        let updated = conn.execute(&sql, values.as_slice())?;
        Ok(updated == 1)
    })
}

/// Demotes every `processing` row to `failed`. Run at coordinator
/// startup: a row still marked processing with no live worker belongs to
/// an interrupted run and must become retryable, not stay stuck.
pub fn demote_stale_processing(db: &Database, message: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE pending_media SET status = ?1, error_message = ?2
             WHERE status = ?3",
            params![
                Status::Failed.as_str(),
                message,
                Status::Processing.as_str()
            ],
        )?;
        Ok(updated as u64)
    })
}

fn placeholder_list(start: usize, count: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", start + i))
        .collect::<Vec<_>>()
        .join(", ")
}
