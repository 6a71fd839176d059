//! Repository for the append-only `processed_media` history table.

use rusqlite::params;

use super::record::{Action, ProcessedRecord};
use super::{Database, DatabaseError};

/// Fields for a terminal outcome row.
#[derive(Debug, Clone)]
pub struct NewProcessed {
    pub source_entry_id: i64,
    pub original_path: String,
    pub original_filename: String,
    pub file_size: i64,
    pub detected_at: String,
    pub processed_at: String,
    pub action: Action,
    pub final_filename: Option<String>,
    pub destination_path: Option<String>,
    pub version_number: i64,
    pub resolver_output: Option<String>,
}

/// Moves an entry from the pending table into history.
///
/// Insert and delete run in one transaction: for any ingested path there
/// is either a pending row or exactly one history row, never both and
/// never neither. If the pending row vanished (a competing writer beat
/// us) the transaction rolls back and nothing is recorded.
pub fn migrate_from_pending(db: &Database, entry: &NewProcessed) -> Result<i64, DatabaseError> {
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO processed_media
             (source_entry_id, original_path, original_filename, file_size, detected_at,
              processed_at, action, final_filename, destination_path, version_number,
              resolver_output)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.source_entry_id,
                entry.original_path,
                entry.original_filename,
                entry.file_size,
                entry.detected_at,
                entry.processed_at,
                entry.action.as_str(),
                entry.final_filename,
                entry.destination_path,
                entry.version_number,
                entry.resolver_output,
            ],
        )?;
        let history_id = tx.last_insert_rowid();

        let deleted = tx.execute(
            "DELETE FROM pending_media WHERE id = ?1",
            params![entry.source_entry_id],
        )?;
        if deleted == 0 {
            return Err(DatabaseError::MissingPending {
                id: entry.source_entry_id,
            });
        }

        tx.commit()?;
        Ok(history_id)
    })
}

/// Most recent outcomes first, up to `limit` rows.
pub fn list(db: &Database, limit: u32) -> Result<Vec<ProcessedRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM processed_media ORDER BY processed_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], ProcessedRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_by_action(db: &Database, action: Action) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM processed_media WHERE action = ?1",
            params![action.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
