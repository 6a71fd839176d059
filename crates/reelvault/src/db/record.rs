//! Typed rows and the closed status/action vocabulary.

use std::fmt;

use rusqlite::Row;
use serde::Serialize;

use super::error::DatabaseError;

/// Lifecycle state of a tracked file.
///
/// Transitions are validated by [`Status::can_transition_to`]; every
/// status mutation in the repositories consults it, so illegal moves
/// (e.g. `processing` back to `pending`) cannot be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Processing,
    /// Never stored at rest: a successful approval deletes the pending
    /// row in the same transaction that writes the history row, so the
    /// `processing -> completed` edge is realized as the migration
    /// itself. The value stays in the vocabulary (and the table's CHECK
    /// constraint) as the legal terminal of that edge.
    Completed,
    Failed,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Pending,
        Status::Processing,
        Status::Completed,
        Status::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "pending" => Ok(Status::Pending),
            "processing" => Ok(Status::Processing),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            other => Err(DatabaseError::InvalidValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }

    /// Legal state machine edges. Approval claims `pending`/`failed`
    /// into `processing`; a processing attempt terminates in
    /// `completed` (migrated to history) or `failed`.
    pub fn can_transition_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Pending, Status::Processing)
                | (Status::Failed, Status::Processing)
                | (Status::Processing, Status::Completed)
                | (Status::Processing, Status::Failed)
        )
    }

    /// All states from which `next` may legally be entered.
    pub fn sources_of(next: Status) -> Vec<Status> {
        Status::ALL
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Approved,
    Rejected,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Approved => "approved",
            Action::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "approved" => Ok(Action::Approved),
            "rejected" => Ok(Action::Rejected),
            other => Err(DatabaseError::InvalidValue {
                field: "action",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file awaiting or undergoing processing.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRecord {
    pub id: i64,
    pub original_path: String,
    pub original_filename: String,
    pub file_size: i64,
    pub detected_at: String,
    pub status: Status,
    pub error_message: Option<String>,
    pub retry_count: i64,
}

impl PendingRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status_str: String = row.get("status")?;
        let status = Status::parse(&status_str).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown status '{}'", status_str).into(),
            )
        })?;
        Ok(Self {
            id: row.get("id")?,
            original_path: row.get("original_path")?,
            original_filename: row.get("original_filename")?,
            file_size: row.get("file_size")?,
            detected_at: row.get("detected_at")?,
            status,
            error_message: row.get("error_message")?,
            retry_count: row.get("retry_count")?,
        })
    }
}

/// Immutable historical record of a terminal outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedRecord {
    pub id: i64,
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

impl ProcessedRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let action_str: String = row.get("action")?;
        let action = Action::parse(&action_str).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown action '{}'", action_str).into(),
            )
        })?;
        Ok(Self {
            id: row.get("id")?,
            source_entry_id: row.get("source_entry_id")?,
            original_path: row.get("original_path")?,
            original_filename: row.get("original_filename")?,
            file_size: row.get("file_size")?,
            detected_at: row.get("detected_at")?,
            processed_at: row.get("processed_at")?,
            action,
            final_filename: row.get("final_filename")?,
            destination_path: row.get("destination_path")?,
            version_number: row.get("version_number")?,
            resolver_output: row.get("resolver_output")?,
        })
    }
}
