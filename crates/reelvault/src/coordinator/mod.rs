//! Lifecycle coordinator: drives a pending entry through name
//! resolution, version checking, and transfer to its terminal outcome.
//!
//! Two guards keep an entry from being processed twice. Within this
//! process a mutex-held set of in-flight ids refuses re-entry; across
//! runs the database claim (a guarded status update) is the arbiter.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::db::processed_repo::{self, NewProcessed};
use crate::db::record::{Action, PendingRecord, ProcessedRecord, Status};
use crate::db::{pending_repo, Database, DatabaseError};
use crate::rename::{CommandResolver, NameResolver};
use crate::transfer::TransferEngine;
use crate::version::VersionResolver;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("No pending entry with id {0}")]
    NotFound(i64),
    #[error("Entry {0} is already being processed")]
    AlreadyInProgress(i64),
    #[error("Entry {id} is {status}, cannot {action}")]
    InvalidState {
        id: i64,
        status: Status,
        action: &'static str,
    },
    #[error("{0}")]
    Internal(String),
}

impl From<DatabaseError> for CoordinatorError {
    fn from(e: DatabaseError) -> Self {
        CoordinatorError::Internal(e.to_string())
    }
}

/// Queue counters for the status report.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub pending: u64,
    pub failed: u64,
    pub approved: u64,
    pub rejected: u64,
}

/// What an approval produced.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub id: i64,
    pub final_filename: String,
    pub destination_path: PathBuf,
    pub version_number: u32,
    pub bytes_copied: u64,
}

pub struct Coordinator {
    db: Database,
    resolver: Box<dyn NameResolver>,
    versions: VersionResolver,
    transfer: TransferEngine,
    archive_root: PathBuf,
    verify_reachable: bool,
    delete_source_on_reject: bool,
    in_flight: Mutex<HashSet<i64>>,
}

impl Coordinator {
    pub fn new(config: &Config, db: Database) -> Result<Self, CoordinatorError> {
        let resolver = Box::new(CommandResolver::new(&config.resolver));
        Self::with_resolver(config, db, resolver)
    }

    /// Builds a coordinator with an injected name resolver. Tests use
    /// this to avoid shelling out.
    pub fn with_resolver(
        config: &Config,
        db: Database,
        resolver: Box<dyn NameResolver>,
    ) -> Result<Self, CoordinatorError> {
        let versions = VersionResolver::new(&config.versioning)
            .map_err(|e| CoordinatorError::Internal(e.to_string()))?;
        Ok(Self {
            db,
            resolver,
            versions,
            transfer: TransferEngine::new(&config.transfer),
            archive_root: config.archive.root_dir.clone(),
            verify_reachable: config.archive.verify_reachable,
            delete_source_on_reject: config.delete_source_on_reject,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Approves a pending entry: resolve its canonical name, pick a
    /// version, copy it to the archive and record the outcome.
    pub fn approve(&self, id: i64) -> Result<ApprovalOutcome, CoordinatorError> {
        let _guard = self.enter(id)?;
        let entry = self.claim(id, "approve")?;

        info!("Approving entry {} ({})", id, entry.original_filename);
        match self.run_approval(&entry) {
            Ok(outcome) => Ok(outcome),
            Err(message) => {
                if let Err(e) = pending_repo::mark_failed(&self.db, id, &message) {
                    error!("Could not record failure for entry {}: {}", id, e);
                }
                Err(CoordinatorError::Internal(message))
            }
        }
    }

    fn run_approval(&self, entry: &PendingRecord) -> Result<ApprovalOutcome, String> {
        if self.verify_reachable {
            self.transfer
                .check_destination(&self.archive_root)
                .map_err(|e| e.to_string())?;
        }

        let source = Path::new(&entry.original_path);
        let proposal = self
            .resolver
            .propose_name(source)
            .map_err(|e| format!("Name resolution failed: {}", e))?;

        let existing = list_destination(&self.archive_root);
        let decision = self.versions.resolve(&proposal.filename, &existing);
        if decision.is_duplicate {
            info!(
                "Entry {} is a new version ({}): {}",
                entry.id, decision.version_number, decision.output_filename
            );
        }

        let bytes = self
            .transfer
            .copy(
                entry.id,
                source,
                &self.archive_root,
                &decision.output_filename,
            )
            .map_err(|e| format!("Transfer failed: {}", e))?;

        let destination = self.archive_root.join(&decision.output_filename);
        let outcome = NewProcessed {
            source_entry_id: entry.id,
            original_path: entry.original_path.clone(),
            original_filename: entry.original_filename.clone(),
            file_size: entry.file_size,
            detected_at: entry.detected_at.clone(),
            processed_at: Utc::now().to_rfc3339(),
            action: Action::Approved,
            final_filename: Some(decision.output_filename.clone()),
            destination_path: Some(destination.to_string_lossy().into_owned()),
            version_number: decision.version_number as i64,
            resolver_output: Some(proposal.raw_output),
        };
        processed_repo::migrate_from_pending(&self.db, &outcome)
            .map_err(|e| format!("Could not record outcome: {}", e))?;

        info!(
            "Entry {} archived as {} ({} bytes)",
            entry.id,
            decision.output_filename,
            bytes
        );
        Ok(ApprovalOutcome {
            id: entry.id,
            final_filename: decision.output_filename,
            destination_path: destination,
            version_number: decision.version_number,
            bytes_copied: bytes,
        })
    }

    /// Rejects a pending entry, recording the decision and optionally
    /// deleting the source file.
    pub fn reject(&self, id: i64) -> Result<(), CoordinatorError> {
        let _guard = self.enter(id)?;
        let entry = self.claim(id, "reject")?;

        let outcome = NewProcessed {
            source_entry_id: entry.id,
            original_path: entry.original_path.clone(),
            original_filename: entry.original_filename.clone(),
            file_size: entry.file_size,
            detected_at: entry.detected_at.clone(),
            processed_at: Utc::now().to_rfc3339(),
            action: Action::Rejected,
            final_filename: None,
            destination_path: None,
            version_number: 1,
            resolver_output: None,
        };
        processed_repo::migrate_from_pending(&self.db, &outcome)?;
        info!("Entry {} rejected", id);

        if self.delete_source_on_reject {
            if let Err(e) = fs::remove_file(&entry.original_path) {
                warn!(
                    "Could not delete rejected source {}: {}",
                    entry.original_path, e
                );
            }
        }
        Ok(())
    }

    /// Moves entries stuck in `processing` back to `failed` so they can
    /// be retried. Run at startup, before taking on new work.
    pub fn recover_stale(&self) -> Result<u64, CoordinatorError> {
        let demoted = pending_repo::demote_stale_processing(
            &self.db,
            "Interrupted while processing, marked for retry",
        )?;
        if demoted > 0 {
            warn!("Recovered {} entries stuck in processing", demoted);
        }
        Ok(demoted)
    }

    pub fn list_pending(&self) -> Result<Vec<PendingRecord>, CoordinatorError> {
        Ok(pending_repo::list(&self.db)?)
    }

    pub fn list_processed(&self, limit: u32) -> Result<Vec<ProcessedRecord>, CoordinatorError> {
        Ok(processed_repo::list(&self.db, limit)?)
    }

    pub fn stats(&self) -> Result<Stats, CoordinatorError> {
        Ok(Stats {
            pending: pending_repo::count_by_status(&self.db, Status::Pending)?,
            failed: pending_repo::count_by_status(&self.db, Status::Failed)?,
            approved: processed_repo::count_by_action(&self.db, Action::Approved)?,
            rejected: processed_repo::count_by_action(&self.db, Action::Rejected)?,
        })
    }

    /// Takes the process-local in-flight slot for `id`.
    fn enter(&self, id: i64) -> Result<InFlightGuard<'_>, CoordinatorError> {
        let mut in_flight = lock_in_flight(&self.in_flight);
        if !in_flight.insert(id) {
            return Err(CoordinatorError::AlreadyInProgress(id));
        }
        drop(in_flight);
        Ok(InFlightGuard {
            set: &self.in_flight,
            id,
        })
    }

    /// Claims `id` in the database and returns its row. Maps a failed
    /// claim to the precise refusal reason.
    fn claim(&self, id: i64, action: &'static str) -> Result<PendingRecord, CoordinatorError> {
        let entry = pending_repo::find_by_id(&self.db, id)?
            .ok_or(CoordinatorError::NotFound(id))?;

        if !pending_repo::try_claim(&self.db, id)? {
            // Re-read for an accurate refusal: the row may have been
            // claimed, completed, or deleted since we looked.
            return match pending_repo::find_by_id(&self.db, id)? {
                Some(row) if row.status == Status::Processing => {
                    Err(CoordinatorError::AlreadyInProgress(id))
                }
                Some(row) => Err(CoordinatorError::InvalidState {
                    id,
                    status: row.status,
                    action,
                }),
                None => Err(CoordinatorError::NotFound(id)),
            };
        }

        Ok(PendingRecord {
            status: Status::Processing,
            error_message: None,
            ..entry
        })
    }
}

struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<i64>>,
    id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock_in_flight(self.set).remove(&self.id);
    }
}

fn lock_in_flight(set: &Mutex<HashSet<i64>>) -> std::sync::MutexGuard<'_, HashSet<i64>> {
    match set.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Current filenames in the destination directory. A listing failure is
/// logged and treated as an empty archive; the transfer's own conflict
/// check still protects existing files.
fn list_destination(dir: &Path) -> Vec<String> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| !name.ends_with(".tmp"))
            .collect(),
        Err(e) => {
            warn!("Could not list {}: {}", dir.display(), e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArchiveConfig, WatcherConfig};
    use crate::db::pending_repo::NewPending;
    use crate::rename::{Proposal, RenameError};
    use tempfile::TempDir;

    struct FixedResolver(String);

    impl NameResolver for FixedResolver {
        fn propose_name(&self, _source: &Path) -> Result<Proposal, RenameError> {
            Ok(Proposal {
                filename: self.0.clone(),
                raw_output: format!("resolved -> {}", self.0),
            })
        }
    }

    struct FailingResolver;

    impl NameResolver for FailingResolver {
        fn propose_name(&self, _source: &Path) -> Result<Proposal, RenameError> {
            Err(RenameError::Unparseable {
                output: "garbage".to_string(),
            })
        }
    }

    struct Fixture {
        downloads: TempDir,
        archive: TempDir,
        db: Database,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                downloads: TempDir::new().unwrap(),
                archive: TempDir::new().unwrap(),
                db: Database::open_in_memory().unwrap(),
            }
        }

        fn config(&self) -> Config {
            Config {
                watcher: WatcherConfig {
                    download_dir: self.downloads.path().to_path_buf(),
                    recursive: true,
                    min_file_size_mb: 0,
                    quiet_period_secs: 0,
                    extensions: vec![".mkv".to_string()],
                    exclude: vec![],
                },
                archive: ArchiveConfig {
                    root_dir: self.archive.path().to_path_buf(),
                    verify_reachable: true,
                },
                resolver: Default::default(),
                versioning: Default::default(),
                transfer: crate::config::TransferConfig {
                    chunk_size_bytes: 64,
                    max_attempts: 1,
                    retry_base_delay_ms: 1,
                    workers: 1,
                },
                database: Default::default(),
                delete_source_on_reject: true,
            }
        }

        fn coordinator(&self, resolver: Box<dyn NameResolver>) -> Coordinator {
            Coordinator::with_resolver(&self.config(), self.db.clone(), resolver).unwrap()
        }

        fn seed(&self, name: &str) -> i64 {
            let path = self.downloads.path().join(name);
            std::fs::write(&path, b"media bytes").unwrap();
            pending_repo::insert(
                &self.db,
                &NewPending {
                    original_path: path.to_string_lossy().into_owned(),
                    original_filename: name.to_string(),
                    file_size: 11,
                    detected_at: Utc::now().to_rfc3339(),
                },
            )
            .unwrap()
            .unwrap()
        }
    }

    #[test]
    fn test_approve_archives_and_records() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(Box::new(FixedResolver("Movie (2020).mkv".into())));
        let id = fx.seed("movie.2020.mkv");

        let outcome = coordinator.approve(id).unwrap();

        assert_eq!(outcome.final_filename, "Movie (2020).mkv");
        assert_eq!(outcome.version_number, 1);
        assert!(outcome.destination_path.exists());
        assert!(pending_repo::find_by_id(&fx.db, id).unwrap().is_none());
        let history = processed_repo::list(&fx.db, 10).unwrap();
        assert_eq!(history[0].action, Action::Approved);
        assert_eq!(history[0].version_number, 1);
    }

    #[test]
    fn test_second_copy_gets_a_version_suffix() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(Box::new(FixedResolver("Movie (2020).mkv".into())));

        let first = fx.seed("movie.2020.mkv");
        coordinator.approve(first).unwrap();
        let second = fx.seed("movie 2020 repack.mkv");
        let outcome = coordinator.approve(second).unwrap();

        assert_eq!(outcome.final_filename, "Movie (2020).v2.mkv");
        assert_eq!(outcome.version_number, 2);
        assert!(fx.archive.path().join("Movie (2020).mkv").exists());
        assert!(fx.archive.path().join("Movie (2020).v2.mkv").exists());
    }

    #[test]
    fn test_failed_resolution_marks_entry_failed() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(Box::new(FailingResolver));
        let id = fx.seed("movie.mkv");

        let err = coordinator.approve(id).unwrap_err();
        assert!(matches!(err, CoordinatorError::Internal(_)));

        let row = pending_repo::find_by_id(&fx.db, id).unwrap().unwrap();
        assert_eq!(row.status, Status::Failed);
        assert!(row.error_message.is_some());
        assert_eq!(row.retry_count, 1);
    }

    #[test]
    fn test_failed_entry_can_be_retried() {
        let fx = Fixture::new();
        let id = fx.seed("movie.mkv");

        let failing = fx.coordinator(Box::new(FailingResolver));
        failing.approve(id).unwrap_err();

        let working = fx.coordinator(Box::new(FixedResolver("Movie.mkv".into())));
        let outcome = working.approve(id).unwrap();
        assert_eq!(outcome.final_filename, "Movie.mkv");
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(Box::new(FailingResolver));
        assert!(matches!(
            coordinator.approve(999).unwrap_err(),
            CoordinatorError::NotFound(999)
        ));
        assert!(matches!(
            coordinator.reject(999).unwrap_err(),
            CoordinatorError::NotFound(999)
        ));
    }

    #[test]
    fn test_processing_entry_refuses_second_claim() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(Box::new(FixedResolver("Movie.mkv".into())));
        let id = fx.seed("movie.mkv");

        // Simulate another run holding the claim.
        assert!(pending_repo::try_claim(&fx.db, id).unwrap());

        assert!(matches!(
            coordinator.approve(id).unwrap_err(),
            CoordinatorError::AlreadyInProgress(_)
        ));
    }

    #[test]
    fn test_reject_records_and_deletes_source() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(Box::new(FailingResolver));
        let id = fx.seed("unwanted.mkv");
        let source = fx.downloads.path().join("unwanted.mkv");

        coordinator.reject(id).unwrap();

        assert!(!source.exists());
        assert!(pending_repo::find_by_id(&fx.db, id).unwrap().is_none());
        let history = processed_repo::list(&fx.db, 10).unwrap();
        assert_eq!(history[0].action, Action::Rejected);
        assert!(history[0].destination_path.is_none());
    }

    #[test]
    fn test_recover_stale_requeues_processing_entries() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(Box::new(FixedResolver("Movie.mkv".into())));
        let id = fx.seed("movie.mkv");
        assert!(pending_repo::try_claim(&fx.db, id).unwrap());

        assert_eq!(coordinator.recover_stale().unwrap(), 1);
        let row = pending_repo::find_by_id(&fx.db, id).unwrap().unwrap();
        assert_eq!(row.status, Status::Failed);

        // And the recovered entry is approvable again.
        coordinator.approve(id).unwrap();
    }

    #[test]
    fn test_stats_counts_queues_and_history() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(Box::new(FixedResolver("Movie.mkv".into())));
        let a = fx.seed("a.mkv");
        let _b = fx.seed("b.mkv");
        coordinator.approve(a).unwrap();

        let stats = coordinator.stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.approved, 1);
        assert_eq!(stats.rejected, 0);
        assert_eq!(stats.failed, 0);
    }
}
