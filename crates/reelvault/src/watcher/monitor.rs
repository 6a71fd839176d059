//! Download directory monitor: filesystem events in, pending rows out.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use notify::{Config as NotifyConfig, PollWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer_opt, Config as DebouncerConfig, DebouncedEventKind};
use walkdir::WalkDir;

use crate::config::WatcherConfig;
use crate::db::pending_repo::{self, NewPending};
use crate::db::Database;
use crate::error::WatchError;
use crate::watcher::stability::{StabilityProbe, StableFile};
use crate::watcher::validator::FileValidator;

pub struct DirectoryMonitor {
    config: WatcherConfig,
    validator: FileValidator,
    probe: Arc<StabilityProbe>,
    db: Database,
}

impl DirectoryMonitor {
    pub fn new(config: WatcherConfig, db: Database) -> Result<Self, WatchError> {
        let validator = FileValidator::new(&config)
            .map_err(|e| WatchError::Init(e.to_string()))?;
        let probe = Arc::new(StabilityProbe::new(
            config.quiet_period(),
            config.min_file_size_bytes(),
        ));
        Ok(Self {
            config,
            validator,
            probe,
            db,
        })
    }

    /// Walks the download directory once and probes anything already
    /// sitting there. Covers files that finished while the daemon was
    /// down. Unreadable entries are logged and skipped; only event
    /// delivery loss is fatal to the monitor.
    pub fn scan_existing(&self) -> usize {
        let max_depth = if self.config.recursive { usize::MAX } else { 1 };
        let mut probed = 0;

        for entry in WalkDir::new(&self.config.download_dir)
            .min_depth(1)
            .max_depth(max_depth)
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(
                        "Skipping unreadable entry under {}: {}",
                        self.config.download_dir.display(),
                        e
                    );
                    continue;
                }
            };
            if self.consider(entry.path().to_path_buf()) {
                probed += 1;
            }
        }

        info!(
            "Initial scan of {} started {} stability probes",
            self.config.download_dir.display(),
            probed
        );
        probed
    }

    /// Blocks watching the download directory until `shutdown` is set.
    ///
    /// Polling is used instead of inotify so the watch keeps working on
    /// NFS and bind mounts, where download clients usually write.
    pub fn watch(&self, shutdown: Arc<AtomicBool>) -> Result<(), WatchError> {
        let poll_config = NotifyConfig::default().with_poll_interval(Duration::from_secs(2));
        let debouncer_config = DebouncerConfig::default()
            .with_timeout(Duration::from_millis(500))
            .with_notify_config(poll_config);

        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer_opt::<_, PollWatcher>(debouncer_config, tx)
            .map_err(|e| WatchError::Init(e.to_string()))?;

        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        debouncer
            .watcher()
            .watch(&self.config.download_dir, mode)
            .map_err(|e| WatchError::Init(e.to_string()))?;

        info!("Watching {}", self.config.download_dir.display());

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Watch loop shutting down");
                return Ok(());
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    for event in events {
                        if matches!(event.kind, DebouncedEventKind::Any) {
                            self.consider(event.path);
                        }
                    }
                }
                Ok(Err(errors)) => {
                    warn!("Watch error: {:?}", errors);
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    error!("Watch channel disconnected");
                    return Err(WatchError::ChannelClosed);
                }
            }
        }
    }

    /// Runs a path through the validator and, if it qualifies, starts a
    /// stability probe that registers the file once it settles. Returns
    /// whether a probe was started.
    fn consider(&self, path: PathBuf) -> bool {
        if !self.validator.is_candidate(&path) {
            return false;
        }

        let path_str = path.to_string_lossy().into_owned();
        match pending_repo::find_by_path(&self.db, &path_str) {
            Ok(Some(_)) => {
                debug!("Already tracked, skipping: {}", path.display());
                return false;
            }
            Ok(None) => {}
            Err(e) => {
                error!("Lookup failed for {}: {}", path.display(), e);
                return false;
            }
        }

        let db = self.db.clone();
        self.probe.spawn(path, move |stable| register(&db, stable))
    }
}

fn register(db: &Database, stable: StableFile) {
    let entry = NewPending {
        original_path: stable.path.to_string_lossy().into_owned(),
        original_filename: stable.filename,
        file_size: stable.size as i64,
        detected_at: Utc::now().to_rfc3339(),
    };
    match pending_repo::insert(db, &entry) {
        Ok(Some(id)) => {
            info!(
                "Registered pending entry {} for {}",
                id,
                stable.path.display()
            );
        }
        Ok(None) => {
            debug!("Path already registered: {}", stable.path.display());
        }
        Err(e) => {
            error!("Failed to register {}: {}", stable.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> WatcherConfig {
        WatcherConfig {
            download_dir: dir.to_path_buf(),
            recursive: true,
            min_file_size_mb: 0,
            quiet_period_secs: 0,
            extensions: vec![".mkv".to_string()],
            exclude: vec!["*.part".to_string()],
        }
    }

    fn wait_for_pending(db: &Database, expected: usize) -> Vec<crate::db::record::PendingRecord> {
        for _ in 0..50 {
            let rows = pending_repo::list(db).unwrap();
            if rows.len() >= expected {
                return rows;
            }
            thread::sleep(Duration::from_millis(100));
        }
        pending_repo::list(db).unwrap()
    }

    #[test]
    fn test_scan_existing_registers_settled_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("movie.mkv"), b"media payload").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not media").unwrap();
        std::fs::write(dir.path().join("partial.mkv.part"), b"still going").unwrap();

        let db = Database::open_in_memory().unwrap();
        let monitor = DirectoryMonitor::new(test_config(dir.path()), db.clone()).unwrap();

        let probed = monitor.scan_existing();
        assert_eq!(probed, 1);

        let rows = wait_for_pending(&db, 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].original_filename, "movie.mkv");
        assert_eq!(rows[0].file_size, 13);
    }

    #[test]
    fn test_scan_existing_finds_nested_files_when_recursive() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("nested.mkv"), b"payload").unwrap();

        let db = Database::open_in_memory().unwrap();
        let monitor = DirectoryMonitor::new(test_config(dir.path()), db.clone()).unwrap();
        assert_eq!(monitor.scan_existing(), 1);

        let mut flat_config = test_config(dir.path());
        flat_config.recursive = false;
        let db2 = Database::open_in_memory().unwrap();
        let flat = DirectoryMonitor::new(flat_config, db2).unwrap();
        assert_eq!(flat.scan_existing(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_continues_past_unreadable_subdirectory() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::write(dir.path().join("movie.mkv"), b"media payload").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        let db = Database::open_in_memory().unwrap();
        let monitor = DirectoryMonitor::new(test_config(dir.path()), db.clone()).unwrap();
        assert_eq!(monitor.scan_existing(), 1);

        let rows = wait_for_pending(&db, 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].original_filename, "movie.mkv");

        // Restore so the tempdir can be removed.
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_tracked_paths_are_not_reprobed() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("movie.mkv"), b"media payload").unwrap();

        let db = Database::open_in_memory().unwrap();
        let monitor = DirectoryMonitor::new(test_config(dir.path()), db.clone()).unwrap();

        assert_eq!(monitor.scan_existing(), 1);
        wait_for_pending(&db, 1);
        // The row now exists, so a rescan starts no new probes.
        assert_eq!(monitor.scan_existing(), 0);
    }
}
