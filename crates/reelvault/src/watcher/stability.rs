//! Re-armable quiescence probe for in-progress downloads.
//!
//! A filesystem event only says a file changed, not that the download
//! finished. The probe samples the file size, waits out the quiet
//! period, and samples again; it keeps re-arming while the file is
//! still being written, so the final event for a path is never lost.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, info};

/// A file that held still for a full quiet period.
#[derive(Debug, Clone)]
pub struct StableFile {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
}

pub struct StabilityProbe {
    quiet_period: Duration,
    min_size: u64,
    // Paths with a running probe, each with a flag marking
    // notifications that arrived while the probe slept.
    in_flight: Arc<Mutex<HashMap<PathBuf, Arc<AtomicBool>>>>,
}

impl StabilityProbe {
    pub fn new(quiet_period: Duration, min_size: u64) -> Self {
        Self {
            quiet_period,
            min_size,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts watching `path` on a background thread and calls
    /// `on_stable` once if the file settles.
    ///
    /// When a probe for this path is already running, the call re-arms
    /// its quiet period and returns false. Files that vanish or settle
    /// below the minimum size are dropped silently; the next
    /// filesystem event starts a fresh probe.
    pub fn spawn<F>(&self, path: PathBuf, on_stable: F) -> bool
    where
        F: FnOnce(StableFile) + Send + 'static,
    {
        let dirty = Arc::new(AtomicBool::new(false));
        {
            let mut in_flight = lock_map(&self.in_flight);
            if let Some(running) = in_flight.get(&path) {
                running.store(true, Ordering::Relaxed);
                return false;
            }
            in_flight.insert(path.clone(), Arc::clone(&dirty));
        }

        let quiet_period = self.quiet_period;
        let min_size = self.min_size;
        let in_flight = Arc::clone(&self.in_flight);
        thread::spawn(move || {
            let settled = loop {
                dirty.store(false, Ordering::Relaxed);
                let first = match fs::metadata(&path) {
                    Ok(meta) => meta.len(),
                    Err(_) => break None,
                };
                thread::sleep(quiet_period);
                let second = match fs::metadata(&path) {
                    Ok(meta) => meta.len(),
                    Err(_) => {
                        debug!("File vanished during quiet period: {}", path.display());
                        break None;
                    }
                };

                if second != first {
                    debug!(
                        "File still changing: {} ({} -> {} bytes)",
                        path.display(),
                        first,
                        second
                    );
                    continue;
                }

                // Claim the slot before declaring stability. A
                // notification that landed after the second sample
                // re-arms the window instead of being lost.
                {
                    let mut in_flight = lock_map(&in_flight);
                    if dirty.load(Ordering::Relaxed) {
                        debug!("Notification during quiet period, re-arming: {}", path.display());
                        continue;
                    }
                    in_flight.remove(&path);
                }

                if second < min_size {
                    debug!(
                        "Settled file below minimum size, ignoring: {} ({} bytes)",
                        path.display(),
                        second
                    );
                    break None;
                }
                break Some(second);
            };

            lock_map(&in_flight).remove(&path);

            if let Some(size) = settled {
                let filename = match path.file_name().and_then(|n| n.to_str()) {
                    Some(name) => name.to_string(),
                    None => return,
                };
                info!("File settled: {} ({} bytes)", path.display(), size);
                on_stable(StableFile {
                    path,
                    filename,
                    size,
                });
            }
        });
        true
    }
}

fn lock_map(
    map: &Mutex<HashMap<PathBuf, Arc<AtomicBool>>>,
) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<AtomicBool>>> {
    match map.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
