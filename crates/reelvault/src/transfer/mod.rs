//! Chunked, crash-safe file transfer into the archive.
//!
//! Data is streamed into a temporary file next to the destination, its
//! size verified against the source, and only then renamed into place.
//! A crash mid-copy leaves at worst a stale `.tmp` file, never a
//! half-written archive entry.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

use crate::config::TransferConfig;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Source file unavailable at {path}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Destination already exists: {0}")]
    DestinationConflict(PathBuf),
    #[error("Destination directory unreachable: {0}")]
    DestinationUnreachable(PathBuf),
    #[error("Size mismatch after copy: expected {expected} bytes, wrote {actual}")]
    VerificationFailed { expected: u64, actual: u64 },
    #[error("Transfer I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Transient failures worth another attempt. A name collision or a
    /// vanished source will not fix itself by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Io(_)
                | TransferError::VerificationFailed { .. }
                | TransferError::DestinationUnreachable(_)
        )
    }
}

pub struct TransferEngine {
    chunk_size: usize,
    max_attempts: u32,
    base_delay: Duration,
}

impl TransferEngine {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size_bytes,
            max_attempts: config.max_attempts,
            base_delay: config.retry_base_delay(),
        }
    }

    /// Checks that the destination directory can be listed.
    pub fn check_destination(&self, dest_dir: &Path) -> Result<(), TransferError> {
        fs::read_dir(dest_dir)
            .map(|_| ())
            .map_err(|_| TransferError::DestinationUnreachable(dest_dir.to_path_buf()))
    }

    /// Copies `source` into `dest_dir` as `final_filename`, retrying
    /// transient failures with exponential backoff. Returns the byte
    /// count written.
    ///
    /// `entry_id` keys the temporary filename so two transfers of
    /// like-named files cannot collide on the same scratch path.
    pub fn copy(
        &self,
        entry_id: i64,
        source: &Path,
        dest_dir: &Path,
        final_filename: &str,
    ) -> Result<u64, TransferError> {
        let source_size = fs::metadata(source)
            .map_err(|e| TransferError::SourceUnavailable {
                path: source.to_path_buf(),
                source: e,
            })?
            .len();

        let dest = dest_dir.join(final_filename);
        let tmp = dest_dir.join(format!("{}.{}.tmp", final_filename, entry_id));

        let mut attempt = 1;
        loop {
            debug!(
                "Transfer attempt {}/{} for {} ({} bytes)",
                attempt,
                self.max_attempts,
                source.display(),
                source_size
            );
            match self.try_copy(source, source_size, &tmp, &dest) {
                Ok(bytes) => {
                    info!("Transferred {} -> {}", source.display(), dest.display());
                    return Ok(bytes);
                }
                Err(err) => {
                    if tmp.exists() {
                        let _ = fs::remove_file(&tmp);
                    }
                    if !err.is_retryable() || attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.base_delay * 2u32.pow(attempt - 1);
                    warn!(
                        "Transfer attempt {} failed ({}), retrying in {:?}",
                        attempt, err, delay
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    fn try_copy(
        &self,
        source: &Path,
        source_size: u64,
        tmp: &Path,
        dest: &Path,
    ) -> Result<u64, TransferError> {
        if dest.exists() {
            return Err(TransferError::DestinationConflict(dest.to_path_buf()));
        }

        let mut reader = File::open(source).map_err(|e| TransferError::SourceUnavailable {
            path: source.to_path_buf(),
            source: e,
        })?;
        let mut writer = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp)?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut written: u64 = 0;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n])?;
            written += n as u64;
        }
        writer.sync_all()?;
        drop(writer);

        let tmp_size = fs::metadata(tmp)?.len();
        if tmp_size != source_size {
            return Err(TransferError::VerificationFailed {
                expected: source_size,
                actual: tmp_size,
            });
        }

        fs::rename(tmp, dest)?;
        Ok(written)
    }
}
