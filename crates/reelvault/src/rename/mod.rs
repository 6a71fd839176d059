//! Canonical-name resolution through an external rename tool.
//!
//! The daemon shells out to a metadata resolver (mnamer by default) and
//! parses the name it proposes from the tool's output. The trait seam
//! exists so the coordinator can run against a stub in tests.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use thiserror::Error;

use crate::config::ResolverConfig;

#[derive(Debug, Error)]
pub enum RenameError {
    #[error("Resolver command not found: {0}")]
    NotFound(String),
    #[error("Resolver timed out after {0:?}")]
    Timeout(Duration),
    #[error("Resolver exited with {status}: {output}")]
    Failed { status: i32, output: String },
    #[error("Could not find a proposed name in resolver output: {output}")]
    Unparseable { output: String },
    #[error("Source file does not exist: {0}")]
    MissingSource(PathBuf),
    #[error("Resolver I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A proposed canonical filename plus the raw tool output it came from.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub filename: String,
    pub raw_output: String,
}

pub trait NameResolver: Send + Sync {
    fn propose_name(&self, source: &Path) -> Result<Proposal, RenameError>;
}

/// Runs a configured command against the source file and parses the
/// rename it proposes.
pub struct CommandResolver {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: config.timeout(),
        }
    }
}

impl NameResolver for CommandResolver {
    fn propose_name(&self, source: &Path) -> Result<Proposal, RenameError> {
        if !source.exists() {
            return Err(RenameError::MissingSource(source.to_path_buf()));
        }

        debug!("Running resolver {} on {}", self.command, source.display());
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RenameError::NotFound(self.command.clone())
                } else {
                    RenameError::Io(e)
                }
            })?;

        // Drain both pipes on their own threads so a chatty tool cannot
        // fill a pipe buffer and stall while we poll for exit.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_handle = thread::spawn(move || read_to_string_lossy(stdout));
        let stderr_handle = thread::spawn(move || read_to_string_lossy(stderr));

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RenameError::Timeout(self.timeout));
                }
                None => thread::sleep(Duration::from_millis(50)),
            }
        };

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();
        let combined = if stderr.is_empty() {
            stdout
        } else {
            format!("{}\n{}", stdout, stderr)
        };

        if !status.success() {
            return Err(RenameError::Failed {
                status: status.code().unwrap_or(-1),
                output: combined,
            });
        }

        match parse_proposed_name(&combined) {
            Some(filename) => Ok(Proposal {
                filename,
                raw_output: combined,
            }),
            None => Err(RenameError::Unparseable { output: combined }),
        }
    }
}

fn read_to_string_lossy<R: Read>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Extracts the proposed filename from resolver output.
///
/// Understands the common `old -> new` arrow form as well as a
/// "renamed to <name>" phrasing. The last path component of the target
/// is taken so absolute paths in the output still yield a bare filename.
fn parse_proposed_name(output: &str) -> Option<String> {
    for line in output.lines() {
        let arrow = line.rfind("->").map(|i| i + 2).or_else(|| {
            line.rfind('\u{2192}')
                .map(|i| i + '\u{2192}'.len_utf8())
        });
        if let Some(start) = arrow {
            if let Some(name) = tail_filename(&line[start..]) {
                return Some(name);
            }
        }

        let lower = line.to_lowercase();
        if let Some(idx) = lower.find("renamed to") {
            if let Some(tail) = line.get(idx + "renamed to".len()..) {
                if let Some(name) = tail_filename(tail) {
                    return Some(name);
                }
            }
        }
    }
    None
}

fn tail_filename(tail: &str) -> Option<String> {
    let trimmed = tail.trim().trim_matches(|c| c == '\'' || c == '"' || c == '`');
    if trimmed.is_empty() {
        return None;
    }
    Path::new(trimmed)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_arrow_line() {
        let output = "processing...\nmoving movie.file.mkv -> Movie File (2020).mkv\ndone";
        assert_eq!(
            parse_proposed_name(output).as_deref(),
            Some("Movie File (2020).mkv")
        );
    }

    #[test]
    fn test_parses_unicode_arrow() {
        let output = "movie.file.mkv \u{2192} Movie File (2020).mkv";
        assert_eq!(
            parse_proposed_name(output).as_deref(),
            Some("Movie File (2020).mkv")
        );
    }

    #[test]
    fn test_strips_quotes_and_directories() {
        let output = "'old.mkv' -> '/archive/Movie File (2020).mkv'";
        assert_eq!(
            parse_proposed_name(output).as_deref(),
            Some("Movie File (2020).mkv")
        );
    }

    #[test]
    fn test_parses_renamed_to_phrase() {
        let output = "Renamed to Movie File (2020).mkv";
        assert_eq!(
            parse_proposed_name(output).as_deref(),
            Some("Movie File (2020).mkv")
        );
    }

    #[test]
    fn test_uses_last_arrow_on_the_line() {
        let output = "a -> b -> Final Name.mkv";
        assert_eq!(parse_proposed_name(output).as_deref(), Some("Final Name.mkv"));
    }

    #[test]
    fn test_no_proposal_in_output() {
        assert!(parse_proposed_name("nothing to see here").is_none());
        assert!(parse_proposed_name("").is_none());
        assert!(parse_proposed_name("dangling arrow ->   ").is_none());
    }

    #[test]
    fn test_missing_source_is_rejected_before_spawning() {
        let resolver = CommandResolver::new(&ResolverConfig::default());
        let err = resolver
            .propose_name(Path::new("/definitely/not/here.mkv"))
            .unwrap_err();
        assert!(matches!(err, RenameError::MissingSource(_)));
    }
}
