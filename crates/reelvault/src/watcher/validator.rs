//! Filters filesystem paths down to transfer candidates.

use std::path::Path;

use glob::Pattern;

use crate::config::WatcherConfig;
use crate::error::ConfigError;

/// Decides whether a path is worth probing: media extension, not
/// matching any exclusion pattern, not a directory.
pub struct FileValidator {
    extensions: Vec<String>,
    exclude: Vec<Pattern>,
}

impl FileValidator {
    pub fn new(config: &WatcherConfig) -> Result<Self, ConfigError> {
        let extensions = config
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        let exclude = config
            .exclude
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| ConfigError::Validation {
                    message: format!("Invalid exclude pattern {:?}: {}", p, e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            extensions,
            exclude,
        })
    }

    pub fn is_candidate(&self, path: &Path) -> bool {
        if path.is_dir() {
            return false;
        }
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return false,
        };
        if self.exclude.iter().any(|p| p.matches(filename)) {
            return false;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let ext = ext.to_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> WatcherConfig {
        WatcherConfig {
            download_dir: PathBuf::from("/downloads"),
            recursive: true,
            min_file_size_mb: 500,
            quiet_period_secs: 30,
            extensions: vec![".mkv".to_string(), ".mp4".to_string()],
            exclude: vec!["*.part".to_string(), "*.tmp".to_string()],
        }
    }

    fn validator() -> FileValidator {
        FileValidator::new(&config()).unwrap()
    }

    #[test]
    fn test_media_extensions_accepted() {
        let v = validator();
        assert!(v.is_candidate(Path::new("/downloads/movie.mkv")));
        assert!(v.is_candidate(Path::new("/downloads/movie.MP4")));
    }

    #[test]
    fn test_other_extensions_rejected() {
        let v = validator();
        assert!(!v.is_candidate(Path::new("/downloads/notes.txt")));
        assert!(!v.is_candidate(Path::new("/downloads/noext")));
    }

    #[test]
    fn test_exclusion_patterns_win_over_extension() {
        let v = FileValidator::new(&WatcherConfig {
            exclude: vec!["*.part".to_string(), "sample*".to_string()],
            ..config()
        })
        .unwrap();
        assert!(!v.is_candidate(Path::new("/downloads/movie.mkv.part")));
        assert!(!v.is_candidate(Path::new("/downloads/sample.mkv")));
        assert!(v.is_candidate(Path::new("/downloads/movie.mkv")));
    }

    #[test]
    fn test_bad_pattern_is_a_config_error() {
        let result = FileValidator::new(&WatcherConfig {
            exclude: vec!["[".to_string()],
            ..config()
        });
        assert!(result.is_err());
    }
}
