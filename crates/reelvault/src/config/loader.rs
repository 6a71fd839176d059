use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Searches the standard locations for a config file.
pub fn find_config() -> Result<PathBuf, ConfigError> {
    let mut candidates = vec![
        PathBuf::from("config.yaml"),
        PathBuf::from("/etc/reelvault/config.yaml"),
    ];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("reelvault").join("config.yaml"));
    }

    for candidate in &candidates {
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }

    Err(ConfigError::NotFound {
        searched: candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if !config.watcher.download_dir.exists() {
        return Err(ConfigError::Validation {
            message: format!(
                "Download directory does not exist: {}",
                config.watcher.download_dir.display()
            ),
        });
    }
    if !config.watcher.download_dir.is_dir() {
        return Err(ConfigError::Validation {
            message: format!(
                "Download path is not a directory: {}",
                config.watcher.download_dir.display()
            ),
        });
    }

    for ext in &config.watcher.extensions {
        if !ext.starts_with('.') || ext.len() < 2 {
            return Err(ConfigError::Validation {
                message: format!("Extension must start with a dot: '{}'", ext),
            });
        }
    }

    for pattern in &config.watcher.exclude {
        if let Err(e) = glob::Pattern::new(pattern) {
            return Err(ConfigError::Validation {
                message: format!("Invalid exclude pattern '{}': {}", pattern, e),
            });
        }
    }

    let threshold = config.versioning.similarity_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(ConfigError::Validation {
            message: format!(
                "similarity_threshold must be within (0, 1], got {}",
                threshold
            ),
        });
    }

    if !config.versioning.suffix_format.contains("{number}") {
        return Err(ConfigError::Validation {
            message: format!(
                "suffix_format must contain '{{number}}', got '{}'",
                config.versioning.suffix_format
            ),
        });
    }

    if config.transfer.chunk_size_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "transfer.chunk_size_bytes must be nonzero".to_string(),
        });
    }
    if config.transfer.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "transfer.max_attempts must be nonzero".to_string(),
        });
    }
    if config.transfer.workers == 0 {
        return Err(ConfigError::Validation {
            message: "transfer.workers must be nonzero".to_string(),
        });
    }

    Ok(())
}
