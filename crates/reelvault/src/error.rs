use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReelvaultError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] crate::transfer::TransferError),

    #[error("Rename resolver error: {0}")]
    Rename(#[from] crate::rename::RenameError),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] crate::coordinator::CoordinatorError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Config file not found in any of: {searched}")]
    NotFound { searched: String },
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to start watcher: {0}")]
    Init(String),

    #[error("Watch channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ReelvaultError>;
