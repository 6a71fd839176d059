pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod rename;
pub mod transfer;
pub mod version;
pub mod watcher;
pub mod worker;

pub use config::{find_config, load_config, Config};
pub use coordinator::{ApprovalOutcome, Coordinator, CoordinatorError, Stats};
pub use error::{ConfigError, ReelvaultError, Result, WatchError};
pub use transfer::{TransferEngine, TransferError};
pub use version::{VersionDecision, VersionResolver};
pub use watcher::DirectoryMonitor;
pub use worker::ApprovalPool;
