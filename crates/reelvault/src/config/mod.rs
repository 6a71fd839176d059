mod loader;
mod schema;

pub use loader::{find_config, load_config, load_config_from_str};
pub use schema::{
    ArchiveConfig, Config, DatabaseConfig, ResolverConfig, TransferConfig, VersioningConfig,
    WatcherConfig,
};
