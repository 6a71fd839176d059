//! Watching the download directory for finished media files.

pub mod monitor;
pub mod stability;
pub mod validator;

pub use monitor::DirectoryMonitor;
pub use stability::{StabilityProbe, StableFile};
pub use validator::FileValidator;
