//! Thread pool for running approvals in parallel.

pub mod pool;

pub use pool::{ApprovalPool, ApprovalResult};
