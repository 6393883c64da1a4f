//! snaprot library
//!
//! Rotating, hard-link deduplicated snapshot backups of local and remote machines,
//! with rsync doing the transfers.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod models;
pub mod mount;
pub mod orchestrator;
pub mod rotation;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use config::{BackupClass, RunConfig, Settings, StampTarget};
pub use executor::{CommandResult, CommandRunner, SystemRunner};
pub use models::MachineSpec;
pub use orchestrator::{Orchestrator, RunReport};
pub use utils::errors::SnaprotError;
pub type Result<T> = std::result::Result<T, SnaprotError>;
