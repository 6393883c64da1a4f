//! Custom error types for snaprot.

use std::path::PathBuf;
use thiserror::Error;

/// Rotation step that failed, used to report how far a rotation got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationStep {
    /// Creating `<root>/<machine>`
    PrepareMachineDir,
    /// Removing the oldest generation
    DropOldest,
    /// Renaming `.from` to `.to`
    Shift { from: usize, to: usize },
    /// Hard-link copying `.0` into `.1`
    LinkNewest,
}

impl std::fmt::Display for RotationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationStep::PrepareMachineDir => write!(f, "creating machine directory"),
            RotationStep::DropOldest => write!(f, "removing oldest generation"),
            RotationStep::Shift { from, to } => write!(f, "renaming .{} to .{}", from, to),
            RotationStep::LinkNewest => write!(f, "hard-linking .0 into .1"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SnaprotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Machine file error: {0}")]
    MachineFile(#[from] serde_json::Error),

    #[error("Settings file error: {0}")]
    Settings(#[from] toml::de::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Could not remount {} {mode}: {detail}", .device.display())]
    Remount {
        device: PathBuf,
        mode: &'static str,
        detail: String,
    },

    #[error("Rotation of {} failed while {step}: {source} ({})", .prefix.display(), newest_label(.newest_intact))]
    Rotation {
        prefix: PathBuf,
        step: RotationStep,
        newest_intact: bool,
        #[source]
        source: std::io::Error,
    },

    #[error("Machine {machine} has no {class} sources configured")]
    EmptySources { machine: String, class: String },

    #[error("Run interrupted")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SnaprotError>;

fn newest_label(intact: &bool) -> &'static str {
    if *intact {
        ".0 intact"
    } else {
        ".0 NOT intact, check the generation directories by hand"
    }
}
