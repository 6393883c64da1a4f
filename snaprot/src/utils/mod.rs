//! Utility modules for snaprot.

pub mod errors;
pub mod logger;

pub use errors::{RotationStep, SnaprotError, Result};
