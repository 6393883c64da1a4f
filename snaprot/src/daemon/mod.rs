//! Process-level concerns: signals and shutdown.

pub mod shutdown;
