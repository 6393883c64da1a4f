//! Transfer of machine sources into generation `.0`.

pub mod rsync;
pub mod sources;

pub use rsync::{build_args, run_sync};
pub use sources::resolve;
