//! Timestamp handling for generation directories.

use std::fs::{self, FileTimes};
use std::path::Path;
use std::time::SystemTime;

/// Set the access and modification time of an existing directory to now.
///
/// Unlike `touch`, a missing path is an error rather than a new empty file.
pub fn stamp_now(path: &Path) -> std::io::Result<SystemTime> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a directory", path.display()),
        ));
    }

    let now = SystemTime::now();
    let times = FileTimes::new().set_accessed(now).set_modified(now);
    fs::File::open(path)?.set_times(times)?;

    Ok(now)
}
