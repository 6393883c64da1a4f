//! Hard-link tree copy.
//!
//! Duplicates a directory tree so that the copy shares every non-directory inode with
//! the source tree. Directories are recreated (same mode, ownership and timestamps),
//! symbolic links are recreated pointing at the same target, and everything else is
//! hard-linked. Tools that replace files by rename (rsync does) can then update one
//! tree without touching the other.

use std::fs::{self, FileTimes, Metadata};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

/// Counts of what a [`link_tree`] call created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub directories: usize,
    pub hard_links: usize,
    pub symlinks: usize,
}

/// Copy `src` into a new directory `dst` using hard links.
///
/// `dst` must not exist. Symlinks inside `src` are never followed. On error the
/// partially built `dst` is left in place and is the caller's to remove.
pub fn link_tree(src: &Path, dst: &Path) -> std::io::Result<LinkStats> {
    let mut stats = LinkStats::default();
    // Directory metadata is restored after their contents are in place.
    let mut dirs: Vec<(PathBuf, Metadata)> = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let target = if relative.as_os_str().is_empty() {
            dst.to_path_buf()
        } else {
            dst.join(relative)
        };
        let metadata = entry.metadata()?;
        let file_type = entry.file_type();
        trace!(path = %target.display(), "Linking");

        if file_type.is_dir() {
            fs::create_dir(&target)?;
            copy_ownership(&target, &metadata)?;
            stats.directories += 1;
            dirs.push((target, metadata));
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(&link, &target)?;
            copy_ownership(&target, &metadata)?;
            stats.symlinks += 1;
        } else {
            fs::hard_link(entry.path(), &target)?;
            stats.hard_links += 1;
        }
    }

    for (path, metadata) in dirs.iter().rev() {
        let times = FileTimes::new()
            .set_accessed(metadata.accessed()?)
            .set_modified(metadata.modified()?);
        fs::File::open(path)?.set_times(times)?;
        fs::set_permissions(path, metadata.permissions())?;
    }

    Ok(stats)
}

/// Give `path` the owner of `source` when they differ. Needs privilege for other owners.
fn copy_ownership(path: &Path, source: &Metadata) -> std::io::Result<()> {
    let current = fs::symlink_metadata(path)?;
    if current.uid() != source.uid() || current.gid() != source.gid() {
        std::os::unix::fs::lchown(path, Some(source.uid()), Some(source.gid()))?;
    }
    Ok(())
}
