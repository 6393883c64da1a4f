//! Generation ring rotation.
//!
//! Each machine keeps `N` generations per class under `<root>/<machine>/<class>.<k>`,
//! `.0` being the newest. Before a sync the ring advances by one:
//!
//! 1. `.N-1` is deleted,
//! 2. `.k` is renamed to `.k+1` for `k = N-2 ..= 1`,
//! 3. `.0` is hard-link copied into `.1`.
//!
//! The copy is built under a staging name (`<class>.1.linking`) and renamed to `.1`
//! only once complete, so an interrupted copy never enters the ring. A staging tree
//! left by an earlier run is discarded before the next copy.
//!
//! `.0` is only ever read here, so whatever step fails the newest snapshot survives.
//! The sync then rewrites `.0` in place; files it replaces get new inodes and `.1`
//! keeps the old ones.

use crate::config::{BackupClass, RunConfig};
use crate::fs::{link_tree, LinkStats};
use crate::models::MachineSpec;
use crate::utils::{Result, RotationStep, SnaprotError};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// `<prefix>.<k>`
pub fn generation_path(prefix: &Path, k: usize) -> PathBuf {
    let mut path: OsString = prefix.as_os_str().to_owned();
    path.push(format!(".{}", k));
    PathBuf::from(path)
}

/// Generation numbers below `count` that currently exist as directories, ascending.
pub fn existing_generations(prefix: &Path, count: usize) -> Vec<usize> {
    (0..count)
        .filter(|k| generation_path(prefix, *k).is_dir())
        .collect()
}

/// What one rotation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationOutcome {
    /// The oldest generation was deleted
    pub dropped_oldest: bool,
    /// Renames performed, as `(from, to)`
    pub shifted: Vec<(usize, usize)>,
    /// Present when `.0` existed and was linked into `.1`
    pub linked: Option<LinkStats>,
}

/// Advance the generation ring for `machine` and `class`.
pub fn rotate(config: &RunConfig, machine: &MachineSpec, class: BackupClass) -> Result<RotationOutcome> {
    let machine_dir = config.machine_dir(&machine.name);
    let prefix = config.generation_prefix(&machine.name, class);
    let newest = generation_path(&prefix, 0);
    let had_newest = newest.is_dir();

    let fail = |step: RotationStep, source: std::io::Error| SnaprotError::Rotation {
        prefix: prefix.clone(),
        step,
        newest_intact: !had_newest || newest.is_dir(),
        source,
    };

    ensure_dir(&machine_dir).map_err(|e| fail(RotationStep::PrepareMachineDir, e))?;

    let mut outcome = RotationOutcome::default();
    let last = config.generations - 1;

    let oldest = generation_path(&prefix, last);
    if let Ok(metadata) = fs::symlink_metadata(&oldest) {
        debug!(path = %oldest.display(), is_dir = metadata.is_dir(), "Removing oldest generation");
        remove_path(&oldest).map_err(|e| fail(RotationStep::DropOldest, e))?;
        outcome.dropped_oldest = true;
    }

    for k in (1..last).rev() {
        let from = generation_path(&prefix, k);
        if !from.is_dir() {
            continue;
        }
        let to = generation_path(&prefix, k + 1);
        debug!(from = %from.display(), to = %to.display(), "Shifting generation");
        fs::rename(&from, &to).map_err(|e| fail(RotationStep::Shift { from: k, to: k + 1 }, e))?;
        outcome.shifted.push((k, k + 1));
    }

    if had_newest {
        let stats = link_newest(&prefix).map_err(|e| fail(RotationStep::LinkNewest, e))?;
        outcome.linked = Some(stats);
    }

    info!(
        machine = %machine.name,
        class = %class,
        dropped_oldest = outcome.dropped_oldest,
        shifted = outcome.shifted.len(),
        linked_files = outcome.linked.map(|s| s.hard_links).unwrap_or(0),
        "Rotated generations"
    );

    Ok(outcome)
}

/// Staging path the `.1` copy is built under
pub fn staging_path(prefix: &Path) -> PathBuf {
    let mut path: OsString = generation_path(prefix, 1).into_os_string();
    path.push(".linking");
    PathBuf::from(path)
}

/// Hard-link copy `.0` into `.1` through the staging path.
fn link_newest(prefix: &Path) -> std::io::Result<LinkStats> {
    let newest = generation_path(prefix, 0);
    let second = generation_path(prefix, 1);
    let staging = staging_path(prefix);

    if fs::symlink_metadata(&staging).is_ok() {
        warn!(path = %staging.display(), "Discarding incomplete copy left by an earlier run");
        remove_path(&staging)?;
    }

    debug!(from = %newest.display(), to = %second.display(), "Hard-linking newest generation");
    let linked = link_tree(&newest, &staging).and_then(|stats| {
        fs::rename(&staging, &second)?;
        Ok(stats)
    });

    if linked.is_err() && fs::symlink_metadata(&staging).is_ok() {
        // Only links into .0 live here
        if let Err(e) = remove_path(&staging) {
            warn!(path = %staging.display(), error = %e, "Could not remove incomplete copy");
        }
    }

    linked
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Create `path` unless it is already there. Parents are not created.
fn ensure_dir(path: &Path) -> std::io::Result<()> {
    match fs::create_dir(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Created machine directory");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    fn setup(temp_dir: &TempDir) -> (RunConfig, MachineSpec) {
        let mut config = RunConfig::from_settings(&Settings::default(), BackupClass::Daily);
        config.root = temp_dir.path().to_path_buf();
        let machine = MachineSpec {
            name: "host1".into(),
            address: "local".into(),
            hourly_sources: vec!["/srv".into()],
            daily_sources: vec!["/etc".into()],
            exclude_patterns: vec![],
        };
        (config, machine)
    }

    /// Create generation `k` holding a file named `marker` with `content`.
    fn make_generation(prefix: &Path, k: usize, content: &str) -> std::io::Result<()> {
        let dir = generation_path(prefix, k);
        fs::create_dir_all(dir.join("etc"))?;
        fs::write(dir.join("etc/marker"), content)
    }

    fn marker(prefix: &Path, k: usize) -> std::io::Result<String> {
        fs::read_to_string(generation_path(prefix, k).join("etc/marker"))
    }

    #[test]
    fn test_generation_path() {
        assert_eq!(
            generation_path(Path::new("/backups/host1/daily"), 3),
            PathBuf::from("/backups/host1/daily.3")
        );
    }

    #[test]
    fn test_first_run_creates_machine_dir_only() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let (config, machine) = setup(&temp_dir);

        let outcome = rotate(&config, &machine, BackupClass::Daily).unwrap();
        assert_eq!(outcome, RotationOutcome::default());
        assert!(temp_dir.path().join("host1").is_dir());

        let prefix = config.generation_prefix("host1", BackupClass::Daily);
        assert!(existing_generations(&prefix, 4).is_empty());

        Ok(())
    }

    #[test]
    fn test_second_run_links_newest() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let (config, machine) = setup(&temp_dir);
        let prefix = config.generation_prefix("host1", BackupClass::Daily);
        make_generation(&prefix, 0, "g0")?;

        let outcome = rotate(&config, &machine, BackupClass::Daily).unwrap();
        assert!(outcome.linked.is_some());
        assert_eq!(existing_generations(&prefix, 4), vec![0, 1]);
        assert_eq!(marker(&prefix, 1)?, "g0");

        let a = fs::metadata(generation_path(&prefix, 0).join("etc/marker"))?;
        let b = fs::metadata(generation_path(&prefix, 1).join("etc/marker"))?;
        assert_eq!(a.ino(), b.ino());

        Ok(())
    }

    #[test]
    fn test_full_ring_shift() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let (config, machine) = setup(&temp_dir);
        let prefix = config.generation_prefix("host1", BackupClass::Daily);
        for (k, content) in ["g0", "g1", "g2", "g3"].iter().enumerate() {
            make_generation(&prefix, k, content)?;
        }

        let outcome = rotate(&config, &machine, BackupClass::Daily).unwrap();
        assert!(outcome.dropped_oldest);
        assert_eq!(outcome.shifted, vec![(2, 3), (1, 2)]);
        assert_eq!(existing_generations(&prefix, 4), vec![0, 1, 2, 3]);
        assert_eq!(marker(&prefix, 0)?, "g0");
        assert_eq!(marker(&prefix, 1)?, "g0");
        assert_eq!(marker(&prefix, 2)?, "g1");
        assert_eq!(marker(&prefix, 3)?, "g2");
        assert!(!generation_path(&prefix, 4).exists());

        Ok(())
    }

    #[test]
    fn test_two_rotations_move_second_to_last() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let (config, machine) = setup(&temp_dir);
        let prefix = config.generation_prefix("host1", BackupClass::Daily);
        for (k, content) in ["g0", "g1", "g2", "g3"].iter().enumerate() {
            make_generation(&prefix, k, content)?;
        }

        rotate(&config, &machine, BackupClass::Daily).unwrap();
        rotate(&config, &machine, BackupClass::Daily).unwrap();

        assert_eq!(marker(&prefix, 3)?, "g1");
        assert_eq!(existing_generations(&prefix, 4), vec![0, 1, 2, 3]);

        Ok(())
    }

    #[test]
    fn test_sync_after_rotation_does_not_touch_previous() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let (config, machine) = setup(&temp_dir);
        let prefix = config.generation_prefix("host1", BackupClass::Daily);
        make_generation(&prefix, 0, "before")?;

        rotate(&config, &machine, BackupClass::Daily).unwrap();

        // rsync writes a temp file and renames it over the old one
        let newest = generation_path(&prefix, 0);
        fs::write(newest.join("etc/.marker.XXXX"), "after")?;
        fs::rename(newest.join("etc/.marker.XXXX"), newest.join("etc/marker"))?;

        assert_eq!(marker(&prefix, 0)?, "after");
        assert_eq!(marker(&prefix, 1)?, "before");

        Ok(())
    }

    #[test]
    fn test_classes_are_independent() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let (config, machine) = setup(&temp_dir);
        let hourly = config.generation_prefix("host1", BackupClass::Hourly);
        let daily = config.generation_prefix("host1", BackupClass::Daily);
        make_generation(&hourly, 0, "h0")?;
        make_generation(&daily, 0, "d0")?;

        rotate(&config, &machine, BackupClass::Hourly).unwrap();

        assert_eq!(existing_generations(&hourly, 4), vec![0, 1]);
        assert_eq!(existing_generations(&daily, 4), vec![0]);

        Ok(())
    }

    #[test]
    fn test_gap_in_ring_is_closed_without_duplicates() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let (config, machine) = setup(&temp_dir);
        let prefix = config.generation_prefix("host1", BackupClass::Daily);
        make_generation(&prefix, 0, "g0")?;
        make_generation(&prefix, 2, "g2")?;

        rotate(&config, &machine, BackupClass::Daily).unwrap();

        assert_eq!(existing_generations(&prefix, 4), vec![0, 1, 3]);
        assert_eq!(marker(&prefix, 1)?, "g0");
        assert_eq!(marker(&prefix, 3)?, "g2");

        Ok(())
    }

    #[test]
    fn test_configurable_ring_size() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let (mut config, machine) = setup(&temp_dir);
        config.generations = 2;
        let prefix = config.generation_prefix("host1", BackupClass::Daily);
        make_generation(&prefix, 0, "g0")?;
        make_generation(&prefix, 1, "g1")?;

        let outcome = rotate(&config, &machine, BackupClass::Daily).unwrap();
        assert!(outcome.dropped_oldest);
        assert!(outcome.shifted.is_empty());
        assert_eq!(existing_generations(&prefix, 3), vec![0, 1]);
        assert_eq!(marker(&prefix, 1)?, "g0");

        Ok(())
    }

    #[test]
    fn test_leftover_second_generation_is_reported_not_merged() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let (config, machine) = setup(&temp_dir);
        let prefix = config.generation_prefix("host1", BackupClass::Daily);
        make_generation(&prefix, 0, "g0")?;
        // Not a directory, so it is not shifted and the finished copy cannot replace it
        fs::write(generation_path(&prefix, 1), b"stray")?;

        let err = rotate(&config, &machine, BackupClass::Daily).unwrap_err();
        match err {
            SnaprotError::Rotation { step, newest_intact, .. } => {
                assert_eq!(step, RotationStep::LinkNewest);
                assert!(newest_intact);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(marker(&prefix, 0)?, "g0");
        assert_eq!(fs::read(generation_path(&prefix, 1))?, b"stray");
        assert!(!staging_path(&prefix).exists());

        Ok(())
    }

    #[test]
    fn test_incomplete_copy_never_becomes_a_generation() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let (config, machine) = setup(&temp_dir);
        let prefix = config.generation_prefix("host1", BackupClass::Daily);
        for (k, content) in ["g0", "g1", "g2"].iter().enumerate() {
            make_generation(&prefix, k, content)?;
        }
        fs::write(generation_path(&prefix, 0).join("etc/hosts"), "127.0.0.1 localhost")?;
        fs::write(generation_path(&prefix, 0).join("etc/passwd"), "root:x:0:0")?;

        // State after a copy of .0 was cut short: a staging tree with one of three files
        let staging = staging_path(&prefix);
        fs::create_dir_all(staging.join("etc"))?;
        fs::hard_link(
            generation_path(&prefix, 0).join("etc/marker"),
            staging.join("etc/marker"),
        )?;

        let outcome = rotate(&config, &machine, BackupClass::Daily).unwrap();
        assert_eq!(outcome.shifted, vec![(2, 3), (1, 2)]);
        assert_eq!(outcome.linked.map(|s| s.hard_links), Some(3));

        assert!(!staging.exists());
        assert_eq!(existing_generations(&prefix, 4), vec![0, 1, 2, 3]);
        assert_eq!(marker(&prefix, 2)?, "g1");
        assert_eq!(marker(&prefix, 3)?, "g2");
        let copied = fs::read_dir(generation_path(&prefix, 1).join("etc"))?.count();
        assert_eq!(copied, 3);

        Ok(())
    }

    #[test]
    fn test_missing_root_is_rotation_failure() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let (mut config, machine) = setup(&temp_dir);
        config.root = temp_dir.path().join("not-mounted");

        let err = rotate(&config, &machine, BackupClass::Daily).unwrap_err();
        match err {
            SnaprotError::Rotation { step, newest_intact, .. } => {
                assert_eq!(step, RotationStep::PrepareMachineDir);
                assert!(newest_intact);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!config.root.exists());

        Ok(())
    }

    #[test]
    fn test_failed_shift_keeps_newest() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let (config, machine) = setup(&temp_dir);
        let prefix = config.generation_prefix("host1", BackupClass::Daily);
        make_generation(&prefix, 0, "g0")?;
        make_generation(&prefix, 1, "g1")?;
        // A directory cannot be renamed over a regular file
        fs::write(generation_path(&prefix, 2), b"stray")?;

        let err = rotate(&config, &machine, BackupClass::Daily).unwrap_err();
        match err {
            SnaprotError::Rotation { step, newest_intact, .. } => {
                assert_eq!(step, RotationStep::Shift { from: 1, to: 2 });
                assert!(newest_intact);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(marker(&prefix, 0)?, "g0");
        assert_eq!(marker(&prefix, 1)?, "g1");
        assert_eq!(fs::read(generation_path(&prefix, 2))?, b"stray");
        assert!(!staging_path(&prefix).exists());

        Ok(())
    }
}
