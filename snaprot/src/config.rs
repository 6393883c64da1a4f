//! Configuration management for snaprot.
//!
//! Settings are loaded from an optional TOML file, then overridden by command-line
//! flags to produce a single immutable [`RunConfig`] that is handed to every component.

use crate::utils::{Result, SnaprotError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Smallest ring that still keeps one previous generation next to `.0`.
pub const MIN_GENERATIONS: usize = 2;

/// Backup frequency class. Selects the source list and the generation prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackupClass {
    Hourly,
    Daily,
}

impl BackupClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupClass::Hourly => "hourly",
            BackupClass::Daily => "daily",
        }
    }
}

impl std::fmt::Display for BackupClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which `.0` generation receives the freshness heartbeat after each machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StampTarget {
    /// Always stamp `hourly.0`, whatever class was run
    Hourly,
    /// Stamp the `.0` of the class that was just synced
    Synced,
}

impl StampTarget {
    pub fn class_for(&self, synced: BackupClass) -> BackupClass {
        match self {
            StampTarget::Hourly => BackupClass::Hourly,
            StampTarget::Synced => synced,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub backup: BackupSettings,

    #[serde(default)]
    pub commands: CommandSettings,

    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Backup destination root
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Block device holding the backup root (used for remounting)
    #[serde(default = "default_device")]
    pub device: PathBuf,

    /// Number of generations kept per class, `.0` included
    #[serde(default = "default_generations")]
    pub generations: usize,

    /// Generation stamped after each machine
    #[serde(default = "default_stamp")]
    pub stamp: StampTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSettings {
    #[serde(default = "default_mount")]
    pub mount: PathBuf,

    #[serde(default = "default_rsync")]
    pub rsync: PathBuf,

    /// Remote shell passed to rsync with `-e` for non-local machines
    #[serde(default = "default_remote_shell")]
    pub remote_shell: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Log level used when neither `--verbose` nor `--quiet` is given
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_root() -> PathBuf {
    PathBuf::from("/backups")
}

fn default_device() -> PathBuf {
    PathBuf::from("/dev/sdc1")
}

fn default_generations() -> usize {
    4
}

fn default_stamp() -> StampTarget {
    StampTarget::Hourly
}

fn default_mount() -> PathBuf {
    PathBuf::from("/bin/mount")
}

fn default_rsync() -> PathBuf {
    PathBuf::from("/usr/bin/rsync")
}

fn default_remote_shell() -> String {
    "ssh".to_string()
}

fn default_log_level() -> String {
    "debug".to_string()
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            root: default_root(),
            device: default_device(),
            generations: default_generations(),
            stamp: default_stamp(),
        }
    }
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            mount: default_mount(),
            rsync: default_rsync(),
            remote_shell: default_remote_shell(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backup: BackupSettings::default(),
            commands: CommandSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }
}

/// Everything one run needs, fixed before the first machine is touched.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub class: BackupClass,
    pub dry_run: bool,
    /// Remount the backup root read-write for the duration of the run
    pub manage_mount: bool,
    pub device: PathBuf,
    pub root: PathBuf,
    pub generations: usize,
    pub stamp: StampTarget,
    pub mount_bin: PathBuf,
    pub rsync_bin: PathBuf,
    pub remote_shell: String,
}

impl RunConfig {
    /// Build a run configuration from settings alone (CLI overrides are applied by the caller).
    pub fn from_settings(settings: &Settings, class: BackupClass) -> Self {
        Self {
            class,
            dry_run: false,
            manage_mount: false,
            device: settings.backup.device.clone(),
            root: settings.backup.root.clone(),
            generations: settings.backup.generations,
            stamp: settings.backup.stamp,
            mount_bin: settings.commands.mount.clone(),
            rsync_bin: settings.commands.rsync.clone(),
            remote_shell: settings.commands.remote_shell.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.generations < MIN_GENERATIONS {
            return Err(SnaprotError::Config(format!(
                "generations must be at least {} (got {})",
                MIN_GENERATIONS, self.generations
            )));
        }
        if !self.root.is_absolute() {
            return Err(SnaprotError::Config(format!(
                "backup root must be an absolute path: {}",
                self.root.display()
            )));
        }
        if self.remote_shell.trim().is_empty() {
            return Err(SnaprotError::Config("remote_shell must not be empty".into()));
        }
        Ok(())
    }

    /// `<root>/<machine>`
    pub fn machine_dir(&self, machine: &str) -> PathBuf {
        self.root.join(machine)
    }

    /// `<root>/<machine>/<class>`, the stem every generation path is built from.
    pub fn generation_prefix(&self, machine: &str, class: BackupClass) -> PathBuf {
        self.machine_dir(machine).join(class.as_str())
    }
}
