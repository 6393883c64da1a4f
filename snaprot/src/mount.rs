//! Backup volume mount state.
//!
//! The backup root normally stays mounted read-only so nothing can tamper with old
//! generations between runs. A [`MountGuard`] remounts it read-write for the length of
//! a run and puts it back to read-only when released or dropped, whichever comes first.

use crate::config::RunConfig;
use crate::executor::{display_argv, CommandRunner};
use crate::utils::{Result, SnaprotError};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    ReadOnly,
    ReadWrite,
}

impl MountState {
    /// Mount option passed to `remount,`
    fn option(&self) -> &'static str {
        match self {
            MountState::ReadOnly => "ro",
            MountState::ReadWrite => "rw",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MountState::ReadOnly => "readonly",
            MountState::ReadWrite => "readwrite",
        }
    }
}

/// Holds the backup volume read-write while alive.
///
/// Inert when the run does not manage mounting or is a dry run: it never remounts and
/// always reports [`MountState::ReadOnly`].
pub struct MountGuard<'a, R: CommandRunner> {
    runner: &'a R,
    mount_bin: PathBuf,
    device: PathBuf,
    root: PathBuf,
    state: MountState,
}

impl<'a, R: CommandRunner> MountGuard<'a, R> {
    /// Remount read-write if the run asks for it. Failure is fatal for the run.
    pub fn acquire(runner: &'a R, config: &RunConfig) -> Result<Self> {
        let mut guard = Self {
            runner,
            mount_bin: config.mount_bin.clone(),
            device: config.device.clone(),
            root: config.root.clone(),
            state: MountState::ReadOnly,
        };

        if !config.manage_mount {
            debug!("Mount management disabled, leaving backup volume as is");
            return Ok(guard);
        }
        if config.dry_run {
            info!("Dry run: not remounting backup volume read-write");
            return Ok(guard);
        }

        guard.remount(MountState::ReadWrite)?;
        Ok(guard)
    }

    pub fn state(&self) -> MountState {
        self.state
    }

    /// Put the volume back to read-only, reporting failure to the caller.
    pub fn release(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        if self.state == MountState::ReadOnly {
            return Ok(());
        }
        let result = self.remount(MountState::ReadOnly);
        if result.is_err() {
            // Never retried from Drop; the operator has to look at it.
            self.state = MountState::ReadOnly;
        }
        result
    }

    fn remount(&mut self, target: MountState) -> Result<()> {
        let argv: Vec<OsString> = vec![
            self.mount_bin.clone().into(),
            "-o".into(),
            format!("remount,{}", target.option()).into(),
            self.device.clone().into(),
            self.root.clone().into(),
        ];

        debug!(command = %display_argv(&argv), "Remounting backup volume {}", target.as_str());
        let result = self.runner.run(&argv);

        if !result.succeeded() {
            return Err(SnaprotError::Remount {
                device: self.device.clone(),
                mode: target.as_str(),
                detail: result.failure_detail(),
            });
        }

        self.state = target;
        info!(device = %self.device.display(), root = %self.root.display(), "Backup volume mounted {}", target.as_str());
        Ok(())
    }
}

impl<R: CommandRunner> Drop for MountGuard<'_, R> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            error!("Backup volume may still be writable: {}", e);
        }
    }
}
