//! Backup run orchestration.
//!
//! Drives every machine through rotate → sync → stamp, one at a time, while a
//! [`MountGuard`] keeps the backup volume writable. A machine that fails is logged
//! and recorded in the [`RunReport`]; it never stops the machines after it.

use crate::config::RunConfig;
use crate::executor::CommandRunner;
use crate::fs::stamp_now;
use crate::models::MachineSpec;
use crate::mount::MountGuard;
use crate::rotation::{existing_generations, generation_path, rotate, RotationOutcome};
use crate::sync::run_sync;
use crate::utils::{Result, SnaprotError};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationStatus {
    /// Dry run: nothing is moved
    Skipped,
    Rotated(RotationOutcome),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Succeeded,
    Failed(String),
    /// Not attempted because rotation failed
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StampStatus {
    Stamped(PathBuf),
    /// The target generation does not exist yet, e.g. `hourly.0` on a daily-only machine
    NoTarget(PathBuf),
    Failed(String),
    Skipped,
}

/// Outcome of one machine's backup attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineReport {
    pub name: String,
    pub rotation: RotationStatus,
    pub sync: SyncStatus,
    pub stamp: StampStatus,
}

impl MachineReport {
    pub fn succeeded(&self) -> bool {
        !matches!(self.rotation, RotationStatus::Failed(_))
            && self.sync == SyncStatus::Succeeded
            && !matches!(self.stamp, StampStatus::Failed(_))
    }
}

/// Aggregated outcome of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub machines: Vec<MachineReport>,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &MachineReport> {
        self.machines.iter().filter(|m| !m.succeeded())
    }
}

/// Runs one backup class over a machine list
pub struct Orchestrator<'a, R: CommandRunner> {
    config: &'a RunConfig,
    runner: &'a R,
    cancel_token: CancellationToken,
}

impl<'a, R: CommandRunner> Orchestrator<'a, R> {
    /// Create an orchestrator (no cancellation support)
    pub fn new(config: &'a RunConfig, runner: &'a R) -> Self {
        Self {
            config,
            runner,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Create an orchestrator that stops between machines once `cancel_token` fires
    pub fn with_cancel(config: &'a RunConfig, runner: &'a R, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            runner,
            cancel_token,
        }
    }

    /// Back up every machine. Errors here are whole-run failures; per-machine
    /// failures are in the returned report.
    pub fn run(&self, machines: &[MachineSpec]) -> Result<RunReport> {
        let started_at = Utc::now();
        info!(
            class = %self.config.class,
            dry_run = self.config.dry_run,
            machines = machines.len(),
            root = %self.config.root.display(),
            "Starting the backup process"
        );

        let guard = MountGuard::acquire(self.runner, self.config)?;

        let mut reports = Vec::with_capacity(machines.len());
        for machine in machines {
            if self.cancel_token.is_cancelled() {
                warn!(
                    completed = reports.len(),
                    remaining = machines.len() - reports.len(),
                    "Run interrupted, skipping remaining machines"
                );
                guard.release()?;
                return Err(SnaprotError::Cancelled);
            }
            reports.push(self.backup_machine(machine));
        }

        guard.release()?;

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            machines: reports,
        };
        let failed: Vec<&str> = report.failed().map(|m| m.name.as_str()).collect();
        info!(
            machines = report.machines.len(),
            failed = failed.len(),
            elapsed_secs = (report.finished_at - report.started_at).num_seconds(),
            "Finished backing up"
        );
        if !failed.is_empty() {
            warn!(machines = ?failed, "Some machines were not backed up cleanly");
        }

        Ok(report)
    }

    fn backup_machine(&self, machine: &MachineSpec) -> MachineReport {
        let class = self.config.class;
        info!(machine = %machine.name, address = %machine.address, "Backing up machine");

        let rotation = if self.config.dry_run {
            let prefix = self.config.generation_prefix(&machine.name, class);
            info!(
                machine = %machine.name,
                existing = ?existing_generations(&prefix, self.config.generations),
                "Dry run: generations left in place"
            );
            RotationStatus::Skipped
        } else {
            match rotate(self.config, machine, class) {
                Ok(outcome) => RotationStatus::Rotated(outcome),
                Err(e) => {
                    error!(machine = %machine.name, error = %e, "Rotation failed, skipping this machine");
                    return MachineReport {
                        name: machine.name.clone(),
                        rotation: RotationStatus::Failed(e.to_string()),
                        sync: SyncStatus::NotRun,
                        stamp: StampStatus::Skipped,
                    };
                }
            }
        };

        let result = run_sync(self.runner, self.config, machine, class);
        let sync = if result.succeeded() {
            info!(machine = %machine.name, "Backup completed");
            debug!(machine = %machine.name, output = %result.stdout_text(), "rsync output");
            SyncStatus::Succeeded
        } else {
            let detail = result.failure_detail();
            error!(machine = %machine.name, error = %detail, "Backup FAILED");
            SyncStatus::Failed(detail)
        };

        let stamp = self.stamp(machine);

        MachineReport {
            name: machine.name.clone(),
            rotation,
            sync,
            stamp,
        }
    }

    /// Freshness heartbeat for external monitoring, independent of the sync outcome.
    fn stamp(&self, machine: &MachineSpec) -> StampStatus {
        let class = self.config.stamp.class_for(self.config.class);
        let path = generation_path(&self.config.generation_prefix(&machine.name, class), 0);

        if self.config.dry_run {
            debug!(machine = %machine.name, path = %path.display(), "Dry run: not stamping");
            return StampStatus::Skipped;
        }

        match stamp_now(&path) {
            Ok(_) => {
                debug!(machine = %machine.name, path = %path.display(), "Updated mtime of newest generation");
                StampStatus::Stamped(path)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(machine = %machine.name, path = %path.display(), "No generation to stamp");
                StampStatus::NoTarget(path)
            }
            Err(e) => {
                error!(machine = %machine.name, path = %path.display(), error = %e, "mtime update failed");
                StampStatus::Failed(e.to_string())
            }
        }
    }
}
