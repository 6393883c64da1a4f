//! rsync invocation.

use crate::config::{BackupClass, RunConfig};
use crate::executor::{display_argv, CommandResult, CommandRunner};
use crate::models::MachineSpec;
use crate::rotation::generation_path;
use crate::sync::sources::resolve;
use std::ffi::OsString;
use tracing::info;

/// Archive, verbose, compressed.
const BASE_FLAGS: &str = "-avz";

/// Argument vector that mirrors the machine's sources into `<prefix>.0`.
pub fn build_args(config: &RunConfig, machine: &MachineSpec, class: BackupClass) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![config.rsync_bin.clone().into(), BASE_FLAGS.into()];

    if !machine.is_local() {
        args.push("-e".into());
        args.push(config.remote_shell.clone().into());
    }

    // .0 must mirror the source exactly, never accumulate removed files
    args.push("--delete".into());

    if config.dry_run {
        args.push("--dry-run".into());
    }

    args.extend(machine.excludes().map(|pattern| OsString::from(format!("--exclude={}", pattern))));
    args.extend(resolve(machine, class).into_iter().map(OsString::from));

    let prefix = config.generation_prefix(&machine.name, class);
    args.push(generation_path(&prefix, 0).into());

    args
}

/// Build and run the rsync command for one machine.
pub fn run_sync<R: CommandRunner>(
    runner: &R,
    config: &RunConfig,
    machine: &MachineSpec,
    class: BackupClass,
) -> CommandResult {
    let args = build_args(config, machine, class);
    if config.dry_run {
        info!(machine = %machine.name, command = %display_argv(&args), "Dry run rsync");
    }
    runner.run(&args)
}
