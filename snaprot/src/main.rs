//! snaprot - Main entry point
//!
//! Back up the machines defined in a machine file into rotating hard-linked snapshots.

use anyhow::{bail, Context};
use clap::Parser;
use snaprot::{
    config::{BackupClass, RunConfig, Settings, StampTarget},
    daemon::shutdown::ShutdownCoordinator,
    models::load_machines,
    utils, Orchestrator, SnaprotError, SystemRunner,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about = "Back up machines defined in the settings file MACHINE_FILE", long_about = None)]
struct Args {
    /// JSON file listing the machines to back up
    #[arg(value_name = "MACHINE_FILE")]
    machine_file: PathBuf,

    /// Be verbose (default)
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Be quiet: warnings and errors only
    #[arg(short, long)]
    quiet: bool,

    /// Frequency type of backup
    #[arg(short = 't', long = "type", value_enum, default_value_t = BackupClass::Daily)]
    class: BackupClass,

    /// Do a test run: nothing is rotated, remounted or written (see rsync --dry-run)
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Remount the backup drive read-write for the run and read-only afterwards
    #[arg(short, long)]
    mount: bool,

    /// The device to be backed up to
    #[arg(short, long, value_name = "DEVICE_NAME")]
    device: Option<PathBuf>,

    /// The backup destination root
    #[arg(short, long, value_name = "BACKUP_ROOT")]
    root: Option<PathBuf>,

    /// Settings file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Which .0 generation gets its mtime refreshed after each machine
    #[arg(long, value_enum)]
    stamp: Option<StampTarget>,
}

impl Args {
    fn log_level<'a>(&self, settings: &'a Settings) -> &'a str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            &settings.log.level
        }
    }

    fn run_config(&self, settings: &Settings) -> RunConfig {
        let mut config = RunConfig::from_settings(settings, self.class);
        config.dry_run = self.dry_run;
        config.manage_mount = self.mount;
        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        if let Some(stamp) = self.stamp {
            config.stamp = stamp;
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be up yet (bad settings file), so report directly
            eprintln!("{:#}. Exiting...", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    // Load settings
    let settings = match &args.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("Cannot load settings from {}", path.display()))?,
        None => Settings::default(),
    };

    // Initialize logging
    utils::logger::init(args.log_level(&settings))?;

    let config = args.run_config(&settings);
    config.validate()?;

    // Every machine is validated before anything is mounted or rotated
    tracing::debug!(path = %args.machine_file.display(), "Loading machine definition file");
    let machines = load_machines(&args.machine_file, config.class)?;
    tracing::debug!(machines = ?machines.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(), "Machines loaded");

    if !nix::unistd::geteuid().is_root() {
        bail!(SnaprotError::PermissionDenied("Not running as root!".into()));
    }

    tracing::info!(
        "Starting snaprot v{} ({} backup of {} machines)",
        env!("CARGO_PKG_VERSION"),
        config.class,
        machines.len()
    );

    // Handlers go in before the remount so an early signal is not lost
    let mut coordinator = ShutdownCoordinator::install().context("Cannot install signal handlers")?;
    let token = coordinator.token();

    // The run blocks on external tools; keep the runtime free to watch for signals
    let mut run_handle = tokio::task::spawn_blocking(move || {
        let runner = SystemRunner;
        Orchestrator::with_cancel(&config, &runner, token).run(&machines)
    });

    let finished = tokio::select! {
        result = &mut run_handle => Some(result),
        _ = coordinator.wait_for_signal() => None,
    };
    // After a signal the run stops at the next machine boundary and releases the mount
    let result = match finished {
        Some(result) => result?,
        None => run_handle.await?,
    };

    // The orchestrator has logged the summary
    result?;

    Ok(())
}
