use crate::config::BackupClass;
use crate::utils::{Result, SnaprotError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Address values that mean "this host": sources are used as plain local paths.
pub const LOCAL_ADDRESSES: [&str; 3] = ["local", "localhost", "127.0.0.1"];

/// One machine to back up, as declared in the machine file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineSpec {
    pub name: String,

    #[serde(alias = "IP", alias = "ip")]
    pub address: String,

    #[serde(alias = "hourlySources")]
    pub hourly_sources: Vec<String>,

    /// Authoring convention: hourly sources need not be repeated here.
    #[serde(alias = "dailySources")]
    pub daily_sources: Vec<String>,

    /// Patterns are relative to the parent of each source, as rsync reads them.
    #[serde(alias = "excludePatterns", alias = "exclude")]
    pub exclude_patterns: Vec<String>,
}

impl MachineSpec {
    pub fn is_local(&self) -> bool {
        LOCAL_ADDRESSES.contains(&self.address.as_str())
    }

    /// Configured sources for `class`, skipping blank placeholder entries.
    pub fn sources(&self, class: BackupClass) -> impl Iterator<Item = &str> {
        let list = match class {
            BackupClass::Hourly => &self.hourly_sources,
            BackupClass::Daily => &self.daily_sources,
        };
        non_blank(list)
    }

    pub fn excludes(&self) -> impl Iterator<Item = &str> {
        non_blank(&self.exclude_patterns)
    }

    fn validate(&self, class: BackupClass) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SnaprotError::Config("machine with empty name".into()));
        }
        if self.name.contains('/') || self.name == "." || self.name == ".." {
            return Err(SnaprotError::Config(format!(
                "machine name is not a valid directory name: {}",
                self.name
            )));
        }
        if self.address.trim().is_empty() {
            return Err(SnaprotError::Config(format!(
                "machine {} has an empty address",
                self.name
            )));
        }
        if self.sources(class).next().is_none() {
            return Err(SnaprotError::EmptySources {
                machine: self.name.clone(),
                class: class.to_string(),
            });
        }
        Ok(())
    }
}

fn non_blank(list: &[String]) -> impl Iterator<Item = &str> {
    list.iter().map(String::as_str).filter(|s| !s.trim().is_empty())
}

/// Parse a machine list and validate it for `class`.
///
/// Every machine is checked before the list is returned, so a bad entry anywhere
/// stops the run before any generation is touched.
pub fn parse_machines(content: &str, class: BackupClass) -> Result<Vec<MachineSpec>> {
    let machines: Vec<MachineSpec> = serde_json::from_str(content)?;

    if machines.is_empty() {
        return Err(SnaprotError::Config("machine file defines no machines".into()));
    }

    let mut seen = HashSet::new();
    for machine in &machines {
        machine.validate(class)?;
        if !seen.insert(machine.name.as_str()) {
            return Err(SnaprotError::Config(format!(
                "machine {} is defined more than once",
                machine.name
            )));
        }
    }

    Ok(machines)
}

/// Load and validate a machine file.
pub fn load_machines(path: &Path, class: BackupClass) -> Result<Vec<MachineSpec>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SnaprotError::Config(format!("cannot read machine file {}: {}", path.display(), e))
    })?;
    parse_machines(&content, class)
}
