//! Source-list resolution.

use crate::config::BackupClass;
use crate::models::MachineSpec;

/// Transfer sources for `machine` and `class`, in configured order.
///
/// Local machines use their paths as given; remote ones get an `<address>:` prefix
/// so rsync reaches them over the remote shell.
pub fn resolve(machine: &MachineSpec, class: BackupClass) -> Vec<String> {
    let local = machine.is_local();
    machine
        .sources(class)
        .map(|source| {
            if local {
                source.to_string()
            } else {
                format!("{}:{}", machine.address, source)
            }
        })
        .collect()
}
