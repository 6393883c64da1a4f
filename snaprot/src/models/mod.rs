pub mod machine;

pub use machine::{load_machines, parse_machines, MachineSpec};
