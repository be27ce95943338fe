//! Simulation configuration.

pub mod options;
pub mod sim_config;

pub use options::{get_option, get_option_or, parse_config_value, parse_options};
pub use sim_config::{HostConfig, MigrationConfig, SimulationConfig, VmConfig};
