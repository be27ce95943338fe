//! Simulation configuration.

use serde::{Deserialize, Serialize};

use crate::core::error::{ensure_positive, ConfigError};

/// Holds raw simulation config parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
struct RawSimulationConfig {
    pub scheduling_interval: Option<f64>,
    pub message_delay: Option<f64>,
    pub vm_allocation_retry_period: Option<f64>,
    pub vm_allocation_timeout: Option<f64>,
    pub vm_placement_algorithm: Option<String>,
    pub migration: Option<RawMigrationConfig>,
    pub hosts: Option<Vec<HostConfig>>,
    pub vms: Option<Vec<VmConfig>>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
struct RawMigrationConfig {
    pub enabled: Option<bool>,
    pub over_utilization_threshold: Option<f64>,
    pub under_utilization_threshold: Option<f64>,
    pub utilization_window: Option<usize>,
    pub selection_policy: Option<String>,
    pub bandwidth: Option<u64>,
    pub bandwidth_pool: Option<u64>,
}

/// Holds configuration of a single physical host or a set of identical hosts.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct HostConfig {
    /// Host name.
    /// Should be set if count = 1.
    pub name: Option<String>,
    /// Host name prefix.
    /// Full name is produced by appending host instance number to the prefix.
    /// Should be set if count > 1.
    pub name_prefix: Option<String>,
    /// Number of processing elements (cores).
    pub pes: u32,
    /// Capacity of each processing element in MIPS.
    pub pe_mips: f64,
    /// Memory capacity in MB.
    pub ram: u64,
    /// Bandwidth capacity in MB/s.
    pub bw: u64,
    /// Storage capacity in MB.
    pub storage: u64,
    /// Policy used to share processing capacity between VMs, `TimeShared` or `SpaceShared`.
    pub vm_scheduler: Option<String>,
    /// Power model, e.g. `Linear[idle=100,max=250]`. Hosts without power model consume no energy.
    pub power_model: Option<String>,
    /// Number of such hosts.
    pub count: Option<u32>,
}

/// Holds configuration of a single VM or a set of identical VMs.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct VmConfig {
    /// Number of processing elements.
    pub pes: u32,
    /// Requested capacity of each processing element in MIPS.
    pub mips: f64,
    /// Memory in MB.
    pub ram: u64,
    /// Bandwidth in MB/s.
    pub bw: u64,
    /// Image size in MB.
    pub size: u64,
    /// Policy used to share VM capacity between cloudlets, `TimeShared` or `SpaceShared`.
    pub cloudlet_scheduler: Option<String>,
    /// Number of such VMs.
    pub count: Option<u32>,
}

/// Parameters of dynamic VM consolidation.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct MigrationConfig {
    /// Whether periodic migration decisions are made at all.
    pub enabled: bool,
    /// Host is overloaded when its utilization is strictly above this value.
    pub over_utilization_threshold: f64,
    /// Host is underloaded when its utilization is strictly below this value.
    pub under_utilization_threshold: f64,
    /// Number of most recent utilization samples averaged to get the current host utilization.
    pub utilization_window: usize,
    /// VM selection policy: `MinimumUtilization`, `MaximumUtilization` or `MinimumMigrationTime`.
    pub selection_policy: String,
    /// Bandwidth in MB/s reserved for a single migration.
    pub bandwidth: u64,
    /// Total bandwidth in MB/s shared by all concurrent migrations.
    pub bandwidth_pool: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            over_utilization_threshold: 0.8,
            under_utilization_threshold: 0.2,
            utilization_window: 1,
            selection_policy: "MinimumUtilization".to_string(),
            bandwidth: 1000,
            bandwidth_pool: 10000,
        }
    }
}

/// Represents simulation configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SimulationConfig {
    /// Period in seconds of processing updates and migration decisions.
    pub scheduling_interval: f64,
    /// Message delay in seconds between brokers and the datacenter.
    pub message_delay: f64,
    /// Period in seconds for waiting before retrying failed VM allocation request.
    pub vm_allocation_retry_period: f64,
    /// Timeout in seconds after which unallocated VM becomes failed.
    pub vm_allocation_timeout: f64,
    /// VM placement algorithm: `FirstFit`, `BestFit` or `WorstFit`.
    pub vm_placement_algorithm: String,
    /// Dynamic VM consolidation parameters.
    pub migration: MigrationConfig,
    /// Configurations of physical hosts.
    pub hosts: Vec<HostConfig>,
    /// Configurations of VMs submitted by the default broker.
    pub vms: Vec<VmConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            scheduling_interval: 5.,
            message_delay: 0.,
            vm_allocation_retry_period: 1.,
            vm_allocation_timeout: 50.,
            vm_placement_algorithm: "WorstFit".to_string(),
            migration: MigrationConfig::default(),
            hosts: Vec::new(),
            vms: Vec::new(),
        }
    }
}

impl SimulationConfig {
    /// Creates simulation config with default parameter values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates simulation config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    pub fn from_file(file_name: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(file_name).map_err(|source| ConfigError::Io {
            path: file_name.to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Creates simulation config from YAML string, see [`from_file`](Self::from_file).
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let raw: RawSimulationConfig = serde_yaml::from_str(yaml)?;
        let default = Self::default();
        let raw_migration = raw.migration.unwrap_or_default();
        let config = Self {
            scheduling_interval: raw.scheduling_interval.unwrap_or(default.scheduling_interval),
            message_delay: raw.message_delay.unwrap_or(default.message_delay),
            vm_allocation_retry_period: raw
                .vm_allocation_retry_period
                .unwrap_or(default.vm_allocation_retry_period),
            vm_allocation_timeout: raw.vm_allocation_timeout.unwrap_or(default.vm_allocation_timeout),
            vm_placement_algorithm: raw.vm_placement_algorithm.unwrap_or(default.vm_placement_algorithm),
            migration: MigrationConfig {
                enabled: raw_migration.enabled.unwrap_or(default.migration.enabled),
                over_utilization_threshold: raw_migration
                    .over_utilization_threshold
                    .unwrap_or(default.migration.over_utilization_threshold),
                under_utilization_threshold: raw_migration
                    .under_utilization_threshold
                    .unwrap_or(default.migration.under_utilization_threshold),
                utilization_window: raw_migration
                    .utilization_window
                    .unwrap_or(default.migration.utilization_window),
                selection_policy: raw_migration
                    .selection_policy
                    .unwrap_or(default.migration.selection_policy),
                bandwidth: raw_migration.bandwidth.unwrap_or(default.migration.bandwidth),
                bandwidth_pool: raw_migration.bandwidth_pool.unwrap_or(default.migration.bandwidth_pool),
            },
            hosts: raw.hosts.unwrap_or_default(),
            vms: raw.vms.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks numeric parameters and utilization thresholds.
    ///
    /// Names of algorithms and models are checked when they are resolved.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive("scheduling_interval", self.scheduling_interval)?;
        ensure_positive("vm_allocation_retry_period", self.vm_allocation_retry_period)?;
        ensure_positive("vm_allocation_timeout", self.vm_allocation_timeout)?;
        if self.message_delay < 0. {
            return Err(ConfigError::NonPositive {
                name: "message_delay".to_string(),
                value: self.message_delay,
            });
        }
        let migration = &self.migration;
        let (under, over) = (
            migration.under_utilization_threshold,
            migration.over_utilization_threshold,
        );
        if !(0.0..=1.0).contains(&under) || !(0.0..=1.0).contains(&over) || under >= over {
            return Err(ConfigError::Thresholds { under, over });
        }
        ensure_positive("migration.utilization_window", migration.utilization_window as f64)?;
        ensure_positive("migration.bandwidth", migration.bandwidth as f64)?;
        ensure_positive("migration.bandwidth_pool", migration.bandwidth_pool as f64)?;
        for host in &self.hosts {
            ensure_positive("host pes", host.pes as f64)?;
            ensure_positive("host pe_mips", host.pe_mips)?;
            ensure_positive("host ram", host.ram as f64)?;
            ensure_positive("host bw", host.bw as f64)?;
            ensure_positive("host storage", host.storage as f64)?;
        }
        for vm in &self.vms {
            ensure_positive("vm pes", vm.pes as f64)?;
            ensure_positive("vm mips", vm.mips)?;
        }
        Ok(())
    }

    /// Returns total hosts count.
    pub fn number_of_hosts(&self) -> u32 {
        self.hosts.iter().map(|h| h.count.unwrap_or(1)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_for_missing_fields() {
        let config = SimulationConfig::from_yaml_str("message_delay: 0.5\n").unwrap();
        assert_eq!(config.message_delay, 0.5);
        assert_eq!(config.scheduling_interval, 5.);
        assert_eq!(config.vm_placement_algorithm, "WorstFit");
        assert_eq!(config.migration, MigrationConfig::default());
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn partial_migration_block() {
        let yaml = "migration:\n  over_utilization_threshold: 0.7\n  enabled: false\n";
        let config = SimulationConfig::from_yaml_str(yaml).unwrap();
        assert!(!config.migration.enabled);
        assert_eq!(config.migration.over_utilization_threshold, 0.7);
        assert_eq!(config.migration.under_utilization_threshold, 0.2);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let yaml = "migration:\n  over_utilization_threshold: 0.3\n  under_utilization_threshold: 0.5\n";
        assert!(matches!(
            SimulationConfig::from_yaml_str(yaml),
            Err(ConfigError::Thresholds { .. })
        ));
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(matches!(
            SimulationConfig::from_yaml_str("scheduling_interval: 0\n"),
            Err(ConfigError::NonPositive { .. })
        ));
    }

    #[test]
    fn zero_host_memory_is_rejected() {
        let yaml = "hosts:\n  - name: h\n    pes: 2\n    pe_mips: 1000\n    ram: 0\n    bw: 100\n    storage: 1000\n";
        match SimulationConfig::from_yaml_str(yaml) {
            Err(ConfigError::NonPositive { name, .. }) => assert_eq!(name, "host ram"),
            other => panic!("unexpected result: {:?}", other.map(|c| c.hosts.len())),
        }
    }

    #[test]
    fn malformed_yaml_is_reported() {
        assert!(matches!(
            SimulationConfig::from_yaml_str("hosts: 12: 3"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(matches!(
            SimulationConfig::from_file("no-such-dir/config.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
