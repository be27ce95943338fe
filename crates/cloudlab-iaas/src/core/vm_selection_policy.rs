//! Selection of VMs to migrate away from a host.

use dyn_clone::{clone_trait_object, DynClone};

use crate::core::config::parse_config_value;
use crate::core::error::ConfigError;
use crate::core::resource_pool::{HostInfo, VmInfo};

/// Chooses the next VM to migrate from `host` among `candidates`.
///
/// Candidates never include VMs which are already migrating.
pub trait VmSelectionPolicy: DynClone {
    fn select_vm(&self, host: &HostInfo, candidates: &[VmInfo]) -> Option<u32>;
}

clone_trait_object!(VmSelectionPolicy);

pub fn selection_policy_resolver(config_str: &str) -> Result<Box<dyn VmSelectionPolicy>, ConfigError> {
    let (policy_name, _options) = parse_config_value(config_str);
    match policy_name.as_str() {
        "MinimumUtilization" => Ok(Box::new(MinimumUtilization)),
        "MaximumUtilization" => Ok(Box::new(MaximumUtilization)),
        "MinimumMigrationTime" => Ok(Box::new(MinimumMigrationTime)),
        _ => Err(ConfigError::UnknownName {
            kind: "VM selection policy",
            name: config_str.to_string(),
        }),
    }
}

/// Picks the VM with the least CPU usage, migrating it disturbs the workload the least.
#[derive(Clone, Default)]
pub struct MinimumUtilization;

impl VmSelectionPolicy for MinimumUtilization {
    fn select_vm(&self, _host: &HostInfo, candidates: &[VmInfo]) -> Option<u32> {
        candidates
            .iter()
            .min_by(|a, b| a.used_mips.total_cmp(&b.used_mips).then(a.id.cmp(&b.id)))
            .map(|vm| vm.id)
    }
}

/// Picks the VM with the largest CPU usage, relieving an overloaded host with the fewest migrations.
#[derive(Clone, Default)]
pub struct MaximumUtilization;

impl VmSelectionPolicy for MaximumUtilization {
    fn select_vm(&self, _host: &HostInfo, candidates: &[VmInfo]) -> Option<u32> {
        candidates
            .iter()
            .min_by(|a, b| b.used_mips.total_cmp(&a.used_mips).then(a.id.cmp(&b.id)))
            .map(|vm| vm.id)
    }
}

/// Picks the VM with the smallest memory, which is the fastest one to transfer.
#[derive(Clone, Default)]
pub struct MinimumMigrationTime;

impl VmSelectionPolicy for MinimumMigrationTime {
    fn select_vm(&self, _host: &HostInfo, candidates: &[VmInfo]) -> Option<u32> {
        candidates
            .iter()
            .min_by(|a, b| a.ram().cmp(&b.ram()).then(a.id.cmp(&b.id)))
            .map(|vm| vm.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::common::Resources;

    fn vm(id: u32, used_mips: f64, ram: u64) -> VmInfo {
        VmInfo {
            id,
            resources: Resources::new(1, ram, 10, 100),
            mips: 1000.,
            used_mips,
            migrating: false,
        }
    }

    #[test]
    fn policies() {
        let host = HostInfo::new(0, Resources::new(2, 4096, 100, 1000), 1000.);
        // utilizations 0.5 and 0.4 of a 2000 MIPS host
        let vms = vec![vm(1, 1000., 256), vm(2, 800., 1024), vm(3, 1000., 256)];
        assert_eq!(MinimumUtilization.select_vm(&host, &vms), Some(2));
        assert_eq!(MaximumUtilization.select_vm(&host, &vms), Some(1));
        assert_eq!(MinimumMigrationTime.select_vm(&host, &vms), Some(1));
        assert_eq!(MinimumUtilization.select_vm(&host, &[]), None);
    }

    #[test]
    fn resolver() {
        assert!(selection_policy_resolver("MinimumMigrationTime").is_ok());
        assert!(matches!(
            selection_policy_resolver("Random"),
            Err(ConfigError::UnknownName { .. })
        ));
    }
}
