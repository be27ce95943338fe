//! Virtual machine placement algorithms.

use dyn_clone::{clone_trait_object, DynClone};

use crate::core::config::parse_config_value;
use crate::core::error::ConfigError;
use crate::core::resource_pool::{ResourcePoolState, VmInfo};
use crate::core::vm_placement_algorithms::best_fit::BestFit;
use crate::core::vm_placement_algorithms::first_fit::FirstFit;
use crate::core::vm_placement_algorithms::worst_fit::WorstFit;

/// Trait for implementation of VM placement algorithms.
///
/// The algorithm is defined as a function of VM requirements and current resource pool state, which returns an
/// ID of host selected for VM placement or `None` if there is no suitable host.
///
/// It is possible to implement arbitrary placement algorithm and pass it to
/// [`VmAllocationPolicy`](crate::core::allocation_policy::VmAllocationPolicy).
pub trait VmPlacementAlgorithm: DynClone {
    fn select_host(&self, vm: &VmInfo, pool_state: &ResourcePoolState) -> Option<u32>;
}

clone_trait_object!(VmPlacementAlgorithm);

pub fn placement_algorithm_resolver(config_str: &str) -> Result<Box<dyn VmPlacementAlgorithm>, ConfigError> {
    let (algorithm_name, _options) = parse_config_value(config_str);
    match algorithm_name.as_str() {
        "FirstFit" => Ok(Box::new(FirstFit::new())),
        "BestFit" => Ok(Box::new(BestFit::new())),
        "WorstFit" => Ok(Box::new(WorstFit::new())),
        _ => Err(ConfigError::UnknownName {
            kind: "placement algorithm",
            name: config_str.to_string(),
        }),
    }
}
