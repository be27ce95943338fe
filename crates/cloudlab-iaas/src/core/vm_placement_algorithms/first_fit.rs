//! First Fit algorithm.

use crate::core::common::AllocationVerdict;
use crate::core::resource_pool::{ResourcePoolState, VmInfo};
use crate::core::vm_placement_algorithm::VmPlacementAlgorithm;

/// Uses the first suitable host in the order of host IDs.
#[derive(Clone, Default)]
pub struct FirstFit;

impl FirstFit {
    pub fn new() -> Self {
        Default::default()
    }
}

impl VmPlacementAlgorithm for FirstFit {
    fn select_host(&self, vm: &VmInfo, pool_state: &ResourcePoolState) -> Option<u32> {
        pool_state
            .hosts()
            .find(|host| host.can_allocate(vm) == AllocationVerdict::Success)
            .map(|host| host.id)
    }
}
