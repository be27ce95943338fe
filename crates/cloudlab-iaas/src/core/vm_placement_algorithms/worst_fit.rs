//! Worst Fit algorithm.

use std::cmp::Ordering;

use crate::core::common::AllocationVerdict;
use crate::core::resource_pool::{HostInfo, ResourcePoolState, VmInfo};
use crate::core::vm_placement_algorithm::VmPlacementAlgorithm;

/// Uses the suitable host with the largest fraction of cores left after placing the VM,
/// which spreads the load over hosts. Ties go to the host with the lowest resulting CPU utilization,
/// then to the lowest host ID.
#[derive(Clone, Default)]
pub struct WorstFit;

impl WorstFit {
    pub fn new() -> Self {
        Default::default()
    }

    fn compare(a: &HostInfo, b: &HostInfo, vm: &VmInfo) -> Ordering {
        b.remaining_pes_fraction_with(vm)
            .total_cmp(&a.remaining_pes_fraction_with(vm))
            .then(a.utilization_with(vm).total_cmp(&b.utilization_with(vm)))
            .then(a.id.cmp(&b.id))
    }
}

impl VmPlacementAlgorithm for WorstFit {
    fn select_host(&self, vm: &VmInfo, pool_state: &ResourcePoolState) -> Option<u32> {
        pool_state
            .hosts()
            .filter(|host| host.can_allocate(vm) == AllocationVerdict::Success)
            .min_by(|a, b| Self::compare(a, b, vm))
            .map(|host| host.id)
    }
}
