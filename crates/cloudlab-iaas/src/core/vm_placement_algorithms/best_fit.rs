//! Best Fit algorithm.

use crate::core::common::AllocationVerdict;
use crate::core::resource_pool::{ResourcePoolState, VmInfo};
use crate::core::vm_placement_algorithm::VmPlacementAlgorithm;

/// Uses the suitable host with the least fraction of cores left after placing the VM.
#[derive(Clone, Default)]
pub struct BestFit;

impl BestFit {
    pub fn new() -> Self {
        Default::default()
    }
}

impl VmPlacementAlgorithm for BestFit {
    fn select_host(&self, vm: &VmInfo, pool_state: &ResourcePoolState) -> Option<u32> {
        let mut result: Option<u32> = None;
        let mut best_remaining = f64::MAX;

        for host in pool_state.hosts() {
            if host.can_allocate(vm) == AllocationVerdict::Success {
                let remaining = host.remaining_pes_fraction_with(vm);
                if remaining < best_remaining {
                    best_remaining = remaining;
                    result = Some(host.id);
                }
            }
        }
        result
    }
}
