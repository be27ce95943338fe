//! Dynamic VM consolidation: deciding which VMs to migrate and where.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use dyn_clone::{clone_trait_object, DynClone};
use serde::Serialize;

use crate::core::common::AllocationVerdict;
use crate::core::error::ConfigError;
use crate::core::resource_pool::{HostInfo, ResourcePoolState, VmInfo};
use crate::core::vm_selection_policy::VmSelectionPolicy;

/// Host utilization thresholds, `0 <= under < over <= 1`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MigrationThresholds {
    under: f64,
    over: f64,
}

impl MigrationThresholds {
    pub fn new(under: f64, over: f64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&under) || !(0.0..=1.0).contains(&over) || under >= over {
            return Err(ConfigError::Thresholds { under, over });
        }
        Ok(Self { under, over })
    }

    pub fn under(&self) -> f64 {
        self.under
    }

    pub fn over(&self) -> f64 {
        self.over
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlannedMigration {
    pub vm_id: u32,
    pub source: u32,
    pub target: u32,
}

/// Migrations decided in one evaluation pass, in the order they should be started.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    migrations: Vec<PlannedMigration>,
}

impl MigrationPlan {
    pub fn push(&mut self, vm_id: u32, source: u32, target: u32) {
        self.migrations.push(PlannedMigration { vm_id, source, target });
    }

    pub fn migrations(&self) -> &[PlannedMigration] {
        &self.migrations
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn contains_vm(&self, vm_id: u32) -> bool {
        self.migrations.iter().any(|m| m.vm_id == vm_id)
    }
}

impl IntoIterator for MigrationPlan {
    type Item = PlannedMigration;
    type IntoIter = std::vec::IntoIter<PlannedMigration>;

    fn into_iter(self) -> Self::IntoIter {
        self.migrations.into_iter()
    }
}

/// Produces migration decisions from the projected state of the resource pool.
pub trait MigrationPolicy: DynClone {
    fn plan(&self, pool_state: &ResourcePoolState) -> MigrationPlan;

    /// Host utilization bounds outside of which the policy acts.
    fn thresholds(&self) -> MigrationThresholds;
}

clone_trait_object!(MigrationPolicy);

/// Relieves overloaded hosts and drains underloaded ones.
///
/// Overloaded hosts (utilization strictly above `over`) are processed from the most loaded one, ties by host ID.
/// Victims are picked by the selection policy until the host load is projected to be at or below `over`
/// or no candidates are left. Each victim goes to the host with the lowest resulting utilization which stays
/// at or below `over`, ties are broken by the lower growth of power draw and then by host ID. A victim without
/// such host stays where it is and the selection moves on to the remaining VMs.
///
/// Then, if enabled, underloaded hosts (utilization strictly below `under`) are processed from the least
/// loaded one. All VMs of such host are moved to other active hosts, or none of them if some VM has no target.
/// The last active host is never drained.
///
/// A host which is a migration source in the pass is never a target, and a host which received VMs is never
/// drained. VMs which are already migrating are neither selected nor drained.
#[derive(Clone)]
pub struct ThresholdMigrationPolicy {
    thresholds: MigrationThresholds,
    selection: Box<dyn VmSelectionPolicy>,
    consolidate_underloaded: bool,
}

impl ThresholdMigrationPolicy {
    pub fn new(thresholds: MigrationThresholds, selection: Box<dyn VmSelectionPolicy>) -> Self {
        Self {
            thresholds,
            selection,
            consolidate_underloaded: true,
        }
    }

    /// Disables draining of underloaded hosts, only overloaded hosts are relieved.
    pub fn without_consolidation(mut self) -> Self {
        self.consolidate_underloaded = false;
        self
    }

    fn compare_targets(&self, a: &HostInfo, b: &HostInfo, vm: &VmInfo) -> Ordering {
        a.utilization_with(vm)
            .total_cmp(&b.utilization_with(vm))
            .then(a.power_increase_with(vm).total_cmp(&b.power_increase_with(vm)))
            .then(a.id.cmp(&b.id))
    }

    fn find_target(
        &self,
        vm: &VmInfo,
        pool_state: &ResourcePoolState,
        excluded: &BTreeSet<u32>,
        active_only: bool,
    ) -> Option<u32> {
        pool_state
            .hosts()
            .filter(|host| !excluded.contains(&host.id))
            .filter(|host| !active_only || host.is_active())
            .filter(|host| host.can_allocate(vm) == AllocationVerdict::Success)
            .filter(|host| host.utilization_with(vm) <= self.thresholds.over)
            .min_by(|a, b| self.compare_targets(a, b, vm))
            .map(|host| host.id)
    }

    fn relieve_overloaded(
        &self,
        pool: &mut ResourcePoolState,
        plan: &mut MigrationPlan,
        sources: &mut BTreeSet<u32>,
        targets: &mut BTreeSet<u32>,
    ) {
        let mut overloaded = pool
            .hosts()
            .filter(|h| h.utilization() > self.thresholds.over)
            .map(|h| (h.id, h.utilization()))
            .collect::<Vec<_>>();
        overloaded.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        for (host_id, _) in overloaded {
            let Some(host) = pool.get(host_id) else {
                continue;
            };
            let mut candidates = host.vms.iter().filter(|vm| !vm.migrating).cloned().collect::<Vec<_>>();
            let mut excluded = sources.clone();
            excluded.insert(host_id);
            while let Some(host) = pool.get(host_id) {
                if host.utilization() <= self.thresholds.over {
                    break;
                }
                let Some(vm_id) = self.selection.select_vm(host, &candidates) else {
                    break;
                };
                let Some(idx) = candidates.iter().position(|vm| vm.id == vm_id) else {
                    break;
                };
                let vm = candidates.remove(idx);
                // a victim with nowhere to go stays on its host, the next candidate is tried
                let Some(target) = self.find_target(&vm, pool, &excluded, false) else {
                    continue;
                };
                if let Some(host) = pool.get_mut(host_id) {
                    host.remove_vm(vm_id);
                }
                if let Some(target_host) = pool.get_mut(target) {
                    target_host.add_vm(VmInfo { migrating: true, ..vm });
                }
                plan.push(vm_id, host_id, target);
                sources.insert(host_id);
                targets.insert(target);
            }
        }
    }

    fn drain_underloaded(
        &self,
        pool: &mut ResourcePoolState,
        plan: &mut MigrationPlan,
        sources: &mut BTreeSet<u32>,
        targets: &mut BTreeSet<u32>,
    ) {
        let mut underloaded = pool
            .hosts()
            .filter(|h| h.is_active() && h.utilization() < self.thresholds.under)
            .map(|h| (h.id, h.utilization()))
            .collect::<Vec<_>>();
        underloaded.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let mut active_hosts = pool.active_host_count();
        for (host_id, _) in underloaded {
            if active_hosts <= 1 {
                break;
            }
            if sources.contains(&host_id) || targets.contains(&host_id) {
                continue;
            }
            let Some(host) = pool.get(host_id) else {
                continue;
            };
            if host.incoming > 0 || host.vms.is_empty() || host.vms.iter().any(|vm| vm.migrating) {
                continue;
            }

            let mut excluded = sources.clone();
            excluded.insert(host_id);
            let mut tentative = pool.clone();
            let mut moves = Vec::new();
            let mut candidates = host.vms.clone();
            let mut complete = true;
            while let Some(vm_id) = tentative
                .get(host_id)
                .and_then(|h| self.selection.select_vm(h, &candidates))
            {
                candidates.retain(|vm| vm.id != vm_id);
                let Some(vm) = tentative.get_mut(host_id).and_then(|h| h.remove_vm(vm_id)) else {
                    continue;
                };
                match self.find_target(&vm, &tentative, &excluded, true) {
                    Some(target) => {
                        moves.push((vm.id, target));
                        if let Some(target) = tentative.get_mut(target) {
                            target.add_vm(VmInfo { migrating: true, ..vm });
                        }
                    }
                    None => {
                        complete = false;
                        break;
                    }
                }
            }

            if complete && !moves.is_empty() {
                *pool = tentative;
                for (vm_id, target) in moves {
                    plan.push(vm_id, host_id, target);
                    targets.insert(target);
                }
                sources.insert(host_id);
                active_hosts -= 1;
            }
        }
    }
}

impl MigrationPolicy for ThresholdMigrationPolicy {
    fn plan(&self, pool_state: &ResourcePoolState) -> MigrationPlan {
        let mut pool = pool_state.clone();
        let mut plan = MigrationPlan::default();
        let mut sources = BTreeSet::new();
        let mut targets = BTreeSet::new();
        self.relieve_overloaded(&mut pool, &mut plan, &mut sources, &mut targets);
        if self.consolidate_underloaded {
            self.drain_underloaded(&mut pool, &mut plan, &mut sources, &mut targets);
        }
        plan
    }

    fn thresholds(&self) -> MigrationThresholds {
        self.thresholds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::common::Resources;
    use crate::core::vm_selection_policy::{MaximumUtilization, MinimumUtilization};

    fn vm(id: u32, used_mips: f64) -> VmInfo {
        VmInfo {
            id,
            resources: Resources::new(1, 1024, 10, 1000),
            mips: 1000.,
            used_mips,
            migrating: false,
        }
    }

    fn host_with_ram(id: u32, ram: u64, vms: Vec<VmInfo>) -> HostInfo {
        let mut host = HostInfo::new(id, Resources::new(2, ram, 1000, 100000), 1000.);
        for vm in vms {
            host.add_vm(vm);
        }
        host
    }

    fn host(id: u32, vms: Vec<VmInfo>) -> HostInfo {
        host_with_ram(id, 8192, vms)
    }

    fn pool(hosts: Vec<HostInfo>) -> ResourcePoolState {
        let mut pool = ResourcePoolState::new();
        for host in hosts {
            pool.add_host(host);
        }
        pool
    }

    fn policy() -> ThresholdMigrationPolicy {
        ThresholdMigrationPolicy::new(MigrationThresholds::new(0.2, 0.8).unwrap(), Box::new(MinimumUtilization))
    }

    #[test]
    fn thresholds_are_validated() {
        assert!(MigrationThresholds::new(0.2, 0.8).is_ok());
        assert!(MigrationThresholds::new(0., 1.).is_ok());
        assert!(MigrationThresholds::new(0.8, 0.2).is_err());
        assert!(MigrationThresholds::new(0.5, 0.5).is_err());
        assert!(MigrationThresholds::new(-0.1, 0.5).is_err());
        assert!(MigrationThresholds::new(0.1, 1.5).is_err());
    }

    #[test]
    fn least_loaded_vm_leaves_overloaded_host() {
        // host 0 is at 0.9 with VMs contributing 0.5 and 0.4
        let state = pool(vec![host(0, vec![vm(1, 1000.), vm(2, 800.)]), host(1, vec![])]);
        let plan = policy().plan(&state);
        assert_eq!(
            plan.migrations(),
            &[PlannedMigration {
                vm_id: 2,
                source: 0,
                target: 1
            }]
        );
    }

    #[test]
    fn no_migration_at_threshold() {
        let state = pool(vec![
            host(0, vec![vm(1, 800.), vm(2, 800.)]),
            host(1, vec![vm(3, 1000.)]),
        ]);
        assert!(policy().plan(&state).is_empty());
    }

    #[test]
    fn overloaded_host_keeps_vms_without_target() {
        let state = pool(vec![
            host(0, vec![vm(1, 1000.), vm(2, 800.)]),
            host(1, vec![vm(3, 1000.), vm(4, 500.)]),
        ]);
        assert!(policy().plan(&state).is_empty());
    }

    #[test]
    fn next_candidate_is_tried_when_victim_has_no_target() {
        // VM 1 is the least loaded but its memory fits nowhere, so VM 2 leaves instead
        let mut big = vm(1, 400.);
        big.resources.ram = 8192;
        let mut host0 = HostInfo::new(0, Resources::new(4, 16384, 1000, 100000), 1000.);
        for vm in [big, vm(2, 1000.), vm(3, 1000.), vm(4, 1000.)] {
            host0.add_vm(vm);
        }
        let mut host1 = HostInfo::new(1, Resources::new(4, 8192, 1000, 100000), 1000.);
        host1.add_vm(vm(5, 1000.));
        let state = pool(vec![host0, host1]);
        assert!(state.get(0).unwrap().utilization() > 0.8);

        let plan = policy().plan(&state);
        assert_eq!(
            plan.migrations(),
            &[PlannedMigration {
                vm_id: 2,
                source: 0,
                target: 1
            }]
        );
    }

    #[test]
    fn migrating_vms_are_not_selected() {
        let mut busy = vm(1, 1000.);
        busy.migrating = true;
        let state = pool(vec![host(0, vec![busy, vm(2, 800.)]), host(1, vec![])]);
        let policy = ThresholdMigrationPolicy::new(MigrationThresholds::new(0.2, 0.8).unwrap(), Box::new(MaximumUtilization));
        let plan = policy.plan(&state);
        assert_eq!(plan.len(), 1);
        assert!(plan.contains_vm(2));
    }

    #[test]
    fn underloaded_host_is_drained_to_least_loaded_active_host() {
        let state = pool(vec![
            host(0, vec![vm(10, 200.)]),
            host(1, vec![vm(11, 1000.)]),
            host(2, vec![vm(12, 300.)]),
            host(3, vec![]),
        ]);
        let plan = policy().plan(&state);
        // host 2 receives the VM, so it is not drained itself
        assert_eq!(
            plan.migrations(),
            &[PlannedMigration {
                vm_id: 10,
                source: 0,
                target: 2
            }]
        );
        assert!(policy().without_consolidation().plan(&state).is_empty());
    }

    #[test]
    fn last_active_host_is_not_drained() {
        let state = pool(vec![host(0, vec![vm(1, 200.)]), host(1, vec![])]);
        assert!(policy().plan(&state).is_empty());
    }

    #[test]
    fn drain_is_all_or_nothing() {
        // host 1 has memory for only one more VM
        let state = pool(vec![
            host(0, vec![vm(1, 100.), vm(2, 100.)]),
            host_with_ram(1, 2048, vec![vm(3, 1000.)]),
        ]);
        assert!(policy().plan(&state).is_empty());
    }

    #[test]
    fn plan_is_deterministic() {
        let state = pool(vec![
            host(0, vec![vm(1, 1000.), vm(2, 900.)]),
            host(1, vec![vm(3, 1000.), vm(4, 850.)]),
            host(2, vec![]),
            host(3, vec![]),
        ]);
        let first = policy().plan(&state);
        assert_eq!(first, policy().plan(&state));
        // host 0 is more loaded and is processed first
        assert_eq!(first.migrations()[0].source, 0);
        let targets = first.migrations().iter().map(|m| m.target).collect::<Vec<_>>();
        assert_eq!(targets, vec![2, 3]);
    }
}
