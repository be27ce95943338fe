//! Physical host and its processing elements.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use cloudlab_models::power::cpu::CpuPowerModel;

use crate::core::capacity_scheduler::{Capacity, CapacityScheduler, ShareAllocation, ShareRequest};
use crate::core::common::{AllocationVerdict, Resources};
use crate::core::energy_meter::EnergyMeter;
use crate::core::provisioner::ResourceProvisioner;
use crate::core::utilization_history::UtilizationHistory;
use crate::core::vm::VmSpec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PeStatus {
    Free,
    Allocated,
    Failed,
}

/// Processing element (core) with a fixed speed.
#[derive(Clone, Debug, Serialize)]
pub struct Pe {
    pub mips: f64,
    pub status: PeStatus,
}

/// Capability of reporting power draw and consumed energy.
pub trait PowerAware {
    /// Current power draw in watts.
    fn power(&self) -> f64;

    /// Power draw at the given utilization if the host is active.
    fn power_at(&self, utilization: f64) -> f64;

    /// Energy in joules consumed up to `time`.
    fn energy_consumed(&self, time: f64) -> f64;
}

#[derive(Clone)]
struct PowerCapability {
    model: Box<dyn CpuPowerModel>,
    meter: EnergyMeter,
}

/// Physical machine hosting VMs.
///
/// With a time-shared VM scheduler the cores are shared by all resident VMs, so a VM only has to fit
/// by its core count and speed, and the sum of virtual cores may exceed the physical ones. With a space-shared
/// scheduler every VM owns its cores exclusively. Memory, bandwidth and storage are always reserved.
/// A host with no resident VMs is powered off.
#[derive(Clone)]
pub struct Host {
    pub id: u32,
    pub name: String,
    pes: Vec<Pe>,
    pe_owners: BTreeMap<u32, Vec<usize>>,
    vm_pes: BTreeMap<u32, u32>,
    pe_provisioner: ResourceProvisioner,
    ram: ResourceProvisioner,
    bw: ResourceProvisioner,
    storage: ResourceProvisioner,
    vm_scheduler: Box<dyn CapacityScheduler>,
    vms: BTreeSet<u32>,
    incoming: BTreeSet<u32>,
    allocated_mips: BTreeMap<u32, f64>,
    history: UtilizationHistory,
    power: Option<PowerCapability>,
}

impl Host {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        name: &str,
        pes: u32,
        pe_mips: f64,
        ram: u64,
        bw: u64,
        storage: u64,
        vm_scheduler: Box<dyn CapacityScheduler>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            pes: (0..pes)
                .map(|_| Pe {
                    mips: pe_mips,
                    status: PeStatus::Free,
                })
                .collect(),
            pe_owners: BTreeMap::new(),
            vm_pes: BTreeMap::new(),
            pe_provisioner: ResourceProvisioner::new(pes as u64),
            ram: ResourceProvisioner::new(ram),
            bw: ResourceProvisioner::new(bw),
            storage: ResourceProvisioner::new(storage),
            vm_scheduler,
            vms: BTreeSet::new(),
            incoming: BTreeSet::new(),
            allocated_mips: BTreeMap::new(),
            history: UtilizationHistory::new(1),
            power: None,
        }
    }

    pub fn with_power_model(mut self, model: Box<dyn CpuPowerModel>) -> Self {
        self.power = Some(PowerCapability {
            model,
            meter: EnergyMeter::new(),
        });
        self
    }

    pub fn with_utilization_window(mut self, window: usize) -> Self {
        self.history = UtilizationHistory::new(window);
        self
    }

    pub fn pes(&self) -> &[Pe] {
        &self.pes
    }

    /// Speed of a single core.
    pub fn pe_mips(&self) -> f64 {
        self.pes.first().map_or(0., |pe| pe.mips)
    }

    pub fn working_pes(&self) -> u32 {
        self.pes.iter().filter(|pe| pe.status != PeStatus::Failed).count() as u32
    }

    /// Processing capacity of working cores.
    pub fn capacity(&self) -> Capacity {
        Capacity::new(self.working_pes(), self.pe_mips())
    }

    pub fn total_mips(&self) -> f64 {
        self.capacity().total_mips()
    }

    pub fn total_resources(&self) -> Resources {
        Resources::new(
            self.pe_provisioner.capacity() as u32,
            self.ram.capacity(),
            self.bw.capacity(),
            self.storage.capacity(),
        )
    }

    /// Returns `true` if resident VMs share cores instead of owning them.
    pub fn shares_cores(&self) -> bool {
        self.vm_scheduler.shares_cores()
    }

    /// Number of virtual cores of resident VMs.
    pub fn committed_pes(&self) -> u32 {
        self.vm_pes.values().sum()
    }

    /// Free resources, cores of a core-sharing host are free while not committed to any VM.
    pub fn free_resources(&self) -> Resources {
        let free_pes = if self.shares_cores() {
            self.working_pes().saturating_sub(self.committed_pes())
        } else {
            self.pe_provisioner.available() as u32
        };
        Resources::new(
            free_pes,
            self.ram.available(),
            self.bw.available(),
            self.storage.available(),
        )
    }

    /// Marks a free core as failed, it is excluded from the host capacity from now on.
    pub fn fail_pe(&mut self) -> bool {
        let Some(idx) = self.pes.iter().position(|pe| pe.status == PeStatus::Free) else {
            return false;
        };
        if !self.pe_provisioner.shrink(1) {
            return false;
        }
        self.pes[idx].status = PeStatus::Failed;
        true
    }

    pub fn can_allocate(&self, vm: &VmSpec) -> AllocationVerdict {
        if vm.mips > self.pe_mips() {
            return AllocationVerdict::NotEnoughMips;
        }
        let mut free = self.free_resources();
        if self.shares_cores() {
            free.pes = self.working_pes();
        }
        free.check_fits(&vm.resources())
    }

    /// Reserves memory, bandwidth, storage and, unless cores are shared, cores for the VM.
    /// Either everything is reserved or nothing.
    pub fn allocate(&mut self, vm: &VmSpec) -> AllocationVerdict {
        let verdict = self.can_allocate(vm);
        if verdict != AllocationVerdict::Success {
            return verdict;
        }
        let consumer = vm.id as u64;
        self.ram.allocate(consumer, vm.ram);
        self.bw.allocate(consumer, vm.bw);
        self.storage.allocate(consumer, vm.size);
        if !self.shares_cores() {
            self.pe_provisioner.allocate(consumer, vm.pes as u64);
            let owned = self
                .pes
                .iter_mut()
                .enumerate()
                .filter(|(_, pe)| pe.status == PeStatus::Free)
                .take(vm.pes as usize)
                .map(|(idx, pe)| {
                    pe.status = PeStatus::Allocated;
                    idx
                })
                .collect();
            self.pe_owners.insert(vm.id, owned);
        }
        self.vm_pes.insert(vm.id, vm.pes);
        self.vms.insert(vm.id);
        AllocationVerdict::Success
    }

    /// Releases all VM resources, returns `false` if the VM is not resident.
    pub fn release(&mut self, vm_id: u32) -> bool {
        if !self.vms.remove(&vm_id) {
            return false;
        }
        let consumer = vm_id as u64;
        self.pe_provisioner.deallocate(consumer);
        self.ram.deallocate(consumer);
        self.bw.deallocate(consumer);
        self.storage.deallocate(consumer);
        for idx in self.pe_owners.remove(&vm_id).unwrap_or_default() {
            if self.pes[idx].status == PeStatus::Allocated {
                self.pes[idx].status = PeStatus::Free;
            }
        }
        self.vm_pes.remove(&vm_id);
        self.allocated_mips.remove(&vm_id);
        true
    }

    pub fn vms(&self) -> &BTreeSet<u32> {
        &self.vms
    }

    pub fn has_vm(&self, vm_id: u32) -> bool {
        self.vms.contains(&vm_id)
    }

    /// A host is active while it runs at least one VM.
    pub fn is_active(&self) -> bool {
        !self.vms.is_empty()
    }

    /// VMs being migrated to this host.
    pub fn incoming(&self) -> &BTreeSet<u32> {
        &self.incoming
    }

    pub(crate) fn add_incoming(&mut self, vm_id: u32) {
        self.incoming.insert(vm_id);
    }

    pub(crate) fn remove_incoming(&mut self, vm_id: u32) {
        self.incoming.remove(&vm_id);
    }

    /// Shares host processing capacity between resident VMs.
    pub fn share(&mut self, requests: &[ShareRequest]) -> Vec<ShareAllocation> {
        let allocations = self.vm_scheduler.share(self.capacity(), requests);
        self.allocated_mips = allocations.iter().map(|a| (a.id as u32, a.mips)).collect();
        allocations
    }

    pub fn allocated_mips(&self) -> f64 {
        self.allocated_mips.values().sum()
    }

    pub fn allocated_mips_for(&self, vm_id: u32) -> f64 {
        self.allocated_mips.get(&vm_id).copied().unwrap_or(0.)
    }

    /// Utilization after the last share, before smoothing.
    pub fn instant_utilization(&self) -> f64 {
        let total = self.total_mips();
        if total > 0. {
            (self.allocated_mips() / total).min(1.)
        } else {
            0.
        }
    }

    /// Appends a utilization sample and updates the energy meter.
    pub fn record_utilization(&mut self, time: f64) {
        let utilization = self.instant_utilization();
        self.history.record(time, utilization);
        let power = self.power();
        if let Some(power_capability) = self.power.as_mut() {
            power_capability.meter.update(time, power);
        }
    }

    pub fn history(&self) -> &UtilizationHistory {
        &self.history
    }

    /// Current (smoothed) utilization used by threshold checks.
    pub fn utilization(&self) -> f64 {
        self.history.current()
    }

    pub fn power_model(&self) -> Option<&(dyn CpuPowerModel + 'static)> {
        self.power.as_ref().map(|p| p.model.as_ref())
    }

    pub fn vm_scheduler_name(&self) -> &'static str {
        self.vm_scheduler.name()
    }
}

impl PowerAware for Host {
    fn power(&self) -> f64 {
        if self.is_active() {
            self.power_at(self.instant_utilization())
        } else {
            0.
        }
    }

    fn power_at(&self, utilization: f64) -> f64 {
        self.power.as_ref().map_or(0., |p| p.model.get_power(utilization))
    }

    fn energy_consumed(&self, time: f64) -> f64 {
        self.power.as_ref().map_or(0., |p| p.meter.energy_consumed(time))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use cloudlab_models::power::cpu_models::linear::LinearCpuPowerModel;

    use super::*;
    use crate::core::capacity_scheduler::{SpaceSharedScheduler, TimeSharedScheduler};

    fn host() -> Host {
        Host::new(0, "h0", 2, 1000., 4096, 1000, 100000, Box::new(TimeSharedScheduler::new()))
    }

    fn space_shared_host() -> Host {
        Host::new(0, "h0", 2, 1000., 4096, 1000, 100000, Box::new(SpaceSharedScheduler::new()))
    }

    #[test]
    fn allocate_and_release_round_trip() {
        let mut host = space_shared_host();
        let before = host.free_resources();
        let vm = VmSpec::new(1, 2, 1000., 1024, 100, 2000);
        assert_eq!(host.allocate(&vm), AllocationVerdict::Success);
        assert_eq!(host.free_resources(), Resources::new(0, 3072, 900, 98000));
        assert!(host.pes().iter().all(|pe| pe.status == PeStatus::Allocated));
        assert!(host.release(1));
        assert!(!host.release(1));
        assert_eq!(host.free_resources(), before);
        assert!(host.pes().iter().all(|pe| pe.status == PeStatus::Free));
    }

    #[test]
    fn time_shared_host_shares_cores_between_vms() {
        let mut host = host();
        assert!(host.shares_cores());
        for id in 0..3 {
            assert_eq!(host.allocate(&VmSpec::new(id, 1, 1000., 512, 10, 100)), AllocationVerdict::Success);
        }
        assert_eq!(host.committed_pes(), 3);
        assert_eq!(host.free_resources(), Resources::new(0, 2560, 970, 99700));
        assert!(host.pes().iter().all(|pe| pe.status == PeStatus::Free));
        assert_eq!(
            host.can_allocate(&VmSpec::new(3, 3, 1000., 512, 10, 100)),
            AllocationVerdict::NotEnoughPes
        );

        let requests = (0..3).map(|id| ShareRequest::new(id, 1, 1000.)).collect::<Vec<_>>();
        host.share(&requests);
        for id in 0..3 {
            assert_relative_eq!(host.allocated_mips_for(id), 2000. / 3., epsilon = 1e-9);
        }
        assert_relative_eq!(host.instant_utilization(), 1., epsilon = 1e-9);

        assert!(host.release(1));
        assert_eq!(host.committed_pes(), 2);
        assert_eq!(host.free_resources().pes, 0);
        assert!(host.release(0));
        assert_eq!(host.free_resources().pes, 1);
    }

    #[test]
    fn space_shared_host_reserves_cores() {
        let mut host = space_shared_host();
        assert!(!host.shares_cores());
        assert_eq!(host.allocate(&VmSpec::new(0, 1, 1000., 512, 10, 100)), AllocationVerdict::Success);
        assert_eq!(host.allocate(&VmSpec::new(1, 1, 1000., 512, 10, 100)), AllocationVerdict::Success);
        assert_eq!(
            host.allocate(&VmSpec::new(2, 1, 1000., 512, 10, 100)),
            AllocationVerdict::NotEnoughPes
        );
        assert!(!host.fail_pe());
        assert!(host.release(0));
        assert!(host.fail_pe());
        assert_eq!(
            host.can_allocate(&VmSpec::new(2, 1, 1000., 512, 10, 100)),
            AllocationVerdict::NotEnoughPes
        );
    }

    #[test]
    fn refusals_name_missing_resource() {
        let mut host = host();
        assert_eq!(
            host.can_allocate(&VmSpec::new(1, 4, 1000., 512, 10, 10)),
            AllocationVerdict::NotEnoughPes
        );
        assert_eq!(
            host.can_allocate(&VmSpec::new(1, 1, 2500., 512, 10, 10)),
            AllocationVerdict::NotEnoughMips
        );
        assert_eq!(
            host.allocate(&VmSpec::new(1, 1, 1000., 8192, 10, 10)),
            AllocationVerdict::NotEnoughRam
        );
        assert_eq!(host.free_resources(), host.total_resources());
    }

    #[test]
    fn failed_pe_reduces_capacity() {
        let mut host = host();
        assert!(host.fail_pe());
        assert_eq!(host.working_pes(), 1);
        assert_relative_eq!(host.total_mips(), 1000.);
        assert_eq!(
            host.can_allocate(&VmSpec::new(1, 2, 1000., 512, 10, 10)),
            AllocationVerdict::NotEnoughPes
        );
        assert!(host.fail_pe());
        assert_eq!(host.working_pes(), 0);
        assert!(!host.fail_pe());
    }

    #[test]
    fn inactive_host_draws_no_power() {
        let mut host = host().with_power_model(Box::new(LinearCpuPowerModel::new(100., 200.)));
        host.record_utilization(0.);
        assert_eq!(host.power(), 0.);
        host.allocate(&VmSpec::new(1, 1, 1000., 512, 10, 10));
        host.share(&[ShareRequest::new(1, 1, 1000.)]);
        host.record_utilization(10.);
        assert_relative_eq!(host.utilization(), 0.5);
        assert_relative_eq!(host.power(), 150.);
        host.release(1);
        host.share(&[]);
        host.record_utilization(20.);
        assert_relative_eq!(host.energy_consumed(30.), 1500.);
    }
}
