//! Resource pool state.
//!
//! A lightweight copy of host capacities and loads which placement and migration algorithms work on.
//! Algorithms apply hypothetical changes to it (projections) without touching the real hosts.

use std::collections::BTreeMap;

use cloudlab_models::power::cpu::CpuPowerModel;

use crate::core::common::{AllocationVerdict, Resources};
use crate::core::host::Host;
use crate::core::vm::{Migratable, MigrationState, Vm, VmSpec};

/// VM requirements and its current processing load.
#[derive(Clone, Debug, PartialEq)]
pub struct VmInfo {
    pub id: u32,
    pub resources: Resources,
    /// Requested speed of each virtual core.
    pub mips: f64,
    /// MIPS the VM uses (or is expected to use, for a new VM).
    pub used_mips: f64,
    pub migrating: bool,
}

impl VmInfo {
    /// Describes a VM which is not placed yet, assuming it will use its full capacity.
    pub fn from_spec(spec: &VmSpec) -> Self {
        Self {
            id: spec.id,
            resources: spec.resources(),
            mips: spec.mips,
            used_mips: spec.total_mips(),
            migrating: false,
        }
    }

    pub fn from_vm(vm: &Vm) -> Self {
        Self {
            id: vm.id(),
            resources: vm.spec().resources(),
            mips: vm.spec().mips,
            used_mips: vm.allocated_mips(),
            migrating: vm.is_migrating(),
        }
    }

    pub fn ram(&self) -> u64 {
        self.resources.ram
    }
}

/// Stores host properties (resource capacity) and state (available resources, load, resident VMs).
#[derive(Clone)]
pub struct HostInfo {
    pub id: u32,
    pub total: Resources,
    pub free: Resources,
    pub pe_mips: f64,
    pub total_mips: f64,
    pub used_mips: f64,
    pub vms: Vec<VmInfo>,
    /// Number of VMs being migrated to the host.
    pub incoming: usize,
    /// Resident VMs share cores, see [`Host`].
    pub shares_cores: bool,
    /// Virtual cores of resident and incoming VMs.
    pub committed_pes: u32,
    power_model: Option<Box<dyn CpuPowerModel>>,
}

impl HostInfo {
    pub fn new(id: u32, total: Resources, pe_mips: f64) -> Self {
        Self {
            id,
            total,
            free: total,
            pe_mips,
            total_mips: total.pes as f64 * pe_mips,
            used_mips: 0.,
            vms: Vec::new(),
            incoming: 0,
            shares_cores: false,
            committed_pes: 0,
            power_model: None,
        }
    }

    pub fn with_shared_cores(mut self) -> Self {
        self.shares_cores = true;
        self
    }

    pub fn with_power_model(mut self, model: Box<dyn CpuPowerModel>) -> Self {
        self.power_model = Some(model);
        self
    }

    pub fn utilization(&self) -> f64 {
        if self.total_mips > 0. {
            self.used_mips / self.total_mips
        } else {
            0.
        }
    }

    /// Projected utilization after adding the VM.
    pub fn utilization_with(&self, vm: &VmInfo) -> f64 {
        if self.total_mips > 0. {
            (self.used_mips + vm.used_mips) / self.total_mips
        } else {
            f64::INFINITY
        }
    }

    /// Fraction of cores which stay free after adding the VM.
    pub fn remaining_pes_fraction_with(&self, vm: &VmInfo) -> f64 {
        if self.total.pes == 0 {
            return 0.;
        }
        self.free.pes.saturating_sub(vm.resources.pes) as f64 / self.total.pes as f64
    }

    /// A host is active while it runs or receives VMs.
    pub fn is_active(&self) -> bool {
        !self.vms.is_empty() || self.incoming > 0
    }

    pub fn can_allocate(&self, vm: &VmInfo) -> AllocationVerdict {
        if vm.mips > self.pe_mips {
            return AllocationVerdict::NotEnoughMips;
        }
        let mut free = self.free;
        if self.shares_cores {
            free.pes = self.total.pes;
        }
        free.check_fits(&vm.resources)
    }

    fn reserve(&mut self, vm: &VmInfo) {
        self.free = self.free.saturating_sub(&vm.resources);
        self.committed_pes += vm.resources.pes;
        if self.shares_cores {
            self.free.pes = self.total.pes.saturating_sub(self.committed_pes);
        }
        self.used_mips += vm.used_mips;
    }

    fn unreserve(&mut self, vm: &VmInfo) {
        self.free = self.free.add(&vm.resources);
        self.committed_pes = self.committed_pes.saturating_sub(vm.resources.pes);
        if self.shares_cores {
            self.free.pes = self.total.pes.saturating_sub(self.committed_pes);
        }
        self.used_mips = (self.used_mips - vm.used_mips).max(0.);
    }

    pub fn add_vm(&mut self, vm: VmInfo) {
        self.reserve(&vm);
        self.vms.push(vm);
    }

    pub fn remove_vm(&mut self, vm_id: u32) -> Option<VmInfo> {
        let idx = self.vms.iter().position(|vm| vm.id == vm_id)?;
        let vm = self.vms.remove(idx);
        self.unreserve(&vm);
        Some(vm)
    }

    pub fn power_at(&self, utilization: f64) -> f64 {
        self.power_model.as_ref().map_or(0., |m| m.get_power(utilization))
    }

    /// Growth of the host power draw caused by adding the VM. Waking up an inactive host costs its idle power.
    pub fn power_increase_with(&self, vm: &VmInfo) -> f64 {
        let before = if self.is_active() {
            self.power_at(self.utilization())
        } else {
            0.
        };
        self.power_at(self.utilization_with(vm)) - before
    }
}

#[derive(Clone, Default)]
pub struct ResourcePoolState {
    hosts: BTreeMap<u32, HostInfo>,
}

impl ResourcePoolState {
    /// Creates empty resource pool state.
    pub fn new() -> Self {
        Default::default()
    }

    /// Captures the state of datacenter hosts.
    ///
    /// Host load is taken from the utilization history, so it matches the threshold checks. With `with_incoming`
    /// the VMs which are being migrated are also accounted on their target hosts.
    pub fn capture(hosts: &BTreeMap<u32, Host>, vms: &BTreeMap<u32, Vm>, with_incoming: bool) -> Self {
        let mut pool = Self::new();
        for host in hosts.values() {
            let mut info = HostInfo::new(host.id, host.total_resources(), host.pe_mips());
            info.total_mips = host.total_mips();
            info.free = host.free_resources();
            info.used_mips = host.utilization() * info.total_mips;
            info.shares_cores = host.shares_cores();
            info.committed_pes = host.committed_pes();
            if let Some(model) = host.power_model() {
                info.power_model = Some(dyn_clone::clone_box(model));
            }
            info.vms = host
                .vms()
                .iter()
                .filter_map(|id| vms.get(id))
                .map(VmInfo::from_vm)
                .collect();
            if with_incoming {
                let incoming = host
                    .incoming()
                    .iter()
                    .filter_map(|id| vms.get(id))
                    .filter(|vm| vm.migration_state(host.id) == MigrationState::MigratingIn)
                    .map(VmInfo::from_vm)
                    .collect::<Vec<_>>();
                for vm in incoming {
                    info.reserve(&vm);
                    info.incoming += 1;
                }
            }
            pool.add_host(info);
        }
        pool
    }

    pub fn add_host(&mut self, host: HostInfo) {
        self.hosts.insert(host.id, host);
    }

    /// Returns IDs of all hosts in ascending order.
    pub fn host_ids(&self) -> Vec<u32> {
        self.hosts.keys().cloned().collect()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostInfo> {
        self.hosts.values()
    }

    pub fn get(&self, host_id: u32) -> Option<&HostInfo> {
        self.hosts.get(&host_id)
    }

    pub fn get_mut(&mut self, host_id: u32) -> Option<&mut HostInfo> {
        self.hosts.get_mut(&host_id)
    }

    pub fn can_allocate(&self, vm: &VmInfo, host_id: u32) -> AllocationVerdict {
        match self.hosts.get(&host_id) {
            Some(host) => host.can_allocate(vm),
            None => AllocationVerdict::HostNotFound,
        }
    }

    pub fn active_host_count(&self) -> usize {
        self.hosts.values().filter(|h| h.is_active()).count()
    }
}
