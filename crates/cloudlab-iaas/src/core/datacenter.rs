//! Datacenter component: hosts, resident VMs, cloudlet processing and VM migrations.

use std::collections::BTreeMap;

use serde::Serialize;

use cloudlab_core::{cast, log_debug, log_info, log_warn};
use cloudlab_core::{Event, EventHandler, EventId, Id, SimulationContext};

use crate::core::allocation_policy::VmAllocationPolicy;
use crate::core::capacity_scheduler::Schedulable;
use crate::core::cloudlet::{Cloudlet, CloudletStatus};
use crate::core::common::AllocationVerdict;
use crate::core::config::SimulationConfig;
use crate::core::events::cloudlet::{
    CloudletCancel, CloudletFinishRequest, CloudletPause, CloudletResume, CloudletReturn, CloudletSubmit,
};
use crate::core::events::processing::{MigrationCompleted, PerformMigrations, UpdateProcessing};
use crate::core::events::vm::{
    VmCreateAck, VmCreateRequest, VmDestroyRequest, VmDestroyed, VmMigrationFinished, VmMigrationStarted,
};
use crate::core::host::{Host, PowerAware};
use crate::core::migration_policy::PlannedMigration;
use crate::core::provisioner::ResourceProvisioner;
use crate::core::resource_pool::ResourcePoolState;
use crate::core::vm::{Migratable, Migration, MigrationOutcome, Vm, VmSpec};

/// Processing updates are never scheduled closer than this, so the clock always moves forward.
const MIN_UPDATE_DELAY: f64 = 1e-6;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DatacenterStats {
    pub vm_placements: u64,
    pub vm_placement_refusals: u64,
    pub vms_destroyed: u64,
    pub migrations_started: u64,
    pub migrations_completed: u64,
    /// Migrations which found no room on the target host at completion.
    pub migrations_failed: u64,
    /// Migrations interrupted by VM destruction.
    pub migrations_cancelled: u64,
    /// Planned migrations not started because the migration bandwidth pool was exhausted.
    pub migrations_deferred: u64,
    pub cloudlets_finished: u64,
    pub cloudlets_failed: u64,
}

/// Owns the hosts and the VMs running on them.
///
/// Every event is processed in three steps: cloudlet execution is advanced up to the current time,
/// the event is applied, and then host and VM capacity shares are recomputed.
pub struct Datacenter {
    hosts: BTreeMap<u32, Host>,
    vms: BTreeMap<u32, Vm>,
    policy: VmAllocationPolicy,
    migration_bandwidth: ResourceProvisioner,
    bandwidth_per_migration: u64,
    scheduling_interval: f64,
    message_delay: f64,
    next_update: Option<EventId>,
    migration_tick: Option<EventId>,
    stats: DatacenterStats,
    ctx: SimulationContext,
}

impl Datacenter {
    pub fn new(policy: VmAllocationPolicy, config: &SimulationConfig, ctx: SimulationContext) -> Self {
        Self {
            hosts: BTreeMap::new(),
            vms: BTreeMap::new(),
            policy,
            migration_bandwidth: ResourceProvisioner::new(config.migration.bandwidth_pool),
            bandwidth_per_migration: config.migration.bandwidth,
            scheduling_interval: config.scheduling_interval,
            message_delay: config.message_delay,
            next_update: None,
            migration_tick: None,
            stats: DatacenterStats::default(),
            ctx,
        }
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    /// Adds a host and returns its ID. Hosts get sequential IDs starting from 0.
    pub fn add_host(&mut self, mut host: Host) -> u32 {
        let id = self.hosts.keys().next_back().map_or(0, |id| id + 1);
        host.id = id;
        log_debug!(self.ctx, "added host #{} ({}) with {} MIPS", id, host.name, host.total_mips());
        self.hosts.insert(id, host);
        id
    }

    pub fn hosts(&self) -> &BTreeMap<u32, Host> {
        &self.hosts
    }

    pub fn host(&self, host_id: u32) -> Option<&Host> {
        self.hosts.get(&host_id)
    }

    pub fn vms(&self) -> &BTreeMap<u32, Vm> {
        &self.vms
    }

    pub fn vm(&self, vm_id: u32) -> Option<&Vm> {
        self.vms.get(&vm_id)
    }

    pub fn stats(&self) -> &DatacenterStats {
        &self.stats
    }

    /// Total energy consumed by all hosts up to the current time.
    pub fn energy_consumed(&self) -> f64 {
        let time = self.ctx.time();
        self.hosts.values().map(|h| h.energy_consumed(time)).sum()
    }

    pub fn allocation_policy(&self) -> &VmAllocationPolicy {
        &self.policy
    }

    /// Migration bandwidth not reserved by running migrations.
    pub fn migration_bandwidth_available(&self) -> u64 {
        self.migration_bandwidth.available()
    }

    // PROCESSING //////////////////////////////////////////////////////////////////////////////////

    fn advance_cloudlets(&mut self) {
        let time = self.ctx.time();
        let mut finished = Vec::new();
        for vm in self.vms.values_mut() {
            for mut cloudlet in vm.cloudlets.advance(time) {
                cloudlet.host_id = Some(vm.host());
                finished.push((vm.broker(), cloudlet));
            }
        }
        for (broker, cloudlet) in finished {
            self.return_cloudlet(cloudlet, broker);
        }
    }

    /// Recomputes capacity shares of all hosts and VMs, records host utilization
    /// and schedules the next processing update at the earliest cloudlet completion.
    fn recompute(&mut self) {
        let time = self.ctx.time();
        let mut next_completion: Option<f64> = None;
        for host in self.hosts.values_mut() {
            let requests = host
                .vms()
                .iter()
                .filter_map(|id| self.vms.get(id))
                .map(|vm| vm.share_request(time, host.pe_mips()))
                .collect::<Vec<_>>();
            for allocation in host.share(&requests) {
                if let Some(vm) = self.vms.get_mut(&(allocation.id as u32)) {
                    vm.set_allocated_mips(allocation.mips);
                    vm.cloudlets.reshare(time, allocation.mips);
                    if let Some(delay) = vm.cloudlets.next_completion() {
                        next_completion = Some(next_completion.map_or(delay, |d| d.min(delay)));
                    }
                }
            }
            host.record_utilization(time);
        }

        if let Some(event_id) = self.next_update.take() {
            self.ctx.cancel_event(event_id);
        }
        if let Some(delay) = next_completion {
            self.next_update = Some(self.ctx.emit_self(UpdateProcessing {}, delay.max(MIN_UPDATE_DELAY)));
        }
    }

    fn return_cloudlet(&mut self, cloudlet: Cloudlet, broker: Id) {
        match cloudlet.status() {
            CloudletStatus::Finished => self.stats.cloudlets_finished += 1,
            _ => self.stats.cloudlets_failed += 1,
        }
        log_debug!(
            self.ctx,
            "cloudlet #{} on vm #{} is {}",
            cloudlet.id,
            cloudlet.vm_id.map_or("-".to_string(), |id| id.to_string()),
            cloudlet.status()
        );
        self.ctx.emit(CloudletReturn { cloudlet }, broker, self.message_delay);
    }

    fn ensure_migration_tick(&mut self) {
        if self.migration_tick.is_none() && !self.vms.is_empty() {
            self.migration_tick = Some(self.ctx.emit_self(PerformMigrations {}, self.scheduling_interval));
        }
    }

    fn stop_migration_tick_if_idle(&mut self) {
        if self.vms.is_empty() {
            if let Some(event_id) = self.migration_tick.take() {
                self.ctx.cancel_event(event_id);
            }
        }
    }

    // VM LIFECYCLE ////////////////////////////////////////////////////////////////////////////////

    fn on_vm_create_request(&mut self, spec: VmSpec, broker: Id) {
        self.advance_cloudlets();
        let vm_id = spec.id;
        if self.vms.contains_key(&vm_id) {
            log_warn!(self.ctx, "vm #{} already exists, request ignored", vm_id);
            return;
        }
        let pool_state = ResourcePoolState::capture(&self.hosts, &self.vms, false);
        let placement = self.policy.find_host_for_vm(&spec, &pool_state);
        let verdict = match placement {
            Some(host_id) => self
                .hosts
                .get_mut(&host_id)
                .map_or(AllocationVerdict::HostNotFound, |host| host.allocate(&spec)),
            // report why the first host refused the VM
            None => self
                .hosts
                .values()
                .map(|host| host.can_allocate(&spec))
                .find(|verdict| *verdict != AllocationVerdict::Success)
                .unwrap_or(AllocationVerdict::HostNotFound),
        };

        let host_id = match (placement, verdict) {
            (Some(host_id), AllocationVerdict::Success) => {
                self.stats.vm_placements += 1;
                log_debug!(self.ctx, "vm #{} allocated on host #{}", vm_id, host_id);
                self.vms.insert(vm_id, Vm::new(spec, broker, host_id, self.ctx.time()));
                self.ensure_migration_tick();
                Some(host_id)
            }
            _ => {
                self.stats.vm_placement_refusals += 1;
                log_debug!(self.ctx, "no host for vm #{}: {:?}", vm_id, verdict);
                None
            }
        };
        self.ctx.emit(
            VmCreateAck {
                vm_id,
                host_id,
                verdict,
            },
            broker,
            self.message_delay,
        );
        self.recompute();
    }

    fn on_vm_destroy_request(&mut self, vm_id: u32) {
        self.advance_cloudlets();
        let Some(mut vm) = self.vms.remove(&vm_id) else {
            log_warn!(self.ctx, "cannot destroy vm #{}: not found", vm_id);
            return;
        };
        let time = self.ctx.time();
        if let Some(migration) = vm.finish_migration() {
            self.ctx.cancel_event(migration.completion_event);
            self.migration_bandwidth.deallocate(vm_id as u64);
            if let Some(target) = self.hosts.get_mut(&migration.target) {
                target.remove_incoming(vm_id);
            }
            self.stats.migrations_cancelled += 1;
            log_debug!(self.ctx, "migration of vm #{} cancelled", vm_id);
            self.ctx.emit(
                VmMigrationFinished {
                    vm_id,
                    host_id: vm.host(),
                    outcome: MigrationOutcome::Cancelled,
                },
                vm.broker(),
                self.message_delay,
            );
        }
        if let Some(host) = self.hosts.get_mut(&vm.host()) {
            host.release(vm_id);
        }
        for mut cloudlet in vm.cloudlets.drain(CloudletStatus::Failed, time) {
            cloudlet.host_id = Some(vm.host());
            self.return_cloudlet(cloudlet, vm.broker());
        }
        self.stats.vms_destroyed += 1;
        log_debug!(self.ctx, "vm #{} destroyed on host #{}", vm_id, vm.host());
        self.ctx.emit(VmDestroyed { vm_id }, vm.broker(), self.message_delay);
        self.recompute();
        self.stop_migration_tick_if_idle();
    }

    // CLOUDLETS ///////////////////////////////////////////////////////////////////////////////////

    fn on_cloudlet_submit(&mut self, mut cloudlet: Cloudlet, broker: Id) {
        self.advance_cloudlets();
        let time = self.ctx.time();
        match cloudlet.vm_id.and_then(|id| self.vms.get_mut(&id)) {
            Some(vm) => {
                cloudlet.host_id = Some(vm.host());
                log_debug!(self.ctx, "cloudlet #{} submitted to vm #{}", cloudlet.id, vm.id());
                vm.cloudlets.submit(cloudlet, time);
            }
            None => {
                log_warn!(self.ctx, "cloudlet #{} is bound to a missing vm", cloudlet.id);
                cloudlet.mark_done(CloudletStatus::Failed, time);
                self.return_cloudlet(cloudlet, broker);
            }
        }
        self.recompute();
    }

    fn on_cloudlet_finish_request(&mut self, cloudlet_id: u64, vm_id: u32, fail: bool) {
        self.advance_cloudlets();
        let time = self.ctx.time();
        let returned = self.vms.get_mut(&vm_id).and_then(|vm| {
            let cloudlet = if fail {
                vm.cloudlets.fail(cloudlet_id, time)
            } else {
                vm.cloudlets.finish(cloudlet_id, time)
            };
            cloudlet.map(|mut c| {
                c.host_id = Some(vm.host());
                (c, vm.broker())
            })
        });
        match returned {
            Some((cloudlet, broker)) => self.return_cloudlet(cloudlet, broker),
            // the cloudlet could have completed on its own before the request arrived
            None => log_debug!(self.ctx, "cloudlet #{} is not running on vm #{}", cloudlet_id, vm_id),
        }
        self.recompute();
    }

    fn on_cloudlet_pause(&mut self, cloudlet_id: u64, vm_id: u32, pause: bool) {
        self.advance_cloudlets();
        let changed = self.vms.get_mut(&vm_id).map_or(false, |vm| {
            if pause {
                vm.cloudlets.pause(cloudlet_id)
            } else {
                vm.cloudlets.resume(cloudlet_id)
            }
        });
        if !changed {
            log_debug!(self.ctx, "cannot change state of cloudlet #{} on vm #{}", cloudlet_id, vm_id);
        }
        self.recompute();
    }

    fn on_update_processing(&mut self) {
        self.next_update = None;
        self.advance_cloudlets();
        self.recompute();
    }

    // MIGRATIONS //////////////////////////////////////////////////////////////////////////////////

    fn on_perform_migrations(&mut self) {
        self.migration_tick = None;
        self.advance_cloudlets();
        self.recompute();
        if let Some(thresholds) = self.policy.migration_thresholds() {
            let overloaded = self
                .hosts
                .values()
                .filter(|h| h.history().is_over_utilized(thresholds.over()))
                .count();
            let underloaded = self
                .hosts
                .values()
                .filter(|h| h.is_active() && h.history().is_under_utilized(thresholds.under()))
                .count();
            if overloaded + underloaded > 0 {
                log_debug!(
                    self.ctx,
                    "{} overloaded and {} underloaded hosts",
                    overloaded,
                    underloaded
                );
                let pool_state = ResourcePoolState::capture(&self.hosts, &self.vms, true);
                let plan = self.policy.plan_migrations(&pool_state);
                if !plan.is_empty() {
                    log_debug!(self.ctx, "migration plan with {} migrations", plan.len());
                }
                for migration in plan {
                    self.start_migration(migration);
                }
            }
        }
        self.ensure_migration_tick();
    }

    fn start_migration(&mut self, planned: PlannedMigration) {
        let PlannedMigration { vm_id, source, target } = planned;
        if !self.hosts.contains_key(&target) {
            return;
        }
        let Some(vm) = self.vms.get(&vm_id) else {
            return;
        };
        if vm.is_migrating() || vm.host() != source {
            return;
        }
        let bandwidth = self.bandwidth_per_migration.min(self.migration_bandwidth.available());
        if bandwidth == 0 {
            self.stats.migrations_deferred += 1;
            log_debug!(self.ctx, "no migration bandwidth left for vm #{}", vm_id);
            return;
        }
        self.migration_bandwidth.allocate(vm_id as u64, bandwidth);
        let duration = vm.migration_size() as f64 / bandwidth as f64;
        let broker = vm.broker();
        let completion_event = self.ctx.emit_self(MigrationCompleted { vm_id, source, target }, duration);
        if let Some(vm) = self.vms.get_mut(&vm_id) {
            vm.start_migration(Migration {
                source,
                target,
                started_at: self.ctx.time(),
                bandwidth,
                completion_event,
            });
        }
        if let Some(host) = self.hosts.get_mut(&target) {
            host.add_incoming(vm_id);
        }
        self.stats.migrations_started += 1;
        log_info!(
            self.ctx,
            "vm #{} migration started: host #{} -> host #{}, duration {:.3}",
            vm_id,
            source,
            target,
            duration
        );
        self.ctx
            .emit(VmMigrationStarted { vm_id, source, target }, broker, self.message_delay);
    }

    fn on_migration_completed(&mut self, vm_id: u32, source: u32, target: u32) {
        self.advance_cloudlets();
        self.migration_bandwidth.deallocate(vm_id as u64);
        if let Some(host) = self.hosts.get_mut(&target) {
            host.remove_incoming(vm_id);
        }
        let Some(vm) = self.vms.get_mut(&vm_id) else {
            return;
        };
        vm.finish_migration();
        let broker = vm.broker();
        let verdict = match self.hosts.get_mut(&target) {
            Some(host) => host.allocate(vm.spec()),
            None => AllocationVerdict::HostNotFound,
        };
        let outcome = if verdict == AllocationVerdict::Success {
            if let Some(host) = self.hosts.get_mut(&source) {
                host.release(vm_id);
            }
            vm.set_host(target);
            self.stats.migrations_completed += 1;
            log_info!(self.ctx, "vm #{} migrated: host #{} -> host #{}", vm_id, source, target);
            MigrationOutcome::Completed
        } else {
            self.stats.migrations_failed += 1;
            log_warn!(
                self.ctx,
                "vm #{} migration to host #{} failed: {:?}, vm stays on host #{}",
                vm_id,
                target,
                verdict,
                source
            );
            MigrationOutcome::TargetLacksCapacity
        };
        let host_id = vm.host();
        self.recompute();
        self.ctx.emit(
            VmMigrationFinished {
                vm_id,
                host_id,
                outcome,
            },
            broker,
            self.message_delay,
        );
    }
}

impl EventHandler for Datacenter {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            VmCreateRequest { vm } => {
                self.on_vm_create_request(vm, event.src);
            }
            VmDestroyRequest { vm_id } => {
                self.on_vm_destroy_request(vm_id);
            }
            CloudletSubmit { cloudlet } => {
                self.on_cloudlet_submit(cloudlet, event.src);
            }
            CloudletFinishRequest { cloudlet_id, vm_id } => {
                self.on_cloudlet_finish_request(cloudlet_id, vm_id, false);
            }
            CloudletCancel { cloudlet_id, vm_id } => {
                self.on_cloudlet_finish_request(cloudlet_id, vm_id, true);
            }
            CloudletPause { cloudlet_id, vm_id } => {
                self.on_cloudlet_pause(cloudlet_id, vm_id, true);
            }
            CloudletResume { cloudlet_id, vm_id } => {
                self.on_cloudlet_pause(cloudlet_id, vm_id, false);
            }
            UpdateProcessing {} => {
                self.on_update_processing();
            }
            PerformMigrations {} => {
                self.on_perform_migrations();
            }
            MigrationCompleted { vm_id, source, target } => {
                self.on_migration_completed(vm_id, source, target);
            }
        })
    }
}
