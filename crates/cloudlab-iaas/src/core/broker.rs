//! Broker acting on behalf of a cloud user.

use std::collections::BTreeMap;

use serde::Serialize;

use cloudlab_core::{cast, log_debug, log_info, log_warn};
use cloudlab_core::{Event, EventHandler, Id, SimulationContext};

use crate::core::cloudlet::{Cloudlet, CloudletStatus};
use crate::core::config::SimulationConfig;
use crate::core::events::cloudlet::{CloudletCancel, CloudletFinishRequest, CloudletReturn, CloudletSubmit};
use crate::core::events::cloudlet::{CloudletPause, CloudletResume, TaskStateChange};
use crate::core::events::vm::{
    VmCreateAck, VmCreateRequest, VmDestroyRequest, VmDestroyed, VmMigrationFinished, VmMigrationStarted,
};
use crate::core::vm::{MigrationOutcome, VmSpec, VmStatus};
use crate::extensions::workload::TaskEventKind;

/// Broker-side view of a requested VM.
#[derive(Clone, Debug, Serialize)]
pub struct VmRecord {
    spec: VmSpec,
    status: VmStatus,
    host: Option<u32>,
    requested_at: f64,
    attempts: u32,
    migrations: u32,
}

impl VmRecord {
    pub fn spec(&self) -> &VmSpec {
        &self.spec
    }

    pub fn status(&self) -> VmStatus {
        self.status
    }

    /// Last known host of the VM.
    pub fn host(&self) -> Option<u32> {
        self.host
    }

    /// Number of placement attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Number of completed migrations.
    pub fn migrations(&self) -> u32 {
        self.migrations
    }

    fn is_running(&self) -> bool {
        matches!(self.status, VmStatus::Placed | VmStatus::Migrating)
    }
}

/// Submits VMs and cloudlets to a datacenter and collects the results.
///
/// Refused VM placements are retried every `vm_allocation_retry_period` until `vm_allocation_timeout` expires,
/// then the VM is marked as failed to allocate together with cloudlets bound to it. Cloudlets without explicit
/// binding are spread over running VMs in round-robin order. Once all cloudlets have returned and no task events
/// are pending, the broker destroys its VMs.
pub struct Broker {
    datacenter: Id,
    vms: BTreeMap<u32, VmRecord>,
    waiting: Vec<Cloudlet>,
    scheduled: BTreeMap<u64, Cloudlet>,
    submitted: BTreeMap<u64, u32>,
    finished: Vec<Cloudlet>,
    pending_task_events: usize,
    next_vm: usize,
    vms_destroy_requested: bool,
    retry_period: f64,
    allocation_timeout: f64,
    message_delay: f64,
    ctx: SimulationContext,
}

impl Broker {
    pub fn new(datacenter: Id, config: &SimulationConfig, ctx: SimulationContext) -> Self {
        Self {
            datacenter,
            vms: BTreeMap::new(),
            waiting: Vec::new(),
            scheduled: BTreeMap::new(),
            submitted: BTreeMap::new(),
            finished: Vec::new(),
            pending_task_events: 0,
            next_vm: 0,
            vms_destroy_requested: false,
            retry_period: config.vm_allocation_retry_period,
            allocation_timeout: config.vm_allocation_timeout,
            message_delay: config.message_delay,
            ctx,
        }
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    // PUBLIC API //////////////////////////////////////////////////////////////////////////////////

    /// Requests placement of a new VM in the datacenter.
    pub fn submit_vm(&mut self, spec: VmSpec) {
        let vm_id = spec.id;
        if self.vms.contains_key(&vm_id) {
            log_warn!(self.ctx, "vm #{} is already submitted", vm_id);
            return;
        }
        self.vms.insert(
            vm_id,
            VmRecord {
                spec: spec.clone(),
                status: VmStatus::Unplaced,
                host: None,
                requested_at: self.ctx.time(),
                attempts: 1,
                migrations: 0,
            },
        );
        self.ctx
            .emit(VmCreateRequest { vm: spec }, self.datacenter, self.message_delay);
    }

    /// Submits a cloudlet, honoring its submission delay.
    pub fn submit_cloudlet(&mut self, cloudlet: Cloudlet) {
        if cloudlet.submission_delay > 0. {
            let cloudlet_id = cloudlet.id;
            self.schedule_task_event(cloudlet_id, TaskEventKind::Submit, cloudlet.submission_delay);
            self.scheduled.insert(cloudlet_id, cloudlet);
        } else {
            self.dispatch(cloudlet);
        }
    }

    /// Registers a cloudlet which is submitted at the absolute `time`.
    pub fn submit_cloudlet_at(&mut self, cloudlet: Cloudlet, time: f64) {
        let delay = (time - self.ctx.time()).max(0.);
        let cloudlet_id = cloudlet.id;
        self.schedule_task_event(cloudlet_id, TaskEventKind::Submit, delay);
        self.scheduled.insert(cloudlet_id, cloudlet);
    }

    /// Schedules a finish or fail request for a cloudlet at the absolute `time`.
    pub fn schedule_task_end(&mut self, cloudlet_id: u64, kind: TaskEventKind, time: f64) {
        let delay = (time - self.ctx.time()).max(0.);
        self.schedule_task_event(cloudlet_id, kind, delay);
    }

    /// Asks the datacenter to pause a running cloudlet.
    pub fn pause_cloudlet(&mut self, cloudlet_id: u64) -> bool {
        match self.submitted.get(&cloudlet_id) {
            Some(&vm_id) => {
                self.ctx
                    .emit(CloudletPause { cloudlet_id, vm_id }, self.datacenter, self.message_delay);
                true
            }
            None => false,
        }
    }

    pub fn resume_cloudlet(&mut self, cloudlet_id: u64) -> bool {
        match self.submitted.get(&cloudlet_id) {
            Some(&vm_id) => {
                self.ctx
                    .emit(CloudletResume { cloudlet_id, vm_id }, self.datacenter, self.message_delay);
                true
            }
            None => false,
        }
    }

    /// Asks the datacenter to stop the cloudlet, it is returned as failed.
    pub fn cancel_cloudlet(&mut self, cloudlet_id: u64) -> bool {
        match self.submitted.get(&cloudlet_id) {
            Some(&vm_id) => {
                self.ctx
                    .emit(CloudletCancel { cloudlet_id, vm_id }, self.datacenter, self.message_delay);
                true
            }
            None => false,
        }
    }

    pub fn vms(&self) -> &BTreeMap<u32, VmRecord> {
        &self.vms
    }

    pub fn vm(&self, vm_id: u32) -> Option<&VmRecord> {
        self.vms.get(&vm_id)
    }

    pub fn vm_status(&self, vm_id: u32) -> Option<VmStatus> {
        self.vms.get(&vm_id).map(|r| r.status)
    }

    /// Finished and failed cloudlets in the order they returned.
    pub fn finished_cloudlets(&self) -> &[Cloudlet] {
        &self.finished
    }

    /// Cloudlets waiting for a VM to be created.
    pub fn waiting_cloudlets(&self) -> &[Cloudlet] {
        &self.waiting
    }

    /// Number of cloudlets currently executed by the datacenter.
    pub fn running_cloudlet_count(&self) -> usize {
        self.submitted.len()
    }

    // CLOUDLET DISPATCHING ////////////////////////////////////////////////////////////////////////

    fn schedule_task_event(&mut self, cloudlet_id: u64, kind: TaskEventKind, delay: f64) {
        self.pending_task_events += 1;
        self.ctx.emit_self(TaskStateChange { cloudlet_id, kind }, delay);
    }

    fn running_vm_ids(&self) -> Vec<u32> {
        self.vms.values().filter(|r| r.is_running()).map(|r| r.spec.id).collect()
    }

    fn has_unplaced_vms(&self) -> bool {
        self.vms.values().any(|r| r.status == VmStatus::Unplaced)
    }

    /// Sends the cloudlet to its VM, keeps it waiting for a VM or fails it if there is no VM to wait for.
    fn dispatch(&mut self, mut cloudlet: Cloudlet) {
        let target = match cloudlet.vm_id {
            Some(vm_id) => match self.vms.get(&vm_id).map(|r| r.status) {
                Some(VmStatus::Placed) | Some(VmStatus::Migrating) => Some(vm_id),
                Some(VmStatus::Unplaced) => None,
                _ => {
                    self.fail_locally(cloudlet);
                    return;
                }
            },
            None => {
                let running = self.running_vm_ids();
                if running.is_empty() {
                    None
                } else {
                    let vm_id = running[self.next_vm % running.len()];
                    self.next_vm += 1;
                    Some(vm_id)
                }
            }
        };

        match target {
            Some(vm_id) => {
                cloudlet.vm_id = Some(vm_id);
                log_debug!(self.ctx, "cloudlet #{} sent to vm #{}", cloudlet.id, vm_id);
                self.submitted.insert(cloudlet.id, vm_id);
                self.ctx
                    .emit(CloudletSubmit { cloudlet }, self.datacenter, self.message_delay);
            }
            None if cloudlet.vm_id.is_some() || self.has_unplaced_vms() || self.vms.is_empty() => {
                self.waiting.push(cloudlet);
            }
            None => self.fail_locally(cloudlet),
        }
    }

    fn dispatch_waiting(&mut self) {
        for cloudlet in std::mem::take(&mut self.waiting) {
            self.dispatch(cloudlet);
        }
    }

    fn fail_locally(&mut self, cloudlet: Cloudlet) {
        log_warn!(self.ctx, "cloudlet #{} failed: no vm to run it", cloudlet.id);
        self.complete_locally(cloudlet, CloudletStatus::Failed);
    }

    fn complete_locally(&mut self, mut cloudlet: Cloudlet, status: CloudletStatus) {
        cloudlet.mark_done(status, self.ctx.time());
        self.finished.push(cloudlet);
    }

    fn check_completion(&mut self) {
        if self.vms_destroy_requested
            || self.finished.is_empty()
            || self.pending_task_events > 0
            || !self.waiting.is_empty()
            || !self.scheduled.is_empty()
            || !self.submitted.is_empty()
            || self.has_unplaced_vms()
        {
            return;
        }
        self.vms_destroy_requested = true;
        log_info!(self.ctx, "all cloudlets are done, destroying vms");
        for vm_id in self.running_vm_ids() {
            self.ctx
                .emit(VmDestroyRequest { vm_id }, self.datacenter, self.message_delay);
        }
    }

    // EVENT HANDLERS //////////////////////////////////////////////////////////////////////////////

    fn on_vm_create_ack(&mut self, vm_id: u32, host_id: Option<u32>) {
        let time = self.ctx.time();
        let Some(record) = self.vms.get_mut(&vm_id) else {
            return;
        };
        match host_id {
            Some(host_id) => {
                record.status = VmStatus::Placed;
                record.host = Some(host_id);
                log_info!(self.ctx, "vm #{} created on host #{}", vm_id, host_id);
                self.dispatch_waiting();
            }
            None if time + self.retry_period <= record.requested_at + self.allocation_timeout => {
                record.attempts += 1;
                log_debug!(self.ctx, "vm #{} is not placed, retrying", vm_id);
                self.ctx.emit(
                    VmCreateRequest {
                        vm: record.spec.clone(),
                    },
                    self.datacenter,
                    self.retry_period + self.message_delay,
                );
            }
            None => {
                record.status = VmStatus::FailedToAllocate;
                log_warn!(
                    self.ctx,
                    "vm #{} failed to allocate after {} attempts",
                    vm_id,
                    record.attempts
                );
                self.dispatch_waiting();
                self.check_completion();
            }
        }
    }

    fn on_migration_started(&mut self, vm_id: u32) {
        if let Some(record) = self.vms.get_mut(&vm_id) {
            if record.status == VmStatus::Placed {
                record.status = VmStatus::Migrating;
            }
        }
    }

    fn on_migration_finished(&mut self, vm_id: u32, host_id: u32, outcome: MigrationOutcome) {
        if let Some(record) = self.vms.get_mut(&vm_id) {
            if record.status == VmStatus::Migrating {
                record.status = VmStatus::Placed;
            }
            if outcome == MigrationOutcome::Completed {
                record.migrations += 1;
            }
            record.host = Some(host_id);
        }
    }

    fn on_vm_destroyed(&mut self, vm_id: u32) {
        if let Some(record) = self.vms.get_mut(&vm_id) {
            record.status = VmStatus::Destroyed;
        }
        log_debug!(self.ctx, "vm #{} destroyed", vm_id);
    }

    fn on_cloudlet_return(&mut self, cloudlet: Cloudlet) {
        self.submitted.remove(&cloudlet.id);
        log_debug!(
            self.ctx,
            "cloudlet #{} returned with status {}",
            cloudlet.id,
            cloudlet.status()
        );
        self.finished.push(cloudlet);
        self.check_completion();
    }

    fn on_task_state_change(&mut self, cloudlet_id: u64, kind: TaskEventKind) {
        self.pending_task_events = self.pending_task_events.saturating_sub(1);
        let status = match kind {
            TaskEventKind::Submit => {
                if let Some(cloudlet) = self.scheduled.remove(&cloudlet_id) {
                    self.dispatch(cloudlet);
                }
                self.check_completion();
                return;
            }
            TaskEventKind::Finish => CloudletStatus::Finished,
            TaskEventKind::Fail => CloudletStatus::Failed,
        };

        if let Some(&vm_id) = self.submitted.get(&cloudlet_id) {
            if status == CloudletStatus::Finished {
                self.ctx
                    .emit(CloudletFinishRequest { cloudlet_id, vm_id }, self.datacenter, self.message_delay);
            } else {
                self.ctx
                    .emit(CloudletCancel { cloudlet_id, vm_id }, self.datacenter, self.message_delay);
            }
        } else if let Some(idx) = self.waiting.iter().position(|c| c.id == cloudlet_id) {
            let cloudlet = self.waiting.remove(idx);
            self.complete_locally(cloudlet, status);
        } else if let Some(cloudlet) = self.scheduled.remove(&cloudlet_id) {
            self.complete_locally(cloudlet, status);
        } else {
            log_debug!(self.ctx, "cloudlet #{} is already done", cloudlet_id);
        }
        self.check_completion();
    }
}

impl EventHandler for Broker {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            VmCreateAck { vm_id, host_id, verdict } => {
                log_debug!(self.ctx, "placement verdict for vm #{}: {:?}", vm_id, verdict);
                self.on_vm_create_ack(vm_id, host_id);
            }
            VmMigrationStarted { vm_id, source, target } => {
                log_debug!(self.ctx, "vm #{} migrates from host #{} to host #{}", vm_id, source, target);
                self.on_migration_started(vm_id);
            }
            VmMigrationFinished { vm_id, host_id, outcome } => {
                self.on_migration_finished(vm_id, host_id, outcome);
            }
            VmDestroyed { vm_id } => {
                self.on_vm_destroyed(vm_id);
            }
            CloudletReturn { cloudlet } => {
                self.on_cloudlet_return(cloudlet);
            }
            TaskStateChange { cloudlet_id, kind } => {
                self.on_task_state_change(cloudlet_id, kind);
            }
        })
    }
}
