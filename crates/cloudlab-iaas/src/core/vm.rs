//! Representations of virtual machine and its status.

use std::fmt::{Display, Formatter};

use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

use cloudlab_core::{EventId, Id};

use crate::core::capacity_scheduler::{Schedulable, SchedulingPolicy, ShareRequest};
use crate::core::cloudlet_scheduler::CloudletScheduler;
use crate::core::common::Resources;

/// Status of virtual machine as seen by its broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum VmStatus {
    Unplaced,
    Placed,
    Migrating,
    FailedToAllocate,
    Destroyed,
}

impl Display for VmStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            VmStatus::Unplaced => write!(f, "unplaced"),
            VmStatus::Placed => write!(f, "placed"),
            VmStatus::Migrating => write!(f, "migrating"),
            VmStatus::FailedToAllocate => write!(f, "failed_to_allocate"),
            VmStatus::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Migration state of a VM relative to a particular host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MigrationState {
    None,
    MigratingOut,
    MigratingIn,
}

/// Requested capacity of a VM. This is what brokers send to the datacenter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VmSpec {
    pub id: u32,
    pub pes: u32,
    /// Speed of each virtual core in MIPS.
    pub mips: f64,
    pub ram: u64,
    pub bw: u64,
    /// Image size, allocated from host storage.
    pub size: u64,
    pub cloudlet_scheduler: SchedulingPolicy,
}

impl VmSpec {
    pub fn new(id: u32, pes: u32, mips: f64, ram: u64, bw: u64, size: u64) -> Self {
        Self {
            id,
            pes,
            mips,
            ram,
            bw,
            size,
            cloudlet_scheduler: SchedulingPolicy::TimeShared,
        }
    }

    pub fn with_cloudlet_scheduler(mut self, policy: SchedulingPolicy) -> Self {
        self.cloudlet_scheduler = policy;
        self
    }

    pub fn resources(&self) -> Resources {
        Resources::new(self.pes, self.ram, self.bw, self.size)
    }

    pub fn total_mips(&self) -> f64 {
        self.pes as f64 * self.mips
    }
}

/// In-flight migration of a VM.
#[derive(Clone, Debug, PartialEq)]
pub struct Migration {
    pub source: u32,
    pub target: u32,
    pub started_at: f64,
    /// Reserved migration bandwidth in MB/s.
    pub bandwidth: u64,
    pub(crate) completion_event: EventId,
}

/// Result of a finished migration attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MigrationOutcome {
    Completed,
    /// The target host had no room for the VM at completion time, the VM stayed on the source host.
    TargetLacksCapacity,
    /// The VM was destroyed before the migration completed.
    Cancelled,
}

/// Capability of being moved between hosts.
pub trait Migratable {
    /// Returns the migration state of the VM from the point of view of `host_id`.
    fn migration_state(&self, host_id: u32) -> MigrationState;

    /// Amount of data (MB) to transfer when migrating.
    fn migration_size(&self) -> u64;

    fn is_migrating(&self) -> bool;
}

/// Running virtual machine resident on a host.
///
// The VM executes its cloudlets on the source host until the migration completes,
// so the host relation changes only at completion time.
#[derive(Clone)]
pub struct Vm {
    spec: VmSpec,
    broker: Id,
    host: u32,
    migration: Option<Migration>,
    pub(crate) cloudlets: CloudletScheduler,
    allocated_mips: f64,
    placed_at: f64,
}

impl Serialize for Vm {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Vm", 4)?;
        state.serialize_field("id", &self.spec.id)?;
        state.serialize_field("host", &self.host)?;
        state.serialize_field("allocated_mips", &self.allocated_mips)?;
        state.serialize_field("cloudlets", &self.cloudlets.cloudlets().len())?;
        state.end()
    }
}

impl Vm {
    pub fn new(spec: VmSpec, broker: Id, host: u32, time: f64) -> Self {
        let cloudlets = CloudletScheduler::new(spec.cloudlet_scheduler.create(), spec.pes, spec.mips, spec.ram, spec.bw);
        Self {
            spec,
            broker,
            host,
            migration: None,
            cloudlets,
            allocated_mips: 0.,
            placed_at: time,
        }
    }

    pub fn id(&self) -> u32 {
        self.spec.id
    }

    pub fn spec(&self) -> &VmSpec {
        &self.spec
    }

    pub fn broker(&self) -> Id {
        self.broker
    }

    /// Host where the VM currently runs (the source host during migration).
    pub fn host(&self) -> u32 {
        self.host
    }

    pub(crate) fn set_host(&mut self, host: u32) {
        self.host = host;
    }

    pub fn migration(&self) -> Option<&Migration> {
        self.migration.as_ref()
    }

    pub(crate) fn start_migration(&mut self, migration: Migration) {
        self.migration = Some(migration);
    }

    pub(crate) fn finish_migration(&mut self) -> Option<Migration> {
        self.migration.take()
    }

    /// MIPS granted by the host at the last processing update.
    pub fn allocated_mips(&self) -> f64 {
        self.allocated_mips
    }

    pub(crate) fn set_allocated_mips(&mut self, mips: f64) {
        self.allocated_mips = mips;
    }

    pub fn placed_at(&self) -> f64 {
        self.placed_at
    }

    pub fn cloudlets(&self) -> &CloudletScheduler {
        &self.cloudlets
    }
}

impl Migratable for Vm {
    fn migration_state(&self, host_id: u32) -> MigrationState {
        match &self.migration {
            Some(m) if m.source == host_id => MigrationState::MigratingOut,
            Some(m) if m.target == host_id => MigrationState::MigratingIn,
            _ => MigrationState::None,
        }
    }

    fn migration_size(&self) -> u64 {
        self.spec.ram
    }

    fn is_migrating(&self) -> bool {
        self.migration.is_some()
    }
}

impl Schedulable for Vm {
    /// The VM asks for what its cloudlets can use, but its cores are not faster than the host cores.
    fn share_request(&self, time: f64, mips_per_pe: f64) -> ShareRequest {
        let max_mips = self.spec.pes as f64 * self.spec.mips.min(mips_per_pe);
        ShareRequest::new(self.spec.id as u64, self.spec.pes, self.cloudlets.demand(time).min(max_mips))
    }
}
