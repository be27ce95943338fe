//! Standard simulation events.

// VM EVENTS ///////////////////////////////////////////////////////////////////////////////////////

pub mod vm {
    use serde::Serialize;

    use crate::core::common::AllocationVerdict;
    use crate::core::vm::{MigrationOutcome, VmSpec};

    #[derive(Serialize, Clone)]
    pub struct VmCreateRequest {
        pub vm: VmSpec,
    }

    /// Reply to [`VmCreateRequest`], `host_id` is `None` if the placement was refused.
    #[derive(Serialize, Clone)]
    pub struct VmCreateAck {
        pub vm_id: u32,
        pub host_id: Option<u32>,
        pub verdict: AllocationVerdict,
    }

    #[derive(Serialize, Clone)]
    pub struct VmDestroyRequest {
        pub vm_id: u32,
    }

    #[derive(Serialize, Clone)]
    pub struct VmDestroyed {
        pub vm_id: u32,
    }

    #[derive(Serialize, Clone)]
    pub struct VmMigrationStarted {
        pub vm_id: u32,
        pub source: u32,
        pub target: u32,
    }

    #[derive(Serialize, Clone)]
    pub struct VmMigrationFinished {
        pub vm_id: u32,
        pub host_id: u32,
        pub outcome: MigrationOutcome,
    }
}

// CLOUDLET EVENTS /////////////////////////////////////////////////////////////////////////////////

pub mod cloudlet {
    use serde::Serialize;

    use crate::core::cloudlet::Cloudlet;
    use crate::extensions::workload::TaskEventKind;

    #[derive(Serialize, Clone)]
    pub struct CloudletSubmit {
        pub cloudlet: Cloudlet,
    }

    /// Finished or failed cloudlet sent back to its broker.
    #[derive(Serialize, Clone)]
    pub struct CloudletReturn {
        pub cloudlet: Cloudlet,
    }

    #[derive(Serialize, Clone)]
    pub struct CloudletFinishRequest {
        pub cloudlet_id: u64,
        pub vm_id: u32,
    }

    #[derive(Serialize, Clone)]
    pub struct CloudletPause {
        pub cloudlet_id: u64,
        pub vm_id: u32,
    }

    #[derive(Serialize, Clone)]
    pub struct CloudletResume {
        pub cloudlet_id: u64,
        pub vm_id: u32,
    }

    #[derive(Serialize, Clone)]
    pub struct CloudletCancel {
        pub cloudlet_id: u64,
        pub vm_id: u32,
    }

    /// Broker-side timer for a task state change from the workload.
    #[derive(Serialize, Clone)]
    pub struct TaskStateChange {
        pub cloudlet_id: u64,
        pub kind: TaskEventKind,
    }
}

// DATACENTER PROCESSING EVENTS ////////////////////////////////////////////////////////////////////

pub mod processing {
    use serde::Serialize;

    /// Recompute cloudlet progress and capacity shares, scheduled at the earliest cloudlet completion.
    #[derive(Serialize, Clone)]
    pub struct UpdateProcessing {}

    /// Periodic processing update followed by migration decisions.
    #[derive(Serialize, Clone)]
    pub struct PerformMigrations {}

    #[derive(Serialize, Clone)]
    pub struct MigrationCompleted {
        pub vm_id: u32,
        pub source: u32,
        pub target: u32,
    }
}
