//! Workload intake: task descriptors coming from traces or generators and their conversion to cloudlets.

use serde::{Deserialize, Serialize};

use cloudlab_models::utilization::{ConstantUtilizationModel, FullUtilizationModel};

use crate::core::cloudlet::Cloudlet;

/// Length given to cloudlets created from task descriptors, they run until the workload finishes them.
pub const TASK_CLOUDLET_LENGTH: i64 = -10000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEventKind {
    Submit,
    Finish,
    Fail,
}

/// Requested resources of a task, given as fractions of a machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub job_id: u64,
    pub task_index: u64,
    pub priority: i32,
    pub cpu_cores_fraction: f64,
    pub ram_fraction: f64,
    pub disk_fraction: f64,
    pub machine_id: Option<u32>,
    pub username: String,
    /// Time of the event in seconds.
    pub timestamp: f64,
}

impl TaskDescriptor {
    /// Task ID unique across jobs: decimal digits of the job ID followed by digits of the task index.
    pub fn unique_task_id(&self) -> u64 {
        let mut shift: u64 = 10;
        while shift <= self.task_index {
            shift = shift.saturating_mul(10);
        }
        self.job_id.saturating_mul(shift).saturating_add(self.task_index)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task: TaskDescriptor,
}

impl TaskEvent {
    pub fn new(kind: TaskEventKind, task: TaskDescriptor) -> Self {
        Self { kind, task }
    }
}

/// Creates a cloudlet for a submitted task.
pub type CloudletFactory = dyn Fn(&TaskDescriptor) -> Cloudlet;

/// Cloudlet parameters derived from a task running on a VM with `vm_pes` cores and `vm_size` MB of storage.
#[derive(Clone, Debug, PartialEq)]
pub struct CloudletParams {
    pub id: u64,
    pub job_id: u64,
    pub task_index: u64,
    pub priority: i32,
    pub pes: u32,
    pub file_size: u64,
    pub output_size: u64,
    pub ram_fraction: f64,
}

impl CloudletParams {
    pub fn from_task(task: &TaskDescriptor, vm_pes: u32, vm_size: u64) -> Self {
        let pes = (task.cpu_cores_fraction.clamp(0., 1.) * vm_pes as f64).ceil() as u32;
        let size = (task.disk_fraction.clamp(0., 1.) * vm_size as f64).ceil() as u64;
        Self {
            id: task.unique_task_id(),
            job_id: task.job_id,
            task_index: task.task_index,
            priority: task.priority,
            pes: pes.max(1),
            file_size: size,
            output_size: size,
            ram_fraction: task.ram_fraction.clamp(0., 1.),
        }
    }

    /// Builds a cloudlet using all of its cores and the VM bandwidth, and the given fraction of VM memory.
    pub fn build(&self) -> Cloudlet {
        let mut cloudlet = Cloudlet::new(self.id, TASK_CLOUDLET_LENGTH, self.pes)
            .with_sizes(self.file_size, self.output_size)
            .with_cpu_model(Box::new(FullUtilizationModel::new()))
            .with_bw_model(Box::new(FullUtilizationModel::new()))
            .with_ram_model(Box::new(ConstantUtilizationModel::new(self.ram_fraction)));
        cloudlet.job_id = self.job_id;
        cloudlet.task_index = self.task_index;
        cloudlet.priority = self.priority;
        cloudlet
    }
}

/// Returns a factory mapping tasks to cloudlets for VMs of the given size.
pub fn default_cloudlet_factory(vm_pes: u32, vm_size: u64) -> Box<CloudletFactory> {
    Box::new(move |task| CloudletParams::from_task(task, vm_pes, vm_size).build())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn task(job_id: u64, task_index: u64) -> TaskDescriptor {
        TaskDescriptor {
            job_id,
            task_index,
            priority: 2,
            cpu_cores_fraction: 0.3,
            ram_fraction: 0.25,
            disk_fraction: 0.015625,
            machine_id: None,
            username: "alice".to_string(),
            timestamp: 600.,
        }
    }

    #[test]
    fn unique_task_id_concatenates_digits() {
        assert_eq!(task(3418309, 0).unique_task_id(), 34183090);
        assert_eq!(task(3418309, 1).unique_task_id(), 34183091);
        assert_eq!(task(12, 345).unique_task_id(), 12345);
        assert_eq!(task(7, 10).unique_task_id(), 710);
        assert_eq!(task(u64::MAX, 5).unique_task_id(), u64::MAX);
    }

    #[test]
    fn task_maps_to_indefinite_cloudlet() {
        let params = CloudletParams::from_task(&task(12, 3), 8, 10000);
        assert_eq!(params.pes, 3);
        assert_eq!(params.file_size, 157);
        assert_eq!(params.output_size, 157);

        let cloudlet = params.build();
        assert_eq!(cloudlet.id, 123);
        assert_eq!(cloudlet.job_id, 12);
        assert_eq!(cloudlet.task_index, 3);
        assert_eq!(cloudlet.priority, 2);
        assert!(cloudlet.is_indefinite());
        assert_relative_eq!(cloudlet.ram_utilization(0.), 0.25);
        assert_relative_eq!(cloudlet.cpu_utilization(100.), 1.);
    }

    #[test]
    fn tiny_task_gets_one_core() {
        let mut tiny = task(1, 1);
        tiny.cpu_cores_fraction = 0.;
        let factory = default_cloudlet_factory(4, 1000);
        assert_eq!(factory(&tiny).pes, 1);
    }
}
