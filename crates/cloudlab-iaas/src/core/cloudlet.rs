//! Representation of a task (cloudlet) and its status.

use std::fmt::{Display, Formatter};

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;

use cloudlab_models::utilization::{FullUtilizationModel, UtilizationModel};

use crate::core::capacity_scheduler::{Schedulable, ShareRequest};

/// Status of cloudlet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CloudletStatus {
    Instantiated,
    Queued,
    Executing,
    Paused,
    Finished,
    Failed,
}

impl Display for CloudletStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CloudletStatus::Instantiated => write!(f, "instantiated"),
            CloudletStatus::Queued => write!(f, "queued"),
            CloudletStatus::Executing => write!(f, "executing"),
            CloudletStatus::Paused => write!(f, "paused"),
            CloudletStatus::Finished => write!(f, "finished"),
            CloudletStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Represents a unit of work executed by a VM.
///
// The length is measured in millions of instructions. A cloudlet with non-positive length never finishes
// by itself and runs until the broker asks to finish it. Utilization models describe which fraction of
// the requested cores, VM memory and VM bandwidth the cloudlet actually uses over time.
#[derive(Clone)]
pub struct Cloudlet {
    pub id: u64,
    pub job_id: u64,
    pub task_index: u64,
    pub priority: i32,
    pub length: i64,
    pub pes: u32,
    pub file_size: u64,
    pub output_size: u64,
    pub vm_id: Option<u32>,
    pub submission_delay: f64,
    utilization_cpu: Box<dyn UtilizationModel>,
    utilization_ram: Box<dyn UtilizationModel>,
    utilization_bw: Box<dyn UtilizationModel>,
    pub(crate) status: CloudletStatus,
    pub(crate) host_id: Option<u32>,
    pub(crate) arrival_time: Option<f64>,
    pub(crate) exec_start_time: Option<f64>,
    pub(crate) finish_time: Option<f64>,
    pub(crate) executed: f64,
}

impl Serialize for Cloudlet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Cloudlet", 6)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("length", &self.length)?;
        state.serialize_field("pes", &self.pes)?;
        state.serialize_field("vm_id", &self.vm_id)?;
        state.serialize_field("status", &self.status)?;
        state.serialize_field("executed", &self.executed)?;
        state.end()
    }
}

impl Cloudlet {
    /// Creates cloudlet with full utilization of requested cores, VM memory and bandwidth.
    pub fn new(id: u64, length: i64, pes: u32) -> Self {
        Self {
            id,
            job_id: id,
            task_index: 0,
            priority: 0,
            length,
            pes: pes.max(1),
            file_size: 0,
            output_size: 0,
            vm_id: None,
            submission_delay: 0.,
            utilization_cpu: Box::new(FullUtilizationModel::new()),
            utilization_ram: Box::new(FullUtilizationModel::new()),
            utilization_bw: Box::new(FullUtilizationModel::new()),
            status: CloudletStatus::Instantiated,
            host_id: None,
            arrival_time: None,
            exec_start_time: None,
            finish_time: None,
            executed: 0.,
        }
    }

    pub fn with_sizes(mut self, file_size: u64, output_size: u64) -> Self {
        self.file_size = file_size;
        self.output_size = output_size;
        self
    }

    pub fn with_vm(mut self, vm_id: u32) -> Self {
        self.vm_id = Some(vm_id);
        self
    }

    pub fn with_submission_delay(mut self, delay: f64) -> Self {
        self.submission_delay = delay.max(0.);
        self
    }

    pub fn with_cpu_model(mut self, model: Box<dyn UtilizationModel>) -> Self {
        self.utilization_cpu = model;
        self
    }

    pub fn with_ram_model(mut self, model: Box<dyn UtilizationModel>) -> Self {
        self.utilization_ram = model;
        self
    }

    pub fn with_bw_model(mut self, model: Box<dyn UtilizationModel>) -> Self {
        self.utilization_bw = model;
        self
    }

    pub fn status(&self) -> CloudletStatus {
        self.status
    }

    /// Returns `true` if the cloudlet runs until it is explicitly finished.
    pub fn is_indefinite(&self) -> bool {
        self.length <= 0
    }

    /// Returns `true` for finished and failed cloudlets.
    pub fn is_done(&self) -> bool {
        matches!(self.status, CloudletStatus::Finished | CloudletStatus::Failed)
    }

    /// Returns the number of executed instructions (in millions).
    pub fn executed(&self) -> f64 {
        self.executed
    }

    /// Returns instructions (in millions) left to execute, `None` for indefinite cloudlets.
    pub fn remaining(&self) -> Option<f64> {
        if self.is_indefinite() {
            None
        } else {
            Some((self.length as f64 - self.executed).max(0.))
        }
    }

    pub fn host_id(&self) -> Option<u32> {
        self.host_id
    }

    /// Time when the cloudlet arrived to its VM.
    pub fn arrival_time(&self) -> Option<f64> {
        self.arrival_time
    }

    /// Time when the cloudlet started executing for the first time.
    pub fn exec_start_time(&self) -> Option<f64> {
        self.exec_start_time
    }

    pub fn finish_time(&self) -> Option<f64> {
        self.finish_time
    }

    /// Time spent in the VM queue before execution started.
    pub fn wait_time(&self) -> Option<f64> {
        match (self.arrival_time, self.exec_start_time) {
            (Some(arrival), Some(start)) => Some(start - arrival),
            _ => None,
        }
    }

    fn time_from_start(&self, time: f64) -> f64 {
        time - self.exec_start_time.or(self.arrival_time).unwrap_or(time)
    }

    pub fn cpu_utilization(&self, time: f64) -> f64 {
        self.utilization_cpu.get_utilization(time, self.time_from_start(time)).clamp(0., 1.)
    }

    pub fn ram_utilization(&self, time: f64) -> f64 {
        self.utilization_ram.get_utilization(time, self.time_from_start(time)).clamp(0., 1.)
    }

    pub fn bw_utilization(&self, time: f64) -> f64 {
        self.utilization_bw.get_utilization(time, self.time_from_start(time)).clamp(0., 1.)
    }

    pub(crate) fn mark_done(&mut self, status: CloudletStatus, time: f64) {
        self.status = status;
        self.finish_time = Some(time);
    }
}

impl Schedulable for Cloudlet {
    fn share_request(&self, time: f64, mips_per_pe: f64) -> ShareRequest {
        let mips = if self.status == CloudletStatus::Paused {
            0.
        } else {
            self.pes as f64 * mips_per_pe * self.cpu_utilization(time)
        };
        ShareRequest::new(self.id, self.pes, mips)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use cloudlab_models::utilization::ConstantUtilizationModel;

    use super::*;

    #[test]
    fn request_follows_cpu_model() {
        let cloudlet = Cloudlet::new(1, 10000, 2).with_cpu_model(Box::new(ConstantUtilizationModel::new(0.25)));
        let request = cloudlet.share_request(0., 1000.);
        assert_eq!(request.pes, 2);
        assert_relative_eq!(request.mips, 500.);
    }

    #[test]
    fn non_positive_length_is_indefinite() {
        assert!(Cloudlet::new(1, -10000, 1).is_indefinite());
        assert!(Cloudlet::new(2, 0, 1).is_indefinite());
        assert_eq!(Cloudlet::new(3, -1, 1).remaining(), None);
        assert_eq!(Cloudlet::new(4, 500, 1).remaining(), Some(500.));
    }

    #[test]
    fn wait_time() {
        let mut cloudlet = Cloudlet::new(1, 100, 1);
        assert_eq!(cloudlet.wait_time(), None);
        cloudlet.arrival_time = Some(2.);
        cloudlet.exec_start_time = Some(7.5);
        assert_eq!(cloudlet.wait_time(), Some(5.5));
    }
}
