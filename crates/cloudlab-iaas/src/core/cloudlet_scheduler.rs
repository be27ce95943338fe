//! Execution of cloudlets inside a VM.

use std::collections::HashMap;

use crate::core::capacity_scheduler::{Capacity, CapacityScheduler, Schedulable, ShareRequest};
use crate::core::cloudlet::{Cloudlet, CloudletStatus};
use crate::core::provisioner::ResourceProvisioner;

/// Remaining work (in millions of instructions) treated as zero when checking for completion.
const FINISH_TOLERANCE: f64 = 1e-6;

/// Keeps the active cloudlets of one VM and advances their execution between processing updates.
///
/// Cloudlets progress with the rates computed at the last [`reshare`](CloudletScheduler::reshare),
/// so [`advance`](CloudletScheduler::advance) must be called before anything changes the rates.
#[derive(Clone)]
pub struct CloudletScheduler {
    policy: Box<dyn CapacityScheduler>,
    pes: u32,
    mips_per_pe: f64,
    cloudlets: Vec<Cloudlet>,
    rates: HashMap<u64, f64>,
    ram: ResourceProvisioner,
    bw: ResourceProvisioner,
    last_update: f64,
}

impl CloudletScheduler {
    pub fn new(policy: Box<dyn CapacityScheduler>, pes: u32, mips_per_pe: f64, ram: u64, bw: u64) -> Self {
        Self {
            policy,
            pes,
            mips_per_pe,
            cloudlets: Vec::new(),
            rates: HashMap::new(),
            ram: ResourceProvisioner::new(ram),
            bw: ResourceProvisioner::new(bw),
            last_update: 0.,
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Accepts a cloudlet into the queue. It gets processing capacity at the next reshare.
    pub fn submit(&mut self, mut cloudlet: Cloudlet, time: f64) {
        cloudlet.status = CloudletStatus::Queued;
        cloudlet.arrival_time = Some(time);
        if self.cloudlets.is_empty() {
            self.last_update = time;
        }
        self.cloudlets.push(cloudlet);
    }

    fn accumulate(&mut self, time: f64) {
        let elapsed = time - self.last_update;
        if elapsed > 0. {
            for cloudlet in self.cloudlets.iter_mut() {
                if cloudlet.status == CloudletStatus::Executing {
                    cloudlet.executed += self.rates.get(&cloudlet.id).copied().unwrap_or(0.) * elapsed;
                }
            }
            self.last_update = time;
        }
    }

    /// Advances execution up to `time` and returns cloudlets which completed their length.
    pub fn advance(&mut self, time: f64) -> Vec<Cloudlet> {
        self.accumulate(time);
        let mut finished = Vec::new();
        let mut i = 0;
        while i < self.cloudlets.len() {
            let done = match self.cloudlets[i].remaining() {
                Some(remaining) => remaining <= FINISH_TOLERANCE,
                None => false,
            };
            if done {
                let mut cloudlet = self.cloudlets.remove(i);
                cloudlet.executed = cloudlet.length as f64;
                self.release(cloudlet.id);
                cloudlet.mark_done(CloudletStatus::Finished, time);
                finished.push(cloudlet);
            } else {
                i += 1;
            }
        }
        finished
    }

    fn requests(&self, time: f64) -> Vec<ShareRequest> {
        self.cloudlets
            .iter()
            .filter(|c| c.status != CloudletStatus::Paused)
            .map(|c| c.share_request(time, self.mips_per_pe))
            .collect()
    }

    /// Total MIPS the cloudlets would use if the VM got its full nominal capacity.
    pub fn demand(&self, time: f64) -> f64 {
        let capacity = Capacity::new(self.pes, self.mips_per_pe);
        self.policy.demand(capacity, &self.requests(time))
    }

    /// Splits MIPS granted to the VM between its cloudlets and updates their statuses and memory/bandwidth use.
    pub fn reshare(&mut self, time: f64, granted_mips: f64) {
        self.accumulate(time);
        let capacity = Capacity::new(self.pes, self.mips_per_pe).with_limit(granted_mips);
        let requests = self.requests(time);
        let allocations = self.policy.share(capacity, &requests);
        self.rates.clear();
        for allocation in allocations {
            let Some(idx) = self.cloudlets.iter().position(|c| c.id == allocation.id) else {
                continue;
            };
            if allocation.running {
                let cloudlet = &mut self.cloudlets[idx];
                cloudlet.status = CloudletStatus::Executing;
                cloudlet.exec_start_time.get_or_insert(time);
                let ram = (cloudlet.ram_utilization(time) * self.ram.capacity() as f64).round() as u64;
                let bw = (cloudlet.bw_utilization(time) * self.bw.capacity() as f64).round() as u64;
                let id = cloudlet.id;
                self.rates.insert(id, allocation.mips);
                // memory and bandwidth are capped by what is left in the VM
                let ram = ram.min(self.ram.available() + self.ram.allocated_for(id));
                let bw = bw.min(self.bw.available() + self.bw.allocated_for(id));
                self.ram.allocate(id, ram);
                self.bw.allocate(id, bw);
            } else {
                self.cloudlets[idx].status = CloudletStatus::Queued;
                self.release(allocation.id);
            }
        }
    }

    /// Returns delay until the earliest cloudlet completion with the current rates.
    pub fn next_completion(&self) -> Option<f64> {
        self.cloudlets
            .iter()
            .filter(|c| c.status == CloudletStatus::Executing)
            .filter_map(|c| {
                let rate = self.rates.get(&c.id).copied().unwrap_or(0.);
                match c.remaining() {
                    Some(remaining) if rate > 0. => Some(remaining / rate),
                    _ => None,
                }
            })
            .min_by(|a, b| a.total_cmp(b))
    }

    fn take(&mut self, cloudlet_id: u64) -> Option<Cloudlet> {
        let idx = self.cloudlets.iter().position(|c| c.id == cloudlet_id)?;
        self.release(cloudlet_id);
        Some(self.cloudlets.remove(idx))
    }

    /// Finishes a cloudlet on request, whatever its length is.
    pub fn finish(&mut self, cloudlet_id: u64, time: f64) -> Option<Cloudlet> {
        self.accumulate(time);
        let mut cloudlet = self.take(cloudlet_id)?;
        cloudlet.mark_done(CloudletStatus::Finished, time);
        Some(cloudlet)
    }

    pub fn fail(&mut self, cloudlet_id: u64, time: f64) -> Option<Cloudlet> {
        self.accumulate(time);
        let mut cloudlet = self.take(cloudlet_id)?;
        cloudlet.mark_done(CloudletStatus::Failed, time);
        Some(cloudlet)
    }

    pub fn pause(&mut self, cloudlet_id: u64) -> bool {
        let Some(idx) = self.cloudlets.iter().position(|c| c.id == cloudlet_id) else {
            return false;
        };
        if !matches!(
            self.cloudlets[idx].status,
            CloudletStatus::Queued | CloudletStatus::Executing
        ) {
            return false;
        }
        self.cloudlets[idx].status = CloudletStatus::Paused;
        self.release(cloudlet_id);
        true
    }

    pub fn resume(&mut self, cloudlet_id: u64) -> bool {
        match self.cloudlets.iter_mut().find(|c| c.id == cloudlet_id) {
            Some(cloudlet) if cloudlet.status == CloudletStatus::Paused => {
                cloudlet.status = CloudletStatus::Queued;
                true
            }
            _ => false,
        }
    }

    /// Removes all cloudlets marking them with `status`, used when the VM is destroyed.
    pub fn drain(&mut self, status: CloudletStatus, time: f64) -> Vec<Cloudlet> {
        let ids = self.cloudlets.iter().map(|c| c.id).collect::<Vec<_>>();
        for id in ids {
            self.release(id);
        }
        let mut drained = std::mem::take(&mut self.cloudlets);
        for cloudlet in drained.iter_mut() {
            cloudlet.mark_done(status, time);
        }
        drained
    }

    fn release(&mut self, cloudlet_id: u64) {
        self.rates.remove(&cloudlet_id);
        self.ram.deallocate(cloudlet_id);
        self.bw.deallocate(cloudlet_id);
    }

    pub fn cloudlets(&self) -> &[Cloudlet] {
        &self.cloudlets
    }

    pub fn get(&self, cloudlet_id: u64) -> Option<&Cloudlet> {
        self.cloudlets.iter().find(|c| c.id == cloudlet_id)
    }

    pub fn rate(&self, cloudlet_id: u64) -> f64 {
        self.rates.get(&cloudlet_id).copied().unwrap_or(0.)
    }

    pub fn is_empty(&self) -> bool {
        self.cloudlets.is_empty()
    }

    pub fn ram(&self) -> &ResourceProvisioner {
        &self.ram
    }

    pub fn bw(&self) -> &ResourceProvisioner {
        &self.bw
    }
}
