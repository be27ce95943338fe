//! Sharing of processing capacity between consumers.
//!
//! The same policies are used on two levels: a host shares its cores between resident VMs and a VM shares
//! its virtual cores between cloudlets.

use std::collections::HashMap;

use dyn_clone::{clone_trait_object, DynClone};
use serde::{Deserialize, Serialize};

use crate::core::config::parse_config_value;
use crate::core::error::ConfigError;

/// Processing capacity of a container: number of working cores and speed of each core.
///
/// The total can be further limited, e.g. a VM has the nominal speed of its virtual cores
/// but may get less than that from the host.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Capacity {
    pub pes: u32,
    pub mips_per_pe: f64,
    limit: Option<f64>,
}

impl Capacity {
    pub fn new(pes: u32, mips_per_pe: f64) -> Self {
        Self {
            pes,
            mips_per_pe,
            limit: None,
        }
    }

    pub fn with_limit(mut self, total_mips: f64) -> Self {
        self.limit = Some(total_mips.max(0.));
        self
    }

    pub fn total_mips(&self) -> f64 {
        let total = self.pes as f64 * self.mips_per_pe;
        match self.limit {
            Some(limit) => total.min(limit),
            None => total,
        }
    }
}

/// Demand of a single consumer: it can use at most `pes` cores and wants `mips` in total.
#[derive(Clone, Debug, PartialEq)]
pub struct ShareRequest {
    pub id: u64,
    pub pes: u32,
    pub mips: f64,
}

impl ShareRequest {
    pub fn new(id: u64, pes: u32, mips: f64) -> Self {
        Self { id, pes, mips }
    }

    fn cap(&self, capacity: &Capacity) -> f64 {
        let pes = self.pes.min(capacity.pes) as f64;
        (pes * capacity.mips_per_pe).min(self.mips.max(0.))
    }
}

/// Granted share of a consumer. `running` is false for consumers waiting for free cores.
#[derive(Clone, Debug, PartialEq)]
pub struct ShareAllocation {
    pub id: u64,
    pub mips: f64,
    pub running: bool,
}

/// Anything that can ask for a share of processing capacity.
///
/// `mips_per_pe` is the nominal speed of a core of the container the consumer runs in.
pub trait Schedulable {
    fn share_request(&self, time: f64, mips_per_pe: f64) -> ShareRequest;
}

/// Policy of dividing capacity between consumers.
///
/// Allocations are returned in the order of requests. The sum of allocated MIPS never exceeds the capacity,
/// and no consumer gets more than its request or more than its cores can process.
pub trait CapacityScheduler: DynClone {
    fn share(&mut self, capacity: Capacity, requests: &[ShareRequest]) -> Vec<ShareAllocation>;

    /// Total MIPS the consumers would get from `capacity`, without changing the scheduler state.
    fn demand(&self, capacity: Capacity, requests: &[ShareRequest]) -> f64 {
        let mut probe = dyn_clone::clone_box(self);
        probe.share(capacity, requests).iter().map(|a| a.mips).sum()
    }

    fn name(&self) -> &'static str;

    /// Whether consumers may together ask for more cores than the container has.
    fn shares_cores(&self) -> bool {
        true
    }
}

clone_trait_object!(CapacityScheduler);

/// Closed set of scheduling policies which can be set for VMs in configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingPolicy {
    TimeShared,
    SpaceShared,
}

impl SchedulingPolicy {
    pub fn create(&self) -> Box<dyn CapacityScheduler> {
        match self {
            SchedulingPolicy::TimeShared => Box::new(TimeSharedScheduler::new()),
            SchedulingPolicy::SpaceShared => Box::new(SpaceSharedScheduler::new()),
        }
    }
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        SchedulingPolicy::TimeShared
    }
}

pub fn scheduling_policy_resolver(config_str: &str) -> Result<SchedulingPolicy, ConfigError> {
    let (name, _) = parse_config_value(config_str);
    match name.as_str() {
        "TimeShared" => Ok(SchedulingPolicy::TimeShared),
        "SpaceShared" => Ok(SchedulingPolicy::SpaceShared),
        _ => Err(ConfigError::UnknownName {
            kind: "scheduling policy",
            name,
        }),
    }
}

////////////////////////////////////////////////////////////////////////////////

/// All consumers run concurrently and receive a max-min fair share of the capacity.
///
/// Consumers asking for less than the fair share get their full request, the rest is split equally
/// among the others (water-filling).
#[derive(Clone, Default)]
pub struct TimeSharedScheduler;

impl TimeSharedScheduler {
    pub fn new() -> Self {
        Default::default()
    }
}

impl CapacityScheduler for TimeSharedScheduler {
    fn share(&mut self, capacity: Capacity, requests: &[ShareRequest]) -> Vec<ShareAllocation> {
        let caps = requests.iter().map(|r| r.cap(&capacity)).collect::<Vec<_>>();
        let mut order = (0..requests.len()).collect::<Vec<_>>();
        order.sort_by(|&a, &b| caps[a].total_cmp(&caps[b]));

        let mut granted = vec![0.; requests.len()];
        let mut remaining = capacity.total_mips();
        let mut left = requests.len();
        for idx in order {
            let fair = remaining / left as f64;
            granted[idx] = caps[idx].min(fair);
            remaining = (remaining - granted[idx]).max(0.);
            left -= 1;
        }

        requests
            .iter()
            .zip(granted)
            .map(|(r, mips)| ShareAllocation {
                id: r.id,
                mips,
                running: capacity.pes > 0,
            })
            .collect()
    }

    fn demand(&self, capacity: Capacity, requests: &[ShareRequest]) -> f64 {
        let total = requests.iter().map(|r| r.cap(&capacity)).sum::<f64>();
        total.min(capacity.total_mips())
    }

    fn name(&self) -> &'static str {
        "TimeShared"
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Consumers get exclusive cores in first-come-first-served order and are never preempted.
///
/// A consumer which does not fit waits in the queue together with everybody behind it,
/// so it starts as soon as enough cores are released by the earlier ones.
#[derive(Clone, Default)]
pub struct SpaceSharedScheduler {
    running: Vec<u64>,
}

impl SpaceSharedScheduler {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn running(&self) -> &[u64] {
        &self.running
    }
}

impl CapacityScheduler for SpaceSharedScheduler {
    fn share(&mut self, capacity: Capacity, requests: &[ShareRequest]) -> Vec<ShareAllocation> {
        let pes_of = requests
            .iter()
            .map(|r| (r.id, r.pes.min(capacity.pes)))
            .collect::<HashMap<_, _>>();
        self.running.retain(|id| pes_of.contains_key(id));

        let mut used = self.running.iter().map(|id| pes_of[id]).sum::<u32>();
        // cores can disappear after failures, the latest started consumers go back to the queue
        while used > capacity.pes {
            if let Some(id) = self.running.pop() {
                used -= pes_of[&id];
            }
        }

        for request in requests {
            if self.running.contains(&request.id) {
                continue;
            }
            let pes = pes_of[&request.id];
            if used + pes > capacity.pes {
                break;
            }
            used += pes;
            self.running.push(request.id);
        }

        let mut allocations = requests
            .iter()
            .map(|r| {
                let running = self.running.contains(&r.id);
                ShareAllocation {
                    id: r.id,
                    mips: if running { r.cap(&capacity) } else { 0. },
                    running,
                }
            })
            .collect::<Vec<_>>();
        let granted = allocations.iter().map(|a| a.mips).sum::<f64>();
        if granted > capacity.total_mips() {
            let scale = capacity.total_mips() / granted;
            for allocation in allocations.iter_mut() {
                allocation.mips *= scale;
            }
        }
        allocations
    }

    fn name(&self) -> &'static str {
        "SpaceShared"
    }

    fn shares_cores(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn total(allocations: &[ShareAllocation]) -> f64 {
        allocations.iter().map(|a| a.mips).sum()
    }

    #[test]
    fn time_shared_equal_split() {
        // three single-core VMs on a host with two 1000 MIPS cores
        let mut scheduler = TimeSharedScheduler::new();
        let requests = (0..3).map(|i| ShareRequest::new(i, 1, 1000.)).collect::<Vec<_>>();
        let allocations = scheduler.share(Capacity::new(2, 1000.), &requests);
        for a in &allocations {
            assert_relative_eq!(a.mips, 2000. / 3., epsilon = 1e-9);
            assert!(a.running);
        }
        assert_relative_eq!(total(&allocations), 2000., epsilon = 1e-9);
    }

    #[test]
    fn time_shared_small_requests_are_satisfied() {
        let mut scheduler = TimeSharedScheduler::new();
        let requests = vec![
            ShareRequest::new(1, 2, 300.),
            ShareRequest::new(2, 2, 2000.),
            ShareRequest::new(3, 2, 2000.),
        ];
        let allocations = scheduler.share(Capacity::new(3, 1000.), &requests);
        assert_relative_eq!(allocations[0].mips, 300.);
        assert_relative_eq!(allocations[1].mips, 1350.);
        assert_relative_eq!(allocations[2].mips, 1350.);
        assert_eq!(allocations[2].id, 3);
    }

    #[test]
    fn time_shared_capped_by_cores() {
        let mut scheduler = TimeSharedScheduler::new();
        let requests = vec![ShareRequest::new(1, 1, 5000.), ShareRequest::new(2, 8, 100.)];
        let allocations = scheduler.share(Capacity::new(4, 1000.), &requests);
        assert_relative_eq!(allocations[0].mips, 1000.);
        assert_relative_eq!(allocations[1].mips, 100.);
        assert_relative_eq!(scheduler.demand(Capacity::new(4, 1000.), &requests), 1100.);
    }

    #[test]
    fn time_shared_total_is_min_of_demand_and_capacity() {
        let mut scheduler = TimeSharedScheduler::new();
        let requests = (0..7)
            .map(|i| ShareRequest::new(i, 2, 150. * (i + 1) as f64))
            .collect::<Vec<_>>();
        let demanded: f64 = requests.iter().map(|r| r.mips).sum();
        for pes in 1..6 {
            let capacity = Capacity::new(pes, 500.);
            let allocations = scheduler.share(capacity, &requests);
            assert_relative_eq!(total(&allocations), demanded.min(capacity.total_mips()), epsilon = 1e-6);
            for (a, r) in allocations.iter().zip(&requests) {
                assert!(a.mips <= r.mips + 1e-9);
                assert!(a.mips > 0.);
            }
        }
    }

    #[test]
    fn space_shared_queues_and_starts_in_order() {
        let mut scheduler = SpaceSharedScheduler::new();
        let capacity = Capacity::new(2, 1000.);
        let requests = vec![
            ShareRequest::new(1, 1, 1000.),
            ShareRequest::new(2, 1, 1000.),
            ShareRequest::new(3, 1, 1000.),
        ];
        let allocations = scheduler.share(capacity, &requests);
        assert_eq!(
            allocations.iter().map(|a| a.running).collect::<Vec<_>>(),
            vec![true, true, false]
        );
        assert_relative_eq!(allocations[0].mips, 1000.);
        assert_eq!(allocations[2].mips, 0.);

        // the first consumer finishes, the waiting one takes its core
        let allocations = scheduler.share(capacity, &requests[1..]);
        assert!(allocations.iter().all(|a| a.running));
        assert_eq!(scheduler.running(), &[2, 3]);
    }

    #[test]
    fn space_shared_does_not_preempt_or_overtake() {
        let mut scheduler = SpaceSharedScheduler::new();
        let capacity = Capacity::new(4, 100.);
        let mut requests = vec![ShareRequest::new(1, 3, 300.), ShareRequest::new(2, 2, 200.)];
        scheduler.share(capacity, &requests);
        // a late single-core consumer must not overtake the queued one
        requests.push(ShareRequest::new(3, 1, 100.));
        let allocations = scheduler.share(capacity, &requests);
        assert_eq!(
            allocations.iter().map(|a| a.running).collect::<Vec<_>>(),
            vec![true, false, false]
        );
        let running_pes: u32 = allocations
            .iter()
            .zip(&requests)
            .filter(|(a, _)| a.running)
            .map(|(_, r)| r.pes)
            .sum();
        assert!(running_pes <= capacity.pes);

        requests.remove(0);
        let allocations = scheduler.share(capacity, &requests);
        assert!(allocations.iter().all(|a| a.running));
    }

    #[test]
    fn space_shared_demand_keeps_state() {
        let scheduler = SpaceSharedScheduler::new();
        let requests = vec![ShareRequest::new(1, 2, 2000.), ShareRequest::new(2, 1, 1000.)];
        assert_relative_eq!(scheduler.demand(Capacity::new(2, 1000.), &requests), 2000.);
        assert!(scheduler.running().is_empty());
    }

    #[test]
    fn limited_capacity_keeps_core_speed() {
        let mut scheduler = TimeSharedScheduler::new();
        let capacity = Capacity::new(2, 1000.).with_limit(1200.);
        let allocations = scheduler.share(capacity, &[ShareRequest::new(1, 1, 1000.), ShareRequest::new(2, 1, 1000.)]);
        assert_relative_eq!(allocations[0].mips, 600.);
        let allocations = scheduler.share(capacity, &[ShareRequest::new(1, 1, 1000.)]);
        assert_relative_eq!(allocations[0].mips, 1000.);

        let mut scheduler = SpaceSharedScheduler::new();
        let allocations = scheduler.share(capacity, &[ShareRequest::new(1, 2, 2000.)]);
        assert_relative_eq!(allocations[0].mips, 1200.);
    }

    #[test]
    fn resolver() {
        assert_eq!(
            scheduling_policy_resolver("SpaceShared").unwrap(),
            SchedulingPolicy::SpaceShared
        );
        assert!(scheduling_policy_resolver("RoundRobin").is_err());
    }
}
