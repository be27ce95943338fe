//! Simulation of a cloud data center assembled from configuration.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use sugars::{rc, refcell};

use cloudlab_core::{Id, Simulation};

use crate::core::allocation_policy::VmAllocationPolicy;
use crate::core::broker::Broker;
use crate::core::capacity_scheduler::scheduling_policy_resolver;
use crate::core::cloudlet::Cloudlet;
use crate::core::config::{HostConfig, SimulationConfig};
use crate::core::datacenter::{Datacenter, DatacenterStats};
use crate::core::error::ConfigError;
use crate::core::host::Host;
use crate::core::power_model::power_model_resolver;
use crate::core::vm::VmSpec;
use crate::extensions::report::{CloudletReport, HostReport};
use crate::extensions::workload::{CloudletFactory, TaskEvent, TaskEventKind};

/// Entry point of the data center simulation.
///
/// Creates the datacenter with hosts from the config and lets the user add brokers, VMs and cloudlets
/// before running the simulation.
pub struct CloudSimulation {
    datacenter: Rc<RefCell<Datacenter>>,
    datacenter_id: Id,
    brokers: BTreeMap<Id, Rc<RefCell<Broker>>>,
    next_vm_id: u32,
    sim: Simulation,
    sim_config: SimulationConfig,
}

impl CloudSimulation {
    pub fn new(mut sim: Simulation, sim_config: SimulationConfig) -> Result<Self, ConfigError> {
        sim_config.validate()?;
        let policy = VmAllocationPolicy::from_config(&sim_config)?;
        let datacenter = rc!(refcell!(Datacenter::new(
            policy,
            &sim_config,
            sim.create_context("datacenter")
        )));
        let datacenter_id = sim.add_handler("datacenter", datacenter.clone());
        let mut cloud = Self {
            datacenter,
            datacenter_id,
            brokers: BTreeMap::new(),
            next_vm_id: 0,
            sim,
            sim_config,
        };
        for host_config in cloud.sim_config.hosts.clone() {
            for host in cloud.build_hosts(&host_config)? {
                cloud.add_host(host);
            }
        }
        Ok(cloud)
    }

    fn build_hosts(&self, config: &HostConfig) -> Result<Vec<Host>, ConfigError> {
        let scheduler = scheduling_policy_resolver(config.vm_scheduler.as_deref().unwrap_or("TimeShared"))?;
        let power_model = config.power_model.as_deref().map(power_model_resolver).transpose()?;
        let count = config.count.unwrap_or(1);
        let first_id = self.datacenter.borrow().hosts().len() as u32;
        let mut hosts = Vec::new();
        for i in 0..count {
            let name = match (&config.name, &config.name_prefix) {
                (Some(name), _) if count == 1 => name.clone(),
                (_, Some(prefix)) => format!("{}{}", prefix, i),
                _ => format!("host{}", first_id + i),
            };
            let mut host = Host::new(
                0,
                &name,
                config.pes,
                config.pe_mips,
                config.ram,
                config.bw,
                config.storage,
                scheduler.create(),
            )
            .with_utilization_window(self.sim_config.migration.utilization_window);
            if let Some(model) = &power_model {
                host = host.with_power_model(model.clone());
            }
            hosts.push(host);
        }
        Ok(hosts)
    }

    /// Adds a host to the datacenter, returns its ID.
    pub fn add_host(&mut self, host: Host) -> u32 {
        self.datacenter.borrow_mut().add_host(host)
    }

    /// Creates a broker with the given name, returns its component ID.
    pub fn add_broker(&mut self, name: &str) -> Id {
        let broker = rc!(refcell!(Broker::new(
            self.datacenter_id,
            &self.sim_config,
            self.sim.create_context(name)
        )));
        let id = self.sim.add_handler(name, broker.clone());
        self.brokers.insert(id, broker);
        id
    }

    /// Submits the VM through the broker. Returns `false` if there is no such broker.
    pub fn submit_vm(&mut self, broker_id: Id, spec: VmSpec) -> bool {
        let Some(broker) = self.brokers.get(&broker_id) else {
            return false;
        };
        self.next_vm_id = self.next_vm_id.max(spec.id + 1);
        broker.borrow_mut().submit_vm(spec);
        true
    }

    /// Submits VMs described in the config, returns their IDs.
    pub fn submit_vms_from_config(&mut self, broker_id: Id) -> Result<Vec<u32>, ConfigError> {
        let mut specs = Vec::new();
        for vm_config in &self.sim_config.vms {
            let policy = scheduling_policy_resolver(vm_config.cloudlet_scheduler.as_deref().unwrap_or("TimeShared"))?;
            for _ in 0..vm_config.count.unwrap_or(1) {
                let id = self.next_vm_id + specs.len() as u32;
                specs.push(
                    VmSpec::new(
                        id,
                        vm_config.pes,
                        vm_config.mips,
                        vm_config.ram,
                        vm_config.bw,
                        vm_config.size,
                    )
                    .with_cloudlet_scheduler(policy),
                );
            }
        }
        let ids = specs.iter().map(|s| s.id).collect();
        for spec in specs {
            self.submit_vm(broker_id, spec);
        }
        Ok(ids)
    }

    /// Submits the cloudlet through the broker. Returns `false` if there is no such broker.
    pub fn submit_cloudlet(&mut self, broker_id: Id, cloudlet: Cloudlet) -> bool {
        match self.brokers.get(&broker_id) {
            Some(broker) => {
                broker.borrow_mut().submit_cloudlet(cloudlet);
                true
            }
            None => false,
        }
    }

    /// Schedules task events of a workload on the broker.
    ///
    /// Submitted tasks are converted to cloudlets by `factory` at their timestamps. Finish and fail events refer
    /// to cloudlets by the unique task ID, so the factory is expected to use it as the cloudlet ID.
    pub fn submit_task_events(&mut self, broker_id: Id, events: &[TaskEvent], factory: &CloudletFactory) -> bool {
        let Some(broker) = self.brokers.get(&broker_id) else {
            return false;
        };
        let mut broker = broker.borrow_mut();
        for event in events {
            match event.kind {
                TaskEventKind::Submit => broker.submit_cloudlet_at(factory(&event.task), event.task.timestamp),
                kind => broker.schedule_task_end(event.task.unique_task_id(), kind, event.task.timestamp),
            }
        }
        true
    }

    pub fn datacenter(&self) -> Rc<RefCell<Datacenter>> {
        self.datacenter.clone()
    }

    pub fn datacenter_id(&self) -> Id {
        self.datacenter_id
    }

    pub fn broker(&self, broker_id: Id) -> Option<Rc<RefCell<Broker>>> {
        self.brokers.get(&broker_id).cloned()
    }

    pub fn stats(&self) -> DatacenterStats {
        self.datacenter.borrow().stats().clone()
    }

    /// Total energy consumed by the hosts so far.
    pub fn energy_consumed(&self) -> f64 {
        self.datacenter.borrow().energy_consumed()
    }

    /// Report rows for finished cloudlets of the broker.
    pub fn cloudlet_reports(&self, broker_id: Id) -> Vec<CloudletReport> {
        let Some(broker) = self.brokers.get(&broker_id) else {
            return Vec::new();
        };
        let broker = broker.borrow();
        broker
            .finished_cloudlets()
            .iter()
            .map(|c| {
                let vm_size = c.vm_id.and_then(|id| broker.vm(id)).map(|r| r.spec().size);
                CloudletReport::new(c, vm_size)
            })
            .collect()
    }

    pub fn host_reports(&self) -> Vec<HostReport> {
        let time = self.sim.time();
        self.datacenter
            .borrow()
            .hosts()
            .values()
            .map(|h| HostReport::new(h, time))
            .collect()
    }

    pub fn sim_config(&self) -> &SimulationConfig {
        &self.sim_config
    }

    // SIMULATION CONTROL //////////////////////////////////////////////////////////////////////////

    pub fn step(&mut self) -> bool {
        self.sim.step()
    }

    pub fn steps(&mut self, step_count: u64) -> bool {
        self.sim.steps(step_count)
    }

    pub fn step_until_no_events(&mut self) {
        self.sim.step_until_no_events()
    }

    pub fn step_for_duration(&mut self, duration: f64) -> bool {
        self.sim.step_for_duration(duration)
    }

    pub fn step_until_time(&mut self, time: f64) -> bool {
        self.sim.step_until_time(time)
    }

    pub fn current_time(&self) -> f64 {
        self.sim.time()
    }

    pub fn event_count(&self) -> u64 {
        self.sim.event_count()
    }
}
