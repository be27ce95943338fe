use std::collections::BTreeSet;

use approx::assert_relative_eq;

use cloudlab_core::{Id, Simulation};
use cloudlab_models::utilization::ArithmeticProgressionUtilizationModel;

use cloudlab_iaas::core::cloudlet::Cloudlet;
use cloudlab_iaas::core::config::SimulationConfig;
use cloudlab_iaas::core::vm::{VmSpec, VmStatus};
use cloudlab_iaas::simulation::CloudSimulation;

fn name_wrapper(file_name: &str) -> String {
    format!("test-configs/{}", file_name)
}

fn cloud_sim(sim_config: SimulationConfig) -> CloudSimulation {
    CloudSimulation::new(Simulation::new(123), sim_config).unwrap()
}

// Two hosts with two 1000 MIPS cores each, first fit puts both single-core VMs on the first host.
// VM 0 is fully loaded, the load of VM 1 grows as 0.2 + 0.1 * t up to 0.7.
// At the first migration check (t = 5) the first host has utilization (1000 + 700) / 2000 = 0.85 > 0.8,
// so the least loaded VM 1 is moved to the idle second host. Migration of 1024 MB takes 1.024 s at 1000 MB/s.
fn overloaded_host_scenario(cloud_sim: &mut CloudSimulation) -> Id {
    let broker = cloud_sim.add_broker("broker");
    let vms = cloud_sim.submit_vms_from_config(broker).unwrap();
    assert_eq!(vms, vec![0, 1]);
    cloud_sim.submit_cloudlet(broker, Cloudlet::new(0, 1_000_000, 1).with_vm(0));
    cloud_sim.submit_cloudlet(
        broker,
        Cloudlet::new(1, 1_000_000, 1)
            .with_vm(1)
            .with_cpu_model(Box::new(ArithmeticProgressionUtilizationModel::new(0.2, 0.1).with_max(0.7))),
    );
    broker
}

fn check_single_residency(cloud_sim: &CloudSimulation) {
    let dc = cloud_sim.datacenter();
    let dc = dc.borrow();
    let mut seen = BTreeSet::new();
    for host in dc.hosts().values() {
        for vm_id in host.vms() {
            assert!(seen.insert(*vm_id), "vm {} is resident on two hosts", vm_id);
            assert_eq!(dc.vm(*vm_id).unwrap().host(), host.id);
        }
    }
    assert_eq!(seen.len(), dc.vms().len());
}

#[test]
fn test_config_hosts() {
    let sim_config = SimulationConfig::from_file(&name_wrapper("config_migration.yaml")).unwrap();
    assert_eq!(sim_config.number_of_hosts(), 2);
    let cloud_sim = cloud_sim(sim_config);
    let dc = cloud_sim.datacenter();
    let names = dc.borrow().hosts().values().map(|h| h.name.clone()).collect::<Vec<_>>();
    assert_eq!(names, vec!["host0", "host1"]);
    assert!(dc.borrow().allocation_policy().migration_enabled());
}

#[test]
fn test_overloaded_host_migration() {
    let sim_config = SimulationConfig::from_file(&name_wrapper("config_migration.yaml")).unwrap();
    let mut cloud_sim = cloud_sim(sim_config);
    let broker = overloaded_host_scenario(&mut cloud_sim);

    cloud_sim.step_until_time(1.);
    {
        let dc = cloud_sim.datacenter();
        let dc = dc.borrow();
        assert_eq!(dc.vm(0).unwrap().host(), 0);
        assert_eq!(dc.vm(1).unwrap().host(), 0);
        assert_relative_eq!(dc.host(0).unwrap().utilization(), 0.6);
    }

    cloud_sim.step_until_time(5.5);
    assert_eq!(cloud_sim.stats().migrations_started, 1);
    {
        let dc = cloud_sim.datacenter();
        let dc = dc.borrow();
        let vm = dc.vm(1).unwrap();
        let migration = vm.migration().unwrap();
        assert_eq!((migration.source, migration.target), (0, 1));
        assert_eq!(migration.started_at, 5.);
        // the VM keeps running on the source host until the transfer is over
        assert_eq!(vm.host(), 0);
        assert!(dc.host(0).unwrap().has_vm(1));
        assert!(!dc.host(1).unwrap().has_vm(1));
        assert!(dc.host(1).unwrap().incoming().contains(&1));
        assert_relative_eq!(vm.allocated_mips(), 700.);
    }
    assert_eq!(
        cloud_sim.broker(broker).unwrap().borrow().vm_status(1),
        Some(VmStatus::Migrating)
    );
    check_single_residency(&cloud_sim);

    cloud_sim.step_until_time(6.);
    assert_eq!(cloud_sim.stats().migrations_completed, 0);

    cloud_sim.step_until_time(6.1);
    assert_eq!(cloud_sim.stats().migrations_completed, 1);
    {
        let dc = cloud_sim.datacenter();
        let dc = dc.borrow();
        assert_eq!(dc.vm(1).unwrap().host(), 1);
        assert!(dc.vm(1).unwrap().migration().is_none());
        assert!(!dc.host(0).unwrap().has_vm(1));
        assert!(dc.host(1).unwrap().has_vm(1));
        assert!(dc.host(1).unwrap().incoming().is_empty());
        assert_relative_eq!(dc.host(0).unwrap().utilization(), 0.5);
        assert_relative_eq!(dc.host(1).unwrap().utilization(), 0.35);
        // 200 MIPS for 5 s and then 700 MIPS during the transfer
        assert_relative_eq!(
            dc.vm(1).unwrap().cloudlets().get(1).unwrap().executed(),
            1000. + 700. * 1.024,
            epsilon = 1e-6
        );
    }
    {
        let broker = cloud_sim.broker(broker).unwrap();
        let broker = broker.borrow();
        let record = broker.vm(1).unwrap();
        assert_eq!(record.status(), VmStatus::Placed);
        assert_eq!(record.host(), Some(1));
        assert_eq!(record.migrations(), 1);
        assert_eq!(broker.vm(0).unwrap().migrations(), 0);
    }
    check_single_residency(&cloud_sim);

    // both hosts stay within thresholds, no more migrations
    cloud_sim.step_until_time(30.);
    assert_eq!(cloud_sim.stats().migrations_started, 1);
    assert_eq!(cloud_sim.stats().migrations_failed, 0);
}

#[test]
fn test_no_dual_residency_at_any_step() {
    let sim_config = SimulationConfig::from_file(&name_wrapper("config_migration.yaml")).unwrap();
    let mut cloud_sim = cloud_sim(sim_config);
    overloaded_host_scenario(&mut cloud_sim);
    while cloud_sim.current_time() < 20. && cloud_sim.step() {
        check_single_residency(&cloud_sim);
    }
    assert_eq!(cloud_sim.stats().migrations_completed, 1);
}

#[test]
// Without migration the overloaded host keeps both VMs.
fn test_migration_disabled() {
    let mut sim_config = SimulationConfig::from_file(&name_wrapper("config_migration.yaml")).unwrap();
    sim_config.migration.enabled = false;
    let mut cloud_sim = cloud_sim(sim_config);
    overloaded_host_scenario(&mut cloud_sim);
    cloud_sim.step_until_time(30.);
    assert_eq!(cloud_sim.stats().migrations_started, 0);
    let dc = cloud_sim.datacenter();
    assert_relative_eq!(dc.borrow().host(0).unwrap().utilization(), 0.85);
}

#[test]
// Cloudlet 0 finishes at t = 6 and leaves the first host idle, cloudlet 1 finishes on the second host
// at t = 5 + 4500 / 700 = 11.43. At t = 10 the idle first host is underloaded and drained to the second one.
fn test_underloaded_host_is_drained() {
    let sim_config = SimulationConfig::from_file(&name_wrapper("config_migration.yaml")).unwrap();
    let mut cloud_sim = cloud_sim(sim_config);
    let broker = cloud_sim.add_broker("broker");
    cloud_sim.submit_vms_from_config(broker).unwrap();
    cloud_sim.submit_cloudlet(broker, Cloudlet::new(0, 6000, 1).with_vm(0));
    cloud_sim.submit_cloudlet(
        broker,
        Cloudlet::new(1, 5500, 1)
            .with_vm(1)
            .with_cpu_model(Box::new(ArithmeticProgressionUtilizationModel::new(0.2, 0.1).with_max(0.7))),
    );

    cloud_sim.step_until_time(10.5);
    {
        let dc = cloud_sim.datacenter();
        let dc = dc.borrow();
        let migration = dc.vm(0).unwrap().migration().unwrap();
        assert_eq!((migration.source, migration.target), (0, 1));
    }

    cloud_sim.step_until_no_events();
    assert_relative_eq!(cloud_sim.current_time(), 5. + 4500. / 700., epsilon = 1e-6);
    let stats = cloud_sim.stats();
    assert_eq!(stats.migrations_started, 2);
    assert_eq!(stats.migrations_completed, 2);
    assert_eq!(stats.vms_destroyed, 2);

    let broker = cloud_sim.broker(broker).unwrap();
    let broker = broker.borrow();
    let hosts = broker
        .finished_cloudlets()
        .iter()
        .map(|c| (c.id, c.host_id()))
        .collect::<Vec<_>>();
    assert_eq!(hosts, vec![(0, Some(0)), (1, Some(1))]);
    assert_eq!(broker.vm(0).unwrap().host(), Some(1));
    assert_eq!(broker.vm(0).unwrap().migrations(), 1);

    let dc = cloud_sim.datacenter();
    let dc = dc.borrow();
    assert!(dc.vms().is_empty());
    assert!(dc.hosts().values().all(|h| h.vms().is_empty() && h.incoming().is_empty()));
}

#[test]
// While VM 1 is being transferred to the second host, a new VM which does not fit into the memory of the first
// host takes the second one. When the transfer is over the target has no room left and VM 1 stays on the source.
fn test_target_loses_capacity_during_migration() {
    let sim_config = SimulationConfig::from_file(&name_wrapper("config_migration.yaml")).unwrap();
    let mut cloud_sim = cloud_sim(sim_config);
    let broker = overloaded_host_scenario(&mut cloud_sim);

    cloud_sim.step_until_time(5.5);
    assert_eq!(cloud_sim.stats().migrations_started, 1);
    cloud_sim.submit_vm(broker, VmSpec::new(2, 1, 1000., 3500, 100, 1000));
    cloud_sim.step_until_time(5.6);
    {
        let dc = cloud_sim.datacenter();
        let dc = dc.borrow();
        assert_eq!(dc.vm(2).unwrap().host(), 1);
        assert!(dc.vm(1).unwrap().migration().is_some());
        assert_eq!(dc.migration_bandwidth_available(), 9000);
    }

    cloud_sim.step_until_time(6.1);
    let stats = cloud_sim.stats();
    assert_eq!(stats.migrations_completed, 0);
    assert_eq!(stats.migrations_failed, 1);
    {
        let dc = cloud_sim.datacenter();
        let dc = dc.borrow();
        let vm = dc.vm(1).unwrap();
        assert_eq!(vm.host(), 0);
        assert!(vm.migration().is_none());
        assert!(dc.host(0).unwrap().has_vm(1));
        assert!(!dc.host(1).unwrap().has_vm(1));
        assert!(dc.host(1).unwrap().incoming().is_empty());
        assert_eq!(dc.migration_bandwidth_available(), 10000);
    }
    {
        let broker = cloud_sim.broker(broker).unwrap();
        let broker = broker.borrow();
        let record = broker.vm(1).unwrap();
        assert_eq!(record.status(), VmStatus::Placed);
        assert_eq!(record.host(), Some(0));
        assert_eq!(record.migrations(), 0);
    }
    check_single_residency(&cloud_sim);
}

#[test]
// Six single-core VMs overload the first time-shared host, so two of them are planned to move at t = 5.
// The bandwidth pool fits a single transfer and the second migration is deferred.
fn test_exhausted_bandwidth_pool_defers_migration() {
    let mut sim_config = SimulationConfig::from_file(&name_wrapper("config_migration.yaml")).unwrap();
    sim_config.migration.bandwidth_pool = 1000;
    let mut cloud_sim = cloud_sim(sim_config);
    let broker = cloud_sim.add_broker("broker");
    for id in 0..6 {
        cloud_sim.submit_vm(broker, VmSpec::new(id, 1, 1000., 512, 100, 1000));
        cloud_sim.submit_cloudlet(broker, Cloudlet::new(id as u64, 1_000_000, 1).with_vm(id));
    }

    cloud_sim.step_until_time(1.);
    {
        let dc = cloud_sim.datacenter();
        let dc = dc.borrow();
        assert_eq!(dc.host(0).unwrap().vms().len(), 6);
        assert_relative_eq!(dc.host(0).unwrap().utilization(), 1., epsilon = 1e-9);
        assert_relative_eq!(dc.vm(0).unwrap().allocated_mips(), 2000. / 6., epsilon = 1e-9);
    }

    cloud_sim.step_until_time(5.1);
    let stats = cloud_sim.stats();
    assert_eq!(stats.migrations_started, 1);
    assert_eq!(stats.migrations_deferred, 1);
    {
        let dc = cloud_sim.datacenter();
        let dc = dc.borrow();
        let migration = dc.vm(0).unwrap().migration().unwrap();
        assert_eq!((migration.target, migration.bandwidth), (1, 1000));
        assert!(dc.vm(1).unwrap().migration().is_none());
        assert_eq!(dc.migration_bandwidth_available(), 0);
    }

    // 512 MB at 1000 MB/s
    cloud_sim.step_until_time(5.6);
    assert_eq!(cloud_sim.stats().migrations_completed, 1);
    let dc = cloud_sim.datacenter();
    let dc = dc.borrow();
    assert_eq!(dc.vm(0).unwrap().host(), 1);
    assert_eq!(dc.vm(1).unwrap().host(), 0);
    assert_eq!(dc.migration_bandwidth_available(), 1000);
}

#[test]
// The VM migration is cancelled when the broker destroys its VMs before the transfer completes.
fn test_destroy_during_migration() {
    let mut sim_config = SimulationConfig::from_file(&name_wrapper("config_migration.yaml")).unwrap();
    // 1024 MB at 10 MB/s takes 102.4 s
    sim_config.migration.bandwidth = 10;
    let mut cloud_sim = cloud_sim(sim_config);
    let broker = cloud_sim.add_broker("broker");
    cloud_sim.submit_vms_from_config(broker).unwrap();
    cloud_sim.submit_cloudlet(broker, Cloudlet::new(0, 10000, 1).with_vm(0));
    cloud_sim.submit_cloudlet(
        broker,
        Cloudlet::new(1, 10000, 1)
            .with_vm(1)
            .with_cpu_model(Box::new(ArithmeticProgressionUtilizationModel::new(0.2, 0.1).with_max(0.7))),
    );

    cloud_sim.step_until_no_events();
    let stats = cloud_sim.stats();
    assert_eq!(stats.migrations_started, 1);
    assert_eq!(stats.migrations_completed, 0);
    assert_eq!(stats.migrations_cancelled, 1);
    assert_eq!(stats.vms_destroyed, 2);
    let dc = cloud_sim.datacenter();
    let dc = dc.borrow();
    assert!(dc.hosts().values().all(|h| h.vms().is_empty() && h.incoming().is_empty()));
    let broker = cloud_sim.broker(broker).unwrap();
    let broker = broker.borrow();
    assert_eq!(broker.vm_status(1), Some(VmStatus::Destroyed));
    assert_eq!(broker.vm(1).unwrap().migrations(), 0);
    assert_eq!(broker.vm(1).unwrap().host(), Some(0));
}
