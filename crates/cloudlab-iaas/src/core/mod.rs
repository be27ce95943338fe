//! Data center entities, resource management and allocation policies.

pub mod allocation_policy;
pub mod broker;
pub mod capacity_scheduler;
pub mod cloudlet;
pub mod cloudlet_scheduler;
pub mod common;
pub mod config;
pub mod datacenter;
pub mod energy_meter;
pub mod error;
pub mod events;
pub mod host;
pub mod migration_policy;
pub mod power_model;
pub mod provisioner;
pub mod resource_pool;
pub mod utilization_history;
pub mod vm;
pub mod vm_placement_algorithm;
pub mod vm_placement_algorithms;
pub mod vm_selection_policy;
