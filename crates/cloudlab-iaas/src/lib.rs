//! Simulation of a cloud data center: physical hosts running virtual machines which execute tasks (cloudlets),
//! with power-aware VM placement and threshold-based dynamic VM migration.
//!
//! The entry point is [`CloudSimulation`](simulation::CloudSimulation), which wires a [`Datacenter`](core::datacenter::Datacenter)
//! and a set of [`Broker`](core::broker::Broker)s into a discrete-event simulation.

pub mod core;
pub mod extensions;
pub mod simulation;
