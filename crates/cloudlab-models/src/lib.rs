#![warn(missing_docs)]
//! Models used by the data center simulation: host power consumption and resource utilization of tasks.

pub mod power;
pub mod utilization;
