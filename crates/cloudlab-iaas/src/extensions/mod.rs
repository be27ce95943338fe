//! Workload intake and result reporting built on top of the core.

pub mod report;
pub mod workload;
