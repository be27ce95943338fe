//! Power consumption models.

pub mod cpu;
pub mod cpu_models;
