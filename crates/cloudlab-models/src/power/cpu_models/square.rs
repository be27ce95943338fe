//! Square CPU power model.

use crate::power::cpu::{clamp_utilization, CpuPowerModel};

/// A power model where the dynamic part of consumption grows as the square of utilization.
#[derive(Clone)]
pub struct SquareCpuPowerModel {
    idle_power: f64,
    factor: f64,
}

impl SquareCpuPowerModel {
    /// Creates a square power model.
    ///
    /// * `idle_power` - The power consumption in W at 0% utilization.
    /// * `max_power` - The power consumption in W at 100% utilization.
    pub fn new(idle_power: f64, max_power: f64) -> Self {
        Self {
            idle_power,
            factor: max_power - idle_power,
        }
    }
}

impl CpuPowerModel for SquareCpuPowerModel {
    fn get_power(&self, utilization: f64) -> f64 {
        self.idle_power + self.factor * clamp_utilization(utilization).powi(2)
    }
}
