//! Linear CPU power model.

use crate::power::cpu::{clamp_utilization, CpuPowerModel};

/// A power model based on linear interpolation between the idle and maximum power consumption values:
/// `idle_power + (max_power - idle_power) * utilization`.
#[derive(Clone)]
pub struct LinearCpuPowerModel {
    idle_power: f64,
    factor: f64,
}

impl LinearCpuPowerModel {
    /// Creates a linear power model.
    ///
    /// * `idle_power` - The power consumption in W at 0% utilization.
    /// * `max_power` - The power consumption in W at 100% utilization.
    pub fn new(idle_power: f64, max_power: f64) -> Self {
        Self {
            idle_power,
            factor: max_power - idle_power,
        }
    }

    /// Creates a linear power model where the idle power is a fraction of the maximum power.
    pub fn with_static_fraction(max_power: f64, static_fraction: f64) -> Self {
        Self::new(max_power * static_fraction, max_power)
    }
}

impl CpuPowerModel for LinearCpuPowerModel {
    fn get_power(&self, utilization: f64) -> f64 {
        self.idle_power + self.factor * clamp_utilization(utilization)
    }
}
