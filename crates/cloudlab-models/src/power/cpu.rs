//! CPU power model trait.

use dyn_clone::{clone_trait_object, DynClone};

/// A model for estimating the power consumption of CPU based on its utilization.
/// Is also used to model the power consumption of a whole host based on its CPU utilization.
///
/// Implementations must be monotonically non-decreasing in utilization.
pub trait CpuPowerModel: DynClone {
    /// Returns CPU power consumption in W.
    ///
    /// CPU utilization should be passed as a float in 0.0-1.0 range, values outside are clamped.
    fn get_power(&self, utilization: f64) -> f64;
}

clone_trait_object!(CpuPowerModel);

pub(crate) fn clamp_utilization(utilization: f64) -> f64 {
    utilization.clamp(0., 1.)
}
