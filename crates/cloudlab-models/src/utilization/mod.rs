//! Resource utilization models.
//!
//! A utilization model defines which fraction of the requested resource a task actually uses at the moment.
//! Tasks carry separate models for CPU, RAM and bandwidth.

use dyn_clone::{clone_trait_object, DynClone};

/// Resource utilization as a function of time.
///
/// `time` is the current simulation time and `time_from_start` is the time elapsed since the task started
/// its execution, which allows to model load peaks at the beginning of execution.
/// Returned values are fractions in 0.0-1.0 range.
pub trait UtilizationModel: DynClone {
    /// Returns the current resource utilization.
    fn get_utilization(&self, time: f64, time_from_start: f64) -> f64;
}

clone_trait_object!(UtilizationModel);

/// The task always uses all of the requested resource.
#[derive(Clone, Default)]
pub struct FullUtilizationModel;

impl FullUtilizationModel {
    /// Creates the model.
    pub fn new() -> Self {
        Self
    }
}

impl UtilizationModel for FullUtilizationModel {
    fn get_utilization(&self, _time: f64, _time_from_start: f64) -> f64 {
        1.
    }
}

/// The task uses a constant fraction of the requested resource.
#[derive(Clone)]
pub struct ConstantUtilizationModel {
    utilization: f64,
}

impl ConstantUtilizationModel {
    /// Creates the model, the utilization is clamped to 0.0-1.0 range.
    pub fn new(utilization: f64) -> Self {
        Self {
            utilization: utilization.clamp(0., 1.),
        }
    }
}

impl UtilizationModel for ConstantUtilizationModel {
    fn get_utilization(&self, _time: f64, _time_from_start: f64) -> f64 {
        self.utilization
    }
}

/// The utilization grows linearly with the simulation time: `initial + increment * time`,
/// limited by `max`.
///
/// With zero increment the model is equivalent to [`ConstantUtilizationModel`].
#[derive(Clone)]
pub struct ArithmeticProgressionUtilizationModel {
    initial: f64,
    increment: f64,
    max: f64,
}

impl ArithmeticProgressionUtilizationModel {
    /// Creates the model.
    ///
    /// * `initial` - utilization at time 0.
    /// * `increment` - utilization growth per second of simulation time.
    pub fn new(initial: f64, increment: f64) -> Self {
        Self {
            initial: initial.clamp(0., 1.),
            increment,
            max: 1.,
        }
    }

    /// Limits the utilization by the specified value.
    pub fn with_max(mut self, max: f64) -> Self {
        self.max = max.clamp(0., 1.);
        self
    }
}

impl UtilizationModel for ArithmeticProgressionUtilizationModel {
    fn get_utilization(&self, time: f64, _time_from_start: f64) -> f64 {
        (self.initial + self.increment * time).clamp(0., self.max)
    }
}
