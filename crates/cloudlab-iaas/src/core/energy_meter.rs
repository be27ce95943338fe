//! Energy meter calculates the host energy consumption.

/// Integrates piecewise-constant power over simulation time.
#[derive(Debug, Clone, Default)]
pub struct EnergyMeter {
    energy_consumed: f64,
    current_power: f64,
    prev_time: f64,
}

impl EnergyMeter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Invoked each time the host power consumption is changed to update the total energy consumption.
    pub fn update(&mut self, time: f64, power: f64) {
        if time > self.prev_time {
            self.energy_consumed += (time - self.prev_time) * self.current_power;
            self.prev_time = time;
        }
        self.current_power = power;
    }

    pub fn current_power(&self) -> f64 {
        self.current_power
    }

    /// Returns the energy (in joules) consumed up to `time`, including the period since the last update.
    pub fn energy_consumed(&self, time: f64) -> f64 {
        self.energy_consumed + (time - self.prev_time).max(0.) * self.current_power
    }
}
