//! Host utilization history.

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct UtilizationSample {
    pub time: f64,
    pub utilization: f64,
}

/// Ordered series of utilization samples of one host.
///
/// The current utilization is the mean of the last `window` samples, so with the default window of one sample
/// it is just the most recent value.
#[derive(Clone, Debug)]
pub struct UtilizationHistory {
    samples: Vec<UtilizationSample>,
    window: usize,
}

impl UtilizationHistory {
    pub fn new(window: usize) -> Self {
        Self {
            samples: Vec::new(),
            window: window.max(1),
        }
    }

    /// Appends a sample. Samples must be recorded in non-decreasing time order.
    pub fn record(&mut self, time: f64, utilization: f64) {
        debug_assert!(self.samples.last().map_or(true, |s| s.time <= time));
        self.samples.push(UtilizationSample { time, utilization });
    }

    pub fn current(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.;
        }
        let from = self.samples.len().saturating_sub(self.window);
        let window = &self.samples[from..];
        window.iter().map(|s| s.utilization).sum::<f64>() / window.len() as f64
    }

    pub fn is_over_utilized(&self, threshold: f64) -> bool {
        self.current() > threshold
    }

    pub fn is_under_utilized(&self, threshold: f64) -> bool {
        self.current() < threshold
    }

    pub fn samples(&self) -> &[UtilizationSample] {
        &self.samples
    }

    pub fn last(&self) -> Option<&UtilizationSample> {
        self.samples.last()
    }
}
