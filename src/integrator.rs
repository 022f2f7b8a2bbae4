//! Conversion of raw sensor pulses into a flow rate and an accumulated volume.
//!
//! Every sampling period the [`Integrator`] drains the [`PulseCounter`], measures how
//! long the window actually lasted, and derives:
//!
//! ```text
//! flow_rate    = (1000 / dt_ms) * pulses / calibration     [L/min]
//! total_volume += flow_rate / 60 * dt_ms / 1000             [L]
//! ```

use crate::{flow::PulseCounter, report::Reading};

#[derive(Debug, Clone)]
pub struct Integrator {
    /// Pulse frequency (Hz) per L/min.
    calibration: f64,
    /// Boot-relative millisecond timestamp of the current window start.
    window_start: u64,
    flow_rate: f64,
    total_volume: f64,
}

impl Integrator {
    /// Starts the first window at `now_ms`.
    pub fn new(calibration: f64, now_ms: u64) -> Self {
        Self { calibration, window_start: now_ms, flow_rate: 0.0, total_volume: 0.0 }
    }

    /// Closes the current window at `now_ms` and opens the next one.
    ///
    /// Returns `None` without touching the counter when no time has elapsed (or the
    /// clock went backwards); the pulses then roll over into the next cycle.
    pub fn sample(&mut self, counter: &PulseCounter, now_ms: u64) -> Option<Reading> {
        let dt_ms = now_ms.checked_sub(self.window_start).filter(|&dt| dt > 0)?;
        let pulses = counter.take();
        self.window_start = now_ms;

        let dt_ms = dt_ms as f64;
        self.flow_rate = 1000.0 / dt_ms * f64::from(pulses) / self.calibration;
        self.total_volume += self.flow_rate / 60.0 * (dt_ms / 1000.0);
        Some(self.reading())
    }

    pub fn reading(&self) -> Reading {
        Reading { flow_rate: self.flow_rate, total_volume: self.total_volume }
    }

    #[cfg(test)]
    fn window_start(&self) -> u64 {
        self.window_start
    }
}
