use std::sync::atomic::{AtomicU64, Ordering};
use serde::Serialize;




/**
 * Per-element fields that are not integrated by the stiff solver but are
 * needed to evaluate fluxes. Storages are in metres of water, rates in
 * metres per minute. Only the explicit process updater writes to these.
 */
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diagnostics {
    /// Canopy interception storage
    pub canopy: Vec<f64>,
    /// Snowpack water equivalent
    pub snow: Vec<f64>,
    /// Throughfall plus melt reaching the ground surface
    pub net_precipitation: Vec<f64>,
    /// Evaporation from the canopy (et0)
    pub canopy_evaporation: Vec<f64>,
    /// Transpiration from the root zone (et1)
    pub transpiration: Vec<f64>,
    /// Evaporation from the ground surface and soil (et2)
    pub ground_evaporation: Vec<f64>,
    pub infiltration_capacity: Vec<f64>,
}

impl Diagnostics {
    pub fn new(num_elements: usize) -> Self {
        let zeros = vec![0.0; num_elements];
        Self {
            canopy: zeros.clone(),
            snow: zeros.clone(),
            net_precipitation: zeros.clone(),
            canopy_evaporation: zeros.clone(),
            transpiration: zeros.clone(),
            ground_evaporation: zeros.clone(),
            infiltration_capacity: zeros,
        }
    }

    pub fn num_elements(&self) -> usize {
        self.canopy.len()
    }

    /// Water held outside the state vector, m^3.
    pub fn stored_volume(&self, areas: impl Iterator<Item = f64>) -> f64 {
        areas
            .zip(self.canopy.iter().zip(&self.snow))
            .map(|(a, (c, s))| a * (c + s))
            .sum()
    }
}




/**
 * Counters of numerical corrections made while evaluating fluxes. The
 * evaluator only needs a shared reference to record into these, so they do
 * not break its purity with respect to the derivative.
 */
#[derive(Debug, Default)]
pub struct NumericalCounters {
    evaluations: AtomicU64,
    clamped: AtomicU64,
    floored: AtomicU64,
}

impl NumericalCounters {
    pub fn record(&self, clamped: u64, floored: u64) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        self.clamped.fetch_add(clamped, Ordering::Relaxed);
        self.floored.fetch_add(floored, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Tally {
        Tally {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            clamped: self.clamped.load(Ordering::Relaxed),
            floored: self.floored.load(Ordering::Relaxed),
        }
    }
}




/**
 * A reading of the numerical counters.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub evaluations: u64,
    /// Negative storages read from the state and treated as empty
    pub clamped: u64,
    /// Flux terms zeroed because their carrier depth was below the floor
    pub floored: u64,
}

impl Tally {
    pub fn since(&self, earlier: &Tally) -> Tally {
        Tally {
            evaluations: self.evaluations - earlier.evaluations,
            clamped: self.clamped - earlier.clamped,
            floored: self.floored - earlier.floored,
        }
    }

    pub fn clamp_rate(&self) -> f64 {
        if self.evaluations == 0 {
            0.0
        } else {
            self.clamped as f64 / self.evaluations as f64
        }
    }
}




/**
 * Numerical health attached to every report.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct NumericalSummary {
    /// Corrections since the previous report
    pub interval: Tally,
    /// Corrections since the start of the run
    pub total: Tally,
    /// Whether the clamp rate over the interval exceeded the warning level
    pub warning: bool,
}

impl NumericalSummary {
    pub fn new(interval: Tally, total: Tally, warning_rate: f64) -> Self {
        Self {
            interval,
            total,
            warning: interval.clamp_rate() > warning_rate,
        }
    }
}
