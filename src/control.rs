use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Model time is measured in minutes; rates given per day are divided by this.
pub const MINUTES_PER_DAY: f64 = 1440.0;




/**
 * How reporting boundaries are specified: either as an explicit, strictly
 * increasing list of times, or as a fixed interval up to an end time.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reporting {
    Times { times: Vec<f64> },
    Interval { interval: f64, end: f64 },
}




/**
 * Parameters of the degree-day snow rule.
 */
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnowParameters {
    /// At or below this air temperature all precipitation is snow
    pub snow_temperature: f64,
    /// At or above this air temperature all precipitation is rain
    pub rain_temperature: f64,
    /// Melt starts above this temperature
    pub melt_temperature: f64,
    /// Melt rate per degree above the melt temperature, m / min / C
    pub melt_factor: f64,
}

impl Default for SnowParameters {
    fn default() -> Self {
        Self {
            snow_temperature: -1.0,
            rain_temperature: 3.0,
            melt_temperature: 0.0,
            melt_factor: 0.003 / MINUTES_PER_DAY,
        }
    }
}




/**
 * Immutable run configuration, captured once before the controller starts.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub start_time: f64,
    pub reporting: Reporting,
    /// Ceiling on the explicit sub-step
    pub et_step: f64,
    pub init_step: f64,
    pub max_step: f64,
    #[serde(default = "default_min_step")]
    pub min_step: f64,
    pub reltol: f64,
    pub abstol: f64,
    /// Depths below this floor carry no flux
    #[serde(default = "default_min_depth")]
    pub min_depth: f64,
    /// Clamps per evaluation above which reports carry a warning
    #[serde(default = "default_clamp_warning_rate")]
    pub clamp_warning_rate: f64,
    /// Evaluate fluxes with rayon data parallelism
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub snow: SnowParameters,
}

fn default_min_step() -> f64 {
    1e-6
}

fn default_min_depth() -> f64 {
    1e-5
}

fn default_clamp_warning_rate() -> f64 {
    0.05
}




// ============================================================================
impl Control {

    /**
     * Create a configuration with the given schedule and default solver
     * settings.
     */
    pub fn new(start_time: f64, boundaries: Vec<f64>, et_step: f64) -> Self {
        Self {
            start_time,
            reporting: Reporting::Times { times: boundaries },
            et_step,
            init_step: 1e-3,
            max_step: et_step,
            min_step: default_min_step(),
            reltol: 1e-6,
            abstol: 1e-8,
            min_depth: default_min_depth(),
            clamp_warning_rate: default_clamp_warning_rate(),
            parallel: false,
            snow: SnowParameters::default(),
        }
    }

    pub fn with_tolerances(mut self, reltol: f64, abstol: f64) -> Self {
        self.reltol = reltol;
        self.abstol = abstol;
        self
    }

    pub fn with_steps(mut self, init_step: f64, min_step: f64, max_step: f64) -> Self {
        self.init_step = init_step;
        self.min_step = min_step;
        self.max_step = max_step;
        self
    }

    pub fn with_min_depth(mut self, min_depth: f64) -> Self {
        self.min_depth = min_depth;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /**
     * Return the reporting boundaries as an explicit list.
     */
    pub fn boundaries(&self) -> Vec<f64> {
        match &self.reporting {
            Reporting::Times { times } => times.clone(),
            Reporting::Interval { interval, end } => {
                if !(*interval > 0.0) {
                    return Vec::new();
                }
                let mut times: Vec<f64> = (1..)
                    .map(|k| self.start_time + k as f64 * interval)
                    .take_while(|t| *t <= *end)
                    .collect();

                if times.last().map_or(*end > self.start_time, |t| *t < *end) {
                    times.push(*end)
                }
                times
            }
        }
    }

    pub fn end_time(&self) -> f64 {
        self.boundaries().last().cloned().unwrap_or(self.start_time)
    }

    /**
     * Check the configuration; any problem here is fatal and is detected
     * before time stepping begins.
     */
    pub fn validate(&self) -> Result<()> {
        let finite_positive = |value: f64, what: &str| {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(Error::config(format!("{} must be positive, got {}", what, value)))
            }
        };

        if !self.start_time.is_finite() {
            return Err(Error::config("start time is not finite"));
        }
        finite_positive(self.et_step, "sub-step ceiling")?;
        finite_positive(self.init_step, "initial step")?;
        finite_positive(self.min_step, "minimum step")?;
        finite_positive(self.max_step, "maximum step")?;
        finite_positive(self.abstol, "absolute tolerance")?;
        finite_positive(self.min_depth, "minimum depth")?;

        if !(self.reltol >= 0.0) {
            return Err(Error::config("relative tolerance must be non-negative"));
        }
        if self.min_step > self.max_step {
            return Err(Error::config("minimum step exceeds maximum step"));
        }

        let boundaries = self.boundaries();

        if boundaries.is_empty() {
            return Err(Error::config("no reporting boundaries"));
        }
        if boundaries.iter().any(|t| !t.is_finite()) {
            return Err(Error::config("reporting boundaries must be finite"));
        }
        if boundaries[0] < self.start_time {
            return Err(Error::config(format!(
                "first reporting boundary {} precedes start time {}",
                boundaries[0], self.start_time)));
        }
        if let Some(w) = boundaries.windows(2).find(|w| w[1] <= w[0]) {
            return Err(Error::config(format!(
                "reporting boundaries must be strictly increasing ({} then {})",
                w[0], w[1])));
        }
        Ok(())
    }
}
