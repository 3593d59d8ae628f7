use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};




/**
 * Meteorological conditions at one station and time. Rates are m / min,
 * temperature in degrees C.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Meteo {
    pub precipitation: f64,
    pub temperature: f64,
    pub potential_et: f64,
    pub leaf_area_index: f64,
}




/**
 * A time series, linearly interpolated between samples and held constant
 * outside them.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub times: Vec<f64>,
    pub values: Vec<f64>,
}

impl Series {
    pub fn constant(value: f64) -> Self {
        Self {
            times: vec![0.0],
            values: vec![value],
        }
    }

    pub fn new(times: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        let series = Self { times, values };
        series.validate("series")?;
        Ok(series)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.times.is_empty() {
            return Err(Error::config(format!("{} is empty", name)));
        }
        if self.times.len() != self.values.len() {
            return Err(Error::config(format!(
                "{} has {} times but {} values",
                name,
                self.times.len(),
                self.values.len())));
        }
        if self.times.iter().chain(&self.values).any(|v| !v.is_finite()) {
            return Err(Error::config(format!("{} contains non-finite values", name)));
        }
        if self.times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::config(format!("{} times are not strictly increasing", name)));
        }
        Ok(())
    }

    pub fn at(&self, t: f64) -> f64 {
        let n = self.times.partition_point(|&s| s <= t);

        if n == 0 {
            self.values[0]
        } else if n == self.times.len() {
            self.values[n - 1]
        } else {
            let (t0, t1) = (self.times[n - 1], self.times[n]);
            let (v0, v1) = (self.values[n - 1], self.values[n]);
            v0 + (v1 - v0) * (t - t0) / (t1 - t0)
        }
    }

    pub fn scale(mut self, factor: f64) -> Self {
        for v in &mut self.values {
            *v *= factor
        }
        self
    }
}




#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub precipitation: Series,
    pub temperature: Series,
    pub potential_et: Series,
    pub leaf_area_index: Series,
}

impl Station {
    pub fn constant(meteo: Meteo) -> Self {
        Self {
            precipitation: Series::constant(meteo.precipitation),
            temperature: Series::constant(meteo.temperature),
            potential_et: Series::constant(meteo.potential_et),
            leaf_area_index: Series::constant(meteo.leaf_area_index),
        }
    }

    pub fn at(&self, t: f64) -> Meteo {
        Meteo {
            precipitation: self.precipitation.at(t),
            temperature: self.temperature.at(t),
            potential_et: self.potential_et.at(t),
            leaf_area_index: self.leaf_area_index.at(t),
        }
    }
}




/**
 * Forcing for all stations of a run.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct Forcing {
    stations: Vec<Station>,
}




// ============================================================================
impl Forcing {

    pub fn new(stations: Vec<Station>) -> Result<Self> {
        for (n, s) in stations.iter().enumerate() {
            s.precipitation.validate(&format!("station {} precipitation", n))?;
            s.temperature.validate(&format!("station {} temperature", n))?;
            s.potential_et.validate(&format!("station {} potential ET", n))?;
            s.leaf_area_index.validate(&format!("station {} leaf area index", n))?;

            let negative = s.precipitation.values.iter()
                .chain(&s.potential_et.values)
                .chain(&s.leaf_area_index.values)
                .any(|&v| v < 0.0);

            if negative {
                return Err(Error::config(format!("station {} has negative rates", n)));
            }
        }
        Ok(Self { stations })
    }

    /**
     * A single station with no precipitation, no evaporative demand and air
     * temperature above the melt point.
     */
    pub fn dry() -> Self {
        Self {
            stations: vec![Station::constant(Meteo {
                temperature: 10.0,
                ..Meteo::default()
            })],
        }
    }

    pub fn num_stations(&self) -> usize {
        self.stations.len()
    }

    pub fn at(&self, station: usize, t: f64) -> Meteo {
        self.stations[station].at(t)
    }
}
