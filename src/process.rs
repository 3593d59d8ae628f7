use crate::control::{Control, SnowParameters};
use crate::diagnostics::Diagnostics;
use crate::forcing::{Forcing, Meteo};
use crate::layout::StateLayout;
use crate::mesh::{Element, Mesh};




/**
 * Fraction of precipitation falling as snow at air temperature `t`: one at or
 * below the snow temperature, zero at or above the rain temperature and
 * linear in between.
 */
pub fn snow_fraction(t: f64, snow: &SnowParameters) -> f64 {
    if t <= snow.snow_temperature {
        1.0
    } else if t >= snow.rain_temperature {
        0.0
    } else {
        (snow.rain_temperature - t) / (snow.rain_temperature - snow.snow_temperature)
    }
}




/**
 * Stores of one element read from the integrated state, clamped to be
 * non-negative.
 */
#[derive(Clone, Copy, Debug)]
struct Column {
    surface: f64,
    unsaturated: f64,
    groundwater: f64,
}




/**
 * Outcome of one explicit step of an element.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Step {
    canopy: f64,
    snow: f64,
    net_precipitation: f64,
    canopy_evaporation: f64,
    transpiration: f64,
    ground_evaporation: f64,
    infiltration_capacity: f64,
}




/**
 * Advances the slow, strongly forced processes of every element over one
 * sub-step: snow accumulation and melt, canopy interception, the split of
 * evapotranspiration and the infiltration capacity. It is the only writer
 * of the diagnostic fields. The integrated state is read but never
 * modified; the rates it diagnoses are applied by the flux evaluator.
 */
pub struct ProcessUpdater<'m> {
    mesh: &'m Mesh,
    layout: StateLayout,
    forcing: Forcing,
    snow: SnowParameters,
    et_step: f64,
    min_depth: f64,
    largest_step: f64,
    diagnostics: Diagnostics,
}




// ============================================================================
impl<'m> ProcessUpdater<'m> {

    pub fn new(mesh: &'m Mesh, control: &Control, forcing: Forcing) -> Self {
        Self {
            mesh,
            layout: StateLayout::for_mesh(mesh),
            forcing,
            snow: control.snow,
            et_step: control.et_step,
            min_depth: control.min_depth,
            largest_step: 0.0,
            diagnostics: Diagnostics::new(mesh.num_elements()),
        }
    }

    /**
     * Start from the given canopy and snow storages instead of empty ones.
     */
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        assert_eq!(diagnostics.num_elements(), self.mesh.num_elements());
        self.diagnostics = diagnostics;
        self
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// The largest sub-step this updater has been asked to take.
    pub fn largest_step(&self) -> f64 {
        self.largest_step
    }

    /**
     * Advance the diagnostic fields over `[time, time + dt]` using the
     * forcing at `time` and the given state.
     */
    pub fn advance(&mut self, time: f64, dt: f64, state: &[f64]) -> &Diagnostics {
        debug_assert!(dt > 0.0, "sub-step must be positive");
        debug_assert!(
            dt <= self.et_step * (1.0 + 1e-12),
            "sub-step {} exceeds the ceiling {}",
            dt,
            self.et_step);

        self.largest_step = self.largest_step.max(dt);

        let y = self.layout.view(state);

        for (i, element) in self.mesh.elements().iter().enumerate() {
            let meteo = self.forcing.at(element.station, time);
            let column = Column {
                surface: y.surface(i).max(0.0),
                unsaturated: y.unsaturated(i).max(0.0),
                groundwater: y.groundwater(i).max(0.0),
            };
            let step = self.step(element, &meteo, column, self.diagnostics.canopy[i], self.diagnostics.snow[i], dt);

            let d = &mut self.diagnostics;
            d.canopy[i] = step.canopy;
            d.snow[i] = step.snow;
            d.net_precipitation[i] = step.net_precipitation;
            d.canopy_evaporation[i] = step.canopy_evaporation;
            d.transpiration[i] = step.transpiration;
            d.ground_evaporation[i] = step.ground_evaporation;
            d.infiltration_capacity[i] = step.infiltration_capacity;
        }
        &self.diagnostics
    }

    fn step(&self, e: &Element, meteo: &Meteo, column: Column, canopy: f64, snow: f64, dt: f64) -> Step {
        let cover = &e.land_cover;
        let soil = &e.soil;
        let veg = cover.vegetation_fraction;

        // Snow
        let fraction = snow_fraction(meteo.temperature, &self.snow);
        let rain = meteo.precipitation * (1.0 - fraction);
        let mut snow = snow + meteo.precipitation * fraction * dt;
        let potential_melt = self.snow.melt_factor * (meteo.temperature - self.snow.melt_temperature).max(0.0) * dt;
        let melt = potential_melt.min(snow);
        snow -= melt;

        // Interception
        let capacity = cover.interception_coeff * meteo.leaf_area_index * veg;
        let caught = (rain * veg * dt).min((capacity - canopy).max(0.0));
        let mut canopy = canopy + caught;
        let drip = (canopy - capacity).max(0.0);
        canopy -= drip;
        let throughfall = rain * dt - caught + drip;

        // Canopy evaporation
        let wetness = if capacity > 0.0 { (canopy / capacity).powf(2.0 / 3.0) } else { 0.0 };
        let canopy_evaporation = (meteo.potential_et * veg * wetness).min(canopy / dt);
        canopy = (canopy - canopy_evaporation * dt).max(0.0);
        let demand = (meteo.potential_et - canopy_evaporation).max(0.0);

        // Transpiration and ground evaporation
        let space = e.aquifer_depth() - column.groundwater;
        let saturation = if space > self.min_depth { (column.unsaturated / space).min(1.0) } else { 1.0 };
        let stress = if cover.stress_saturation > 0.0 {
            (saturation / cover.stress_saturation).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let pore_water = soil.porosity * (column.unsaturated + column.groundwater);
        let transpiration = (demand * veg * stress).min(pore_water / dt);

        let ground_evaporation = if snow > 0.0 {
            0.0
        } else {
            let wet = if column.surface > self.min_depth { 1.0 } else { stress };
            let available = column.surface + soil.porosity * column.unsaturated;
            ((demand - transpiration).max(0.0) * (1.0 - veg) * wet).min(available / dt)
        };

        // Infiltration capacity
        let ponded = column.surface > self.min_depth;
        let conductivity = if ponded {
            soil.kinf * (1.0 - soil.macropore_fraction) + soil.macropore_conductivity * soil.macropore_fraction
        } else {
            soil.kinf
        };
        let infiltration_capacity = conductivity * (1.0 + column.surface / soil.infiltration_depth);

        Step {
            canopy,
            snow,
            net_precipitation: (throughfall + melt) / dt,
            canopy_evaporation,
            transpiration,
            ground_evaporation,
            infiltration_capacity,
        }
    }
}
