use std::fs;
use std::path::Path;

use log::info;
use serde::Deserialize;

use crate::control::{Control, MINUTES_PER_DAY};
use crate::controller::Controller;
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::forcing::{Forcing, Series, Station};
use crate::geometry;
use crate::layout::{Quantity, StateLayout};
use crate::mesh::{Bank, Downstream, Element, LandCover, Mesh, Outlet, RiverSegment, Shape, Soil};
use crate::meshing::{self, Node, Triangle};
use crate::solver::Integrator;




/**
 * Soil parameters as they appear in a project file. Conductivities are in
 * metres per day.
 */
#[derive(Clone, Copy, Debug, Deserialize)]
struct SoilInput {
    kh: f64,
    kv: f64,
    kinf: f64,
    porosity: f64,
    beta: f64,
    #[serde(default)]
    macropore_fraction: f64,
    #[serde(default)]
    macropore_conductivity: f64,
    infiltration_depth: f64,
}

impl SoilInput {
    fn into_model(self) -> Soil {
        Soil {
            kh: self.kh / MINUTES_PER_DAY,
            kv: self.kv / MINUTES_PER_DAY,
            kinf: self.kinf / MINUTES_PER_DAY,
            porosity: self.porosity,
            beta: self.beta,
            macropore_fraction: self.macropore_fraction,
            macropore_conductivity: self.macropore_conductivity / MINUTES_PER_DAY,
            infiltration_depth: self.infiltration_depth,
        }
    }
}




/**
 * Land cover as it appears in a project file. Manning's n is in the usual
 * s / m^(1/3).
 */
#[derive(Clone, Copy, Debug, Deserialize)]
struct LandCoverInput {
    roughness: f64,
    vegetation_fraction: f64,
    root_depth: f64,
    interception_coeff: f64,
    #[serde(default = "default_stress_saturation")]
    stress_saturation: f64,
}

fn default_stress_saturation() -> f64 {
    0.5
}

impl LandCoverInput {
    fn into_model(self) -> LandCover {
        LandCover {
            roughness: self.roughness / 60.0,
            vegetation_fraction: self.vegetation_fraction,
            root_depth: self.root_depth,
            interception_coeff: self.interception_coeff,
            stress_saturation: self.stress_saturation,
        }
    }
}




#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DownstreamInput {
    Segment(usize),
    Outlet(Outlet),
}




/**
 * A river segment laid along the mesh edge from `from_node` to `to_node`.
 * The bed sits `depth` below the mean land surface at the two nodes.
 */
#[derive(Clone, Debug, Deserialize)]
struct RiverInput {
    from_node: usize,
    to_node: usize,
    downstream: DownstreamInput,
    shape: Shape,
    depth: f64,
    roughness: f64,
    weir_coefficient: f64,
    bank_conductivity: f64,
    bed_conductivity: f64,
    bed_thickness: f64,
    bed_porosity: f64,
    #[serde(default)]
    left: Option<usize>,
    #[serde(default)]
    right: Option<usize>,
}




/**
 * A forcing series with times in days and values in the model's rate
 * units per day where that applies.
 */
#[derive(Clone, Debug, Deserialize)]
struct SeriesInput {
    times: Vec<f64>,
    values: Vec<f64>,
}

impl SeriesInput {
    fn into_model(self, scale: f64) -> Result<Series> {
        let times = self.times.into_iter().map(|t| t * MINUTES_PER_DAY).collect();
        Ok(Series::new(times, self.values)?.scale(scale))
    }
}

#[derive(Clone, Debug, Deserialize)]
struct StationInput {
    precipitation: SeriesInput,
    temperature: SeriesInput,
    potential_et: SeriesInput,
    leaf_area_index: SeriesInput,
}

impl StationInput {
    fn into_model(self) -> Result<Station> {
        Ok(Station {
            precipitation: self.precipitation.into_model(1.0 / MINUTES_PER_DAY)?,
            temperature: self.temperature.into_model(1.0)?,
            potential_et: self.potential_et.into_model(1.0 / MINUTES_PER_DAY)?,
            leaf_area_index: self.leaf_area_index.into_model(1.0)?,
        })
    }
}




/**
 * Uniform initial storages, or an explicit state vector which takes
 * precedence over the uniform values.
 */
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct InitialConditions {
    surface: f64,
    unsaturated: f64,
    groundwater: f64,
    stage: f64,
    /// Bed-aquifer head above its bottom; defaults to saturated
    river_bed: Option<f64>,
    canopy: f64,
    snow: f64,
    state: Option<Vec<f64>>,
}




#[derive(Clone, Debug, Deserialize)]
struct ProjectFile {
    nodes: Vec<Node>,
    triangles: Vec<Triangle>,
    soils: Vec<SoilInput>,
    land_covers: Vec<LandCoverInput>,
    #[serde(default)]
    rivers: Vec<RiverInput>,
    stations: Vec<StationInput>,
    control: Control,
    #[serde(default)]
    initial: InitialConditions,
}




/**
 * Everything needed to start a run, in model units and fully validated.
 */
#[derive(Clone, Debug)]
pub struct Project {
    pub mesh: Mesh,
    pub control: Control,
    pub forcing: Forcing,
    pub state: Vec<f64>,
    pub diagnostics: Diagnostics,
}




// ============================================================================
impl Project {

    /**
     * Build a controller for this project, driving the given integrator.
     */
    pub fn controller<I: Integrator>(&self, integrator: I) -> Result<Controller<'_, I>> {
        Controller::new(&self.mesh, &self.control, self.forcing.clone(), self.state.clone(), integrator)?
            .with_diagnostics(self.diagnostics.clone())
    }
}




/**
 * Read and validate a JSON project file.
 */
pub fn load(path: &Path) -> Result<Project> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("could not read {}: {}", path.display(), e)))?;
    let project = parse(&text)?;

    info!(
        "loaded {}: {} elements, {} river segments, {} reporting boundaries",
        path.display(),
        project.mesh.num_elements(),
        project.mesh.num_rivers(),
        project.control.boundaries().len());

    Ok(project)
}

pub fn parse(text: &str) -> Result<Project> {
    let file: ProjectFile = serde_json::from_str(text)?;
    build(file)
}




// ============================================================================
fn build(file: ProjectFile) -> Result<Project> {
    file.control.validate()?;

    if let Some((t, triangle)) = file.triangles.iter().enumerate().find(|(_, t)| t.station >= file.stations.len()) {
        return Err(Error::config(format!("triangle {} refers to missing station {}", t, triangle.station)));
    }

    let soils: Vec<Soil> = file.soils.iter().map(|s| s.into_model()).collect();
    let land_covers: Vec<LandCover> = file.land_covers.iter().map(|l| l.into_model()).collect();
    let elements = meshing::elements(&file.nodes, &file.triangles, &soils, &land_covers)?;

    let rivers = file
        .rivers
        .iter()
        .enumerate()
        .map(|(r, river)| segment(r, river, &file.nodes, &elements))
        .collect::<Result<Vec<_>>>()?;

    let mesh = Mesh::new(elements, rivers)?;

    let forcing = Forcing::new(file
        .stations
        .into_iter()
        .map(StationInput::into_model)
        .collect::<Result<Vec<_>>>()?)?;

    let state = initial_state(&mesh, &file.initial)?;
    let mut diagnostics = Diagnostics::new(mesh.num_elements());
    diagnostics.canopy.fill(file.initial.canopy);
    diagnostics.snow.fill(file.initial.snow);

    Ok(Project {
        mesh,
        control: file.control,
        forcing,
        state,
        diagnostics,
    })
}

fn segment(r: usize, river: &RiverInput, nodes: &[Node], elements: &[Element]) -> Result<RiverSegment> {
    let node = |n: usize| {
        nodes
            .get(n)
            .ok_or_else(|| Error::mesh(format!("river segment {} refers to missing node {}", r, n)))
    };
    let (a, b) = (node(river.from_node)?, node(river.to_node)?);

    let bank = |element: Option<usize>| -> Result<Option<Bank>> {
        match element {
            None => Ok(None),
            Some(i) if i >= elements.len() => {
                Err(Error::mesh(format!("river segment {} borders missing element {}", r, i)))
            }
            Some(i) => Ok(Some(Bank {
                element: i,
                distance: geometry::distance_to_line(elements[i].centroid, a.point(), b.point()),
            })),
        }
    };

    Ok(RiverSegment {
        length: a.point().distance(b.point()),
        zbed: 0.5 * (a.zmax + b.zmax) - river.depth,
        zmin: 0.5 * (a.zmin + b.zmin),
        shape: river.shape,
        depth: river.depth,
        roughness: river.roughness / 60.0,
        weir_coefficient: river.weir_coefficient,
        bank_conductivity: river.bank_conductivity / MINUTES_PER_DAY,
        bed_conductivity: river.bed_conductivity / MINUTES_PER_DAY,
        bed_thickness: river.bed_thickness,
        bed_porosity: river.bed_porosity,
        banks: [bank(river.left)?, bank(river.right)?],
        downstream: match river.downstream {
            DownstreamInput::Segment(s) => Downstream::Segment(s),
            DownstreamInput::Outlet(outlet) => Downstream::Outlet(outlet),
        },
    })
}

fn initial_state(mesh: &Mesh, initial: &InitialConditions) -> Result<Vec<f64>> {
    let layout = StateLayout::for_mesh(mesh);

    if let Some(state) = &initial.state {
        if state.len() != layout.size() {
            return Err(Error::config(format!(
                "initial state has {} entries, the mesh needs {}",
                state.len(),
                layout.size())));
        }
        if state.iter().any(|y| !(*y >= 0.0) || !y.is_finite()) {
            return Err(Error::config("initial state must be finite and non-negative"));
        }
        return Ok(state.clone());
    }

    let uniform = [
        initial.surface,
        initial.unsaturated,
        initial.groundwater,
        initial.stage,
        initial.canopy,
        initial.snow,
        initial.river_bed.unwrap_or(0.0),
    ];
    if uniform.iter().any(|y| !(*y >= 0.0) || !y.is_finite()) {
        return Err(Error::config("initial conditions must be finite and non-negative"));
    }

    let mut state = layout.zeros();

    for (i, element) in mesh.elements().iter().enumerate() {
        state[layout.index_of(Quantity::Surface, i)] = initial.surface;
        state[layout.index_of(Quantity::Unsaturated, i)] = initial.unsaturated;
        state[layout.index_of(Quantity::Groundwater, i)] = initial.groundwater.min(element.aquifer_depth());
    }
    for (r, segment) in mesh.rivers().iter().enumerate() {
        let full = segment.bed_aquifer_depth().max(0.0);
        state[layout.index_of(Quantity::Stage, r)] = initial.stage;
        state[layout.index_of(Quantity::RiverBed, r)] = initial.river_bed.map_or(full, |h| h.min(full));
    }
    Ok(state)
}
