use rayon::prelude::*;

use crate::control::Control;
use crate::diagnostics::{Diagnostics, NumericalCounters, Tally};
use crate::flux::{self, availability, carrier_depth};
use crate::layout::{storage_weights, Quantity, StateLayout, StateView};
use crate::mesh::{BoundaryCondition, Downstream, Mesh, Outlet};

/// Number of per-segment flux components exposed for reporting.
pub const RIVER_COMPONENTS: usize = 11;




/**
 * Vertical exchanges and sources of one element, m^3 / min.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ColumnFluxes {
    /// Net precipitation onto the surface
    pub precipitation: f64,
    /// Surface to unsaturated zone
    pub infiltration: f64,
    /// Unsaturated zone to groundwater
    pub recharge: f64,
    /// Groundwater to surface
    pub exfiltration: f64,
    pub surface_evaporation: f64,
    pub soil_evaporation: f64,
    /// Transpiration drawn from the unsaturated zone
    pub transpiration: f64,
    /// Transpiration drawn from the water table
    pub root_uptake: f64,
}




/**
 * Exchange across an element face, m^3 / min. For a link the sign is
 * positive from the lower to the higher numbered element; on a boundary face
 * it is positive into the element.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FaceFluxes {
    pub overland: f64,
    pub subsurface: f64,
}




/**
 * Exchanges of one river segment, m^3 / min. Bank terms are indexed left,
 * right.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RiverFluxes {
    /// Out of the segment, towards its downstream segment or outlet
    pub downstream: f64,
    /// Element surface into the channel
    pub overbank: [f64; 2],
    /// Element groundwater into the channel
    pub baseflow: [f64; 2],
    /// Channel into the bed aquifer
    pub leakage: f64,
    /// Bed aquifer into element groundwater
    pub bed_lateral: [f64; 2],
    /// Bed aquifer into the bed of the downstream segment
    pub bed_downstream: f64,
}




/**
 * Every micro-flux of one evaluation. Each is computed exactly once; the
 * derivative is obtained by adding it to one control volume and removing it
 * from the other.
 */
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fluxes {
    pub columns: Vec<ColumnFluxes>,
    pub links: Vec<FaceFluxes>,
    pub boundaries: Vec<FaceFluxes>,
    pub rivers: Vec<RiverFluxes>,
}

impl Fluxes {

    /**
     * Flux components of segment r in the order of the `rivFlx` report
     * channels: downstream outflow, upstream inflow, overbank left / right,
     * baseflow left / right, bed leakage, bed lateral left / right, bed
     * outflow downstream, bed inflow from upstream.
     */
    pub fn river_components(&self, mesh: &Mesh, r: usize) -> [f64; RIVER_COMPONENTS] {
        let f = &self.rivers[r];
        let upstream: f64 = mesh.upstream(r).iter().map(|&u| self.rivers[u].downstream).sum();
        let bed_upstream: f64 = mesh.upstream(r).iter().map(|&u| self.rivers[u].bed_downstream).sum();
        [
            f.downstream,
            upstream,
            f.overbank[0],
            f.overbank[1],
            f.baseflow[0],
            f.baseflow[1],
            f.leakage,
            f.bed_lateral[0],
            f.bed_lateral[1],
            f.bed_downstream,
            bed_upstream,
        ]
    }

    /// Infiltration of each element, m / min.
    pub fn infiltration_rates(&self, mesh: &Mesh) -> Vec<f64> {
        self.columns.iter().zip(mesh.elements()).map(|(c, e)| c.infiltration / e.area).collect()
    }

    /// Recharge of each element, m / min.
    pub fn recharge_rates(&self, mesh: &Mesh) -> Vec<f64> {
        self.columns.iter().zip(mesh.elements()).map(|(c, e)| c.recharge / e.area).collect()
    }
}




/**
 * The right-hand side of the semi-discrete system. An evaluator borrows the
 * mesh for the duration of a run; its only interior state is a set of
 * counters recording the corrections it makes.
 */
pub struct Evaluator<'m> {
    mesh: &'m Mesh,
    layout: StateLayout,
    min_depth: f64,
    parallel: bool,
    counters: NumericalCounters,
}




// ============================================================================
impl<'m> Evaluator<'m> {

    pub fn new(mesh: &'m Mesh, control: &Control) -> Self {
        Self {
            mesh,
            layout: StateLayout::for_mesh(mesh),
            min_depth: control.min_depth,
            parallel: control.parallel,
            counters: NumericalCounters::default(),
        }
    }

    pub fn mesh(&self) -> &'m Mesh {
        self.mesh
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn tally(&self) -> Tally {
        self.counters.snapshot()
    }

    /**
     * Write the time derivative of `state` into `derivative`. The result
     * depends only on the arguments; negative storages are read as empty and
     * counted, and no input can make this call fail.
     */
    pub fn evaluate(&self, _time: f64, state: &[f64], diagnostics: &Diagnostics, derivative: &mut [f64]) {
        let (clean, clamped) = self.clamp(state);
        let (fluxes, floored) = self.compute(&clean, diagnostics);

        self.reduce(&fluxes, &clean, derivative);
        self.counters.record(clamped, floored);
    }

    /**
     * Return the micro-fluxes at the given state, as used by `evaluate`.
     * Does not touch the counters.
     */
    pub fn breakdown(&self, state: &[f64], diagnostics: &Diagnostics) -> Fluxes {
        let (clean, _) = self.clamp(state);
        self.compute(&clean, diagnostics).0
    }

    fn clamp(&self, state: &[f64]) -> (Vec<f64>, u64) {
        let mut clamped = 0;
        let clean = state
            .iter()
            .map(|&y| {
                if y < 0.0 {
                    clamped += 1;
                    0.0
                } else {
                    y
                }
            })
            .collect();
        (clean, clamped)
    }

    fn compute(&self, clean: &[f64], diagnostics: &Diagnostics) -> (Fluxes, u64) {
        let y = self.layout.view(clean);
        let mesh = self.mesh;

        let (columns, f0) = gather(mesh.num_elements(), self.parallel, |i, n| self.column(&y, diagnostics, i, n));
        let (links, f1) = gather(mesh.links().len(), self.parallel, |k, n| self.link(&y, k, n));
        let (boundaries, f2) = gather(mesh.boundary_faces().len(), self.parallel, |k, n| self.boundary(&y, k, n));
        let (rivers, f3) = gather(mesh.num_rivers(), self.parallel, |r, n| self.river(&y, r, n));

        let fluxes = Fluxes {
            columns,
            links,
            boundaries,
            rivers,
        };
        (fluxes, f0 + f1 + f2 + f3)
    }
}




// ============================================================================
impl<'m> Evaluator<'m> {

    fn column(&self, y: &StateView, diagnostics: &Diagnostics, i: usize, floored: &mut u64) -> ColumnFluxes {
        let e = self.mesh.element(i);
        let floor = self.min_depth;
        let (s, u, g) = (y.surface(i), y.unsaturated(i), y.groundwater(i));
        let aquifer = e.aquifer_depth();

        let ponded = carrier_depth(s, floor, floored);
        let moisture = carrier_depth(u, floor, floored);
        let saturated = carrier_depth(g, floor, floored);

        let room = (aquifer - g - u) / e.soil.infiltration_depth;
        let infiltration = flux::infiltration(ponded, diagnostics.infiltration_capacity[i], room, floor);
        let recharge = flux::recharge(moisture, aquifer - g, e.soil.kv, e.soil.beta, floor);
        let exfiltration = flux::exfiltration(g, aquifer, e.soil.kinf, e.soil.infiltration_depth);

        let evaporation = diagnostics.ground_evaporation[i];
        let from_surface = availability(ponded, floor);
        let from_soil = availability(moisture, floor);

        let transpiration = diagnostics.transpiration[i];
        let access = flux::root_zone_access(aquifer - g, e.land_cover.root_depth);

        ColumnFluxes {
            precipitation: e.area * diagnostics.net_precipitation[i],
            infiltration: e.area * infiltration,
            recharge: e.area * recharge,
            exfiltration: e.area * exfiltration,
            surface_evaporation: e.area * evaporation * from_surface,
            soil_evaporation: e.area * evaporation * (1.0 - from_surface) * from_soil,
            transpiration: e.area * transpiration * from_soil,
            root_uptake: e.area * transpiration * (1.0 - from_soil) * access * availability(saturated, floor),
        }
    }

    fn link(&self, y: &StateView, k: usize, floored: &mut u64) -> FaceFluxes {
        let link = self.mesh.links()[k];
        let (ea, eb) = (self.mesh.element(link.a), self.mesh.element(link.b));
        let floor = self.min_depth;

        let (sa, sb) = (y.surface(link.a), y.surface(link.b));
        let (ha, hb) = (ea.zmax + sa, eb.zmax + sb);
        let upwind = carrier_depth(if ha >= hb { sa } else { sb }, floor, floored);
        let roughness = 0.5 * (ea.land_cover.roughness + eb.land_cover.roughness);
        let overland = flux::overland((ha - hb) / link.distance, upwind, link.edge_length, roughness);

        let (ga, gb) = (y.groundwater(link.a), y.groundwater(link.b));
        let (ha, hb) = (ea.zmin + ga, eb.zmin + gb);
        let source = carrier_depth(if ha >= hb { ga } else { gb }, floor, floored);
        let conductivity = 0.5 * (ea.soil.kh + eb.soil.kh);
        let thickness = 0.5 * (ga + gb);
        let subsurface = flux::darcy((ha - hb) / link.distance, conductivity, thickness, link.edge_length)
            * availability(source, floor);

        FaceFluxes { overland, subsurface }
    }

    fn boundary(&self, y: &StateView, k: usize, floored: &mut u64) -> FaceFluxes {
        let face = self.mesh.boundary_faces()[k];
        let e = self.mesh.element(face.element);
        let floor = self.min_depth;
        let (s, g) = (y.surface(face.element), y.groundwater(face.element));

        match face.condition {
            BoundaryCondition::NoFlow => FaceFluxes::default(),
            BoundaryCondition::FixedHead { head } => {
                let surface_head = e.zmax + s;
                let upwind = if head > surface_head { head - e.zmax } else { s };
                let depth = carrier_depth(upwind, floor, floored);
                let overland = flux::overland(
                    (head - surface_head) / face.distance,
                    depth,
                    face.edge_length,
                    e.land_cover.roughness);

                let gradient = (head - e.zmin - g) / face.distance;
                let thickness = 0.5 * (g + (head - e.zmin).max(0.0));
                let mut subsurface = flux::darcy(gradient, e.soil.kh, thickness, face.edge_length);

                if subsurface < 0.0 {
                    subsurface *= availability(carrier_depth(g, floor, floored), floor)
                }
                FaceFluxes { overland, subsurface }
            }
            BoundaryCondition::FixedFlux { rate } => {
                let subsurface = if rate < 0.0 {
                    rate * availability(carrier_depth(g, floor, floored), floor)
                } else {
                    rate
                };
                FaceFluxes { overland: 0.0, subsurface }
            }
        }
    }

    fn river(&self, y: &StateView, r: usize, floored: &mut u64) -> RiverFluxes {
        let mesh = self.mesh;
        let s = mesh.river(r);
        let floor = self.min_depth;
        let stage = y.stage(r);
        let head = s.zbed + stage;
        let flowing = carrier_depth(stage, floor, floored);

        let downstream = match s.downstream {
            Downstream::Segment(d) => {
                let t = mesh.river(d);
                let other = t.zbed + y.stage(d);
                let distance = 0.5 * (s.length + t.length);
                let (depth, up) = if head >= other {
                    (flowing, s)
                } else {
                    (carrier_depth(y.stage(d), floor, floored), t)
                };
                flux::channel((head - other) / distance, depth, &up.shape, up.roughness)
            }
            Downstream::Outlet(Outlet::Closed) => 0.0,
            Downstream::Outlet(Outlet::FixedStage { stage: fixed }) => {
                let other = s.zbed + fixed;
                let depth = if head >= other { flowing } else { carrier_depth(fixed, floor, floored) };
                flux::channel((head - other) / (0.5 * s.length), depth, &s.shape, s.roughness)
            }
            Downstream::Outlet(Outlet::ZeroDepthGradient { slope }) => {
                flux::channel(slope, flowing, &s.shape, s.roughness)
            }
            Downstream::Outlet(Outlet::CriticalDepth) => flux::critical_outflow(flowing, &s.shape),
        };

        let bed = y.river_bed(r);
        let bed_head = s.zmin + bed;
        let bed_carrier = carrier_depth(bed, floor, floored);
        let bed_bottom = s.zbed - s.bed_thickness;

        let mut leakage = flux::darcy(
            (head - bed_head.max(bed_bottom)) / s.bed_thickness,
            s.bed_conductivity,
            1.0,
            s.length * s.shape.bed_width());
        leakage *= if leakage > 0.0 { availability(flowing, floor) } else { availability(bed_carrier, floor) };

        let bed_downstream = match s.downstream {
            Downstream::Segment(d) => {
                let t = mesh.river(d);
                let other = y.river_bed(d);
                let other_head = t.zmin + other;
                let source = if bed_head >= other_head { bed_carrier } else { carrier_depth(other, floor, floored) };
                let width = 0.5 * (s.shape.bed_width() + t.shape.bed_width());
                flux::darcy(
                    (bed_head - other_head) / (0.5 * (s.length + t.length)),
                    0.5 * (s.bed_conductivity + t.bed_conductivity),
                    0.5 * (bed + other),
                    width) * availability(source, floor)
            }
            Downstream::Outlet(_) => 0.0,
        };

        let mut fluxes = RiverFluxes {
            downstream,
            leakage,
            bed_downstream,
            ..RiverFluxes::default()
        };

        for (side, bank) in s.banks.iter().enumerate() {
            let bank = match bank {
                Some(bank) => bank,
                None => continue,
            };
            let e = mesh.element(bank.element);
            let surface = y.surface(bank.element);
            let g = y.groundwater(bank.element);
            let ponded = carrier_depth(surface, floor, floored);
            let saturated = carrier_depth(g, floor, floored);

            let surface_head = e.zmax + surface;
            let crest = e.zmax.max(s.bank_elevation());
            let mut overbank = flux::weir(surface_head, head, crest, s.length, s.weir_coefficient);
            overbank *= if overbank > 0.0 { availability(ponded, floor) } else { availability(flowing, floor) };

            let water_table = e.zmin + g;
            let thickness = 0.5 * ((water_table - s.zbed).max(0.0) + stage);
            let mut baseflow = flux::darcy(
                (water_table - head) / bank.distance,
                s.bank_conductivity,
                thickness,
                s.length);
            baseflow *= if baseflow > 0.0 { availability(saturated, floor) } else { availability(flowing, floor) };

            let mut lateral = flux::darcy(
                (bed_head - water_table) / bank.distance,
                e.soil.kh,
                0.5 * (bed + g),
                s.length);
            lateral *= if lateral > 0.0 { availability(bed_carrier, floor) } else { availability(saturated, floor) };

            fluxes.overbank[side] = overbank;
            fluxes.baseflow[side] = baseflow;
            fluxes.bed_lateral[side] = lateral;
        }
        fluxes
    }

    /**
     * Sum the micro-fluxes into volumetric rates per state entry, in a fixed
     * order, then divide by the storage weights.
     */
    fn reduce(&self, fluxes: &Fluxes, clean: &[f64], derivative: &mut [f64]) {
        let mesh = self.mesh;
        let layout = &self.layout;
        let surface = |i| layout.index_of(Quantity::Surface, i);
        let unsat = |i| layout.index_of(Quantity::Unsaturated, i);
        let ground = |i| layout.index_of(Quantity::Groundwater, i);
        let stage = |r| layout.index_of(Quantity::Stage, r);
        let bed = |r| layout.index_of(Quantity::RiverBed, r);

        let mut net = layout.zeros();
        let mut transfer = |from: usize, to: usize, q: f64| {
            net[from] -= q;
            net[to] += q;
        };

        for (i, c) in fluxes.columns.iter().enumerate() {
            transfer(surface(i), unsat(i), c.infiltration);
            transfer(unsat(i), ground(i), c.recharge);
            transfer(ground(i), surface(i), c.exfiltration);
        }
        for (link, f) in mesh.links().iter().zip(&fluxes.links) {
            transfer(surface(link.a), surface(link.b), f.overland);
            transfer(ground(link.a), ground(link.b), f.subsurface);
        }
        for &r in mesh.drainage_order() {
            let (s, f) = (mesh.river(r), &fluxes.rivers[r]);

            if let Downstream::Segment(d) = s.downstream {
                transfer(stage(r), stage(d), f.downstream);
                transfer(bed(r), bed(d), f.bed_downstream);
            }
            transfer(stage(r), bed(r), f.leakage);

            for (side, bank) in s.banks.iter().enumerate() {
                if let Some(bank) = bank {
                    transfer(surface(bank.element), stage(r), f.overbank[side]);
                    transfer(ground(bank.element), stage(r), f.baseflow[side]);
                    transfer(bed(r), ground(bank.element), f.bed_lateral[side]);
                }
            }
        }

        for (i, c) in fluxes.columns.iter().enumerate() {
            net[surface(i)] += c.precipitation - c.surface_evaporation;
            net[unsat(i)] -= c.soil_evaporation + c.transpiration;
            net[ground(i)] -= c.root_uptake;
        }
        for (face, f) in mesh.boundary_faces().iter().zip(&fluxes.boundaries) {
            net[surface(face.element)] += f.overland;
            net[ground(face.element)] += f.subsurface;
        }
        for (r, (s, f)) in mesh.rivers().iter().zip(&fluxes.rivers).enumerate() {
            if let Downstream::Outlet(_) = s.downstream {
                net[stage(r)] -= f.downstream
            }
        }

        let weights = storage_weights(mesh, layout, clean);

        for ((d, q), w) in derivative.iter_mut().zip(&net).zip(&weights) {
            *d = q / w;
        }
    }
}




// ============================================================================
fn gather<T, F>(count: usize, parallel: bool, f: F) -> (Vec<T>, u64)
where
    T: Send,
    F: Fn(usize, &mut u64) -> T + Sync,
{
    let one = |k| {
        let mut floored = 0;
        let value = f(k, &mut floored);
        (value, floored)
    };

    let pairs: Vec<(T, u64)> = if parallel {
        (0..count).into_par_iter().map(one).collect()
    } else {
        (0..count).map(one).collect()
    };
    let floored = pairs.iter().map(|p| p.1).sum();
    (pairs.into_iter().map(|p| p.0).collect(), floored)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::layout::total_storage;
    use crate::testing;

    fn storage_rate(evaluator: &Evaluator, state: &[f64], derivative: &[f64]) -> f64 {
        let weights = storage_weights(evaluator.mesh(), evaluator.layout(), state);
        weights.iter().zip(derivative).map(|(w, d)| w * d).sum()
    }

    #[test]
    fn groundwater_drains_towards_lower_head() {
        let mesh = testing::two_cell_mesh();
        let control = testing::control();
        let evaluator = Evaluator::new(&mesh, &control);
        let layout = evaluator.layout().clone();
        let diagnostics = Diagnostics::new(2);

        let mut state = layout.zeros();
        state[layout.index_of(Quantity::Groundwater, 0)] = 10.0;
        state[layout.index_of(Quantity::Groundwater, 1)] = 5.0;

        let mut derivative = layout.zeros();
        evaluator.evaluate(0.0, &state, &diagnostics, &mut derivative);

        assert!(derivative[layout.index_of(Quantity::Groundwater, 0)] < 0.0);
        assert!(derivative[layout.index_of(Quantity::Groundwater, 1)] > 0.0);
        assert!(storage_rate(&evaluator, &state, &derivative).abs() < 1e-12);
    }

    #[test]
    fn evaluation_is_bit_identical() {
        let mesh = testing::river_mesh();
        let control = testing::control();
        let evaluator = Evaluator::new(&mesh, &control);
        let state = testing::wet_state(&mesh);
        let diagnostics = testing::rainy_diagnostics(mesh.num_elements());

        let mut first = evaluator.layout().zeros();
        let mut second = evaluator.layout().zeros();
        evaluator.evaluate(0.0, &state, &diagnostics, &mut first);
        evaluator.evaluate(0.0, &state, &diagnostics, &mut second);

        assert!(first.iter().zip(&second).all(|(a, b)| a.to_bits() == b.to_bits()));
    }

    #[test]
    fn parallel_evaluation_matches_serial() {
        let mesh = testing::river_mesh();
        let serial = Evaluator::new(&mesh, &testing::control());
        let parallel = Evaluator::new(&mesh, &testing::control().with_parallel(true));
        let state = testing::wet_state(&mesh);
        let diagnostics = testing::rainy_diagnostics(mesh.num_elements());

        let mut a = serial.layout().zeros();
        let mut b = parallel.layout().zeros();
        serial.evaluate(0.0, &state, &diagnostics, &mut a);
        parallel.evaluate(0.0, &state, &diagnostics, &mut b);

        assert!(a.iter().zip(&b).all(|(x, y)| x.to_bits() == y.to_bits()));
        assert_eq!(serial.tally(), parallel.tally());
    }

    #[test]
    fn closed_network_conserves_water() {
        let mesh = testing::river_mesh();
        let evaluator = Evaluator::new(&mesh, &testing::control());
        let state = testing::wet_state(&mesh);
        let diagnostics = Diagnostics::new(mesh.num_elements());

        let mut derivative = evaluator.layout().zeros();
        evaluator.evaluate(0.0, &state, &diagnostics, &mut derivative);

        let rate = storage_rate(&evaluator, &state, &derivative);
        let volume = total_storage(&mesh, evaluator.layout(), &state);
        assert!(rate.abs() < 1e-12 * volume.max(1.0));
        assert!(derivative.iter().any(|d| *d != 0.0));
    }

    #[test]
    fn negative_storage_is_clamped_and_counted() {
        let mesh = testing::two_cell_mesh();
        let evaluator = Evaluator::new(&mesh, &testing::control());
        let layout = evaluator.layout().clone();
        let diagnostics = Diagnostics::new(2);

        let mut state = layout.zeros();
        state[layout.index_of(Quantity::Surface, 0)] = -1e-3;
        state[layout.index_of(Quantity::Groundwater, 1)] = 1.0;

        let mut derivative = layout.zeros();
        evaluator.evaluate(0.0, &state, &diagnostics, &mut derivative);

        assert!(derivative.iter().all(|d| d.is_finite()));
        assert_eq!(evaluator.tally().clamped, 1);
        assert_eq!(evaluator.tally().evaluations, 1);
    }

    #[test]
    fn dry_cell_does_not_infiltrate() {
        let mesh = testing::two_cell_mesh();
        let control = testing::control();
        let evaluator = Evaluator::new(&mesh, &control);
        let layout = evaluator.layout().clone();
        let mut diagnostics = Diagnostics::new(2);
        diagnostics.infiltration_capacity = vec![1e-3, 1e-3];

        let mut state = layout.zeros();
        state[layout.index_of(Quantity::Surface, 0)] = 0.5 * control.min_depth;

        let fluxes = evaluator.breakdown(&state, &diagnostics);
        assert_eq!(fluxes.columns[0].infiltration, 0.0);

        let mut derivative = layout.zeros();
        evaluator.evaluate(0.0, &state, &diagnostics, &mut derivative);
        assert_eq!(derivative[layout.index_of(Quantity::Unsaturated, 0)], 0.0);
        assert!(evaluator.tally().floored >= 1);
    }

    #[test]
    fn channel_flows_downstream() {
        let mesh = testing::river_mesh();
        let evaluator = Evaluator::new(&mesh, &testing::control());
        let layout = evaluator.layout().clone();
        let mut state = layout.zeros();
        state[layout.index_of(Quantity::Stage, 0)] = 0.5;

        let fluxes = evaluator.breakdown(&state, &Diagnostics::new(mesh.num_elements()));
        assert!(fluxes.rivers[0].downstream > 0.0);

        let components = fluxes.river_components(&mesh, 1);
        assert_eq!(components[1], fluxes.rivers[0].downstream);
    }

    #[test]
    fn bed_aquifer_drains_along_the_network() {
        let mesh = testing::river_mesh();
        let evaluator = Evaluator::new(&mesh, &testing::control());
        let layout = evaluator.layout().clone();
        let mut state = layout.zeros();
        state[layout.index_of(Quantity::RiverBed, 0)] = 3.0;
        state[layout.index_of(Quantity::RiverBed, 1)] = 1.0;

        let fluxes = evaluator.breakdown(&state, &Diagnostics::new(mesh.num_elements()));
        assert!(fluxes.rivers[0].bed_downstream > 0.0);
        assert_eq!(fluxes.rivers[1].bed_downstream, 0.0);

        let components = fluxes.river_components(&mesh, 1);
        assert_eq!(components.len(), 11);
        assert_eq!(components[10], fluxes.rivers[0].bed_downstream);

        let mut derivative = layout.zeros();
        evaluator.evaluate(0.0, &state, &Diagnostics::new(mesh.num_elements()), &mut derivative);
        assert!(storage_rate(&evaluator, &state, &derivative).abs() < 1e-12 * total_storage(&mesh, &layout, &state));
    }
}
