use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::control::Control;
use crate::diagnostics::{Diagnostics, NumericalSummary, Tally};
use crate::error::{Error, IntegrationFailure, Interrupted, Result};
use crate::forcing::Forcing;
use crate::layout::{total_storage, StateLayout};
use crate::mesh::Mesh;
use crate::process::ProcessUpdater;
use crate::report::{Frame, Sink};
use crate::rhs::Evaluator;
use crate::solver::{Integrator, SolverStats};




#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    SubStepping,
    Reporting,
    Finished,
}




/**
 * What a run did, returned when it finishes or is cancelled.
 */
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub reports: usize,
    pub substeps: u64,
    pub final_time: f64,
    pub cancelled: bool,
    pub solver: SolverStats,
    pub numerics: Tally,
    /// Water held in the model at the final time, m^3
    pub storage: f64,
}




/**
 * The outer simulation loop. The controller owns the live state vector; it
 * lends it to the process updater (read only) and to the integrator
 * (mutably, for one sub-step at a time), and emits a frame at every
 * reporting boundary.
 */
pub struct Controller<'m, I: Integrator> {
    control: Control,
    boundaries: Vec<f64>,
    evaluator: Evaluator<'m>,
    updater: ProcessUpdater<'m>,
    integrator: I,
    state: Vec<f64>,
    time: f64,
    phase: Phase,
    substeps: u64,
    reports: usize,
    reported: Tally,
    cancel: Option<Arc<AtomicBool>>,
}




// ============================================================================
impl<'m, I: Integrator> Controller<'m, I> {

    /**
     * Set up a run from a validated configuration and an initial state. Any
     * inconsistency between them is a configuration error.
     */
    pub fn new(mesh: &'m Mesh, control: &Control, forcing: Forcing, state: Vec<f64>, integrator: I) -> Result<Self> {
        control.validate()?;

        let layout = StateLayout::for_mesh(mesh);

        if state.len() != layout.size() {
            return Err(Error::config(format!(
                "initial state has {} entries, the mesh needs {}",
                state.len(),
                layout.size())));
        }
        if state.iter().any(|y| !y.is_finite()) {
            return Err(Error::config("initial state contains non-finite values"));
        }
        if let Some(e) = mesh.elements().iter().find(|e| e.station >= forcing.num_stations()) {
            return Err(Error::config(format!("element refers to missing forcing station {}", e.station)));
        }

        Ok(Self {
            control: control.clone(),
            boundaries: control.boundaries(),
            evaluator: Evaluator::new(mesh, control),
            updater: ProcessUpdater::new(mesh, control, forcing),
            integrator,
            state,
            time: control.start_time,
            phase: Phase::Idle,
            substeps: 0,
            reports: 0,
            reported: Tally::default(),
            cancel: None,
        })
    }

    /**
     * Start from the given canopy and snow storages.
     */
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Result<Self> {
        if diagnostics.num_elements() != self.evaluator.mesh().num_elements() {
            return Err(Error::config("initial diagnostics do not match the mesh"));
        }
        self.updater = self.updater.with_diagnostics(diagnostics);
        Ok(self)
    }

    /**
     * Stop the run, between sub-steps, once the flag is raised.
     */
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn state(&self) -> &[f64] {
        &self.state
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        self.updater.diagnostics()
    }

    pub fn integrator(&self) -> &I {
        &self.integrator
    }

    /// The largest sub-step handed to the process updater so far.
    pub fn largest_substep(&self) -> f64 {
        self.updater.largest_step()
    }

    /**
     * Water held in the state vector, on the canopies and in the snowpack,
     * m^3.
     */
    pub fn storage(&self) -> f64 {
        let mesh = self.evaluator.mesh();
        let held = total_storage(mesh, self.evaluator.layout(), &self.state);
        held + self.diagnostics().stored_volume(mesh.elements().iter().map(|e| e.area))
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /**
     * Run through every reporting boundary, reporting to `sink` at each. An
     * integration failure ends the run with an error carrying the time of
     * the integrator's last accepted step; the state then holds the solution
     * at that time, and `time()` returns it.
     */
    pub fn run<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<RunSummary> {
        if self.phase != Phase::Idle {
            return Err(Error::config("controller has already run"));
        }
        info!(
            "starting run from t={} to t={} with {} reporting boundaries, sub-step ceiling {}",
            self.time,
            self.control.end_time(),
            self.boundaries.len(),
            self.control.et_step);

        self.phase = Phase::SubStepping;
        let mut cancelled = false;

        for boundary in self.boundaries.clone() {
            if !self.advance_to(boundary)? {
                cancelled = true;
                break;
            }
            self.phase = Phase::Reporting;
            self.report(sink)?;
            self.phase = Phase::SubStepping;
        }

        self.phase = Phase::Finished;
        sink.finish()?;

        if cancelled {
            warn!("run cancelled at t={}", self.time);
        } else {
            info!("run finished at t={} after {} sub-steps", self.time, self.substeps);
        }
        Ok(self.summary(cancelled))
    }

    pub fn summary(&self, cancelled: bool) -> RunSummary {
        RunSummary {
            reports: self.reports,
            substeps: self.substeps,
            final_time: self.time,
            cancelled,
            solver: self.integrator.stats(),
            numerics: self.evaluator.tally(),
            storage: self.storage(),
        }
    }

    /**
     * Sub-step up to the boundary. Returns false if the run was cancelled on
     * the way.
     */
    fn advance_to(&mut self, boundary: f64) -> Result<bool> {
        while self.time < boundary {
            if self.cancelled() {
                return Ok(false);
            }
            let start = self.time;
            let target = (start + self.control.et_step).min(boundary);

            let diagnostics = self.updater.advance(start, target - start, &self.state);
            let evaluator = &self.evaluator;

            let outcome = self
                .integrator
                .integrate(start, target, &mut self.state, |t, y, dydt| evaluator.evaluate(t, y, diagnostics, dydt));

            let reached = match outcome {
                Ok(reached) => reached,
                Err(Interrupted { reached, failure }) => {
                    if reached > start && reached <= target {
                        self.time = reached;
                    }
                    error!("integration failed between t={} and t={}: {}", start, target, failure);
                    return Err(Error::integration(self.time, failure));
                }
            };

            if reached > target {
                return Err(Error::integration(start, IntegrationFailure::Overshoot { reached, target }));
            }
            if !(reached > start) {
                return Err(Error::integration(start, IntegrationFailure::NoProgress { reached }));
            }
            debug!("sub-step {} -> {}", start, reached);

            self.time = reached;
            self.substeps += 1;
        }
        Ok(true)
    }

    fn report<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        let total = self.evaluator.tally();
        let numerics = NumericalSummary::new(total.since(&self.reported), total, self.control.clamp_warning_rate);
        self.reported = total;

        if numerics.warning {
            warn!(
                "t={}: {} of {} evaluations read negative storages",
                self.time,
                numerics.interval.clamped,
                numerics.interval.evaluations);
        }

        let diagnostics = self.updater.diagnostics();
        let fluxes = self.evaluator.breakdown(&self.state, diagnostics);
        let frame = Frame::capture(self.time, self.evaluator.mesh(), &self.state, diagnostics, &fluxes, numerics);

        sink.report(&frame)?;
        self.reports += 1;
        info!("reported t={}", self.time);
        Ok(())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::layout::Quantity;
    use crate::mesh::Shape;
    use crate::meshing;
    use crate::report::{Channel, MemorySink};
    use crate::solver::{ImplicitEuler, SolverSettings};
    use crate::testing;

    /**
     * Records every interval it is asked to integrate, and jumps straight
     * to the target (or somewhere else) without touching the state.
     */
    struct Recording {
        calls: Vec<(f64, f64)>,
        reach: fn(f64, f64) -> f64,
    }

    impl Recording {
        fn new() -> Self {
            Self { calls: Vec::new(), reach: |_, tout| tout }
        }
    }

    impl Integrator for Recording {
        fn integrate<F>(&mut self, t: f64, tout: f64, _: &mut [f64], _: F) -> std::result::Result<f64, Interrupted>
        where
            F: FnMut(f64, &[f64], &mut [f64]),
        {
            self.calls.push((t, tout));
            Ok((self.reach)(t, tout))
        }

        fn stats(&self) -> SolverStats {
            SolverStats::default()
        }
    }

    /**
     * Commits half of every interval, writing a marker into the state, then
     * gives up.
     */
    struct HalfThenFail;

    impl Integrator for HalfThenFail {
        fn integrate<F>(&mut self, t: f64, tout: f64, y: &mut [f64], _: F) -> std::result::Result<f64, Interrupted>
        where
            F: FnMut(f64, &[f64], &mut [f64]),
        {
            y[0] = 1.0;
            Err(Interrupted {
                reached: 0.5 * (t + tout),
                failure: IntegrationFailure::StepTooSmall { step: 1e-12, min_step: 1e-9 },
            })
        }

        fn stats(&self) -> SolverStats {
            SolverStats::default()
        }
    }

    fn zeros(mesh: &Mesh) -> Vec<f64> {
        StateLayout::for_mesh(mesh).zeros()
    }

    #[test]
    fn sub_steps_snap_to_reporting_boundaries() {
        let mesh = testing::two_cell_mesh();
        let control = Control::new(0.0, vec![0.0, 360.0, 720.0], 300.0);
        let mut controller = Controller::new(&mesh, &control, Forcing::dry(), zeros(&mesh), Recording::new()).unwrap();
        let mut sink = MemorySink::new();
        let summary = controller.run(&mut sink).unwrap();

        assert_eq!(
            controller.integrator().calls,
            vec![(0.0, 300.0), (300.0, 360.0), (360.0, 660.0), (660.0, 720.0)]);
        assert_eq!(sink.times(), vec![0.0, 360.0, 720.0]);
        assert_eq!(controller.largest_substep(), 300.0);
        assert_eq!(controller.phase(), Phase::Finished);
        assert_eq!(summary.substeps, 4);
        assert_eq!(summary.reports, 3);
        assert!(!summary.cancelled);
    }

    #[test]
    fn overshooting_integrator_is_fatal() {
        let mesh = testing::two_cell_mesh();
        let control = Control::new(0.0, vec![100.0], 50.0);
        let integrator = Recording { calls: Vec::new(), reach: |_, tout| tout + 1.0 };
        let mut controller = Controller::new(&mesh, &control, Forcing::dry(), zeros(&mesh), integrator).unwrap();
        let result = controller.run(&mut MemorySink::new());

        assert!(matches!(
            result,
            Err(Error::Integration { time, failure: IntegrationFailure::Overshoot { .. } }) if time == 0.0));
    }

    #[test]
    fn stalled_integrator_is_fatal() {
        let mesh = testing::two_cell_mesh();
        let control = Control::new(0.0, vec![100.0], 50.0);
        let integrator = Recording { calls: Vec::new(), reach: |t, _| t };
        let mut controller = Controller::new(&mesh, &control, Forcing::dry(), zeros(&mesh), integrator).unwrap();

        assert!(matches!(
            controller.run(&mut MemorySink::new()),
            Err(Error::Integration { failure: IntegrationFailure::NoProgress { .. }, .. })));
    }

    #[test]
    fn short_integrator_steps_are_continued() {
        let mesh = testing::two_cell_mesh();
        let control = Control::new(0.0, vec![100.0], 50.0);
        let integrator = Recording { calls: Vec::new(), reach: |t, tout| (t + 20.0).min(tout) };
        let mut controller = Controller::new(&mesh, &control, Forcing::dry(), zeros(&mesh), integrator).unwrap();
        let summary = controller.run(&mut MemorySink::new()).unwrap();

        assert_eq!(
            controller.integrator().calls,
            vec![(0.0, 50.0), (20.0, 70.0), (40.0, 90.0), (60.0, 100.0), (80.0, 100.0)]);
        assert_eq!(summary.final_time, 100.0);
    }

    #[test]
    fn failed_integration_reports_the_committed_time() {
        let mesh = testing::two_cell_mesh();
        let control = Control::new(0.0, vec![100.0], 100.0);
        let mut controller = Controller::new(&mesh, &control, Forcing::dry(), zeros(&mesh), HalfThenFail).unwrap();
        let result = controller.run(&mut MemorySink::new());

        assert!(matches!(
            result,
            Err(Error::Integration { time, failure: IntegrationFailure::StepTooSmall { .. } }) if time == 50.0));
        assert_eq!(controller.time(), 50.0);
        assert_eq!(controller.state()[0], 1.0);
    }

    #[test]
    fn mismatched_initial_state_is_rejected() {
        let mesh = testing::two_cell_mesh();
        let control = testing::control();
        let result = Controller::new(&mesh, &control, Forcing::dry(), vec![0.0; 5], Recording::new());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn raised_cancel_flag_stops_the_run() {
        let mesh = testing::two_cell_mesh();
        let control = testing::control();
        let flag = Arc::new(AtomicBool::new(true));
        let mut controller = Controller::new(&mesh, &control, Forcing::dry(), zeros(&mesh), Recording::new())
            .unwrap()
            .with_cancel_flag(flag);
        let mut sink = MemorySink::new();
        let summary = controller.run(&mut sink).unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.final_time, 0.0);
        assert!(sink.frames.is_empty());
        assert!(controller.integrator().calls.is_empty());
    }

    #[test]
    fn two_cell_drainage() {
        let mesh = testing::two_cell_mesh();
        let control = Control::new(0.0, vec![60.0], 60.0).with_tolerances(1e-6, 1e-8);
        let layout = StateLayout::for_mesh(&mesh);
        let mut state = layout.zeros();
        state[layout.index_of(Quantity::Groundwater, 0)] = 10.0;
        state[layout.index_of(Quantity::Groundwater, 1)] = 5.0;
        let before = total_storage(&mesh, &layout, &state);

        let solver = ImplicitEuler::new(SolverSettings::from_control(&control));
        let mut controller = Controller::new(&mesh, &control, Forcing::dry(), state, solver).unwrap();
        let summary = controller.run(&mut MemorySink::new()).unwrap();
        let y = layout.view(controller.state());

        assert_eq!(summary.substeps, 1);
        assert!(y.groundwater(0) < 10.0);
        assert!(y.groundwater(1) > 5.0);
        assert!((total_storage(&mesh, &layout, controller.state()) - before).abs() < 1e-6 * before);
        assert!((summary.storage - before).abs() < 1e-6 * before);
    }

    #[test]
    fn thousands_of_elements_are_integrated() {
        let (nodes, triangles) = meshing::rectangle(40, 40, 50.0, 50.0, 10.0, |x, y| 100.0 - 0.01 * x - 0.002 * y);
        let elements = meshing::elements(&nodes, &triangles, &[testing::soil()], &[testing::land_cover()]).unwrap();
        let mesh = Mesh::new(elements, vec![]).unwrap();
        let layout = StateLayout::for_mesh(&mesh);
        let mut state = layout.zeros();

        for i in 0..mesh.num_elements() {
            state[layout.index_of(Quantity::Unsaturated, i)] = 0.5;
            state[layout.index_of(Quantity::Groundwater, i)] = 5.0 + 1e-3 * i as f64;
        }
        let before = total_storage(&mesh, &layout, &state);
        let control = Control::new(0.0, vec![10.0], 10.0).with_tolerances(1e-4, 1e-6);

        let solver = ImplicitEuler::new(SolverSettings::from_control(&control));
        let mut controller = Controller::new(&mesh, &control, Forcing::dry(), state, solver).unwrap();
        let summary = controller.run(&mut MemorySink::new()).unwrap();
        let after = total_storage(&mesh, &layout, controller.state());

        assert_eq!(mesh.num_elements(), 3200);
        assert_eq!(summary.final_time, 10.0);
        assert!(summary.solver.linear_iterations > 0);
        assert!((after - before).abs() < 1e-5 * before, "storage {} -> {}", before, after);
    }

    #[test]
    fn trapezoid_channel_storage_drifts_within_tolerance() {
        for reltol in [1e-4, 1e-6] {
            let mut rivers = testing::river_mesh().rivers().to_vec();
            for s in &mut rivers {
                s.shape = Shape::Trapezoid { bottom_width: 1.0, side_slope: 3.0 };
            }
            let mesh = Mesh::new(testing::river_mesh().elements().to_vec(), rivers).unwrap();
            let layout = StateLayout::for_mesh(&mesh);
            let state = testing::wet_state(&mesh);
            let before = total_storage(&mesh, &layout, &state);

            let control = Control::new(0.0, vec![60.0, 120.0], 30.0).with_tolerances(reltol, 1e-2 * reltol);
            let solver = ImplicitEuler::new(SolverSettings::from_control(&control));
            let mut controller = Controller::new(&mesh, &control, Forcing::dry(), state, solver).unwrap();
            controller.run(&mut MemorySink::new()).unwrap();
            let drift = (total_storage(&mesh, &layout, controller.state()) - before) / before;

            assert!(drift.abs() < 50.0 * reltol, "relative drift {:e} at reltol {:e}", drift, reltol);
        }
    }

    #[test]
    fn closed_basin_conserves_water_and_stays_non_negative() {
        let mesh = testing::river_mesh();
        let control = Control::new(0.0, vec![60.0, 120.0, 180.0], 30.0).with_tolerances(1e-4, 1e-6);
        let layout = StateLayout::for_mesh(&mesh);
        let state = testing::wet_state(&mesh);
        let before = total_storage(&mesh, &layout, &state);

        let solver = ImplicitEuler::new(SolverSettings::from_control(&control));
        let mut controller = Controller::new(&mesh, &control, Forcing::dry(), state, solver).unwrap();
        let mut sink = MemorySink::new();
        let summary = controller.run(&mut sink).unwrap();
        let after = total_storage(&mesh, &layout, controller.state());

        assert_eq!(sink.times(), vec![60.0, 120.0, 180.0]);
        assert_eq!(summary.substeps, 6);
        assert!(summary.numerics.evaluations > 0);
        assert!((after - before).abs() < 1e-5 * before, "storage {} -> {}", before, after);

        let floor = -100.0 * control.abstol;
        assert!(controller.state().iter().all(|y| *y >= floor), "{:?}", controller.state());

        for frame in &sink.frames {
            assert!(frame.get(Channel::Stage).unwrap().iter().all(|v| *v > 0.0));
        }
    }

    #[test]
    fn second_run_is_refused() {
        let mesh = testing::two_cell_mesh();
        let control = Control::new(0.0, vec![10.0], 10.0);
        let mut controller = Controller::new(&mesh, &control, Forcing::dry(), zeros(&mesh), Recording::new()).unwrap();
        controller.run(&mut MemorySink::new()).unwrap();
        assert!(controller.run(&mut MemorySink::new()).is_err());
    }
}
