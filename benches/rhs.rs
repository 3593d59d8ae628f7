#![feature(test)]
extern crate test;

use watershed::control::Control;
use watershed::diagnostics::Diagnostics;
use watershed::layout::{Quantity, StateLayout};
use watershed::mesh::{LandCover, Mesh, Soil};
use watershed::meshing;
use watershed::rhs::Evaluator;




/**
 * A gently tilted 64 by 64 cell hillslope, wet enough that every lateral
 * exchange is active.
 */
fn hillslope() -> (Mesh, Vec<f64>) {
    let soil = Soil {
        kh: 5e-4,
        kv: 1e-4,
        kinf: 1e-4,
        porosity: 0.4,
        beta: 2.0,
        macropore_fraction: 0.0,
        macropore_conductivity: 0.0,
        infiltration_depth: 0.1,
    };
    let land_cover = LandCover {
        roughness: 2e-3,
        vegetation_fraction: 0.5,
        root_depth: 1.0,
        interception_coeff: 1e-4,
        stress_saturation: 0.5,
    };
    let (nodes, triangles) = meshing::rectangle(64, 64, 50.0, 50.0, 10.0, |x, y| 100.0 - 0.01 * x - 0.002 * y);
    let elements = meshing::elements(&nodes, &triangles, &[soil], &[land_cover]).unwrap();
    let mesh = Mesh::new(elements, vec![]).unwrap();

    let layout = StateLayout::for_mesh(&mesh);
    let mut state = layout.zeros();

    for i in 0..mesh.num_elements() {
        state[layout.index_of(Quantity::Surface, i)] = 0.01;
        state[layout.index_of(Quantity::Unsaturated, i)] = 0.5;
        state[layout.index_of(Quantity::Groundwater, i)] = 5.0 + 1e-3 * i as f64;
    }
    (mesh, state)
}

fn evaluate(b: &mut test::Bencher, parallel: bool) {
    let (mesh, state) = hillslope();
    let control = Control::new(0.0, vec![60.0], 60.0).with_parallel(parallel);
    let evaluator = Evaluator::new(&mesh, &control);
    let diagnostics = Diagnostics::new(mesh.num_elements());
    let mut derivative = vec![0.0; state.len()];

    b.iter(|| evaluator.evaluate(0.0, &state, &diagnostics, &mut derivative));
}




#[bench]
fn evaluate_hillslope_serial(b: &mut test::Bencher) {
    evaluate(b, false)
}

#[bench]
fn evaluate_hillslope_parallel(b: &mut test::Bencher) {
    evaluate(b, true)
}
