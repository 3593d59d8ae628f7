//! Small meshes and states shared by the unit tests.

use crate::control::Control;
use crate::diagnostics::Diagnostics;
use crate::geometry::Point;
use crate::layout::{Quantity, StateLayout};
use crate::mesh::{Bank, BoundaryCondition, Downstream, Element, Face, LandCover, Mesh, Neighbor, Outlet, RiverSegment, Shape, Soil};
use crate::meshing;




pub fn soil() -> Soil {
    Soil {
        kh: 5e-4,
        kv: 1e-4,
        kinf: 1e-4,
        porosity: 0.4,
        beta: 2.0,
        macropore_fraction: 0.1,
        macropore_conductivity: 1e-2,
        infiltration_depth: 0.1,
    }
}

pub fn land_cover() -> LandCover {
    LandCover {
        roughness: 2e-3,
        vegetation_fraction: 0.5,
        root_depth: 1.0,
        interception_coeff: 1e-4,
        stress_saturation: 0.5,
    }
}

pub fn control() -> Control {
    Control::new(0.0, vec![360.0, 720.0], 60.0).with_tolerances(1e-4, 1e-6)
}




/**
 * Two right triangles forming a 100 m square, sharing its diagonal, with a
 * flat surface 20 m above the bedrock and closed outer edges.
 */
pub fn two_cell_mesh() -> Mesh {
    let closed = |edge_length| Face {
        neighbor: Neighbor::Boundary(BoundaryCondition::NoFlow),
        edge_length,
        distance: 100.0 / 3.0,
    };
    let shared = |other| Face {
        neighbor: Neighbor::Element(other),
        edge_length: 100.0 * 2f64.sqrt(),
        distance: 100.0 * 2f64.sqrt() / 3.0,
    };
    let element = |centroid, other| Element {
        area: 5000.0,
        centroid,
        zmin: 0.0,
        zmax: 20.0,
        faces: [shared(other), closed(100.0), closed(100.0)],
        soil: soil(),
        land_cover: land_cover(),
        station: 0,
    };

    let elements = vec![
        element(Point::new(200.0 / 3.0, 100.0 / 3.0), 1),
        element(Point::new(100.0 / 3.0, 200.0 / 3.0), 0),
    ];
    Mesh::new(elements, vec![]).unwrap()
}

pub fn segment(downstream: Downstream) -> RiverSegment {
    RiverSegment {
        length: 100.0,
        zbed: 18.0,
        zmin: 0.0,
        shape: Shape::Rectangle { width: 2.0 },
        depth: 2.0,
        roughness: 5e-4,
        weir_coefficient: 0.6,
        bank_conductivity: 5e-4,
        bed_conductivity: 1e-4,
        bed_thickness: 1.0,
        bed_porosity: 0.4,
        banks: [None, None],
        downstream,
    }
}

/**
 * A 200 m by 100 m rectangle of four elements, drained by two river
 * segments in series that end in a closed outlet. Segment 0 runs between
 * the triangles of the first cell, segment 1 between those of the second.
 */
pub fn river_mesh() -> Mesh {
    let (nodes, triangles) = meshing::rectangle(2, 1, 100.0, 100.0, 20.0, |_, _| 20.0);
    let elements = meshing::elements(&nodes, &triangles, &[soil()], &[land_cover()]).unwrap();
    let bank = |element| Some(Bank { element, distance: 30.0 });

    let mut upper = segment(Downstream::Segment(1));
    upper.banks = [bank(0), bank(1)];

    let mut lower = segment(Downstream::Outlet(Outlet::Closed));
    lower.zbed = 17.9;
    lower.banks = [bank(2), bank(3)];

    Mesh::new(elements, vec![upper, lower]).unwrap()
}

/**
 * A state with water in every store and differences between neighbors, so
 * that every kind of exchange is active.
 */
pub fn wet_state(mesh: &Mesh) -> Vec<f64> {
    let layout = StateLayout::for_mesh(mesh);
    let mut state = layout.zeros();

    for i in 0..mesh.num_elements() {
        state[layout.index_of(Quantity::Surface, i)] = 0.05 + 0.01 * i as f64;
        state[layout.index_of(Quantity::Unsaturated, i)] = 0.5;
        state[layout.index_of(Quantity::Groundwater, i)] = 5.0 + i as f64;
    }
    for r in 0..mesh.num_rivers() {
        state[layout.index_of(Quantity::Stage, r)] = 0.3 + 0.1 * r as f64;
        state[layout.index_of(Quantity::RiverBed, r)] = 16.0;
    }
    state
}

pub fn rainy_diagnostics(num_elements: usize) -> Diagnostics {
    let mut diagnostics = Diagnostics::new(num_elements);
    diagnostics.net_precipitation = vec![1e-5; num_elements];
    diagnostics.transpiration = vec![1e-6; num_elements];
    diagnostics.ground_evaporation = vec![1e-6; num_elements];
    diagnostics.infiltration_capacity = vec![1e-4; num_elements];
    diagnostics
}
