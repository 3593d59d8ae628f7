//! Watershed is the core of a coupled-process hydrology simulator. A basin
//! is discretized into triangular elements, each holding surface water, an
//! unsaturated zone and a groundwater store, and drained by a network of
//! river segments with their own stage and bed aquifer. The fast physics
//! (overland, subsurface and channel flow and the exchanges between them)
//! is integrated implicitly as one stiff system of ODEs, while the slower
//! vertical processes (interception, snow, evapotranspiration) are advanced
//! explicitly between solver calls. Results are reported at fixed times to a
//! pluggable sink.

pub mod control;
pub mod controller;
pub mod diagnostics;
pub mod drainage;
pub mod error;
pub mod flux;
pub mod forcing;
pub mod geometry;
pub mod layout;
pub mod loader;
pub mod mesh;
pub mod meshing;
pub mod process;
pub mod report;
pub mod rhs;
pub mod solver;

#[cfg(test)]
mod testing;
