//! Finite-volume SIMPLE solver for the 2-D incompressible Navier-Stokes
//! equations on a structured Cartesian grid, partitioned into column
//! strips across peer ranks with halo exchange between neighbors.

pub mod comm;
pub mod config;
pub mod domain;
pub mod error;
pub mod io;
pub mod solver;
