//! `beam_sim`: beam generation, reference lattices and record export.

pub mod distribution;
pub mod lattices;
pub mod report;

pub use distribution::{BeamDistribution, BeamDistributionBuilder};
pub use lattices::{Lattice, LatticeKind};
pub use report::{
    load_description, load_records, load_twiss, save_description, save_records, save_twiss,
};
