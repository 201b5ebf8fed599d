//! Reference lattices.
//!
//! Each lattice is a named beamline together with its reference particle
//! and a beam matched to it. All lattices are deterministic given the seed.

use crate::distribution::BeamDistribution;
use beamline_core::error::Result;
use beamline_core::twiss::{PlaneTwiss, Twiss, TwissPropagator};
use beamline_core::{Aperture, Element, Kinematics, Sequence, SequenceBuilder, Species};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Which predefined lattice to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum LatticeKind {
    /// One 1 m quadrupole, K1 = 1 m⁻²
    Quadrupole,
    /// Four FODO cells, periodic optics
    Fodo,
    /// Six FODO cells with sector bends in place of the drifts
    Arc,
    /// Four-bend rectangular-magnet chicane
    Chicane,
    /// Quadrupole doublet between two collimators
    Collimation,
}

/// A beamline ready to track.
#[derive(Clone, Debug)]
pub struct Lattice {
    pub name: String,
    pub kinematics: Kinematics,
    pub sequence: Sequence,
    /// Optics at the entrance
    pub twiss: Twiss,
    pub beam: BeamDistribution,
}

const FODO_K1: f64 = 1.0;
const QUAD_LENGTH: f64 = 0.4;
const CELL_GAP: f64 = 1.6;

impl Lattice {
    /// Build the named lattice with a beam of `particles` drawn from `seed`.
    pub fn build(kind: LatticeKind, particles: usize, seed: u64) -> Result<Self> {
        let kinematics = Kinematics::from_kinetic_energy(Species::Proton, 230.0)?;
        let (name, sequence, twiss, sigma_pt) = match kind {
            LatticeKind::Quadrupole => {
                let seq = SequenceBuilder::new()
                    .element(Element::quadrupole("Q", 1.0, 1.0))
                    .freeze()?;
                ("quadrupole", seq, round_beam(5.0), 0.0)
            }
            LatticeKind::Fodo => {
                let cell = fodo_cells(1, None)?;
                let twiss = TwissPropagator::new(kinematics).periodic(&cell)?;
                ("fodo", fodo_cells(4, None)?, twiss, 0.0)
            }
            LatticeKind::Arc => {
                let bend = 2.0 * PI / 16.0;
                let cell = fodo_cells(1, Some(bend))?;
                let twiss = TwissPropagator::new(kinematics).periodic(&cell)?;
                ("arc", fodo_cells(6, Some(bend))?, twiss, 1e-3)
            }
            LatticeKind::Chicane => ("chicane", chicane()?, round_beam(10.0), 1e-3),
            LatticeKind::Collimation => ("collimation", collimation()?, round_beam(20.0), 0.0),
        };

        let emittance = match kind {
            LatticeKind::Collimation => 5e-6,
            _ => 1e-6,
        };
        let beam = BeamDistribution::builder(kinematics)
            .twiss(twiss, emittance, emittance)
            .longitudinal(0.0, sigma_pt)
            .particles(particles)
            .seed(seed)
            .build()?;

        tracing::info!(lattice = name, elements = sequence.len(), particles, "lattice built");
        Ok(Self {
            name: name.into(),
            kinematics,
            sequence,
            twiss,
            beam,
        })
    }
}

fn round_beam(beta: f64) -> Twiss {
    Twiss::new(PlaneTwiss::new(beta, 0.0), PlaneTwiss::new(beta, 0.0))
}

/// `QF, gap, QD, gap` repeated; the gaps are sector bends when `bend` is set.
fn fodo_cells(cells: usize, bend: Option<f64>) -> Result<Sequence> {
    let mut builder = SequenceBuilder::new();
    for c in 0..cells {
        let gap = |label: &str| match bend {
            Some(angle) => Element::sbend(format!("{label}{c}"), CELL_GAP, angle),
            None => Element::drift(format!("{label}{c}"), CELL_GAP),
        };
        builder
            .push(Element::quadrupole(format!("QF{c}"), QUAD_LENGTH, FODO_K1))
            .push(gap("GA"))
            .push(Element::quadrupole(format!("QD{c}"), QUAD_LENGTH, -FODO_K1))
            .push(gap("GB"));
    }
    builder.freeze()
}

fn chicane() -> Result<Sequence> {
    let angle = 0.1;
    SequenceBuilder::new()
        .element(Element::drift("D0", 1.0))
        .element(Element::rbend("B1", 0.5, angle))
        .element(Element::drift("D1", 1.0))
        .element(Element::rbend("B2", 0.5, -angle))
        .element(Element::drift("D2", 0.5))
        .element(Element::rbend("B3", 0.5, -angle))
        .element(Element::drift("D3", 1.0))
        .element(Element::rbend("B4", 0.5, angle))
        .element(Element::drift("D4", 1.0))
        .freeze()
}

fn collimation() -> Result<Sequence> {
    SequenceBuilder::new()
        .element(Element::drift("D0", 1.0))
        .element(Element::collimator("COLL1", 0.2, Aperture::circular(8e-3)))
        .element(Element::quadrupole("Q1", 0.5, 2.0))
        .element(Element::drift("D1", 0.5))
        .element(Element::quadrupole("Q2", 0.5, -2.0))
        .element(Element::drift("D2", 2.0))
        .element(Element::collimator("COLL2", 0.2, Aperture::rectangular(6e-3, 6e-3)))
        .element(Element::marker("END"))
        .freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn every_lattice_builds() {
        for kind in LatticeKind::value_variants() {
            let lattice = Lattice::build(*kind, 10, 1).unwrap();
            assert!(!lattice.sequence.is_empty());
            assert_eq!(lattice.beam.sample().unwrap().len(), 10);
        }
    }

    #[test]
    fn arc_is_matched_with_dispersion() {
        let lattice = Lattice::build(LatticeKind::Arc, 10, 1).unwrap();
        assert!(lattice.twiss.x.dispersion > 0.0);
        assert_eq!(lattice.twiss.y.dispersion, 0.0);
    }
}
