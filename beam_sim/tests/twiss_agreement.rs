//! Optics propagated analytically agree with optics estimated from a
//! tracked ensemble sampled from the same matched parameters.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use beam_sim::{Lattice, LatticeKind};
use beamline_core::observers::{LossesObserver, TwissObserver};
use beamline_core::twiss::TwissPropagator;
use beamline_core::{track, Tracker, TrackingConfig};

const PARTICLES: usize = 100_000;

fn compare(kind: LatticeKind) {
    let lattice = Lattice::build(kind, PARTICLES, 2024).unwrap();
    let table = TwissPropagator::new(lattice.kinematics)
        .propagate(&lattice.sequence, &lattice.twiss)
        .unwrap();
    let beam = lattice.beam.sample().unwrap();
    let result = track(&lattice.sequence, beam, TwissObserver::default()).unwrap();

    for (row, record) in table.rows().iter().zip(result.observer.records()) {
        assert_eq!(row.element, record.element);
        let ensemble = record.value.unwrap();
        for (analytic, estimate) in [
            (row.twiss.x, ensemble.x.unwrap()),
            (row.twiss.y, ensemble.y.unwrap()),
        ] {
            assert_relative_eq!(estimate.twiss.beta, analytic.beta, max_relative = 0.03);
            assert_abs_diff_eq!(
                estimate.twiss.alpha,
                analytic.alpha,
                epsilon = 0.03 * (1.0 + analytic.alpha.abs())
            );
            assert_abs_diff_eq!(estimate.twiss.dispersion, analytic.dispersion, epsilon = 0.05);
            assert_relative_eq!(estimate.emittance, 1e-6, max_relative = 0.03);
        }
    }
}

#[test]
fn fodo_optics_agree() {
    compare(LatticeKind::Fodo);
}

#[test]
fn arc_optics_and_dispersion_agree() {
    compare(LatticeKind::Arc);
}

#[test]
fn matched_beam_stays_matched_over_turns() {
    let lattice = Lattice::build(LatticeKind::Fodo, 20_000, 11).unwrap();
    let tracker = Tracker::new(TrackingConfig {
        turns: 10,
        observe: beamline_core::ObservationMode::EndOfTurn,
        ..Default::default()
    });
    let result = tracker
        .track(&lattice.sequence, lattice.beam.sample().unwrap(), TwissObserver::default())
        .unwrap();
    for record in result.observer.records() {
        let x = record.value.unwrap().x.unwrap();
        assert_relative_eq!(x.twiss.beta, lattice.twiss.x.beta, max_relative = 0.05);
    }
}

#[test]
fn collimation_transmission_never_increases() {
    let lattice = Lattice::build(LatticeKind::Collimation, 5_000, 5).unwrap();
    let result = track(
        &lattice.sequence,
        lattice.beam.sample().unwrap(),
        LossesObserver::default(),
    )
    .unwrap();
    let records = result.observer.records();
    assert!(records
        .windows(2)
        .all(|w| w[1].value.transmission <= w[0].value.transmission));
    let last = records.last().unwrap().value.transmission;
    assert!(last < 1.0 && last > 0.0);
}
