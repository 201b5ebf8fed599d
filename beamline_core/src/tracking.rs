//! Tracking driver: element-by-element propagation of a beam.
//!
//! # Steps per element
//! 1. Advance every live particle with the element's stepper
//!    (in parallel above [`TrackingConfig::parallel_min_particles`])
//! 2. Aperture test at the element exit; failures and particles that left
//!    the physical domain move to the beam's loss ledger
//! 3. Hand the post-element beam to the observer
//!
//! Steppers are built once per call from the current element strengths and
//! reused for every turn.

use crate::beam::{Beam, LostParticle, Particle};
use crate::element::Element;
use crate::error::{BeamlineError, Result};
use crate::integrators::Stepper;
use crate::observers::{ObservationPoint, Observer};
use crate::sequence::Sequence;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// When the observer is invoked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservationMode {
    /// After every element of every turn
    #[default]
    EveryElement,
    /// After the last element of each turn
    EndOfTurn,
}

/// Configuration of one tracking call.
#[derive(Clone, Debug)]
pub struct TrackingConfig {
    /// Passes through the sequence (≥ 1)
    pub turns: usize,
    pub observe: ObservationMode,
    /// Beams smaller than this are advanced on the calling thread.
    pub parallel_min_particles: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            turns: 1,
            observe: ObservationMode::EveryElement,
            parallel_min_particles: 2048,
        }
    }
}

/// Final beam (with its loss ledger) and the populated observer.
#[derive(Clone, Debug)]
pub struct TrackingResult<O> {
    pub beam: Beam,
    pub observer: O,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct Tracker {
    pub config: TrackingConfig,
}

impl Tracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self { config }
    }

    /// Track `beam` through `sequence`, feeding `observer`.
    pub fn track<O: Observer>(
        &self,
        sequence: &Sequence,
        mut beam: Beam,
        mut observer: O,
    ) -> Result<TrackingResult<O>> {
        if sequence.is_empty() {
            return Err(BeamlineError::EmptySequence);
        }
        if self.config.turns == 0 {
            return Err(BeamlineError::invalid(
                "tracking",
                "turns",
                0.0,
                "at least one turn is required",
            ));
        }

        let span = tracing::info_span!(
            "track",
            elements = sequence.len(),
            particles = beam.len(),
            turns = self.config.turns
        );
        let _enter = span.enter();

        let kin = *beam.kinematics();
        let steppers: Vec<Stepper> = sequence
            .elements()
            .iter()
            .map(|e| e.integrator().integrator().stepper(e, &kin))
            .collect();

        let per_element = self.config.observe == ObservationMode::EveryElement;
        let last = sequence.len() - 1;
        let wants_entry = observer.needs_entry();

        for turn in 0..self.config.turns {
            let turn_entry = (wants_entry && !per_element).then(|| beam.clone());
            for (index, (element, stepper)) in
                sequence.elements().iter().zip(&steppers).enumerate()
            {
                let entry = (wants_entry && per_element).then(|| beam.clone());
                let lost = self.advance(stepper, element, &mut beam, index, turn);
                tracing::debug!(
                    element = %element.name,
                    index,
                    turn,
                    lost,
                    alive = beam.len(),
                    "element done"
                );

                if per_element || index == last {
                    let point = ObservationPoint {
                        element_index: index,
                        element,
                        turn,
                        s: turn as f64 * sequence.total_length() + sequence.exit_s_at(index),
                    };
                    let entry = entry.as_ref().or(turn_entry.as_ref());
                    observer.observe(&point, entry, &beam);
                }
            }
        }

        tracing::info!(
            alive = beam.len(),
            lost = beam.lost.len(),
            transmission = beam.transmission(),
            "tracking finished"
        );
        if beam.is_empty() && beam.initial_count() > 0 {
            tracing::warn!("every particle was lost");
        }
        Ok(TrackingResult { beam, observer })
    }

    /// One element for every live particle. Returns the number lost.
    fn advance(
        &self,
        stepper: &Stepper,
        element: &Element,
        beam: &mut Beam,
        index: usize,
        turn: usize,
    ) -> usize {
        let aperture = &element.aperture;
        let step = |p: &mut Particle| stepper.step(&mut p.coords) && aperture.admits(&p.coords);

        let survived: Vec<bool> = if beam.len() >= self.config.parallel_min_particles {
            beam.particles.par_iter_mut().map(step).collect()
        } else {
            beam.particles.iter_mut().map(step).collect()
        };
        if survived.iter().all(|&alive| alive) {
            return 0;
        }

        let mut flags = survived.into_iter();
        let mut lost = Vec::new();
        beam.particles.retain(|p| {
            let alive = flags.next().unwrap_or(false);
            if !alive {
                lost.push(LostParticle {
                    id: p.id,
                    element_index: index,
                    turn,
                    coordinates: p.coords,
                });
            }
            alive
        });
        let count = lost.len();
        beam.lost.extend(lost);
        count
    }
}

/// Track with the default configuration.
pub fn track<O: Observer>(
    sequence: &Sequence,
    beam: Beam,
    observer: O,
) -> Result<TrackingResult<O>> {
    Tracker::default().track(sequence, beam, observer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aperture::Aperture;
    use crate::element::Strength;
    use crate::kinematics::{Kinematics, Species};
    use crate::observers::{LossesObserver, MeanObserver, SigmaObserver, TwissObserver};
    use crate::sequence::SequenceBuilder;
    use crate::types::{PhaseVec, X};
    use approx::assert_abs_diff_eq;

    fn kin() -> Kinematics {
        Kinematics::from_kinetic_energy(Species::Proton, 230.0).unwrap()
    }

    fn fan(n: usize, spread: f64) -> Beam {
        let coords = (0..n)
            .map(|i| {
                let f = i as f64 / n as f64 - 0.5;
                PhaseVec::new(spread * f, 0.1 * spread * f, -spread * f, 0.0, 0.0, 1e-3 * f)
            })
            .collect();
        Beam::from_coordinates(kin(), coords).unwrap()
    }

    #[test]
    fn single_quadrupole_fixture() {
        let seq = SequenceBuilder::new()
            .element(Element::quadrupole("Q", 1.0, 1.0))
            .freeze()
            .unwrap();
        let beam = Beam::single(kin(), PhaseVec::new(0.01, 0.0, 0.0, 0.0, 0.0, 0.0)).unwrap();
        let result = track(&seq, beam, ()).unwrap();
        let x = result.beam.particles[0].coords[X];
        assert_abs_diff_eq!(x, 0.005_403_023_058_681_398, epsilon = 1e-17);
    }

    #[test]
    fn zero_length_drift_is_identity() {
        let seq = SequenceBuilder::new()
            .element(Element::drift("D0", 0.0))
            .freeze()
            .unwrap();
        let beam = fan(16, 1e-2);
        let before = beam.clone();
        let result = track(&seq, beam, ()).unwrap();
        for (a, b) in result.beam.particles.iter().zip(&before.particles) {
            assert_eq!(a.coords, b.coords);
        }
    }

    #[test]
    fn apertures_remove_particles_and_keep_the_ledger() {
        let seq = SequenceBuilder::new()
            .element(Element::drift("D", 1.0))
            .element(Element::collimator("C1", 0.1, Aperture::rectangular(3e-3, 1.0)))
            .element(Element::drift("D2", 1.0))
            .element(Element::collimator("C2", 0.1, Aperture::circular(1e-3)))
            .freeze()
            .unwrap();
        let result = track(&seq, fan(200, 1e-2), LossesObserver::default()).unwrap();
        let records = result.observer.records();

        let mut previous = 1.0;
        for r in records {
            assert!(r.value.transmission <= previous);
            previous = r.value.transmission;
        }
        assert_eq!(records[0].value.lost, 0);
        assert!(records[1].value.lost > 0);
        assert_eq!(
            result.beam.len() + result.beam.lost.len(),
            result.beam.initial_count()
        );
        assert!(result.beam.lost.iter().all(|l| l.element_index == 1 || l.element_index == 3));
    }

    #[test]
    fn total_loss_is_not_an_error() {
        let seq = SequenceBuilder::new()
            .element(Element::collimator("C", 0.1, Aperture::circular(1e-9)))
            .element(Element::drift("D", 1.0))
            .freeze()
            .unwrap();
        // every particle off axis
        let coords = (0..10)
            .map(|i| PhaseVec::new(1e-3 + i as f64 * 1e-4, 0.0, 0.0, 0.0, 0.0, 0.0))
            .collect();
        let beam = Beam::from_coordinates(kin(), coords).unwrap();
        let observers = (
            (MeanObserver::default(), SigmaObserver::default()),
            (LossesObserver::default(), TwissObserver::default()),
        );
        let result = track(&seq, beam, observers).unwrap();
        assert!(result.beam.is_empty());
        assert_eq!(result.beam.lost.len(), 10);

        let ((mean, sigma), (losses, twiss)) = result.observer;
        assert!(mean.records().iter().all(|r| r.value.is_none()));
        assert!(sigma.records().iter().all(|r| r.value.is_none()));
        assert!(twiss.records().iter().all(|r| r.value.is_none()));

        let counts: Vec<_> = losses.records().iter().map(|r| r.value).collect();
        assert_eq!((counts[0].particles_in, counts[0].lost), (10, 10));
        assert_eq!((counts[1].particles_in, counts[1].lost), (0, 0));
        assert!(counts.iter().all(|c| c.transmission == 0.0));
    }

    #[test]
    fn parallel_and_serial_paths_agree() {
        let seq = SequenceBuilder::new()
            .element(Element::quadrupole("Q", 0.5, 2.0))
            .element(Element::sextupole("S", 0.2, 10.0))
            .element(Element::collimator("C", 0.1, Aperture::elliptical(4e-3, 4e-3)))
            .freeze()
            .unwrap();
        let serial = Tracker::new(TrackingConfig {
            parallel_min_particles: usize::MAX,
            ..Default::default()
        });
        let parallel = Tracker::new(TrackingConfig {
            parallel_min_particles: 1,
            ..Default::default()
        });
        let a = serial.track(&seq, fan(500, 1e-2), ()).unwrap();
        let b = parallel.track(&seq, fan(500, 1e-2), ()).unwrap();
        assert_eq!(a.beam.particles, b.beam.particles);
        assert_eq!(a.beam.lost, b.beam.lost);
    }

    #[test]
    fn strength_change_only_affects_downstream_records() {
        let mut seq = SequenceBuilder::new()
            .element(Element::quadrupole("Q1", 0.5, 1.0))
            .element(Element::drift("D1", 1.0))
            .element(Element::quadrupole("Q2", 0.5, -1.0))
            .element(Element::drift("D2", 1.0))
            .freeze()
            .unwrap();
        let before = track(&seq, fan(64, 1e-3), SigmaObserver::default()).unwrap();
        seq.set_strength("Q2", Strength::K1, -1.5).unwrap();
        let after = track(&seq, fan(64, 1e-3), SigmaObserver::default()).unwrap();

        let (b, a) = (before.observer.records(), after.observer.records());
        assert_eq!(a[0], b[0]);
        assert_eq!(a[1], b[1]);
        assert_ne!(a[2], b[2]);
        assert_ne!(a[3], b[3]);
    }

    #[test]
    fn end_of_turn_observation() {
        let seq = SequenceBuilder::new()
            .element(Element::quadrupole("QF", 0.5, 1.0))
            .element(Element::drift("D", 1.0))
            .element(Element::quadrupole("QD", 0.5, -1.0))
            .element(Element::drift("D2", 1.0))
            .freeze()
            .unwrap();
        let tracker = Tracker::new(TrackingConfig {
            turns: 5,
            observe: ObservationMode::EndOfTurn,
            ..Default::default()
        });
        let result = tracker.track(&seq, fan(8, 1e-3), MeanObserver::default()).unwrap();
        let records = result.observer.records();
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.element_index == 3));
        assert_abs_diff_eq!(records[4].s, 15.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_turns_is_a_configuration_error() {
        let seq = SequenceBuilder::new()
            .element(Element::drift("D", 1.0))
            .freeze()
            .unwrap();
        let tracker = Tracker::new(TrackingConfig {
            turns: 0,
            ..Default::default()
        });
        assert!(tracker.track(&seq, fan(2, 1e-3), ()).is_err());
    }
}
