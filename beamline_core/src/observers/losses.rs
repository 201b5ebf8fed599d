//! Particle losses and transmission.

use super::{ObservationPoint, Observer, ObserverRecord};
use crate::beam::Beam;
use serde::{Deserialize, Serialize};

/// Live-particle bookkeeping between two observation points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LossCount {
    pub particles_in: usize,
    pub particles_out: usize,
    pub lost: usize,
    /// Live fraction of the initial beam after this point
    pub transmission: f64,
}

#[derive(Clone, Debug, Default)]
pub struct LossesObserver {
    previous: Option<usize>,
    records: Vec<ObserverRecord<LossCount>>,
}

impl LossesObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ObserverRecord<LossCount>] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ObserverRecord<LossCount>> {
        self.records
    }

    /// Transmission at the last observation point (1 before any).
    pub fn transmission(&self) -> f64 {
        self.records.last().map_or(1.0, |r| r.value.transmission)
    }
}

impl Observer for LossesObserver {
    fn observe(&mut self, point: &ObservationPoint<'_>, _entry: Option<&Beam>, exit: &Beam) {
        let particles_in = self.previous.unwrap_or_else(|| exit.initial_count());
        let particles_out = exit.len();
        self.previous = Some(particles_out);
        let count = LossCount {
            particles_in,
            particles_out,
            lost: particles_in.saturating_sub(particles_out),
            transmission: exit.transmission(),
        };
        self.records.push(ObserverRecord::new(point, count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aperture::Aperture;
    use crate::element::Element;
    use crate::kinematics::{Kinematics, Species};
    use crate::sequence::SequenceBuilder;
    use crate::tracking::{ObservationMode, Tracker, TrackingConfig};
    use crate::types::PhaseVec;

    #[test]
    fn counts_chain_across_turns() {
        let kin = Kinematics::from_kinetic_energy(Species::Proton, 150.0).unwrap();
        let coords = (0..5)
            .map(|i| PhaseVec::new(i as f64 * 1e-3, 0.0, 0.0, 0.0, 0.0, 0.0))
            .collect();
        let beam = Beam::from_coordinates(kin, coords).unwrap();
        let seq = SequenceBuilder::new()
            .element(Element::drift("D", 1.0))
            .element(Element::collimator("C", 0.1, Aperture::circular(2.5e-3)))
            .freeze()
            .unwrap();
        let tracker = Tracker::new(TrackingConfig {
            turns: 3,
            observe: ObservationMode::EndOfTurn,
            ..Default::default()
        });
        let result = tracker.track(&seq, beam, LossesObserver::new()).unwrap();
        let observer = result.observer;

        let counts: Vec<_> = observer
            .records()
            .iter()
            .map(|r| (r.value.particles_in, r.value.particles_out, r.value.lost))
            .collect();
        assert_eq!(counts, [(5, 3, 2), (3, 3, 0), (3, 3, 0)]);
        assert_eq!(observer.transmission(), 0.6);
    }

    #[test]
    fn transmission_is_one_before_any_observation() {
        assert_eq!(LossesObserver::new().transmission(), 1.0);
    }
}
