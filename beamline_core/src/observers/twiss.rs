//! Optics of the tracked ensemble.

use super::{ObservationPoint, Observer, ObserverRecord};
use crate::beam::Beam;
use crate::twiss::{EnsembleTwiss, Twiss};

/// Records optics and emittances estimated from the particle distribution.
///
/// The value is `None` below two live particles.
#[derive(Clone, Debug, Default)]
pub struct TwissObserver {
    records: Vec<ObserverRecord<Option<EnsembleTwiss>>>,
}

impl TwissObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ObserverRecord<Option<EnsembleTwiss>>] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ObserverRecord<Option<EnsembleTwiss>>> {
        self.records
    }
}

impl Observer for TwissObserver {
    fn observe(&mut self, point: &ObservationPoint<'_>, _entry: Option<&Beam>, exit: &Beam) {
        let value = exit
            .covariance()
            .map(|cov| Twiss::from_covariance(&cov, exit.kinematics()));
        if let Some(EnsembleTwiss { x: None, .. } | EnsembleTwiss { y: None, .. }) = value {
            tracing::warn!(element = %point.element.name, "degenerate transverse plane");
        }
        self.records.push(ObserverRecord::new(point, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;
    use crate::kinematics::{Kinematics, Species};
    use crate::sequence::SequenceBuilder;
    use crate::tracking::track;
    use crate::types::PhaseVec;
    use approx::assert_relative_eq;

    #[test]
    fn emittance_is_conserved_in_a_drift() {
        let kin = Kinematics::from_kinetic_energy(Species::Proton, 150.0).unwrap();
        let coords = (0..64)
            .map(|i| {
                let a = i as f64 * std::f64::consts::TAU / 64.0;
                PhaseVec::new(1e-3 * a.cos(), 1e-4 * a.sin(), 2e-3 * a.sin(), 0.0, 0.0, 0.0)
            })
            .collect();
        let beam = Beam::from_coordinates(kin, coords).unwrap();
        let seq = SequenceBuilder::new()
            .element(Element::drift("D", 2.0))
            .freeze()
            .unwrap();
        let result = track(&seq, beam, TwissObserver::default()).unwrap();
        let x = result.observer.records()[0].value.unwrap().x.unwrap();
        assert_relative_eq!(x.emittance, 1e-7 * 64.0 / 63.0 / 2.0, max_relative = 1e-9);
        assert_relative_eq!(x.twiss.beta, 10.0 + 0.1 * 4.0, max_relative = 1e-9);
        // no angular spread vertically: the plane is degenerate
        assert!(result.observer.records()[0].value.unwrap().y.is_none());
    }
}
