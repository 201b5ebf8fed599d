//! Beam size and second moments.

use super::{ObservationPoint, Observer, ObserverRecord};
use crate::beam::Beam;
use crate::types::{PhaseMatrix, PhaseVec};
use serde::{Deserialize, Serialize};

/// Second moments of the ensemble.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SigmaStats {
    /// Standard deviation of each coordinate
    pub std_dev: PhaseVec,
    pub covariance: PhaseMatrix,
}

/// `None` records mark points where fewer than two particles were left.
#[derive(Clone, Debug, Default)]
pub struct SigmaObserver {
    records: Vec<ObserverRecord<Option<SigmaStats>>>,
}

impl SigmaObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ObserverRecord<Option<SigmaStats>>] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ObserverRecord<Option<SigmaStats>>> {
        self.records
    }
}

impl Observer for SigmaObserver {
    fn observe(&mut self, point: &ObservationPoint<'_>, _entry: Option<&Beam>, exit: &Beam) {
        let stats = exit.covariance().map(|covariance| SigmaStats {
            std_dev: covariance.diagonal().map(|v| v.max(0.0).sqrt()),
            covariance,
        });
        self.records.push(ObserverRecord::new(point, stats));
    }
}
