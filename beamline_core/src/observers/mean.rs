//! Beam centroid.

use super::{ObservationPoint, Observer, ObserverRecord};
use crate::beam::Beam;
use crate::types::PhaseVec;

/// Mean of each coordinate; `None` once the beam is empty.
#[derive(Clone, Debug, Default)]
pub struct MeanObserver {
    records: Vec<ObserverRecord<Option<PhaseVec>>>,
}

impl MeanObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ObserverRecord<Option<PhaseVec>>] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ObserverRecord<Option<PhaseVec>>> {
        self.records
    }
}

impl Observer for MeanObserver {
    fn observe(&mut self, point: &ObservationPoint<'_>, _entry: Option<&Beam>, exit: &Beam) {
        self.records.push(ObserverRecord::new(point, exit.mean()));
    }
}
