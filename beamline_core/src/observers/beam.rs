//! Full phase-space snapshots.

use super::{ObservationPoint, Observer, ObserverRecord};
use crate::beam::{Beam, Particle};
use serde::{Deserialize, Serialize};

/// Live particles at one observation point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeamSnapshot {
    /// Before the element, when requested
    pub entry: Option<Vec<Particle>>,
    pub exit: Vec<Particle>,
}

/// Stores the whole ensemble at every observation point.
#[derive(Clone, Debug, Default)]
pub struct BeamObserver {
    with_entry: bool,
    records: Vec<ObserverRecord<BeamSnapshot>>,
}

impl BeamObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also keep the ensemble before each element.
    pub fn with_entry() -> Self {
        Self {
            with_entry: true,
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[ObserverRecord<BeamSnapshot>] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ObserverRecord<BeamSnapshot>> {
        self.records
    }
}

impl Observer for BeamObserver {
    fn needs_entry(&self) -> bool {
        self.with_entry
    }

    fn observe(&mut self, point: &ObservationPoint<'_>, entry: Option<&Beam>, exit: &Beam) {
        let snapshot = BeamSnapshot {
            entry: entry.map(|b| b.particles.clone()),
            exit: exit.particles.clone(),
        };
        self.records.push(ObserverRecord::new(point, snapshot));
    }
}
