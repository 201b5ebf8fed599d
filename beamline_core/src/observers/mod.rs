//! Observers: accumulators fed by the tracking driver.
//!
//! # Design choices
//! - An observer is a plain value passed into [`crate::track`] and returned
//!   inside the result, so every tracking call owns its own records.
//! - One [`ObserverRecord`] is appended per observation point (element and
//!   turn); records are never modified afterwards.
//! - Observers only read the beam. A pair `(A, B)` observes with both, and
//!   `()` observes nothing.

mod beam;
mod losses;
mod mean;
mod sigma;
mod twiss;

pub use beam::{BeamObserver, BeamSnapshot};
pub use losses::{LossCount, LossesObserver};
pub use mean::MeanObserver;
pub use sigma::{SigmaObserver, SigmaStats};
pub use twiss::TwissObserver;

use crate::beam::Beam;
use crate::element::Element;
use serde::{Deserialize, Serialize};

/// Where in the lattice an observation is taken.
#[derive(Clone, Copy, Debug)]
pub struct ObservationPoint<'a> {
    pub element_index: usize,
    pub element: &'a Element,
    pub turn: usize,
    /// Cumulative path length at the element exit, over all turns [m]
    pub s: f64,
}

/// One observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObserverRecord<T> {
    pub element_index: usize,
    pub element: String,
    pub turn: usize,
    pub s: f64,
    pub value: T,
}

impl<T> ObserverRecord<T> {
    pub fn new(point: &ObservationPoint<'_>, value: T) -> Self {
        Self {
            element_index: point.element_index,
            element: point.element.name.clone(),
            turn: point.turn,
            s: point.s,
            value,
        }
    }
}

/// Accumulator invoked by the tracking driver.
pub trait Observer {
    /// Whether [`Observer::observe`] needs the beam as it was before the element.
    fn needs_entry(&self) -> bool {
        false
    }

    /// `entry` is `Some` only when [`Observer::needs_entry`] is true.
    fn observe(&mut self, point: &ObservationPoint<'_>, entry: Option<&Beam>, exit: &Beam);
}

impl Observer for () {
    fn observe(&mut self, _point: &ObservationPoint<'_>, _entry: Option<&Beam>, _exit: &Beam) {}
}

impl<A: Observer, B: Observer> Observer for (A, B) {
    fn needs_entry(&self) -> bool {
        self.0.needs_entry() || self.1.needs_entry()
    }

    fn observe(&mut self, point: &ObservationPoint<'_>, entry: Option<&Beam>, exit: &Beam) {
        self.0.observe(point, entry, exit);
        self.1.observe(point, entry, exit);
    }
}
