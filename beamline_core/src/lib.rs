//! `beamline_core`: charged-particle beamline tracking.
//!
//! # Module layout
//! - [`types`]: Phase-space vectors, matrices, identifiers
//! - [`kinematics`]: Reference particle (species, energy, rigidity)
//! - [`element`]: Element categories, parameters and strengths
//! - [`description`]: Untyped element descriptions (name, category, map)
//! - [`aperture`]: Aperture shapes and the loss test
//! - [`maps`]: Second-order transfer maps and their composition
//! - [`integrators`]: MAD-8, exact, TRANSPORT and thin-kick formalisms
//! - [`sequence`]: Builder, frozen sequence, strength updates
//! - [`beam`]: Particle ensemble, loss ledger, statistics
//! - [`tracking`]: Element-by-element tracking driver
//! - [`observers`]: Per-element accumulators (beam, mean, sigma, twiss, losses)
//! - [`twiss`]: Optics propagation and periodic solutions

pub mod aperture;
pub mod beam;
pub mod description;
pub mod element;
pub mod error;
pub mod integrators;
pub mod kinematics;
pub mod maps;
pub mod observers;
pub mod sequence;
pub mod tracking;
pub mod twiss;
pub mod types;

pub use aperture::Aperture;
pub use beam::{Beam, LostParticle, Particle};
pub use description::ElementDescription;
pub use element::{Category, Element, Strength};
pub use error::{BeamlineError, Result};
pub use integrators::IntegratorKind;
pub use kinematics::{Kinematics, Species};
pub use maps::TransferMap;
pub use observers::{
    BeamObserver, LossesObserver, MeanObserver, ObserverRecord, Observer, SigmaObserver,
    TwissObserver,
};
pub use sequence::{Sequence, SequenceBuilder};
pub use tracking::{track, ObservationMode, Tracker, TrackingConfig, TrackingResult};
pub use twiss::{PlaneTwiss, Twiss, TwissPropagator, TwissTable};
pub use types::{ParticleId, PhaseMatrix, PhaseVec, Plane};
