//! Integrators: element parameters + kinematics → transfer map.
//!
//! # Design choices
//! - Four interchangeable strategies behind the [`Integrator`] trait, chosen
//!   per element through [`IntegratorKind`]:
//!   - [`Mad8`]: closed-form second-order maps of combined-function magnets
//!   - [`Exact`]: symplectic integration of the exact Hamiltonian
//!   - [`Transport`]: explicit per-element second-order formulas
//!   - [`Kick`]: thin elements (multipoles, kickers, dipole edges, markers)
//! - Integrators are stateless. Tracking asks each one for a [`Stepper`]
//!   once per call and reuses it for every particle and every turn.
//! - Elements are integrated in their own frame. The tilt is applied by
//!   rotating the map (or the coordinates) in and out.

pub mod exact;
pub mod kick;
pub mod mad8;
pub mod principal;
pub mod transport;

pub use exact::{Exact, ExactStepper};
pub use kick::{Kick, ThinKick};
pub use mad8::Mad8;
pub use transport::Transport;

use crate::element::{Element, ElementKind, SectorBend};
use crate::error::{BeamlineError, Result};
use crate::kinematics::Kinematics;
use crate::maps::{CompiledMap, TransferMap};
use crate::types::{is_finite, PhaseVec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Which integration formalism an element uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegratorKind {
    Mad8,
    Exact,
    Transport,
    Kick,
}

impl IntegratorKind {
    /// Thin elements kick; everything else uses the closed-form maps.
    pub fn default_for(element: &Element) -> Self {
        if element.is_thin() {
            IntegratorKind::Kick
        } else {
            IntegratorKind::Mad8
        }
    }

    pub fn integrator(self) -> &'static dyn Integrator {
        match self {
            IntegratorKind::Mad8 => &Mad8,
            IntegratorKind::Exact => &Exact,
            IntegratorKind::Transport => &Transport,
            IntegratorKind::Kick => &Kick,
        }
    }

    /// Whether this integrator can handle `element`.
    pub fn supports(self, element: &Element) -> Result<()> {
        self.integrator()
            .check(element)
            .map_err(|reason| BeamlineError::UnsupportedIntegrator {
                element: element.name.clone(),
                integrator: self.to_string(),
                reason,
            })
    }
}

impl fmt::Display for IntegratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegratorKind::Mad8 => write!(f, "mad8"),
            IntegratorKind::Exact => write!(f, "exact"),
            IntegratorKind::Transport => write!(f, "transport"),
            IntegratorKind::Kick => write!(f, "kick"),
        }
    }
}

impl FromStr for IntegratorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mad8" => Ok(IntegratorKind::Mad8),
            "exact" => Ok(IntegratorKind::Exact),
            "transport" => Ok(IntegratorKind::Transport),
            "kick" => Ok(IntegratorKind::Kick),
            other => Err(format!("unknown integrator '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// An integration formalism.
pub trait Integrator: Sync {
    fn kind(&self) -> IntegratorKind;

    /// `Err(reason)` if this formalism cannot represent the element.
    fn check(&self, element: &Element) -> std::result::Result<(), String>;

    /// Second-order map in the element's own (untilted) frame.
    fn body_map(&self, element: &Element, kin: &Kinematics) -> TransferMap;

    /// Second-order map in lab coordinates.
    fn transfer_map(&self, element: &Element, kin: &Kinematics) -> TransferMap {
        self.body_map(element, kin).rotated(element.tilt)
    }

    /// Per-particle propagator for tracking. Map-based by default.
    fn stepper(&self, element: &Element, kin: &Kinematics) -> Stepper {
        Stepper::Map(self.transfer_map(element, kin).compile())
    }
}

/// Reject thin elements for the thick-element formalisms.
pub(crate) fn require_thick(element: &Element) -> std::result::Result<(), String> {
    if element.is_thin() {
        Err(format!(
            "thin {} elements (use the kick integrator)",
            element.category()
        ))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stepper
// ---------------------------------------------------------------------------

/// What tracking applies to each particle for one element.
#[derive(Clone, Debug)]
pub enum Stepper {
    Map(CompiledMap),
    Exact(ExactStepper),
    Kick(ThinKick),
}

impl Stepper {
    /// Advance one particle. Returns `false` if it left the physical domain.
    pub fn step(&self, u: &mut PhaseVec) -> bool {
        match self {
            Stepper::Map(map) => {
                *u = map.apply(u);
                is_finite(u)
            }
            Stepper::Exact(stepper) => stepper.step(u),
            Stepper::Kick(kick) => {
                kick.apply(u);
                is_finite(u)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shared pieces
// ---------------------------------------------------------------------------

/// Linear map of a dipole edge with curvature `h`, pole-face angle `e` and
/// fringe-field correction `fint·hgap`.
pub fn edge_map(h: f64, e: f64, fint: f64, hgap: f64) -> TransferMap {
    let mut map = TransferMap::identity();
    if h == 0.0 {
        return map;
    }
    let psi = 2.0 * fint * hgap * h * (1.0 + e.sin().powi(2)) / e.cos();
    map.r[(1, 0)] = h * e.tan();
    map.r[(3, 2)] = -h * (e - psi).tan();
    map
}

/// Entrance edge, body, exit edge of a sector bend.
pub(crate) fn with_edges(bend: &SectorBend, body: TransferMap) -> TransferMap {
    if !bend.has_edges() {
        return body;
    }
    edge_map(bend.h, bend.e1, bend.fint, bend.hgap)
        .then(&body)
        .then(&edge_map(bend.h, bend.e2, bend.fint, bend.hgap))
}

/// Half drift, thin kick, half drift, using a formalism's drift map.
pub(crate) fn thick_kicker(
    element: &Element,
    drift: impl Fn(f64) -> TransferMap,
) -> TransferMap {
    let half = drift(element.length / 2.0);
    match element.kind {
        ElementKind::Kicker { hkick, vkick } => {
            half.then(&ThinKick::kicker(hkick, vkick).map()).then(&half)
        }
        _ => half.then(&half),
    }
}

// ---------------------------------------------------------------------------
// Tests: agreement between formalisms
// ---------------------------------------------------------------------------
