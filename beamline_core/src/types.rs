//! Fundamental types used across the entire workspace.

use nalgebra::{Matrix4, Matrix6, Vector4, Vector6};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Phase space: f64 throughout, canonical (x, px, y, py, t, pt)
// ---------------------------------------------------------------------------

/// 6D phase-space vector: [x, px, y, py, t, pt]
pub type PhaseVec = Vector6<f64>;

/// 6×6 linear transfer matrix or beam covariance
pub type PhaseMatrix = Matrix6<f64>;

/// Transverse 4×4 block (x, px, y, py)
pub type TransverseMatrix = Matrix4<f64>;

/// Transverse 4-vector (x, px, y, py), used for dispersion
pub type TransverseVec = Vector4<f64>;

/// Coordinate indices into a [`PhaseVec`].
pub const X: usize = 0;
pub const PX: usize = 1;
pub const Y: usize = 2;
pub const PY: usize = 3;
pub const T: usize = 4;
pub const PT: usize = 5;

/// Human-readable coordinate labels, in index order.
pub const COORDINATE_NAMES: [&str; 6] = ["x", "px", "y", "py", "t", "pt"];

// ---------------------------------------------------------------------------
// Identifier types
// ---------------------------------------------------------------------------

/// Stable particle identifier, assigned at beam construction.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ParticleId(pub u64);

impl fmt::Display for ParticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Transverse plane selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Plane {
    Horizontal,
    Vertical,
}

impl Plane {
    /// Index of the position coordinate of this plane.
    pub fn position_index(self) -> usize {
        match self {
            Plane::Horizontal => X,
            Plane::Vertical => Y,
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plane::Horizontal => write!(f, "horizontal"),
            Plane::Vertical => write!(f, "vertical"),
        }
    }
}

/// Convert a phase vector to a plain array (serialization-friendly).
pub fn to_array(v: &PhaseVec) -> [f64; 6] {
    [v[0], v[1], v[2], v[3], v[4], v[5]]
}

/// Rotation of the transverse frame by a roll angle `psi` about the s axis.
///
/// `rotation(psi) · u` expresses lab coordinates in the frame rolled by `psi`:
/// x' = x cos ψ + y sin ψ, y' = −x sin ψ + y cos ψ (same for momenta).
pub fn rotation(psi: f64) -> PhaseMatrix {
    let (s, c) = psi.sin_cos();
    let mut w = PhaseMatrix::identity();
    for o in 0..2 {
        w[(X + o, X + o)] = c;
        w[(X + o, Y + o)] = s;
        w[(Y + o, X + o)] = -s;
        w[(Y + o, Y + o)] = c;
    }
    w
}

/// Whether every coordinate is finite.
pub fn is_finite(v: &PhaseVec) -> bool {
    v.iter().all(|c| c.is_finite())
}
