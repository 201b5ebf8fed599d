//! Error types for the tracking engine.
//!
//! Only configuration problems surface as errors. Numerical edge cases of
//! the closed-form integrators are absorbed by their series fallbacks, and
//! an empty beam is a valid state, not an error.

use crate::types::Plane;
use thiserror::Error;

/// Everything that can go wrong while configuring or invoking the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BeamlineError {
    #[error("element '{element}': unknown category '{category}'")]
    UnknownCategory { element: String, category: String },

    #[error("element '{element}': unknown parameter '{parameter}' for category {category}")]
    UnknownParameter {
        element: String,
        category: String,
        parameter: String,
    },

    #[error("sequence contains no elements")]
    EmptySequence,

    #[error("duplicate element name '{0}'")]
    DuplicateName(String),

    #[error("no element named '{0}'")]
    UnknownElement(String),

    #[error("element index {index} out of range (sequence has {len} elements)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("element '{element}': integrator {integrator} does not support {reason}")]
    UnsupportedIntegrator {
        element: String,
        integrator: String,
        reason: String,
    },

    #[error("element '{element}': category {category} has no strength {strength}")]
    UnsupportedStrength {
        element: String,
        category: String,
        strength: String,
    },

    #[error("element '{element}': invalid {parameter} = {value} ({reason})")]
    InvalidParameter {
        element: String,
        parameter: String,
        value: f64,
        reason: String,
    },

    #[error("invalid kinematics: {0}")]
    InvalidKinematics(String),

    #[error("invalid beam: {0}")]
    InvalidBeam(String),

    #[error("invalid distribution: {0}")]
    InvalidDistribution(String),

    #[error("{plane} motion is unstable (cos mu = {cos_mu})")]
    UnstableLattice { plane: Plane, cos_mu: f64 },

    #[error("singular matrix while {0}")]
    SingularMatrix(String),
}

impl BeamlineError {
    /// Shorthand for [`BeamlineError::InvalidParameter`].
    pub fn invalid(
        element: impl Into<String>,
        parameter: impl Into<String>,
        value: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            element: element.into(),
            parameter: parameter.into(),
            value,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BeamlineError>;
