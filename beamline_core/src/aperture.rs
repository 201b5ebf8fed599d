//! Physical apertures and the loss test.

use crate::error::{BeamlineError, Result};
use crate::types::{is_finite, PhaseVec, X, Y};
use serde::{Deserialize, Serialize};

/// Transverse acceptance of an element, tested at its exit.
///
/// Half-widths in metres; `x0`, `y0` offset the aperture centre.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Aperture {
    #[default]
    None,
    Circular {
        radius: f64,
        #[serde(default)]
        x0: f64,
        #[serde(default)]
        y0: f64,
    },
    Elliptical {
        a: f64,
        b: f64,
        #[serde(default)]
        x0: f64,
        #[serde(default)]
        y0: f64,
    },
    Rectangular {
        a: f64,
        b: f64,
        #[serde(default)]
        x0: f64,
        #[serde(default)]
        y0: f64,
    },
}

impl Aperture {
    pub fn circular(radius: f64) -> Self {
        Aperture::Circular {
            radius,
            x0: 0.0,
            y0: 0.0,
        }
    }

    pub fn elliptical(a: f64, b: f64) -> Self {
        Aperture::Elliptical {
            a,
            b,
            x0: 0.0,
            y0: 0.0,
        }
    }

    pub fn rectangular(a: f64, b: f64) -> Self {
        Aperture::Rectangular {
            a,
            b,
            x0: 0.0,
            y0: 0.0,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Aperture::None)
    }

    /// Whether a particle at `u` survives. Non-finite coordinates never do.
    pub fn admits(&self, u: &PhaseVec) -> bool {
        if !is_finite(u) {
            return false;
        }
        let (x, y) = (u[X], u[Y]);
        match *self {
            Aperture::None => true,
            Aperture::Circular { radius, x0, y0 } => {
                let (dx, dy) = (x - x0, y - y0);
                dx * dx + dy * dy <= radius * radius
            }
            Aperture::Elliptical { a, b, x0, y0 } => {
                let (dx, dy) = ((x - x0) / a, (y - y0) / b);
                dx * dx + dy * dy <= 1.0
            }
            Aperture::Rectangular { a, b, x0, y0 } => (x - x0).abs() <= a && (y - y0).abs() <= b,
        }
    }

    /// Horizontal half-width (radius for circles).
    pub fn half_width_x(&self) -> Option<f64> {
        match *self {
            Aperture::None => None,
            Aperture::Circular { radius, .. } => Some(radius),
            Aperture::Elliptical { a, .. } | Aperture::Rectangular { a, .. } => Some(a),
        }
    }

    /// Vertical half-width (radius for circles).
    pub fn half_width_y(&self) -> Option<f64> {
        match *self {
            Aperture::None => None,
            Aperture::Circular { radius, .. } => Some(radius),
            Aperture::Elliptical { b, .. } | Aperture::Rectangular { b, .. } => Some(b),
        }
    }

    /// Change the horizontal half-width; a circle stays a circle.
    pub(crate) fn set_half_width_x(&mut self, value: f64) -> bool {
        match self {
            Aperture::None => return false,
            Aperture::Circular { radius, .. } => *radius = value,
            Aperture::Elliptical { a, .. } | Aperture::Rectangular { a, .. } => *a = value,
        }
        true
    }

    pub(crate) fn set_half_width_y(&mut self, value: f64) -> bool {
        match self {
            Aperture::None => return false,
            Aperture::Circular { radius, .. } => *radius = value,
            Aperture::Elliptical { b, .. } | Aperture::Rectangular { b, .. } => *b = value,
        }
        true
    }

    pub fn validate(&self, element: &str) -> Result<()> {
        let check = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(BeamlineError::invalid(
                    element,
                    name,
                    v,
                    "aperture half-widths must be finite and > 0",
                ))
            }
        };
        let offsets = |x0: f64, y0: f64| {
            if x0.is_finite() && y0.is_finite() {
                Ok(())
            } else {
                Err(BeamlineError::invalid(
                    element,
                    "aperture offset",
                    if x0.is_finite() { y0 } else { x0 },
                    "offsets must be finite",
                ))
            }
        };
        match *self {
            Aperture::None => Ok(()),
            Aperture::Circular { radius, x0, y0 } => {
                check("radius", radius)?;
                offsets(x0, y0)
            }
            Aperture::Elliptical { a, b, x0, y0 } | Aperture::Rectangular { a, b, x0, y0 } => {
                check("a", a)?;
                check("b", b)?;
                offsets(x0, y0)
            }
        }
    }
}
