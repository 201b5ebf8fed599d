//! Beamline elements.
//!
//! # Design choices
//! - Categories are a closed sum type ([`ElementKind`]); each variant carries
//!   exactly the strengths its integrators read.
//! - Strengths are addressable by [`Strength`] so an optimizer can change
//!   them on a frozen sequence. Category, length and integrator are not strengths.
//! - Rectangular bends are stored as given (chord length, angle) and
//!   converted to sector-bend form by [`Element::sector_bend`] on demand.

use crate::aperture::Aperture;
use crate::error::{BeamlineError, Result};
use crate::integrators::IntegratorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Element category tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Marker,
    Drift,
    Quadrupole,
    Sextupole,
    Sbend,
    Rbend,
    Multipole,
    Kicker,
    Dipedge,
    Collimator,
}

impl Category {
    pub fn name(self) -> &'static str {
        match self {
            Category::Marker => "marker",
            Category::Drift => "drift",
            Category::Quadrupole => "quadrupole",
            Category::Sextupole => "sextupole",
            Category::Sbend => "sbend",
            Category::Rbend => "rbend",
            Category::Multipole => "multipole",
            Category::Kicker => "kicker",
            Category::Dipedge => "dipedge",
            Category::Collimator => "collimator",
        }
    }

    /// Parse a category name (case-insensitive), accepting common aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        let category = match name.to_ascii_lowercase().as_str() {
            "marker" | "monitor" | "instrument" => Category::Marker,
            "drift" => Category::Drift,
            "quadrupole" | "quad" => Category::Quadrupole,
            "sextupole" => Category::Sextupole,
            "sbend" => Category::Sbend,
            "rbend" => Category::Rbend,
            "multipole" => Category::Multipole,
            "kicker" | "hkicker" | "vkicker" | "tkicker" => Category::Kicker,
            "dipedge" => Category::Dipedge,
            "collimator" | "rcollimator" | "ecollimator" => Category::Collimator,
            _ => return None,
        };
        Some(category)
    }

    /// Categories that never have a length.
    pub fn is_always_thin(self) -> bool {
        matches!(
            self,
            Category::Marker | Category::Multipole | Category::Dipedge
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Strength keys
// ---------------------------------------------------------------------------

/// A named, mutable numeric parameter of an element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strength {
    K1,
    K2,
    Angle,
    E1,
    E2,
    Fint,
    Hgap,
    Tilt,
    HKick,
    VKick,
    /// Curvature of a dipole edge
    H,
    /// Integrated normal multipole coefficient of order n
    Knl(usize),
    /// Integrated skew multipole coefficient of order n
    Ksl(usize),
    ApertureX,
    ApertureY,
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strength::K1 => write!(f, "K1"),
            Strength::K2 => write!(f, "K2"),
            Strength::Angle => write!(f, "ANGLE"),
            Strength::E1 => write!(f, "E1"),
            Strength::E2 => write!(f, "E2"),
            Strength::Fint => write!(f, "FINT"),
            Strength::Hgap => write!(f, "HGAP"),
            Strength::Tilt => write!(f, "TILT"),
            Strength::HKick => write!(f, "HKICK"),
            Strength::VKick => write!(f, "VKICK"),
            Strength::H => write!(f, "H"),
            Strength::Knl(n) => write!(f, "KNL{n}"),
            Strength::Ksl(n) => write!(f, "KSL{n}"),
            Strength::ApertureX => write!(f, "APERTURE_X"),
            Strength::ApertureY => write!(f, "APERTURE_Y"),
        }
    }
}

impl FromStr for Strength {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let key = s.trim().to_ascii_uppercase();
        let strength = match key.as_str() {
            "K1" => Strength::K1,
            "K2" => Strength::K2,
            "ANGLE" => Strength::Angle,
            "E1" => Strength::E1,
            "E2" => Strength::E2,
            "FINT" => Strength::Fint,
            "HGAP" => Strength::Hgap,
            "TILT" => Strength::Tilt,
            "HKICK" => Strength::HKick,
            "VKICK" => Strength::VKick,
            "H" => Strength::H,
            "APERTURE_X" | "RADIUS" => Strength::ApertureX,
            "APERTURE_Y" => Strength::ApertureY,
            other => {
                let order = |prefix: &str| {
                    other
                        .strip_prefix(prefix)
                        .and_then(|n| n.parse::<usize>().ok())
                };
                if let Some(n) = order("KNL") {
                    Strength::Knl(n)
                } else if let Some(n) = order("KSL") {
                    Strength::Ksl(n)
                } else {
                    return Err(format!("unknown strength '{s}'"));
                }
            }
        };
        Ok(strength)
    }
}

// ---------------------------------------------------------------------------
// Element kinds
// ---------------------------------------------------------------------------

/// Strengths shared by sector and rectangular bends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BendParams {
    /// Total bending angle [rad]
    pub angle: f64,
    /// Normalised quadrupole gradient [m⁻²]
    #[serde(default)]
    pub k1: f64,
    /// Normalised sextupole strength [m⁻³]
    #[serde(default)]
    pub k2: f64,
    /// Entrance pole-face rotation [rad]
    #[serde(default)]
    pub e1: f64,
    /// Exit pole-face rotation [rad]
    #[serde(default)]
    pub e2: f64,
    /// Fringe-field integral
    #[serde(default)]
    pub fint: f64,
    /// Half gap of the magnet [m]
    #[serde(default)]
    pub hgap: f64,
}

/// What an element is, with the fields its integrators need.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ElementKind {
    Marker,
    Drift,
    Quadrupole { k1: f64 },
    Sextupole { k2: f64 },
    SBend(BendParams),
    RBend(BendParams),
    Multipole { knl: Vec<f64>, ksl: Vec<f64> },
    Kicker { hkick: f64, vkick: f64 },
    Dipedge { h: f64, e1: f64, fint: f64, hgap: f64 },
    Collimator,
}

impl ElementKind {
    /// A kind of the given category with all strengths zero.
    pub fn zeroed(category: Category) -> Self {
        match category {
            Category::Marker => ElementKind::Marker,
            Category::Drift => ElementKind::Drift,
            Category::Quadrupole => ElementKind::Quadrupole { k1: 0.0 },
            Category::Sextupole => ElementKind::Sextupole { k2: 0.0 },
            Category::Sbend => ElementKind::SBend(BendParams::default()),
            Category::Rbend => ElementKind::RBend(BendParams::default()),
            Category::Multipole => ElementKind::Multipole {
                knl: Vec::new(),
                ksl: Vec::new(),
            },
            Category::Kicker => ElementKind::Kicker {
                hkick: 0.0,
                vkick: 0.0,
            },
            Category::Dipedge => ElementKind::Dipedge {
                h: 0.0,
                e1: 0.0,
                fint: 0.0,
                hgap: 0.0,
            },
            Category::Collimator => ElementKind::Collimator,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            ElementKind::Marker => Category::Marker,
            ElementKind::Drift => Category::Drift,
            ElementKind::Quadrupole { .. } => Category::Quadrupole,
            ElementKind::Sextupole { .. } => Category::Sextupole,
            ElementKind::SBend(_) => Category::Sbend,
            ElementKind::RBend(_) => Category::Rbend,
            ElementKind::Multipole { .. } => Category::Multipole,
            ElementKind::Kicker { .. } => Category::Kicker,
            ElementKind::Dipedge { .. } => Category::Dipedge,
            ElementKind::Collimator => Category::Collimator,
        }
    }

    /// Mutable access to one strength, if this kind carries it.
    fn slot(&mut self, strength: Strength) -> Option<&mut f64> {
        use ElementKind as K;
        match (self, strength) {
            (K::Quadrupole { k1 }, Strength::K1) => Some(k1),
            (K::Sextupole { k2 }, Strength::K2) => Some(k2),
            (K::SBend(p) | K::RBend(p), s) => match s {
                Strength::Angle => Some(&mut p.angle),
                Strength::K1 => Some(&mut p.k1),
                Strength::K2 => Some(&mut p.k2),
                Strength::E1 => Some(&mut p.e1),
                Strength::E2 => Some(&mut p.e2),
                Strength::Fint => Some(&mut p.fint),
                Strength::Hgap => Some(&mut p.hgap),
                _ => None,
            },
            (K::Multipole { knl, .. }, Strength::Knl(n)) => Some(grow(knl, n)),
            (K::Multipole { ksl, .. }, Strength::Ksl(n)) => Some(grow(ksl, n)),
            (K::Kicker { hkick, .. }, Strength::HKick) => Some(hkick),
            (K::Kicker { vkick, .. }, Strength::VKick) => Some(vkick),
            (K::Dipedge { h, .. }, Strength::H) => Some(h),
            (K::Dipedge { e1, .. }, Strength::E1) => Some(e1),
            (K::Dipedge { fint, .. }, Strength::Fint) => Some(fint),
            (K::Dipedge { hgap, .. }, Strength::Hgap) => Some(hgap),
            _ => None,
        }
    }

    fn values(&self) -> Vec<(&'static str, f64)> {
        match self {
            ElementKind::Quadrupole { k1 } => vec![("K1", *k1)],
            ElementKind::Sextupole { k2 } => vec![("K2", *k2)],
            ElementKind::SBend(p) | ElementKind::RBend(p) => vec![
                ("ANGLE", p.angle),
                ("K1", p.k1),
                ("K2", p.k2),
                ("E1", p.e1),
                ("E2", p.e2),
                ("FINT", p.fint),
                ("HGAP", p.hgap),
            ],
            ElementKind::Multipole { knl, ksl } => knl
                .iter()
                .map(|&v| ("KNL", v))
                .chain(ksl.iter().map(|&v| ("KSL", v)))
                .collect(),
            ElementKind::Kicker { hkick, vkick } => vec![("HKICK", *hkick), ("VKICK", *vkick)],
            ElementKind::Dipedge { h, e1, fint, hgap } => {
                vec![("H", *h), ("E1", *e1), ("FINT", *fint), ("HGAP", *hgap)]
            }
            ElementKind::Marker | ElementKind::Drift | ElementKind::Collimator => Vec::new(),
        }
    }
}

fn grow(v: &mut Vec<f64>, n: usize) -> &mut f64 {
    if v.len() <= n {
        v.resize(n + 1, 0.0);
    }
    &mut v[n]
}

/// A bend in the form the integrators use: arc length, curvature and edges.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SectorBend {
    /// Arc length [m]
    pub length: f64,
    /// Curvature 1/ρ [m⁻¹]
    pub h: f64,
    pub k1: f64,
    pub k2: f64,
    pub e1: f64,
    pub e2: f64,
    pub fint: f64,
    pub hgap: f64,
}

impl SectorBend {
    /// Whether the edge focusing differs from a pure sector magnet.
    pub fn has_edges(&self) -> bool {
        self.h != 0.0 && (self.e1 != 0.0 || self.e2 != 0.0 || self.fint * self.hgap != 0.0)
    }
}

// ---------------------------------------------------------------------------
// Element
// ---------------------------------------------------------------------------

/// One beamline component.
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    pub name: String,
    pub kind: ElementKind,
    /// Length along the reference orbit [m]; chord length for rectangular bends
    pub length: f64,
    /// Roll angle about the s axis [rad]
    pub tilt: f64,
    pub aperture: Aperture,
    integrator: Option<IntegratorKind>,
}

impl Element {
    pub fn new(name: impl Into<String>, kind: ElementKind, length: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            length,
            tilt: 0.0,
            aperture: Aperture::None,
            integrator: None,
        }
    }

    pub fn marker(name: impl Into<String>) -> Self {
        Self::new(name, ElementKind::Marker, 0.0)
    }

    pub fn drift(name: impl Into<String>, length: f64) -> Self {
        Self::new(name, ElementKind::Drift, length)
    }

    pub fn quadrupole(name: impl Into<String>, length: f64, k1: f64) -> Self {
        Self::new(name, ElementKind::Quadrupole { k1 }, length)
    }

    pub fn sextupole(name: impl Into<String>, length: f64, k2: f64) -> Self {
        Self::new(name, ElementKind::Sextupole { k2 }, length)
    }

    pub fn sbend(name: impl Into<String>, length: f64, angle: f64) -> Self {
        Self::new(
            name,
            ElementKind::SBend(BendParams {
                angle,
                ..BendParams::default()
            }),
            length,
        )
    }

    pub fn rbend(name: impl Into<String>, length: f64, angle: f64) -> Self {
        Self::new(
            name,
            ElementKind::RBend(BendParams {
                angle,
                ..BendParams::default()
            }),
            length,
        )
    }

    /// Thin multipole with integrated normal and skew coefficients.
    pub fn multipole(name: impl Into<String>, knl: Vec<f64>, ksl: Vec<f64>) -> Self {
        Self::new(name, ElementKind::Multipole { knl, ksl }, 0.0)
    }

    pub fn kicker(name: impl Into<String>, length: f64, hkick: f64, vkick: f64) -> Self {
        Self::new(name, ElementKind::Kicker { hkick, vkick }, length)
    }

    /// Thin dipole edge of a magnet with curvature `h` and pole-face angle `e1`.
    pub fn dipedge(name: impl Into<String>, h: f64, e1: f64) -> Self {
        Self::new(
            name,
            ElementKind::Dipedge {
                h,
                e1,
                fint: 0.0,
                hgap: 0.0,
            },
            0.0,
        )
    }

    pub fn collimator(name: impl Into<String>, length: f64, aperture: Aperture) -> Self {
        Self::new(name, ElementKind::Collimator, length).with_aperture(aperture)
    }

    pub fn with_tilt(mut self, tilt: f64) -> Self {
        self.tilt = tilt;
        self
    }

    pub fn with_aperture(mut self, aperture: Aperture) -> Self {
        self.aperture = aperture;
        self
    }

    pub fn with_integrator(mut self, integrator: IntegratorKind) -> Self {
        self.integrator = Some(integrator);
        self
    }

    /// Bend parameters; no effect on other categories.
    pub fn with_bend(mut self, f: impl FnOnce(&mut BendParams)) -> Self {
        if let ElementKind::SBend(p) | ElementKind::RBend(p) = &mut self.kind {
            f(p);
        }
        self
    }

    pub fn category(&self) -> Category {
        self.kind.category()
    }

    /// No length-dependent propagation: an instantaneous kick.
    pub fn is_thin(&self) -> bool {
        self.category().is_always_thin()
            || (self.category() == Category::Kicker && self.length == 0.0)
    }

    /// The integrator this element runs with.
    pub fn integrator(&self) -> IntegratorKind {
        self.integrator
            .unwrap_or_else(|| IntegratorKind::default_for(self))
    }

    pub(crate) fn has_explicit_integrator(&self) -> bool {
        self.integrator.is_some()
    }

    /// Path length along the reference orbit (arc length for bends).
    pub fn path_length(&self) -> f64 {
        self.sector_bend().map_or(self.length, |b| b.length)
    }

    /// Sector-bend form of an sbend or rbend.
    pub fn sector_bend(&self) -> Option<SectorBend> {
        match &self.kind {
            ElementKind::SBend(p) => Some(SectorBend {
                length: self.length,
                h: if self.length > 0.0 {
                    p.angle / self.length
                } else {
                    0.0
                },
                k1: p.k1,
                k2: p.k2,
                e1: p.e1,
                e2: p.e2,
                fint: p.fint,
                hgap: p.hgap,
            }),
            ElementKind::RBend(p) => {
                let half = p.angle / 2.0;
                let arc = if half.abs() < 1e-9 {
                    self.length
                } else {
                    self.length * half / half.sin()
                };
                Some(SectorBend {
                    length: arc,
                    h: if arc > 0.0 { p.angle / arc } else { 0.0 },
                    k1: p.k1,
                    k2: p.k2,
                    e1: p.e1 + half,
                    e2: p.e2 + half,
                    fint: p.fint,
                    hgap: p.hgap,
                })
            }
            _ => None,
        }
    }

    /// Current value of a strength.
    pub fn strength(&self, strength: Strength) -> Result<f64> {
        match strength {
            Strength::Tilt => return Ok(self.tilt),
            Strength::ApertureX => {
                return self
                    .aperture
                    .half_width_x()
                    .ok_or_else(|| self.unsupported(strength))
            }
            Strength::ApertureY => {
                return self
                    .aperture
                    .half_width_y()
                    .ok_or_else(|| self.unsupported(strength))
            }
            Strength::Knl(n) | Strength::Ksl(n) => {
                if let ElementKind::Multipole { knl, ksl } = &self.kind {
                    let v = if matches!(strength, Strength::Knl(_)) {
                        knl
                    } else {
                        ksl
                    };
                    return Ok(v.get(n).copied().unwrap_or(0.0));
                }
            }
            _ => {}
        }
        let mut kind = self.kind.clone();
        kind.slot(strength)
            .map(|v| *v)
            .ok_or_else(|| self.unsupported(strength))
    }

    /// Change a strength in place. The element is re-validated and left
    /// untouched if the new value is rejected.
    pub fn set_strength(&mut self, strength: Strength, value: f64) -> Result<()> {
        let mut updated = self.clone();
        let accepted = match strength {
            Strength::Tilt => {
                updated.tilt = value;
                true
            }
            Strength::ApertureX => updated.aperture.set_half_width_x(value),
            Strength::ApertureY => updated.aperture.set_half_width_y(value),
            s => match updated.kind.slot(s) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
        };
        if !accepted {
            return Err(self.unsupported(strength));
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    fn unsupported(&self, strength: Strength) -> BeamlineError {
        BeamlineError::UnsupportedStrength {
            element: self.name.clone(),
            category: self.category().to_string(),
            strength: strength.to_string(),
        }
    }

    /// Check the element is physically meaningful and its integrator can handle it.
    pub fn validate(&self) -> Result<()> {
        let name = self.name.as_str();
        if name.is_empty() {
            return Err(BeamlineError::invalid(
                "<unnamed>",
                "name",
                0.0,
                "names must not be empty",
            ));
        }
        if !self.length.is_finite() || self.length < 0.0 {
            return Err(BeamlineError::invalid(
                name,
                "length",
                self.length,
                "must be finite and >= 0",
            ));
        }
        if !self.tilt.is_finite() {
            return Err(BeamlineError::invalid(name, "TILT", self.tilt, "must be finite"));
        }
        if self.category().is_always_thin() && self.length != 0.0 {
            return Err(BeamlineError::invalid(
                name,
                "length",
                self.length,
                format!("{} elements are thin", self.category()),
            ));
        }
        for (key, value) in self.kind.values() {
            if !value.is_finite() {
                return Err(BeamlineError::invalid(name, key, value, "must be finite"));
            }
        }
        match &self.kind {
            ElementKind::SBend(p) | ElementKind::RBend(p) => {
                if p.angle != 0.0 && self.length == 0.0 {
                    return Err(BeamlineError::invalid(
                        name,
                        "length",
                        0.0,
                        "a bend with non-zero angle needs a length (use dipedge or multipole for thin kicks)",
                    ));
                }
                if matches!(self.kind, ElementKind::RBend(_))
                    && p.angle.abs() >= std::f64::consts::PI
                {
                    return Err(BeamlineError::invalid(
                        name,
                        "ANGLE",
                        p.angle,
                        "rbend angle must be below pi",
                    ));
                }
                for (key, e) in [("E1", p.e1), ("E2", p.e2)] {
                    if e.cos().abs() < 1e-12 {
                        return Err(BeamlineError::invalid(
                            name,
                            key,
                            e,
                            "pole face perpendicular to the orbit",
                        ));
                    }
                }
            }
            ElementKind::Dipedge { e1, .. } if e1.cos().abs() < 1e-12 => {
                return Err(BeamlineError::invalid(
                    name,
                    "E1",
                    *e1,
                    "pole face perpendicular to the orbit",
                ));
            }
            _ => {}
        }
        self.aperture.validate(name)?;
        self.integrator().supports(self)
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, L={} m)", self.name, self.category(), self.length)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn strength_keys_parse_case_insensitively() {
        assert_eq!("k1".parse::<Strength>().unwrap(), Strength::K1);
        assert_eq!("KNL3".parse::<Strength>().unwrap(), Strength::Knl(3));
        assert_eq!("ksl0".parse::<Strength>().unwrap(), Strength::Ksl(0));
        assert!("K7X".parse::<Strength>().is_err());
        assert_eq!(Strength::Knl(2).to_string(), "KNL2");
    }

    #[test]
    fn categories_and_aliases() {
        assert_eq!(Category::from_name("QUADRUPOLE"), Some(Category::Quadrupole));
        assert_eq!(Category::from_name("rcollimator"), Some(Category::Collimator));
        assert_eq!(Category::from_name("wiggler"), None);
    }

    #[test]
    fn set_and_read_strengths() {
        let mut q = Element::quadrupole("QF", 0.5, 1.0);
        q.set_strength(Strength::K1, -2.0).unwrap();
        assert_eq!(q.strength(Strength::K1).unwrap(), -2.0);
        assert!(matches!(
            q.set_strength(Strength::Angle, 0.1),
            Err(BeamlineError::UnsupportedStrength { .. })
        ));

        let mut m = Element::multipole("M", vec![], vec![]);
        m.set_strength(Strength::Knl(2), 0.3).unwrap();
        assert_eq!(m.strength(Strength::Knl(2)).unwrap(), 0.3);
        assert_eq!(m.strength(Strength::Knl(5)).unwrap(), 0.0);
    }

    #[test]
    fn rejected_values_leave_element_unchanged() {
        let mut q = Element::quadrupole("QF", 0.5, 1.0);
        assert!(q.set_strength(Strength::K1, f64::NAN).is_err());
        assert_eq!(q.strength(Strength::K1).unwrap(), 1.0);
    }

    #[test]
    fn rbend_converts_to_sector_form() {
        let angle: f64 = 0.2;
        let b = Element::rbend("B", 2.0, angle).sector_bend().unwrap();
        let arc = 2.0 * (angle / 2.0) / (angle / 2.0).sin();
        assert_relative_eq!(b.length, arc, epsilon = 1e-15);
        assert_relative_eq!(b.h * b.length, angle, epsilon = 1e-15);
        assert_relative_eq!(b.e1, angle / 2.0);
        assert!(b.has_edges());
    }

    #[test]
    fn thin_categories_reject_length() {
        let m = Element::new("M", ElementKind::Marker, 1.0);
        assert!(m.validate().is_err());
        let b = Element::sbend("B", 0.0, 0.1);
        assert!(b.validate().is_err());
        assert!(Element::kicker("K", 0.0, 1e-3, 0.0).is_thin());
        assert!(!Element::kicker("K", 0.2, 1e-3, 0.0).is_thin());
    }
}
