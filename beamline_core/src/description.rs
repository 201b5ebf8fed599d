//! Untyped element descriptions, as produced by external lattice builders.
//!
//! A description is a category name plus a flat map of named parameters.
//! Conversion to a typed [`Element`] happens once, when the sequence is
//! built. Unknown categories, unknown parameter names and parameters the
//! category does not carry are reported there, naming the element.

use crate::aperture::Aperture;
use crate::element::{Category, Element, ElementKind, Strength};
use crate::error::{BeamlineError, Result};
use crate::integrators::IntegratorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One element of a beamline description.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementDescription {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub length: f64,
    /// Strength name (case-insensitive, e.g. `"K1"`, `"KNL2"`) → value
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    #[serde(default)]
    pub aperture: Aperture,
    /// `"mad8"`, `"exact"`, `"transport"` or `"kick"`; the default otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrator: Option<String>,
}

impl ElementDescription {
    pub fn new(name: impl Into<String>, category: impl Into<String>, length: f64) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            length,
            ..Self::default()
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Convert into a typed element.
    pub fn to_element(&self) -> Result<Element> {
        let category =
            Category::from_name(&self.category).ok_or_else(|| BeamlineError::UnknownCategory {
                element: self.name.clone(),
                category: self.category.clone(),
            })?;

        let mut element = Element::new(&self.name, ElementKind::zeroed(category), self.length)
            .with_aperture(self.aperture.clone());
        if let Some(integrator) = &self.integrator {
            let kind: IntegratorKind =
                integrator
                    .parse()
                    .map_err(|reason: String| BeamlineError::UnsupportedIntegrator {
                        element: self.name.clone(),
                        integrator: integrator.clone(),
                        reason,
                    })?;
            element = element.with_integrator(kind);
        }

        for (key, &value) in &self.parameters {
            let strength: Strength =
                key.parse()
                    .map_err(|_| BeamlineError::UnknownParameter {
                        element: self.name.clone(),
                        category: category.to_string(),
                        parameter: key.clone(),
                    })?;
            element.set_strength(strength, value)?;
        }
        element.validate()?;
        Ok(element)
    }
}

impl From<&Element> for ElementDescription {
    fn from(element: &Element) -> Self {
        let mut parameters = BTreeMap::new();
        let mut put = |s: Strength, v: f64| {
            if v != 0.0 {
                parameters.insert(s.to_string(), v);
            }
        };
        match &element.kind {
            ElementKind::Quadrupole { k1 } => put(Strength::K1, *k1),
            ElementKind::Sextupole { k2 } => put(Strength::K2, *k2),
            ElementKind::SBend(p) | ElementKind::RBend(p) => {
                put(Strength::Angle, p.angle);
                put(Strength::K1, p.k1);
                put(Strength::K2, p.k2);
                put(Strength::E1, p.e1);
                put(Strength::E2, p.e2);
                put(Strength::Fint, p.fint);
                put(Strength::Hgap, p.hgap);
            }
            ElementKind::Multipole { knl, ksl } => {
                for (n, &v) in knl.iter().enumerate() {
                    put(Strength::Knl(n), v);
                }
                for (n, &v) in ksl.iter().enumerate() {
                    put(Strength::Ksl(n), v);
                }
            }
            ElementKind::Kicker { hkick, vkick } => {
                put(Strength::HKick, *hkick);
                put(Strength::VKick, *vkick);
            }
            ElementKind::Dipedge { h, e1, fint, hgap } => {
                put(Strength::H, *h);
                put(Strength::E1, *e1);
                put(Strength::Fint, *fint);
                put(Strength::Hgap, *hgap);
            }
            ElementKind::Marker | ElementKind::Drift | ElementKind::Collimator => {}
        }
        put(Strength::Tilt, element.tilt);

        Self {
            name: element.name.clone(),
            category: element.category().to_string(),
            length: element.length,
            parameters,
            aperture: element.aperture.clone(),
            integrator: element
                .has_explicit_integrator()
                .then(|| element.integrator().to_string()),
        }
    }
}
