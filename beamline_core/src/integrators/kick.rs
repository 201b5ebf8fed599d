//! Thin elements: instantaneous kicks with no length-dependent propagation.
//!
//! ## Multipole kick
//! With z = x + i·y and b(z) = Σ_n (knl_n + i·ksl_n) zⁿ/n!,
//! px −= Re b and py += Im b. Particles get the kick to all orders;
//! [`ThinKick::map`] keeps the expansion up to second order.

use super::{edge_map, Integrator, IntegratorKind, Stepper};
use crate::element::{Element, ElementKind};
use crate::kinematics::Kinematics;
use crate::maps::TransferMap;
use crate::types::{rotation, PhaseVec, PX, PY, X, Y};
use nalgebra::Complex;

/// Thin-element integrator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Kick;

impl Integrator for Kick {
    fn kind(&self) -> IntegratorKind {
        IntegratorKind::Kick
    }

    fn check(&self, element: &Element) -> Result<(), String> {
        if element.is_thin() {
            Ok(())
        } else {
            Err(format!("thick {} elements", element.category()))
        }
    }

    fn body_map(&self, element: &Element, _kin: &Kinematics) -> TransferMap {
        ThinKick::from_element(element).map()
    }

    fn stepper(&self, element: &Element, _kin: &Kinematics) -> Stepper {
        let mut kick = ThinKick::from_element(element);
        kick.tilt = element.tilt;
        Stepper::Kick(kick)
    }
}

/// What a thin element does to a particle.
#[derive(Clone, Debug, PartialEq)]
pub enum KickAction {
    Identity,
    Multipole { knl: Vec<f64>, ksl: Vec<f64> },
    Kicker { hkick: f64, vkick: f64 },
    /// Linear edge focusing: px += fx·x, py += fy·y
    Edge { fx: f64, fy: f64 },
}

/// A thin kick, optionally rolled by `tilt`.
#[derive(Clone, Debug, PartialEq)]
pub struct ThinKick {
    pub action: KickAction,
    pub tilt: f64,
}

impl ThinKick {
    pub fn kicker(hkick: f64, vkick: f64) -> Self {
        Self {
            action: KickAction::Kicker { hkick, vkick },
            tilt: 0.0,
        }
    }

    /// The element's kick in its own frame (tilt not set).
    pub fn from_element(element: &Element) -> Self {
        let action = match &element.kind {
            ElementKind::Multipole { knl, ksl } => KickAction::Multipole {
                knl: knl.clone(),
                ksl: ksl.clone(),
            },
            ElementKind::Kicker { hkick, vkick } => KickAction::Kicker {
                hkick: *hkick,
                vkick: *vkick,
            },
            ElementKind::Dipedge { h, e1, fint, hgap } => {
                let m = edge_map(*h, *e1, *fint, *hgap);
                KickAction::Edge {
                    fx: m.r[(PX, X)],
                    fy: m.r[(PY, Y)],
                }
            }
            _ => KickAction::Identity,
        };
        Self { action, tilt: 0.0 }
    }

    /// Kick in the element frame.
    fn kick(&self, u: &mut PhaseVec) {
        match &self.action {
            KickAction::Identity => {}
            KickAction::Multipole { knl, ksl } => {
                let z = Complex::new(u[X], u[Y]);
                let order = knl.len().max(ksl.len());
                // Horner on Σ c_n zⁿ/n!
                let mut b = Complex::new(0.0, 0.0);
                for n in (0..order).rev() {
                    let c = Complex::new(
                        knl.get(n).copied().unwrap_or(0.0),
                        ksl.get(n).copied().unwrap_or(0.0),
                    );
                    b = b * z / (n as f64 + 1.0) + c;
                }
                u[PX] -= b.re;
                u[PY] += b.im;
            }
            KickAction::Kicker { hkick, vkick } => {
                u[PX] += hkick;
                u[PY] += vkick;
            }
            KickAction::Edge { fx, fy } => {
                u[PX] += fx * u[X];
                u[PY] += fy * u[Y];
            }
        }
    }

    /// Apply to a particle in lab coordinates.
    pub fn apply(&self, u: &mut PhaseVec) {
        if self.tilt == 0.0 {
            self.kick(u);
        } else {
            let mut v = rotation(self.tilt) * *u;
            self.kick(&mut v);
            *u = rotation(-self.tilt) * v;
        }
    }

    /// Second-order map of the kick in the element frame.
    pub fn map(&self) -> TransferMap {
        let mut m = TransferMap::identity();
        match &self.action {
            KickAction::Identity => {}
            KickAction::Multipole { knl, ksl } => {
                let k = |v: &Vec<f64>, n: usize| v.get(n).copied().unwrap_or(0.0);
                m.kick[PX] = -k(knl, 0);
                m.kick[PY] = k(ksl, 0);

                let (k1, k1s) = (k(knl, 1), k(ksl, 1));
                m.r[(PX, X)] = -k1;
                m.r[(PX, Y)] = k1s;
                m.r[(PY, Y)] = k1;
                m.r[(PY, X)] = k1s;

                let (k2, k2s) = (k(knl, 2), k(ksl, 2));
                m.add_monomial(PX, X, X, -k2 / 2.0);
                m.add_monomial(PX, Y, Y, k2 / 2.0);
                m.add_monomial(PX, X, Y, k2s);
                m.add_monomial(PY, X, Y, k2);
                m.add_monomial(PY, X, X, k2s / 2.0);
                m.add_monomial(PY, Y, Y, -k2s / 2.0);
            }
            KickAction::Kicker { hkick, vkick } => {
                m.kick[PX] = *hkick;
                m.kick[PY] = *vkick;
            }
            KickAction::Edge { fx, fy } => {
                m.r[(PX, X)] = *fx;
                m.r[(PY, Y)] = *fy;
            }
        }
        m
    }
}
