//! Explicit second-order matrices element by element (TRANSPORT style).
//!
//! Each supported element has its own table of R and T coefficients. Only
//! single-function magnets are covered: a bend carrying a gradient or a
//! sextupole component has no table here and is rejected when the element
//! is validated.

use super::principal::principal;
use super::{require_thick, thick_kicker, with_edges, Integrator, IntegratorKind};
use crate::element::{Element, ElementKind};
use crate::kinematics::Kinematics;
use crate::maps::TransferMap;
use crate::types::{PT, PX, PY, T, X, Y};

/// Per-element formula integrator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Transport;

impl Integrator for Transport {
    fn kind(&self) -> IntegratorKind {
        IntegratorKind::Transport
    }

    fn check(&self, element: &Element) -> Result<(), String> {
        require_thick(element)?;
        match element.sector_bend() {
            Some(bend) if bend.k1 != 0.0 || bend.k2 != 0.0 => {
                Err("combined-function bends (K1 or K2 in a dipole)".to_string())
            }
            _ => Ok(()),
        }
    }

    fn body_map(&self, element: &Element, kin: &Kinematics) -> TransferMap {
        let l = element.length;
        match &element.kind {
            ElementKind::Quadrupole { k1 } => quadrupole(l, *k1, kin),
            ElementKind::Sextupole { k2 } => sextupole(l, *k2, kin),
            ElementKind::SBend(_) | ElementKind::RBend(_) => match element.sector_bend() {
                Some(bend) => with_edges(&bend, sector_bend(bend.length, bend.h, kin)),
                None => drift(l, kin),
            },
            ElementKind::Kicker { .. } => thick_kicker(element, |l| drift(l, kin)),
            _ => drift(l, kin),
        }
    }
}

fn linear_drift(l: f64, kin: &Kinematics) -> TransferMap {
    let mut m = TransferMap::identity();
    m.r[(X, PX)] = l;
    m.r[(Y, PY)] = l;
    m.r[(T, PT)] = l / kin.beta_gamma().powi(2);
    m
}

/// Path-length dependence on the energy deviation, common to every element.
fn add_chromatic_delay(m: &mut TransferMap, l: f64, kin: &Kinematics) {
    let beta = kin.beta();
    m.add_monomial(T, PT, PT, -3.0 * l / (2.0 * beta * kin.beta_gamma().powi(2)));
}

pub fn drift(l: f64, kin: &Kinematics) -> TransferMap {
    let beta = kin.beta();
    let mut m = linear_drift(l, kin);
    m.add_monomial(X, PX, PT, -l / beta);
    m.add_monomial(Y, PY, PT, -l / beta);
    m.add_monomial(T, PX, PX, -l / (2.0 * beta));
    m.add_monomial(T, PY, PY, -l / (2.0 * beta));
    add_chromatic_delay(&mut m, l, kin);
    m
}

pub fn quadrupole(l: f64, k1: f64, kin: &Kinematics) -> TransferMap {
    let beta = kin.beta();
    let mut m = linear_drift(l, kin);
    for (o, kappa) in [(X, k1), (Y, -k1)] {
        let p = o + 1;
        let c = principal(0, kappa, l);
        let s = principal(1, kappa, l);
        let d = principal(2, kappa, l);
        let f = principal(3, kappa, l);

        m.r[(o, o)] = c;
        m.r[(o, p)] = s;
        m.r[(p, o)] = -kappa * s;
        m.r[(p, p)] = c;

        // chromatic focusing
        m.add_monomial(o, o, PT, kappa * l * s / (2.0 * beta));
        m.add_monomial(o, p, PT, -(l * c + s) / (2.0 * beta));
        m.add_monomial(p, o, PT, -kappa * kappa * (l * d - f) / (2.0 * beta));
        m.add_monomial(p, p, PT, kappa * l * s / (2.0 * beta));
        // path lengthening of the betatron oscillation
        m.add_monomial(T, o, o, -kappa * kappa * (f + l * d - kappa * f * d) / (4.0 * beta));
        m.add_monomial(T, o, p, kappa * s * s / (2.0 * beta));
        m.add_monomial(T, p, p, -(l + s * c) / (4.0 * beta));
    }
    add_chromatic_delay(&mut m, l, kin);
    m
}

pub fn sextupole(l: f64, k2: f64, kin: &Kinematics) -> TransferMap {
    let mut m = drift(l, kin);
    let (l2, l3, l4) = (l * l, l.powi(3), l.powi(4));

    m.add_monomial(X, X, X, -l2 * k2 / 4.0);
    m.add_monomial(X, X, PX, -l3 * k2 / 6.0);
    m.add_monomial(X, PX, PX, -l4 * k2 / 24.0);
    m.add_monomial(X, Y, Y, l2 * k2 / 4.0);
    m.add_monomial(X, Y, PY, l3 * k2 / 6.0);
    m.add_monomial(X, PY, PY, l4 * k2 / 24.0);

    m.add_monomial(PX, X, X, -l * k2 / 2.0);
    m.add_monomial(PX, X, PX, -l2 * k2 / 2.0);
    m.add_monomial(PX, PX, PX, -l3 * k2 / 6.0);
    m.add_monomial(PX, Y, Y, l * k2 / 2.0);
    m.add_monomial(PX, Y, PY, l2 * k2 / 2.0);
    m.add_monomial(PX, PY, PY, l3 * k2 / 6.0);

    m.add_monomial(Y, X, Y, l2 * k2 / 2.0);
    m.add_monomial(Y, X, PY, l3 * k2 / 6.0);
    m.add_monomial(Y, PX, Y, l3 * k2 / 6.0);
    m.add_monomial(Y, PX, PY, l4 * k2 / 12.0);

    m.add_monomial(PY, X, Y, l * k2);
    m.add_monomial(PY, X, PY, l2 * k2 / 2.0);
    m.add_monomial(PY, PX, Y, l2 * k2 / 2.0);
    m.add_monomial(PY, PX, PY, l3 * k2 / 3.0);
    m
}

/// Sector dipole without edges, curvature `h`.
pub fn sector_bend(l: f64, h: f64, kin: &Kinematics) -> TransferMap {
    let beta = kin.beta();
    let gamma = kin.gamma();
    let bg2 = kin.beta_gamma().powi(2);
    let kx = h * h;
    let c = principal(0, kx, l);
    let s = principal(1, kx, l);
    let d = principal(2, kx, l);
    let f = principal(3, kx, l);

    let mut m = linear_drift(l, kin);
    m.r[(X, X)] = c;
    m.r[(X, PX)] = s;
    m.r[(X, PT)] = h * d / beta;
    m.r[(PX, X)] = -kx * s;
    m.r[(PX, PX)] = c;
    m.r[(PX, PT)] = h * s / beta;
    m.r[(T, X)] = -h * s / beta;
    m.r[(T, PX)] = -h * d / beta;
    m.r[(T, PT)] = l / bg2 - h * h * f / (beta * beta);

    m.add_monomial(X, X, X, -h.powi(3) * s * s / 2.0);
    m.add_monomial(X, X, PX, h * c * s);
    m.add_monomial(X, X, PT, h * h * s * s / beta);
    m.add_monomial(X, PX, PX, h * d * c / 2.0);
    m.add_monomial(X, PX, PT, -c * s / beta);
    m.add_monomial(X, PY, PY, -h * d / 2.0);
    m.add_monomial(X, PT, PT, -h * (gamma * gamma * s * s + d) / (2.0 * bg2));

    m.add_monomial(PX, PX, PX, -h * s / 2.0);
    m.add_monomial(PX, PY, PY, -h * s / 2.0);
    m.add_monomial(PX, PT, PT, -h * s / (2.0 * bg2));

    m.add_monomial(Y, X, PY, h * s);
    m.add_monomial(Y, PX, PY, h * d);
    m.add_monomial(Y, PY, PT, -s / beta);

    m.add_monomial(T, X, PT, h * s / bg2);
    m.add_monomial(T, PX, PX, -s / (2.0 * beta));
    m.add_monomial(T, PX, PT, h * d / bg2);
    m.add_monomial(T, PY, PY, -s / (2.0 * beta));
    m.add_monomial(T, PT, PT, -3.0 * s / (2.0 * beta * bg2));
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrators::mad8::closed_form_map;
    use crate::kinematics::Species;

    fn kin() -> Kinematics {
        Kinematics::from_momentum(Species::Proton, 0.75 * crate::kinematics::PROTON_MASS_MEV)
            .unwrap()
    }

    fn max_diff(a: &TransferMap, b: &TransferMap) -> f64 {
        let mut d = (a.r - b.r).amax();
        for i in 0..6 {
            d = d.max((a.t[i] - b.t[i]).amax());
        }
        d
    }

    #[test]
    fn tables_match_closed_forms() {
        let kin = kin();
        for (l, k1) in [(1.0, 1.0), (0.5, -3.0), (1.0, 1e-4), (2.0, 0.0)] {
            let d = max_diff(&quadrupole(l, k1, &kin), &closed_form_map(l, 0.0, k1, 0.0, &kin));
            assert!(d < 1e-14, "quadrupole L={l} K1={k1}: {d}");
        }
        for (l, h) in [(1.0, 0.3), (2.0, -0.5), (1.0, 1e-4)] {
            let d = max_diff(&sector_bend(l, h, &kin), &closed_form_map(l, h, 0.0, 0.0, &kin));
            assert!(d < 1e-14, "bend L={l} h={h}: {d}");
        }
        let d = max_diff(&sextupole(0.4, 5.0, &kin), &closed_form_map(0.4, 0.0, 0.0, 5.0, &kin));
        assert!(d < 1e-14);
        assert!(max_diff(&drift(1.3, &kin), &TransferMap::drift(1.3, &kin)) < 1e-15);
    }

    #[test]
    fn combined_function_bend_is_rejected() {
        let e = Element::rbend("B", 1.0, 0.2).with_bend(|p| p.k1 = 0.1);
        let reason = Transport.check(&e).unwrap_err();
        assert!(reason.contains("combined-function"));
        assert!(Transport.check(&Element::sbend("B", 1.0, 0.2)).is_ok());
        assert!(Transport.check(&Element::marker("M")).is_err());
    }
}
