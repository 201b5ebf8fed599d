//! Closed-form second-order maps of combined-function magnets.
//!
//! # Model
//! The element Hamiltonian (curvature h, gradient K1, sextupole K2), expanded
//! about the reference orbit, has the quadratic part
//!
//! ```text
//! H2 = (px² + py²)/2 + (h² + K1) x²/2 − K1 y²/2 − h·x·pt/β + pt²/(2β²γ²)
//! ```
//!
//! so that the horizontal and vertical focusing are `kx² = h² + K1` and
//! `ky² = −K1`. Every first-order coefficient is a principal function
//! `E_j(κ, L)` with κ ∈ {kx², ky², 0}. The second-order tensor follows from
//! the Green-function integral of the cubic part of the Hamiltonian,
//!
//! ```text
//! T(u, u) = ∫₀ᴸ R(L − s) · F(R(s)·u) ds
//! ```
//!
//! where F is the quadratic vector field. All integrands are products of
//! three principal functions and reduce to the primitives in
//! [`super::principal`].
//!
//! # Regimes
//! Closed forms divide by κ and by differences of κ. Each primitive switches
//! to its series near zero, so one code path covers every regime listed in
//! [`SecondOrderRegime`]. The classification only feeds logging and tests.

use super::principal::{convolution, correlation, principal, DEGENERATE_THRESHOLD};
use super::{require_thick, thick_kicker, with_edges, Integrator, IntegratorKind};
use crate::element::{Element, ElementKind, SectorBend};
use crate::kinematics::Kinematics;
use crate::maps::TransferMap;
use crate::types::{PhaseMatrix, PT, PX, PY, T, X, Y};

/// Closed-form (MAD-8 style) integrator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mad8;

impl Integrator for Mad8 {
    fn kind(&self) -> IntegratorKind {
        IntegratorKind::Mad8
    }

    fn check(&self, element: &Element) -> Result<(), String> {
        require_thick(element)
    }

    fn body_map(&self, element: &Element, kin: &Kinematics) -> TransferMap {
        let l = element.length;
        match &element.kind {
            ElementKind::Drift | ElementKind::Collimator | ElementKind::Marker => {
                TransferMap::drift(l, kin)
            }
            ElementKind::Quadrupole { k1 } => closed_form_map(l, 0.0, *k1, 0.0, kin),
            ElementKind::Sextupole { k2 } => closed_form_map(l, 0.0, 0.0, *k2, kin),
            ElementKind::SBend(_) | ElementKind::RBend(_) => match element.sector_bend() {
                Some(bend) => bend_map(&bend, kin),
                None => TransferMap::drift(l, kin),
            },
            ElementKind::Kicker { .. } => thick_kicker(element, |l| TransferMap::drift(l, kin)),
            ElementKind::Multipole { .. } | ElementKind::Dipedge { .. } => TransferMap::identity(),
        }
    }
}

fn bend_map(bend: &SectorBend, kin: &Kinematics) -> TransferMap {
    let body = closed_form_map(bend.length, bend.h, bend.k1, bend.k2, kin);
    with_edges(bend, body)
}

// ---------------------------------------------------------------------------
// Regime classification
// ---------------------------------------------------------------------------

/// Parameter regimes with distinct closed forms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecondOrderRegime {
    /// h = 0 and K1 = 0: every function is a polynomial in L
    FullyDegenerate,
    /// ky² = 0 (no vertical focusing), kx² ≠ 0
    PureHorizontal,
    /// kx² = 0 (curvature and gradient cancel), ky² ≠ 0
    PureVertical,
    /// kx² ≈ 4·ky²: the vertical-squared terms resonate with the horizontal motion
    NearDegenerate,
    Generic,
}

pub fn classify(length: f64, h: f64, k1: f64) -> SecondOrderRegime {
    let a = h * h + k1;
    let b = -k1;
    if a == 0.0 && b == 0.0 {
        SecondOrderRegime::FullyDegenerate
    } else if b == 0.0 {
        SecondOrderRegime::PureHorizontal
    } else if a == 0.0 {
        SecondOrderRegime::PureVertical
    } else if (a - 4.0 * b).abs() * length * length < DEGENERATE_THRESHOLD {
        SecondOrderRegime::NearDegenerate
    } else {
        SecondOrderRegime::Generic
    }
}

// ---------------------------------------------------------------------------
// Basis terms
// ---------------------------------------------------------------------------

/// Which focusing strength a principal function is evaluated at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Focus {
    /// κ = kx²
    Horizontal,
    /// κ = ky²
    Vertical,
    /// κ = 0 (polynomial)
    Free,
}

/// `coeff · E_order(κ_focus, s)`
#[derive(Clone, Copy, Debug)]
struct Term {
    focus: Focus,
    order: i32,
    coeff: f64,
}

const fn term(focus: Focus, order: i32, coeff: f64) -> Term {
    Term {
        focus,
        order,
        coeff,
    }
}

struct Focusing {
    a: f64,
    b: f64,
}

impl Focusing {
    fn kappa(&self, focus: Focus) -> f64 {
        match focus {
            Focus::Horizontal => self.a,
            Focus::Vertical => self.b,
            Focus::Free => 0.0,
        }
    }
}

type Entries = [[Vec<Term>; 6]; 6];

/// First-order matrix R(s) as principal-function terms.
fn first_order_terms(h: f64, k1: f64, kin: &Kinematics) -> Entries {
    use Focus::{Free, Horizontal as Hx, Vertical as Vy};
    let beta = kin.beta();
    let bg2 = kin.beta_gamma().powi(2);
    let a = h * h + k1;
    let b = -k1;

    let mut r: Entries = std::array::from_fn(|_| std::array::from_fn(|_| Vec::new()));
    r[X][X] = vec![term(Hx, 0, 1.0)];
    r[X][PX] = vec![term(Hx, 1, 1.0)];
    r[X][PT] = vec![term(Hx, 2, h / beta)];
    r[PX][X] = vec![term(Hx, 1, -a)];
    r[PX][PX] = vec![term(Hx, 0, 1.0)];
    r[PX][PT] = vec![term(Hx, 1, h / beta)];
    r[Y][Y] = vec![term(Vy, 0, 1.0)];
    r[Y][PY] = vec![term(Vy, 1, 1.0)];
    r[PY][Y] = vec![term(Vy, 1, -b)];
    r[PY][PY] = vec![term(Vy, 0, 1.0)];
    r[T][X] = vec![term(Hx, 1, -h / beta)];
    r[T][PX] = vec![term(Hx, 2, -h / beta)];
    r[T][T] = vec![term(Free, 0, 1.0)];
    r[T][PT] = vec![term(Free, 1, 1.0 / bg2), term(Hx, 3, -h * h / (beta * beta))];
    r[PT][PT] = vec![term(Free, 0, 1.0)];
    // Zero-coefficient terms would only add work
    for row in r.iter_mut() {
        for entry in row.iter_mut() {
            entry.retain(|t| t.coeff != 0.0);
        }
    }
    r
}

/// `coeff · u_p · u_q` in one component of the quadratic vector field.
#[derive(Clone, Copy, Debug)]
struct Monomial {
    p: usize,
    q: usize,
    coeff: f64,
}

const fn mono(p: usize, q: usize, coeff: f64) -> Monomial {
    Monomial { p, q, coeff }
}

/// du/ds driven by the cubic Hamiltonian, one list per coordinate.
fn quadratic_field(h: f64, k2: f64, kin: &Kinematics) -> [Vec<Monomial>; 6] {
    let beta = kin.beta();
    let bg2 = kin.beta_gamma().powi(2);
    let mut f: [Vec<Monomial>; 6] = Default::default();
    f[X] = vec![mono(PX, PT, -1.0 / beta), mono(X, PX, h)];
    f[PX] = vec![
        mono(PT, PT, -h / (2.0 * bg2)),
        mono(PX, PX, -h / 2.0),
        mono(PY, PY, -h / 2.0),
        mono(X, X, -k2 / 2.0),
        mono(Y, Y, k2 / 2.0),
    ];
    f[Y] = vec![mono(PY, PT, -1.0 / beta), mono(X, PY, h)];
    f[PY] = vec![mono(X, Y, k2)];
    f[T] = vec![
        mono(PT, PT, -3.0 / (2.0 * beta * bg2)),
        mono(PX, PX, -1.0 / (2.0 * beta)),
        mono(PY, PY, -1.0 / (2.0 * beta)),
        mono(X, PT, h / bg2),
    ];
    for component in f.iter_mut() {
        component.retain(|m| m.coeff != 0.0);
    }
    f
}

// ---------------------------------------------------------------------------
// Integrals of three principal functions
// ---------------------------------------------------------------------------

/// How the κ of a product term relates to the κ of its factors.
#[derive(Clone, Copy)]
enum Scale {
    Zero,
    Same,
    Quadruple,
}

/// `E_n(κ) · E_p(κ) = Σ coeff · E_order(scale·κ)` for n, p ≤ 2.
fn same_focus_product(n: i32, p: i32) -> &'static [(i32, f64, Scale)] {
    use Scale::{Quadruple, Same, Zero};
    match (n.min(p), n.max(p)) {
        (0, 0) => &[(0, 0.5, Zero), (0, 0.5, Quadruple)],
        (0, 1) => &[(1, 1.0, Quadruple)],
        (0, 2) => &[(2, 2.0, Quadruple), (2, -1.0, Same)],
        (1, 1) => &[(2, 2.0, Quadruple)],
        (1, 2) => &[(3, 4.0, Quadruple), (3, -1.0, Same)],
        (2, 2) => &[(4, 8.0, Quadruple), (4, -2.0, Same)],
        _ => &[],
    }
}

/// `∫₀ᴸ E_g(L − s) · E_f(s) · E_h(s) ds` for basis terms g, f, h (unit coefficients).
fn triple(green: &Term, f: &Term, h: &Term, foc: &Focusing, l: f64) -> f64 {
    let kg = foc.kappa(green.focus);
    if h.focus == Focus::Free && h.order == 0 {
        return convolution(green.order, kg, f.order, foc.kappa(f.focus), l);
    }
    if f.focus == Focus::Free && f.order == 0 {
        return convolution(green.order, kg, h.order, foc.kappa(h.focus), l);
    }
    if f.focus == h.focus {
        let kappa = foc.kappa(f.focus);
        return same_focus_product(f.order, h.order)
            .iter()
            .map(|&(order, coeff, scale)| {
                let k = match scale {
                    Scale::Zero => 0.0,
                    Scale::Same => kappa,
                    Scale::Quadruple => 4.0 * kappa,
                };
                coeff * convolution(green.order, kg, order, k, l)
            })
            .sum();
    }
    // x·y products only come from the sextupole term of the vertical force
    debug_assert_eq!(green.focus, Focus::Vertical);
    let (vertical, horizontal) = if f.focus == Focus::Vertical {
        (f.order, h.order)
    } else {
        (h.order, f.order)
    };
    cross_plane(green.order, vertical, horizontal, foc, l)
}

/// `∫₀ᴸ E_gm(b, L − s) E_ym(b, s) E_xm(a, s) ds`.
///
/// The two vertical factors combine into a constant plus `E(b, L − 2s)`,
/// which expands into functions of `4b` evaluated at s.
fn cross_plane(gm: i32, ym: i32, xm: i32, foc: &Focusing, l: f64) -> f64 {
    let (a, b) = (foc.a, foc.b);
    let eb = |j: i32| principal(j, b, l);

    let (constant, sign, shifted) = match (gm, ym) {
        (0, 0) => (eb(0) / 2.0, 0.5, 0),
        (1, 0) => (eb(1) / 2.0, 0.5, 1),
        (0, 1) => (eb(1) / 2.0, -0.5, 1),
        (1, 1) => (eb(2) / 2.0, -0.5, 2),
        _ => unreachable!("vertical Green functions are cosine- or sine-like"),
    };

    // E_shifted(b, L − 2s) = offset + Σ coeff · E_order(4b, s)
    let (offset, expansion) = match shifted {
        0 => (0.0, [(0, eb(0)), (1, 2.0 * b * eb(1))]),
        1 => (0.0, [(0, eb(1)), (1, -2.0 * eb(0))]),
        _ => (eb(2), [(2, 4.0 * eb(0)), (1, -2.0 * eb(1))]),
    };

    let mut total = (constant + sign * offset) * principal(xm + 1, a, l);
    for (order, coeff) in expansion {
        total += sign * coeff * correlation(order, 4.0 * b, xm, a, l);
    }
    total
}

// ---------------------------------------------------------------------------
// Map assembly
// ---------------------------------------------------------------------------

/// First- and second-order map of a combined-function sector magnet of
/// length `l`, curvature `h`, gradient `k1` and sextupole strength `k2`.
pub fn closed_form_map(l: f64, h: f64, k1: f64, k2: f64, kin: &Kinematics) -> TransferMap {
    let foc = Focusing {
        a: h * h + k1,
        b: -k1,
    };
    let green = first_order_terms(h, k1, kin);
    let field = quadratic_field(h, k2, kin);
    tracing::trace!(regime = ?classify(l, h, k1), l, h, k1, k2, "closed-form map");

    let mut r = PhaseMatrix::zeros();
    for i in 0..6 {
        for j in 0..6 {
            r[(i, j)] = green[i][j]
                .iter()
                .map(|t| t.coeff * principal(t.order, foc.kappa(t.focus), l))
                .sum();
        }
    }

    let mut t = [PhaseMatrix::zeros(); 6];
    for (i, ti) in t.iter_mut().enumerate() {
        for (m, component) in field.iter().enumerate() {
            if green[i][m].is_empty() {
                continue;
            }
            for mono in component {
                for j in 0..6 {
                    if green[mono.p][j].is_empty() {
                        continue;
                    }
                    for k in 0..6 {
                        if green[mono.q][k].is_empty() {
                            continue;
                        }
                        let mut value = 0.0;
                        for g in &green[i][m] {
                            for f in &green[mono.p][j] {
                                for hh in &green[mono.q][k] {
                                    value += g.coeff
                                        * f.coeff
                                        * hh.coeff
                                        * triple(g, f, hh, &foc, l);
                                }
                            }
                        }
                        value *= mono.coeff;
                        ti[(j, k)] += value / 2.0;
                        ti[(k, j)] += value / 2.0;
                    }
                }
            }
        }
    }

    TransferMap {
        kick: Default::default(),
        r,
        t,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrators::principal::SERIES_THRESHOLD;
    use crate::kinematics::Species;
    use crate::types::PhaseVec;
    use approx::assert_abs_diff_eq;

    fn kin() -> Kinematics {
        // β = 0.6
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

    /// Reference map from RK4 integration of the variational equations.
    fn variational(
        l: f64,
        h: f64,
        k1: f64,
        k2: f64,
        kin: &Kinematics,
        steps: usize,
    ) -> TransferMap {
        let beta = kin.beta();
        let bg2 = kin.beta_gamma().powi(2);
        let mut a = PhaseMatrix::zeros();
        a[(X, PX)] = 1.0;
        a[(PX, X)] = -(h * h + k1);
        a[(PX, PT)] = h / beta;
        a[(Y, PY)] = 1.0;
        a[(PY, Y)] = k1;
        a[(T, X)] = -h / beta;
        a[(T, PT)] = 1.0 / bg2;
        let field = quadratic_field(h, k2, kin);

        let deriv = |r: &PhaseMatrix, t: &[PhaseMatrix; 6]| {
            let dr = a * r;
            let mut dt = [PhaseMatrix::zeros(); 6];
            for i in 0..6 {
                for m in 0..6 {
                    if a[(i, m)] != 0.0 {
                        dt[i] += t[m] * a[(i, m)];
                    }
                }
                for mono in &field[i] {
                    let rp = r.row(mono.p).transpose();
                    let rq = r.row(mono.q).transpose();
                    dt[i] += (rp * rq.transpose() + rq * rp.transpose()) * (mono.coeff / 2.0);
                }
            }
            (dr, dt)
        };
        let shifted = |r: &PhaseMatrix,
                       t: &[PhaseMatrix; 6],
                       dr: &PhaseMatrix,
                       dt: &[PhaseMatrix; 6],
                       f: f64| {
            let mut tn = *t;
            for i in 0..6 {
                tn[i] += dt[i] * f;
            }
            (r + dr * f, tn)
        };

        let ds = l / steps as f64;
        let mut r = PhaseMatrix::identity();
        let mut t = [PhaseMatrix::zeros(); 6];
        for _ in 0..steps {
            let (r1, t1) = deriv(&r, &t);
            let (ra, ta) = shifted(&r, &t, &r1, &t1, ds / 2.0);
            let (r2, t2) = deriv(&ra, &ta);
            let (rb, tb) = shifted(&r, &t, &r2, &t2, ds / 2.0);
            let (r3, t3) = deriv(&rb, &tb);
            let (rc, tc) = shifted(&r, &t, &r3, &t3, ds);
            let (r4, t4) = deriv(&rc, &tc);
            r += (r1 + r2 * 2.0 + r3 * 2.0 + r4) * (ds / 6.0);
            for i in 0..6 {
                t[i] += (t1[i] + t2[i] * 2.0 + t3[i] * 2.0 + t4[i]) * (ds / 6.0);
            }
        }
        TransferMap {
            kick: PhaseVec::zeros(),
            r,
            t,
        }
    }

    #[test]
    fn quadrupole_regression_fixture() {
        let m = closed_form_map(1.0, 0.0, 1.0, 0.0, &kin());
        let out = m.apply(&PhaseVec::new(0.01, 0.0, 0.0, 0.0, 0.0, 0.0));
        assert_abs_diff_eq!(out[X], 0.005_403_023_058_681_398, epsilon = 1e-17);
        assert_abs_diff_eq!(out[X], 1.0_f64.cos() * 0.01, epsilon = 1e-17);
    }

    #[test]
    fn matches_variational_integration_in_every_regime() {
        let kin = kin();
        let cases = [
            (1.0, 0.0, 1.0, 0.0),
            (1.2, 0.3, 0.8, 2.0),
            (0.7, -0.5, -1.2, -3.0),
            // kx² = 4·ky²
            (1.5, 0.4, -0.4 * 0.4 / 5.0, 1.0),
            (1.0, 0.0, 0.0, 5.0),
            (1.0, 0.0, 0.0, 0.0),
            (2.0, 0.2, -0.3, 0.0),
            (1.0, 0.5, 0.0, 0.0),
            // kx² = 0
            (1.0, 0.5, -0.25, 0.0),
        ];
        for (l, h, k1, k2) in cases {
            let closed = closed_form_map(l, h, k1, k2, &kin);
            let reference = variational(l, h, k1, k2, &kin, 400);
            assert!(
                max_diff(&closed, &reference) < 1e-9,
                "L={l} h={h} K1={k1} K2={k2}: {}",
                max_diff(&closed, &reference)
            );
            assert!(closed.symplecticity_error() < 1e-13);
        }
    }

    #[test]
    fn regimes_are_classified() {
        assert_eq!(classify(1.0, 0.0, 0.0), SecondOrderRegime::FullyDegenerate);
        assert_eq!(classify(1.0, 0.3, 0.0), SecondOrderRegime::PureHorizontal);
        assert_eq!(classify(1.0, 0.5, -0.25), SecondOrderRegime::PureVertical);
        assert_eq!(classify(1.5, 0.4, -0.032), SecondOrderRegime::NearDegenerate);
        assert_eq!(classify(1.0, 0.0, 1.0), SecondOrderRegime::Generic);
    }

    #[test]
    fn zero_gradient_quadrupole_is_a_drift() {
        let kin = kin();
        let quad = closed_form_map(1.7, 0.0, 0.0, 0.0, &kin);
        let drift = TransferMap::drift(1.7, &kin);
        assert!(max_diff(&quad, &drift) < 1e-15);
    }

    #[test]
    fn continuous_across_series_switch() {
        let kin = kin();
        let l = 1.2;
        for sign in [1.0, -1.0] {
            let k1 = sign * SERIES_THRESHOLD / (l * l);
            let below = closed_form_map(l, 0.0, k1 * (1.0 - 1e-9), 0.0, &kin);
            let above = closed_form_map(l, 0.0, k1 * (1.0 + 1e-9), 0.0, &kin);
            assert!(max_diff(&below, &above) < 1e-9);
        }
        // K1 through zero
        let below = closed_form_map(l, 0.0, -1e-12, 0.0, &kin);
        let above = closed_form_map(l, 0.0, 1e-12, 0.0, &kin);
        assert!(max_diff(&below, &above) < 1e-11);
        // curvature through zero
        let below = closed_form_map(l, -1e-10, 0.5, 0.0, &kin);
        let above = closed_form_map(l, 1e-10, 0.5, 0.0, &kin);
        assert!(max_diff(&below, &above) < 1e-9);
    }

    #[test]
    fn continuous_across_resonance() {
        let kin = kin();
        let (l, h) = (1.5, 0.4);
        // kx² − 4ky² = h² + 5·K1 crosses zero at K1 = −h²/5
        let k_res = -h * h / 5.0;
        let gap = DEGENERATE_THRESHOLD / (5.0 * l * l);
        let below = closed_form_map(l, h, k_res + gap * (1.0 - 1e-9), 1.0, &kin);
        let above = closed_form_map(l, h, k_res + gap * (1.0 + 1e-9), 1.0, &kin);
        assert!(max_diff(&below, &above) < 1e-9);

        // at the resonance itself, approached from both sides
        let at = closed_form_map(l, h, k_res, 1.0, &kin);
        assert!(at.t.iter().all(|m| m.iter().all(|c| c.is_finite())));
        for offset in [-1e-9, 1e-9] {
            let near = closed_form_map(l, h, k_res + offset, 1.0, &kin);
            assert!(max_diff(&at, &near) < 1e-8);
        }
        let reference = variational(l, h, k_res, 1.0, &kin, 400);
        assert!(max_diff(&at, &reference) < 1e-9);
    }
}
