//! Symplectic integration of the exact element Hamiltonian.
//!
//! # Design choices
//! - The body (drift or pure sector bend) is solved exactly, including the
//!   full square root in the longitudinal momentum. Gradient and sextupole
//!   fields are applied as kicks between body steps.
//! - Body and kicks are composed with the 4th-order Yoshida scheme, itself
//!   composed once more to 6th order.
//! - The number of slices grows with the phase advance of the strongest
//!   field so that no slice exceeds [`MAX_PHASE_PER_SLICE`].
//! - A particle whose longitudinal momentum becomes imaginary is lost.
//!
//! The second-order map this integrator reports (for Twiss propagation and
//! composition) is the Taylor expansion of the tracker about the reference
//! orbit, taken with central differences.

use super::kick::{KickAction, ThinKick};
use super::{edge_map, require_thick, Integrator, IntegratorKind, Stepper};
use crate::element::{Element, ElementKind};
use crate::kinematics::Kinematics;
use crate::maps::TransferMap;
use crate::types::{is_finite, rotation, PhaseVec, PT, PX, PY, T, X, Y};

/// Largest phase advance of one integration slice [rad].
pub const MAX_PHASE_PER_SLICE: f64 = 0.02;
pub const MIN_SLICES: usize = 4;
/// Amplitude at which the sextupole's effective focusing is evaluated [m].
pub const REFERENCE_AMPLITUDE: f64 = 1e-2;

/// Step sizes for the finite-difference expansion.
const LINEAR_STEP: f64 = 1e-7;
const QUADRATIC_STEP: f64 = 1e-5;

// Yoshida coefficients: 1/(2 − 2^(1/3)), −2^(1/3)/(2 − 2^(1/3))
const W1: f64 = 1.351_207_191_959_657_8;
const W0: f64 = -1.702_414_383_919_315_3;
// and the same with 2^(1/5) for the 6th-order composition
const Z1: f64 = 1.174_671_758_089_363_5;
const Z0: f64 = -1.349_343_516_178_727;

/// Exact-Hamiltonian integrator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Exact;

impl Integrator for Exact {
    fn kind(&self) -> IntegratorKind {
        IntegratorKind::Exact
    }

    fn check(&self, element: &Element) -> Result<(), String> {
        require_thick(element)
    }

    fn body_map(&self, element: &Element, kin: &Kinematics) -> TransferMap {
        let mut stepper = ExactStepper::new(element, kin);
        stepper.tilt = 0.0;
        stepper.expand()
    }

    fn stepper(&self, element: &Element, kin: &Kinematics) -> Stepper {
        Stepper::Exact(ExactStepper::new(element, kin))
    }
}

/// Number of slices for a magnet of length `length`.
pub fn slice_count(length: f64, h: f64, k1: f64, k2: f64) -> usize {
    let strength = k1
        .abs()
        .sqrt()
        .max(h.abs())
        .max((k2.abs() * REFERENCE_AMPLITUDE).sqrt());
    let needed = (length * strength / MAX_PHASE_PER_SLICE).ceil();
    (needed as usize).max(MIN_SLICES)
}

/// Per-element tracker for the exact formalism.
#[derive(Clone, Debug)]
pub struct ExactStepper {
    beta: f64,
    length: f64,
    h: f64,
    k1: f64,
    k2: f64,
    slices: usize,
    /// Kick at the centre of a thick kicker
    center: Option<ThinKick>,
    entry: Option<ThinKick>,
    exit: Option<ThinKick>,
    pub tilt: f64,
}

impl ExactStepper {
    pub fn new(element: &Element, kin: &Kinematics) -> Self {
        let mut stepper = Self {
            beta: kin.beta(),
            length: element.length,
            h: 0.0,
            k1: 0.0,
            k2: 0.0,
            slices: 1,
            center: None,
            entry: None,
            exit: None,
            tilt: element.tilt,
        };
        match &element.kind {
            ElementKind::Quadrupole { k1 } => stepper.k1 = *k1,
            ElementKind::Sextupole { k2 } => stepper.k2 = *k2,
            ElementKind::Kicker { hkick, vkick } => {
                stepper.center = Some(ThinKick::kicker(*hkick, *vkick));
            }
            ElementKind::SBend(_) | ElementKind::RBend(_) => {
                if let Some(bend) = element.sector_bend() {
                    stepper.length = bend.length;
                    stepper.h = bend.h;
                    stepper.k1 = bend.k1;
                    stepper.k2 = bend.k2;
                    if bend.has_edges() {
                        stepper.entry = Some(edge_kick(bend.h, bend.e1, bend.fint, bend.hgap));
                        stepper.exit = Some(edge_kick(bend.h, bend.e2, bend.fint, bend.hgap));
                    }
                }
            }
            _ => {}
        }
        if stepper.k1 != 0.0 || stepper.k2 != 0.0 {
            stepper.slices = slice_count(stepper.length, stepper.h, stepper.k1, stepper.k2);
        }
        stepper
    }

    pub fn slices(&self) -> usize {
        self.slices
    }

    /// Advance one particle. Returns `false` if it was lost.
    pub fn step(&self, u: &mut PhaseVec) -> bool {
        let mut v = if self.tilt == 0.0 {
            *u
        } else {
            rotation(self.tilt) * *u
        };
        let survived = self.integrate(&mut v).is_some();
        *u = if self.tilt == 0.0 {
            v
        } else {
            rotation(-self.tilt) * v
        };
        survived && is_finite(u)
    }

    fn integrate(&self, u: &mut PhaseVec) -> Option<()> {
        if let Some(edge) = &self.entry {
            edge.apply(u);
        }
        if let Some(kick) = &self.center {
            self.body(u, self.length / 2.0)?;
            kick.apply(u);
            self.body(u, self.length / 2.0)?;
        } else if self.k1 == 0.0 && self.k2 == 0.0 {
            self.body(u, self.length)?;
        } else {
            let ds = self.length / self.slices as f64;
            for _ in 0..self.slices {
                self.yoshida6(u, ds)?;
            }
        }
        if let Some(edge) = &self.exit {
            edge.apply(u);
        }
        Some(())
    }

    fn yoshida6(&self, u: &mut PhaseVec, ds: f64) -> Option<()> {
        self.yoshida4(u, Z1 * ds)?;
        self.yoshida4(u, Z0 * ds)?;
        self.yoshida4(u, Z1 * ds)
    }

    fn yoshida4(&self, u: &mut PhaseVec, ds: f64) -> Option<()> {
        let outer = W1 / 2.0;
        let inner = (W0 + W1) / 2.0;
        self.body(u, outer * ds)?;
        self.kick(u, W1 * ds);
        self.body(u, inner * ds)?;
        self.kick(u, W0 * ds);
        self.body(u, inner * ds)?;
        self.kick(u, W1 * ds);
        self.body(u, outer * ds)
    }

    fn kick(&self, u: &mut PhaseVec, ds: f64) {
        let (x, y) = (u[X], u[Y]);
        u[PX] -= ds * (self.k1 * x + self.k2 * (x * x - y * y) / 2.0);
        u[PY] += ds * (self.k1 * y + self.k2 * x * y);
    }

    fn body(&self, u: &mut PhaseVec, l: f64) -> Option<()> {
        if self.h == 0.0 {
            self.drift(u, l)
        } else {
            self.bend(u, l)
        }
    }

    /// 1 + δ from the energy deviation.
    fn momentum(&self, pt: f64) -> Option<f64> {
        checked_sqrt(1.0 + 2.0 * pt / self.beta + pt * pt)
    }

    fn drift(&self, u: &mut PhaseVec, l: f64) -> Option<()> {
        let p = self.momentum(u[PT])?;
        let pz = checked_sqrt(p * p - u[PX] * u[PX] - u[PY] * u[PY])?;
        u[X] += l * u[PX] / pz;
        u[Y] += l * u[PY] / pz;
        u[T] += l * (1.0 / self.beta - (1.0 / self.beta + u[PT]) / pz);
        Some(())
    }

    fn bend(&self, u: &mut PhaseVec, l: f64) -> Option<()> {
        let h = self.h;
        let p = self.momentum(u[PT])?;
        let (x, px, py) = (u[X], u[PX], u[PY]);
        let transverse2 = p * p - py * py;
        let pz = checked_sqrt(transverse2 - px * px)?;
        let (sin, cos) = (h * l).sin_cos();

        let px_out = px * cos - (1.0 + h * x - pz) * sin;
        let pz_out = checked_sqrt(transverse2 - px_out * px_out)?;
        let x_out = ((1.0 + h * x - pz) * cos + px * sin + pz_out - 1.0) / h;

        let pw = transverse2.sqrt();
        // Angle swept in the bend plane
        let swept = h * l + (px / pw).asin() - (px_out / pw).asin();

        u[X] = x_out;
        u[PX] = px_out;
        u[Y] += py * swept / h;
        u[T] += l / self.beta - (1.0 / self.beta + u[PT]) * swept / h;
        Some(())
    }

    /// Second-order Taylor map of the tracker about the reference orbit.
    fn expand(&self) -> TransferMap {
        let track = |u: PhaseVec| {
            let mut v = u;
            self.step(&mut v);
            v
        };
        let unit = |j: usize, scale: f64| {
            let mut e = PhaseVec::zeros();
            e[j] = scale;
            e
        };

        let origin = track(PhaseVec::zeros());
        let mut map = TransferMap::identity();
        map.kick = origin;

        for j in 0..6 {
            let e = unit(j, LINEAR_STEP);
            let column = (track(e) - track(-e)) / (2.0 * LINEAR_STEP);
            map.r.set_column(j, &column);
        }

        let eps = QUADRATIC_STEP;
        for j in 0..6 {
            let e = unit(j, eps);
            let curvature = (track(e) + track(-e) - origin * 2.0) / (2.0 * eps * eps);
            for i in 0..6 {
                map.t[i][(j, j)] = curvature[i];
            }
            for k in (j + 1)..6 {
                let f = unit(k, eps);
                let mixed = (track(e + f) - track(e - f) - track(f - e) + track(-e - f))
                    / (8.0 * eps * eps);
                for i in 0..6 {
                    map.t[i][(j, k)] = mixed[i];
                    map.t[i][(k, j)] = mixed[i];
                }
            }
        }
        map
    }
}

fn edge_kick(h: f64, e: f64, fint: f64, hgap: f64) -> ThinKick {
    let m = edge_map(h, e, fint, hgap);
    ThinKick {
        action: KickAction::Edge {
            fx: m.r[(PX, X)],
            fy: m.r[(PY, Y)],
        },
        tilt: 0.0,
    }
}

fn checked_sqrt(v: f64) -> Option<f64> {
    (v >= 0.0).then(|| v.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::Species;
    use approx::assert_abs_diff_eq;

    fn kin() -> Kinematics {
        Kinematics::from_kinetic_energy(Species::Proton, 230.0).unwrap()
    }

    #[test]
    fn slice_count_follows_strongest_field() {
        assert_eq!(slice_count(1.0, 0.0, 1.0, 0.0), 50);
        assert_eq!(slice_count(0.1, 0.0, 0.01, 0.0), MIN_SLICES);
        assert_eq!(slice_count(1.2, 0.3, 0.8, 2.0), 54);
        assert_eq!(slice_count(0.4, 0.0, 0.0, 5.0), 5);
    }

    #[test]
    fn drift_is_exact_at_large_angle() {
        let e = Element::drift("D", 2.0);
        let stepper = ExactStepper::new(&e, &kin());
        let mut u = PhaseVec::new(0.0, 0.3, 0.0, 0.0, 0.0, 0.0);
        assert!(stepper.step(&mut u));
        let pz = (1.0_f64 - 0.09).sqrt();
        assert_abs_diff_eq!(u[X], 2.0 * 0.3 / pz, epsilon = 1e-14);
    }

    #[test]
    fn on_axis_particle_follows_the_bend() {
        let e = Element::sbend("B", 1.5, 0.3);
        let stepper = ExactStepper::new(&e, &kin());
        let mut u = PhaseVec::zeros();
        assert!(stepper.step(&mut u));
        assert_abs_diff_eq!(u, PhaseVec::zeros(), epsilon = 1e-15);
    }

    #[test]
    fn imaginary_momentum_is_lost() {
        let e = Element::drift("D", 1.0);
        let stepper = ExactStepper::new(&e, &kin());
        let mut u = PhaseVec::new(0.0, 1.2, 0.0, 0.0, 0.0, 0.0);
        assert!(!stepper.step(&mut u));
    }

    #[test]
    fn expanded_map_is_close_to_symplectic() {
        let e = Element::quadrupole("Q", 0.5, 2.0);
        let map = Exact.transfer_map(&e, &kin());
        assert!(map.symplecticity_error() < 1e-8);
        assert_abs_diff_eq!(map.r[(X, X)], (2.0_f64.sqrt() * 0.5).cos(), epsilon = 1e-8);
    }
}
