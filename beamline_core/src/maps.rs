//! Second-order transfer maps.
//!
//! A map sends an entry coordinate `u` to
//!
//! ```text
//! u'_i = k_i + Σ_j R_ij u_j + Σ_jk T_ijk u_j u_k
//! ```
//!
//! with `T` symmetric in its last two indices. The constant `k` is zero for
//! every element except dipole kicks.
//!
//! # Design choices
//! - `T` is stored as six 6×6 matrices so that nalgebra does the contractions.
//! - Composition and tilts keep terms up to second order in `u` and drop the rest.
//! - [`CompiledMap`] keeps only the non-zero quadratic coefficients. Tracking
//!   applies that form to every particle.

use crate::kinematics::Kinematics;
use crate::types::{rotation, PhaseMatrix, PhaseVec, PT, PX, PY, T, X, Y};

/// Constant term, linear matrix and quadratic tensor of one element.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferMap {
    pub kick: PhaseVec,
    pub r: PhaseMatrix,
    /// `t[i][(j, k)]` is T_ijk
    pub t: [PhaseMatrix; 6],
}

impl Default for TransferMap {
    fn default() -> Self {
        Self::identity()
    }
}

impl TransferMap {
    pub fn identity() -> Self {
        Self::linear(PhaseMatrix::identity())
    }

    /// Purely linear map.
    pub fn linear(r: PhaseMatrix) -> Self {
        Self {
            kick: PhaseVec::zeros(),
            r,
            t: [PhaseMatrix::zeros(); 6],
        }
    }

    /// Field-free drift to second order in the canonical variables.
    pub fn drift(length: f64, kin: &Kinematics) -> Self {
        let beta = kin.beta();
        let bg2 = kin.beta_gamma().powi(2);
        let mut map = Self::identity();
        map.r[(X, PX)] = length;
        map.r[(Y, PY)] = length;
        map.r[(T, PT)] = length / bg2;
        map.add_monomial(X, PX, PT, -length / beta);
        map.add_monomial(Y, PY, PT, -length / beta);
        map.add_monomial(T, PX, PX, -length / (2.0 * beta));
        map.add_monomial(T, PY, PY, -length / (2.0 * beta));
        map.add_monomial(T, PT, PT, -3.0 * length / (2.0 * beta * bg2));
        map
    }

    /// T_ijk
    pub fn t(&self, i: usize, j: usize, k: usize) -> f64 {
        self.t[i][(j, k)]
    }

    /// Add `coeff · u_j u_k` to output `i`, splitting cross terms over both
    /// symmetric slots.
    pub fn add_monomial(&mut self, i: usize, j: usize, k: usize, coeff: f64) {
        if j == k {
            self.t[i][(j, j)] += coeff;
        } else {
            self.t[i][(j, k)] += coeff / 2.0;
            self.t[i][(k, j)] += coeff / 2.0;
        }
    }

    /// Whether any quadratic coefficient is non-zero.
    pub fn is_second_order(&self) -> bool {
        self.t.iter().any(|m| m.iter().any(|&c| c != 0.0))
    }

    pub fn apply(&self, u: &PhaseVec) -> PhaseVec {
        let mut out = self.kick + self.r * u;
        for (i, ti) in self.t.iter().enumerate() {
            out[i] += u.dot(&(ti * u));
        }
        out
    }

    /// The quadratic part `T(a, b)` as a vector, for two (possibly different) arguments.
    fn bilinear(&self, a: &PhaseVec, b: &PhaseVec) -> PhaseVec {
        PhaseVec::from_fn(|i, _| a.dot(&(self.t[i] * b)))
    }

    /// `self` followed by `next`, truncated at second order.
    pub fn then(&self, next: &TransferMap) -> TransferMap {
        let k1 = &self.kick;
        let r1 = &self.r;

        let kick = next.kick + next.r * k1 + next.bilinear(k1, k1);

        // Linear part picks up the constant of the first map through T2
        let mut r = next.r * r1;
        for i in 0..6 {
            let row = (next.t[i] * k1).transpose() * r1 * 2.0;
            for j in 0..6 {
                r[(i, j)] += row[j];
            }
        }

        let mut t = [PhaseMatrix::zeros(); 6];
        for (i, ti) in t.iter_mut().enumerate() {
            let mut acc = r1.transpose() * next.t[i] * r1;
            let weights = next.r.row(i).transpose() + next.t[i] * k1 * 2.0;
            for m in 0..6 {
                if weights[m] != 0.0 {
                    acc += self.t[m] * weights[m];
                }
            }
            *ti = acc;
        }

        TransferMap { kick, r, t }
    }

    /// The map of an element rolled by `tilt` about the s axis, in lab coordinates.
    pub fn rotated(&self, tilt: f64) -> TransferMap {
        if tilt == 0.0 {
            return self.clone();
        }
        let w_in = rotation(tilt);
        let w_out = rotation(-tilt);
        let kick = w_out * self.kick;
        let r = w_out * self.r * w_in;
        let frame: Vec<PhaseMatrix> = self
            .t
            .iter()
            .map(|tl| w_in.transpose() * tl * w_in)
            .collect();
        let mut t = [PhaseMatrix::zeros(); 6];
        for (i, ti) in t.iter_mut().enumerate() {
            for (l, fl) in frame.iter().enumerate() {
                let w = w_out[(i, l)];
                if w != 0.0 {
                    *ti += fl * w;
                }
            }
        }
        TransferMap { kick, r, t }
    }

    /// Largest entry of `Rᵀ J R − J`; zero for a symplectic linear part.
    pub fn symplecticity_error(&self) -> f64 {
        let mut j = PhaseMatrix::zeros();
        for o in [X, Y, T] {
            j[(o, o + 1)] = 1.0;
            j[(o + 1, o)] = -1.0;
        }
        (self.r.transpose() * j * self.r - j).amax()
    }

    pub fn compile(&self) -> CompiledMap {
        let mut terms = Vec::new();
        for i in 0..6 {
            for j in 0..6 {
                for k in j..6 {
                    let c = if j == k {
                        self.t[i][(j, j)]
                    } else {
                        self.t[i][(j, k)] + self.t[i][(k, j)]
                    };
                    if c != 0.0 {
                        terms.push(QuadraticTerm { i, j, k, coeff: c });
                    }
                }
            }
        }
        CompiledMap {
            kick: self.kick,
            r: self.r,
            terms,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct QuadraticTerm {
    i: usize,
    j: usize,
    k: usize,
    coeff: f64,
}

/// A [`TransferMap`] reduced to its non-zero monomials for fast application.
#[derive(Clone, Debug)]
pub struct CompiledMap {
    kick: PhaseVec,
    r: PhaseMatrix,
    terms: Vec<QuadraticTerm>,
}

impl CompiledMap {
    pub fn apply(&self, u: &PhaseVec) -> PhaseVec {
        let mut out = self.kick + self.r * u;
        for term in &self.terms {
            out[term.i] += term.coeff * u[term.j] * u[term.k];
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::{Kinematics, Species};
    use approx::assert_abs_diff_eq;

    fn kin() -> Kinematics {
        Kinematics::from_kinetic_energy(Species::Proton, 230.0).unwrap()
    }

    fn sample_map() -> TransferMap {
        let mut m = TransferMap::drift(1.3, &kin());
        m.r[(PX, X)] = -0.4;
        m.kick[PY] = 1e-3;
        m.add_monomial(PX, X, Y, 0.7);
        m.add_monomial(X, X, X, -0.2);
        m
    }

    #[test]
    fn zero_length_drift_is_identity() {
        let m = TransferMap::drift(0.0, &kin());
        assert_eq!(m.r, PhaseMatrix::identity());
        assert!(!m.is_second_order());
    }

    #[test]
    fn compiled_map_matches_tensor_form() {
        let m = sample_map();
        let u = PhaseVec::new(1e-3, -2e-4, 5e-4, 1e-4, 1e-3, 2e-3);
        assert_abs_diff_eq!(m.compile().apply(&u), m.apply(&u), epsilon = 1e-18);
    }

    #[test]
    fn composition_matches_sequential_application_to_second_order() {
        let a = sample_map();
        let b = sample_map().rotated(0.2);
        let ab = a.then(&b);
        let u = PhaseVec::new(1e-5, -2e-5, 5e-6, 1e-5, 0.0, 2e-5);
        let direct = b.apply(&a.apply(&u));
        // Residual is third order in the deviation from the kicked orbit
        assert_abs_diff_eq!(ab.apply(&u), direct, epsilon = 1e-12);
    }

    #[test]
    fn rotation_commutes_with_application() {
        let m = sample_map();
        let tilt = 0.37;
        let u = PhaseVec::new(1e-3, 2e-4, -4e-4, 1e-4, 0.0, 1e-3);
        let expected = rotation(-tilt) * m.apply(&(rotation(tilt) * u));
        assert_abs_diff_eq!(m.rotated(tilt).apply(&u), expected, epsilon = 1e-16);
    }

    #[test]
    fn drift_is_symplectic() {
        assert!(TransferMap::drift(2.0, &kin()).symplecticity_error() < 1e-15);
    }
}
