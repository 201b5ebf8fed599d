//! Optical functions: analytic propagation and ensemble estimates.
//!
//! # Design choices
//! - Propagation uses the same transfer maps as tracking, linear part only.
//!   The transverse beam matrix of unit emittance, `Σ = blockdiag(Bx, By)`
//!   with `B = [[β, −α], [−α, γ]]`, is carried through the full 4×4 block as
//!   `Σ' = R·Σ·Rᵀ`, so coupling elements (tilted magnets) are handled.
//! - Per-plane β and α are read from the projected 2×2 blocks, normalised by
//!   the square root of their determinant (which is 1 without coupling).
//! - Dispersion is taken with respect to δ = pt/β0. It propagates as
//!   `η' = R·η + β0·R[.., pt]`.

use crate::element::Element;
use crate::error::{BeamlineError, Result};
use crate::kinematics::Kinematics;
use crate::maps::TransferMap;
use crate::sequence::Sequence;
use crate::types::{PhaseMatrix, PhaseVec, Plane, TransverseMatrix, TransverseVec, PT, T};
use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

// ---------------------------------------------------------------------------
// Twiss parameters
// ---------------------------------------------------------------------------

/// Optical functions of one transverse plane.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaneTwiss {
    /// [m]
    pub beta: f64,
    pub alpha: f64,
    /// dx/dδ [m]
    pub dispersion: f64,
    /// dpx/dδ
    pub dispersion_prime: f64,
}

impl PlaneTwiss {
    pub fn new(beta: f64, alpha: f64) -> Self {
        Self {
            beta,
            alpha,
            dispersion: 0.0,
            dispersion_prime: 0.0,
        }
    }

    pub fn with_dispersion(mut self, dispersion: f64, dispersion_prime: f64) -> Self {
        self.dispersion = dispersion;
        self.dispersion_prime = dispersion_prime;
        self
    }

    pub fn gamma(&self) -> f64 {
        (1.0 + self.alpha * self.alpha) / self.beta
    }

    /// Beam matrix of unit emittance.
    pub fn matrix(&self) -> Matrix2<f64> {
        Matrix2::new(self.beta, -self.alpha, -self.alpha, self.gamma())
    }

    fn validate(&self, plane: Plane) -> Result<()> {
        let name = format!("initial {plane} optics");
        if !(self.beta.is_finite() && self.beta > 0.0) {
            return Err(BeamlineError::invalid(name, "beta", self.beta, "must be positive"));
        }
        for (key, v) in [
            ("alpha", self.alpha),
            ("dispersion", self.dispersion),
            ("dispersion_prime", self.dispersion_prime),
        ] {
            if !v.is_finite() {
                return Err(BeamlineError::invalid(name, key, v, "must be finite"));
            }
        }
        Ok(())
    }

    /// From a 2×2 beam matrix; the emittance is the square root of its determinant.
    fn from_beam_matrix(m: &Matrix2<f64>) -> Option<(Self, f64)> {
        let det = m.determinant();
        if !(det.is_finite() && det > 0.0) {
            return None;
        }
        let emittance = det.sqrt();
        Some((Self::new(m[(0, 0)] / emittance, -m[(0, 1)] / emittance), emittance))
    }
}

/// Optical functions of both transverse planes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Twiss {
    pub x: PlaneTwiss,
    pub y: PlaneTwiss,
}

impl Twiss {
    pub fn new(x: PlaneTwiss, y: PlaneTwiss) -> Self {
        Self { x, y }
    }

    pub fn plane(&self, plane: Plane) -> &PlaneTwiss {
        match plane {
            Plane::Horizontal => &self.x,
            Plane::Vertical => &self.y,
        }
    }

    fn dispersion_vector(&self) -> TransverseVec {
        TransverseVec::new(
            self.x.dispersion,
            self.x.dispersion_prime,
            self.y.dispersion,
            self.y.dispersion_prime,
        )
    }

    /// 6×6 covariance of a Gaussian beam matched to these optics.
    ///
    /// `σ_t` and `σ_pt` are the spreads of the longitudinal coordinates; the
    /// dispersion correlates the transverse coordinates with `pt`.
    pub fn covariance(
        &self,
        emittance_x: f64,
        emittance_y: f64,
        sigma_t: f64,
        sigma_pt: f64,
        kin: &Kinematics,
    ) -> PhaseMatrix {
        let mut cov = PhaseMatrix::zeros();
        cov.fixed_view_mut::<2, 2>(0, 0)
            .copy_from(&(self.x.matrix() * emittance_x));
        cov.fixed_view_mut::<2, 2>(2, 2)
            .copy_from(&(self.y.matrix() * emittance_y));
        cov[(T, T)] = sigma_t * sigma_t;

        let beta0 = kin.beta();
        let sigma_delta = sigma_pt / beta0;
        let d = self.dispersion_vector();
        let eta = PhaseVec::new(d[0], d[1], d[2], d[3], 0.0, beta0);
        cov + eta * eta.transpose() * (sigma_delta * sigma_delta)
    }

    /// Optics and emittances estimated from an ensemble covariance.
    pub fn from_covariance(cov: &PhaseMatrix, kin: &Kinematics) -> EnsembleTwiss {
        let var_pt = cov[(PT, PT)];
        let correlation: TransverseVec = cov.fixed_view::<4, 1>(0, PT).into_owned();
        let mut betatron: TransverseMatrix = cov.fixed_view::<4, 4>(0, 0).into_owned();
        let mut eta = TransverseVec::zeros();
        if var_pt > 0.0 {
            eta = correlation * (kin.beta() / var_pt);
            betatron -= correlation * correlation.transpose() / var_pt;
        }

        let plane = |p: usize| {
            let block: Matrix2<f64> = betatron.fixed_view::<2, 2>(p, p).into_owned();
            PlaneTwiss::from_beam_matrix(&block).map(|(twiss, emittance)| BeamPlane {
                twiss: twiss.with_dispersion(eta[p], eta[p + 1]),
                emittance,
            })
        };
        EnsembleTwiss {
            x: plane(0),
            y: plane(2),
        }
    }
}

/// Optics of one plane of a particle ensemble.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeamPlane {
    pub twiss: PlaneTwiss,
    /// Geometric RMS emittance [m·rad]
    pub emittance: f64,
}

/// Ensemble optics; a plane is `None` when its betatron matrix is degenerate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnsembleTwiss {
    pub x: Option<BeamPlane>,
    pub y: Option<BeamPlane>,
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Optics at one element exit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TwissRow {
    pub element_index: usize,
    pub element: String,
    pub s: f64,
    pub twiss: Twiss,
    /// Accumulated phase advance [rad]
    pub mu_x: f64,
    pub mu_y: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TwissTable {
    /// Optics at the sequence entrance
    pub initial: Twiss,
    pub rows: Vec<TwissRow>,
}

impl TwissTable {
    pub fn rows(&self) -> &[TwissRow] {
        &self.rows
    }

    pub fn last(&self) -> Option<&TwissRow> {
        self.rows.last()
    }

    pub fn get(&self, element: &str) -> Option<&TwissRow> {
        self.rows.iter().find(|r| r.element == element)
    }

    /// Total phase advance in units of 2π, per plane.
    pub fn tunes(&self) -> (f64, f64) {
        self.last()
            .map_or((0.0, 0.0), |r| (r.mu_x / TAU, r.mu_y / TAU))
    }
}

// ---------------------------------------------------------------------------
// Propagator
// ---------------------------------------------------------------------------

/// Propagates optics through a sequence without particles.
#[derive(Clone, Copy, Debug)]
pub struct TwissPropagator {
    kinematics: Kinematics,
}

impl TwissPropagator {
    pub fn new(kinematics: Kinematics) -> Self {
        Self { kinematics }
    }

    fn linear_blocks(&self, map: &TransferMap) -> (TransverseMatrix, TransverseVec) {
        let r4: TransverseMatrix = map.r.fixed_view::<4, 4>(0, 0).into_owned();
        let r5: TransverseVec = map.r.fixed_view::<4, 1>(0, PT).into_owned();
        (r4, r5 * self.kinematics.beta())
    }

    /// Optics at every element exit, starting from `initial`.
    pub fn propagate(&self, sequence: &Sequence, initial: &Twiss) -> Result<TwissTable> {
        initial.x.validate(Plane::Horizontal)?;
        initial.y.validate(Plane::Vertical)?;

        let mut sigma = TransverseMatrix::zeros();
        sigma.fixed_view_mut::<2, 2>(0, 0).copy_from(&initial.x.matrix());
        sigma.fixed_view_mut::<2, 2>(2, 2).copy_from(&initial.y.matrix());
        let mut eta = initial.dispersion_vector();
        let mut current = *initial;
        let (mut mu_x, mut mu_y) = (0.0, 0.0);

        let mut rows = Vec::with_capacity(sequence.len());
        let maps = sequence.transfer_maps(&self.kinematics);
        for (index, (element, map)) in sequence.elements().iter().zip(maps).enumerate() {
            let (r4, r5) = self.linear_blocks(&map);
            mu_x += phase_advance(&r4, 0, &current.x);
            mu_y += phase_advance(&r4, 2, &current.y);

            sigma = r4 * sigma * r4.transpose();
            eta = r4 * eta + r5;
            current = Twiss::new(
                projected(&sigma, 0).with_dispersion(eta[0], eta[1]),
                projected(&sigma, 2).with_dispersion(eta[2], eta[3]),
            );
            rows.push(row(sequence, index, element, current, mu_x, mu_y));
        }
        tracing::debug!(rows = rows.len(), mu_x, mu_y, "twiss propagated");
        Ok(TwissTable {
            initial: *initial,
            rows,
        })
    }

    /// Matched periodic optics of the sequence seen as one cell or ring.
    ///
    /// Each plane is solved from its diagonal block of the one-turn matrix.
    pub fn periodic(&self, sequence: &Sequence) -> Result<Twiss> {
        let one_turn = sequence.one_turn_map(&self.kinematics);
        let r4: TransverseMatrix = one_turn.r.fixed_view::<4, 4>(0, 0).into_owned();
        let r5: TransverseVec = one_turn.r.fixed_view::<4, 1>(0, PT).into_owned();

        let plane = |p: usize, which: Plane| -> Result<PlaneTwiss> {
            let m = r4.fixed_view::<2, 2>(p, p);
            let cos_mu = (m[(0, 0)] + m[(1, 1)]) / 2.0;
            if !(cos_mu.abs() < 1.0) {
                return Err(BeamlineError::UnstableLattice {
                    plane: which,
                    cos_mu,
                });
            }
            let sin_mu = m[(0, 1)].signum() * (1.0 - cos_mu * cos_mu).sqrt();
            Ok(PlaneTwiss::new(
                m[(0, 1)] / sin_mu,
                (m[(0, 0)] - m[(1, 1)]) / (2.0 * sin_mu),
            ))
        };
        let x = plane(0, Plane::Horizontal)?;
        let y = plane(2, Plane::Vertical)?;

        let eta = (TransverseMatrix::identity() - r4)
            .lu()
            .solve(&(r5 * self.kinematics.beta()))
            .ok_or_else(|| {
                BeamlineError::SingularMatrix("solving for periodic dispersion".into())
            })?;
        Ok(Twiss::new(
            x.with_dispersion(eta[0], eta[1]),
            y.with_dispersion(eta[2], eta[3]),
        ))
    }

    /// [`Self::periodic`] followed by [`Self::propagate`].
    pub fn periodic_table(&self, sequence: &Sequence) -> Result<TwissTable> {
        let initial = self.periodic(sequence)?;
        self.propagate(sequence, &initial)
    }
}

fn row(
    sequence: &Sequence,
    index: usize,
    element: &Element,
    twiss: Twiss,
    mu_x: f64,
    mu_y: f64,
) -> TwissRow {
    TwissRow {
        element_index: index,
        element: element.name.clone(),
        s: sequence.exit_s_at(index),
        twiss,
        mu_x,
        mu_y,
    }
}

/// Per-plane optics of a unit-emittance 4×4 beam matrix.
fn projected(sigma: &TransverseMatrix, p: usize) -> PlaneTwiss {
    let block: Matrix2<f64> = sigma.fixed_view::<2, 2>(p, p).into_owned();
    match PlaneTwiss::from_beam_matrix(&block) {
        Some((twiss, _)) => twiss,
        None => PlaneTwiss::new(block[(0, 0)], -block[(0, 1)]),
    }
}

/// Phase advance of one element, from its diagonal block and the entry optics.
fn phase_advance(r4: &TransverseMatrix, p: usize, entry: &PlaneTwiss) -> f64 {
    let (r11, r12) = (r4[(p, p)], r4[(p, p + 1)]);
    let mu = r12.atan2(entry.beta * r11 - entry.alpha * r12);
    if mu < 0.0 {
        mu + TAU
    } else {
        mu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Strength;
    use crate::kinematics::Species;
    use crate::sequence::SequenceBuilder;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn kin() -> Kinematics {
        Kinematics::from_kinetic_energy(Species::Proton, 230.0).unwrap()
    }

    fn fodo(k1: f64) -> Sequence {
        SequenceBuilder::new()
            .element(Element::quadrupole("QF", 0.4, k1))
            .element(Element::drift("D1", 1.6))
            .element(Element::quadrupole("QD", 0.4, -k1))
            .element(Element::drift("D2", 1.6))
            .freeze()
            .unwrap()
    }

    #[test]
    fn beta_in_a_drift_is_a_parabola() {
        let seq = SequenceBuilder::new()
            .element(Element::drift("D", 3.0))
            .freeze()
            .unwrap();
        let start = PlaneTwiss::new(2.0, 0.5);
        let table = TwissPropagator::new(kin())
            .propagate(&seq, &Twiss::new(start, start))
            .unwrap();
        let row = table.last().unwrap();
        let expected = 2.0 - 2.0 * 0.5 * 3.0 + start.gamma() * 9.0;
        assert_relative_eq!(row.twiss.x.beta, expected, max_relative = 1e-14);
        assert_relative_eq!(row.twiss.y.alpha, 0.5 - start.gamma() * 3.0, max_relative = 1e-14);
        assert_relative_eq!(row.mu_x, (3.0_f64).atan2(2.0 - 0.5 * 3.0), max_relative = 1e-14);
    }

    #[test]
    fn periodic_solution_repeats_after_one_cell() {
        let seq = fodo(1.0);
        let prop = TwissPropagator::new(kin());
        let table = prop.periodic_table(&seq).unwrap();
        let end = table.last().unwrap().twiss;
        assert_relative_eq!(end.x.beta, table.initial.x.beta, max_relative = 1e-10);
        assert_abs_diff_eq!(end.x.alpha, table.initial.x.alpha, epsilon = 1e-10);
        assert_relative_eq!(end.y.beta, table.initial.y.beta, max_relative = 1e-10);

        let m = seq.one_turn_map(&kin()).r;
        let cos_mu = (m[(0, 0)] + m[(1, 1)]) / 2.0;
        assert_abs_diff_eq!(table.last().unwrap().mu_x, cos_mu.acos(), epsilon = 1e-12);
    }

    #[test]
    fn over_focused_cell_is_unstable() {
        let err = TwissPropagator::new(kin()).periodic(&fodo(8.0)).unwrap_err();
        assert!(matches!(err, BeamlineError::UnstableLattice { .. }));
    }

    #[test]
    fn bend_generates_dispersion() {
        let (l, angle) = (2.0, 0.3);
        let seq = SequenceBuilder::new()
            .element(Element::sbend("B", l, angle))
            .freeze()
            .unwrap();
        let start = PlaneTwiss::new(5.0, 0.0);
        let table = TwissPropagator::new(kin())
            .propagate(&seq, &Twiss::new(start, start))
            .unwrap();
        let rho = l / angle;
        let twiss = table.last().unwrap().twiss;
        assert_relative_eq!(twiss.x.dispersion, rho * (1.0 - angle.cos()), max_relative = 1e-12);
        assert_relative_eq!(twiss.x.dispersion_prime, angle.sin(), max_relative = 1e-12);
        assert_eq!(twiss.y.dispersion, 0.0);
    }

    #[test]
    fn covariance_round_trip() {
        let kin = kin();
        let twiss = Twiss::new(
            PlaneTwiss::new(8.0, -1.2).with_dispersion(0.7, 0.05),
            PlaneTwiss::new(3.0, 0.4),
        );
        let cov = twiss.covariance(2e-6, 1e-6, 1e-3, 1e-3, &kin);
        let est = Twiss::from_covariance(&cov, &kin);
        let x = est.x.unwrap();
        assert_relative_eq!(x.emittance, 2e-6, max_relative = 1e-10);
        assert_relative_eq!(x.twiss.beta, 8.0, max_relative = 1e-10);
        assert_relative_eq!(x.twiss.alpha, -1.2, max_relative = 1e-10);
        assert_relative_eq!(x.twiss.dispersion, 0.7, max_relative = 1e-10);
        assert_relative_eq!(x.twiss.dispersion_prime, 0.05, max_relative = 1e-10);
        assert_relative_eq!(est.y.unwrap().twiss.beta, 3.0, max_relative = 1e-10);
    }

    #[test]
    fn degenerate_plane_has_no_optics() {
        let mut cov = PhaseMatrix::zeros();
        cov[(0, 0)] = 1e-6;
        let est = Twiss::from_covariance(&cov, &kin());
        assert!(est.x.is_none());
        assert!(est.y.is_none());
    }

    #[test]
    fn coupling_keeps_unit_determinant_projection() {
        let mut seq = fodo(1.0);
        seq.set_strength("QF", Strength::Tilt, 0.1).unwrap();
        let start = PlaneTwiss::new(4.0, 0.0);
        let table = TwissPropagator::new(kin())
            .propagate(&seq, &Twiss::new(start, start))
            .unwrap();
        for row in table.rows() {
            assert!(row.twiss.x.beta > 0.0 && row.twiss.y.beta > 0.0);
        }
    }

    #[test]
    fn invalid_initial_optics_are_rejected() {
        let bad = Twiss::new(PlaneTwiss::new(-1.0, 0.0), PlaneTwiss::new(1.0, 0.0));
        assert!(TwissPropagator::new(kin()).propagate(&fodo(1.0), &bad).is_err());
    }
}
