//! Seeded Gaussian beam distributions.
//!
//! # Design choices
//! - A distribution is fully described by its 6×6 covariance, a centroid,
//!   a particle count and a seed. The same seed always yields the same beam.
//! - Sampling: standard normals by Box–Muller from a `ChaCha8Rng`, coloured
//!   by the Cholesky factor of the covariance. Coordinates with zero
//!   variance are left out of the factorisation and stay at the centroid.

use beamline_core::error::{BeamlineError, Result};
use beamline_core::twiss::Twiss;
use beamline_core::{Beam, Kinematics, PhaseMatrix, PhaseVec};
use nalgebra::DMatrix;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// A Gaussian beam ready to be sampled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeamDistribution {
    pub kinematics: Kinematics,
    pub covariance: PhaseMatrix,
    pub centroid: PhaseVec,
    pub particles: usize,
    pub seed: u64,
}

impl BeamDistribution {
    pub fn builder(kinematics: Kinematics) -> BeamDistributionBuilder {
        BeamDistributionBuilder::new(kinematics)
    }

    /// Draw the particles.
    pub fn sample(&self) -> Result<Beam> {
        let active: Vec<usize> = (0..6).filter(|&i| self.covariance[(i, i)] > 0.0).collect();
        let factor = cholesky(&self.covariance, &active)?;

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut z = vec![0.0; active.len()];
        let coords = (0..self.particles)
            .map(|_| {
                fill_normal(&mut rng, &mut z);
                let mut u = self.centroid;
                for (row, &i) in active.iter().enumerate() {
                    u[i] += (0..=row).map(|k| factor[(row, k)] * z[k]).sum::<f64>();
                }
                u
            })
            .collect();
        tracing::debug!(particles = self.particles, seed = self.seed, "beam sampled");
        Beam::from_coordinates(self.kinematics, coords)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
enum Shape {
    Twiss {
        twiss: Twiss,
        emittance_x: f64,
        emittance_y: f64,
    },
    Sigma(PhaseMatrix),
}

/// Collects the parameters of a [`BeamDistribution`]; validated in [`Self::build`].
#[derive(Clone, Debug)]
pub struct BeamDistributionBuilder {
    kinematics: Kinematics,
    shape: Option<Shape>,
    sigma_t: f64,
    sigma_pt: f64,
    centroid: PhaseVec,
    particles: usize,
    seed: u64,
}

impl BeamDistributionBuilder {
    fn new(kinematics: Kinematics) -> Self {
        Self {
            kinematics,
            shape: None,
            sigma_t: 0.0,
            sigma_pt: 0.0,
            centroid: PhaseVec::zeros(),
            particles: 1000,
            seed: 42,
        }
    }

    /// Transverse shape from optics and geometric emittances [m·rad].
    pub fn twiss(mut self, twiss: Twiss, emittance_x: f64, emittance_y: f64) -> Self {
        self.shape = Some(Shape::Twiss {
            twiss,
            emittance_x,
            emittance_y,
        });
        self
    }

    /// Longitudinal spreads; only used with [`Self::twiss`].
    pub fn longitudinal(mut self, sigma_t: f64, sigma_pt: f64) -> Self {
        self.sigma_t = sigma_t;
        self.sigma_pt = sigma_pt;
        self
    }

    /// Full 6×6 beam matrix.
    pub fn sigma_matrix(mut self, sigma: PhaseMatrix) -> Self {
        self.shape = Some(Shape::Sigma(sigma));
        self
    }

    pub fn centroid(mut self, centroid: PhaseVec) -> Self {
        self.centroid = centroid;
        self
    }

    pub fn particles(mut self, particles: usize) -> Self {
        self.particles = particles;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> Result<BeamDistribution> {
        let covariance = match self.shape {
            None => return Err(invalid("no twiss parameters or sigma matrix given")),
            Some(Shape::Twiss {
                twiss,
                emittance_x,
                emittance_y,
            }) => {
                for (what, v) in [
                    ("emittance_x", emittance_x),
                    ("emittance_y", emittance_y),
                    ("sigma_t", self.sigma_t),
                    ("sigma_pt", self.sigma_pt),
                ] {
                    if !(v.is_finite() && v >= 0.0) {
                        return Err(invalid(format!("{what} = {v} must be finite and ≥ 0")));
                    }
                }
                for plane in [&twiss.x, &twiss.y] {
                    if !(plane.beta.is_finite() && plane.beta > 0.0) {
                        return Err(invalid(format!("beta = {} must be positive", plane.beta)));
                    }
                }
                twiss.covariance(
                    emittance_x,
                    emittance_y,
                    self.sigma_t,
                    self.sigma_pt,
                    &self.kinematics,
                )
            }
            Some(Shape::Sigma(sigma)) => {
                if (sigma - sigma.transpose()).amax() > 1e-12 * sigma.amax() {
                    return Err(invalid("sigma matrix is not symmetric"));
                }
                sigma
            }
        };
        if !covariance.iter().all(|v| v.is_finite()) {
            return Err(invalid("covariance has non-finite entries"));
        }
        if !self.centroid.iter().all(|v| v.is_finite()) {
            return Err(invalid("centroid has non-finite entries"));
        }
        if self.particles == 0 {
            return Err(invalid("at least one particle is required"));
        }

        let distribution = BeamDistribution {
            kinematics: self.kinematics,
            covariance,
            centroid: self.centroid,
            particles: self.particles,
            seed: self.seed,
        };
        let active: Vec<usize> = (0..6).filter(|&i| covariance[(i, i)] > 0.0).collect();
        cholesky(&covariance, &active)?;
        Ok(distribution)
    }
}

// ---------------------------------------------------------------------------
// Sampling helpers
// ---------------------------------------------------------------------------

fn invalid(reason: impl Into<String>) -> BeamlineError {
    BeamlineError::InvalidDistribution(reason.into())
}

/// Lower Cholesky factor of the covariance restricted to `active`.
///
/// Inactive coordinates must be completely uncorrelated.
fn cholesky(covariance: &PhaseMatrix, active: &[usize]) -> Result<DMatrix<f64>> {
    for i in (0..6).filter(|i| !active.contains(i)) {
        if covariance[(i, i)] < 0.0 {
            return Err(invalid(format!("negative variance for coordinate {i}")));
        }
        if (0..6).any(|j| covariance[(i, j)] != 0.0) {
            return Err(invalid(format!(
                "coordinate {i} has zero variance but non-zero correlations"
            )));
        }
    }
    let n = active.len();
    let sub = DMatrix::from_fn(n, n, |r, c| covariance[(active[r], active[c])]);
    sub.cholesky()
        .map(|c| c.l())
        .ok_or_else(|| invalid("sigma matrix is not positive definite"))
}

/// Box–Muller pair of independent standard normals.
fn gaussian_pair(rng: &mut ChaCha8Rng) -> (f64, f64) {
    let u1 = rng.gen::<f64>().max(1e-300);
    let u2 = rng.gen::<f64>();
    let r = (-2.0 * u1.ln()).sqrt();
    let (s, c) = (std::f64::consts::TAU * u2).sin_cos();
    (r * c, r * s)
}

fn fill_normal(rng: &mut ChaCha8Rng, z: &mut [f64]) {
    for pair in z.chunks_mut(2) {
        let (a, b) = gaussian_pair(rng);
        pair[0] = a;
        if let Some(second) = pair.get_mut(1) {
            *second = b;
        }
    }
}
