//! Particle ensemble in 6D phase space.

use crate::error::{BeamlineError, Result};
use crate::kinematics::Kinematics;
use crate::types::{is_finite, ParticleId, PhaseMatrix, PhaseVec};
use serde::{Deserialize, Serialize};

/// One live particle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub id: ParticleId,
    pub coords: PhaseVec,
}

/// A particle removed by an aperture (or by leaving the physical domain).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LostParticle {
    pub id: ParticleId,
    /// Index of the element where it was lost
    pub element_index: usize,
    pub turn: usize,
    /// Coordinates at the exit of that element
    pub coordinates: PhaseVec,
}

/// An ensemble of particles sharing one reference [`Kinematics`].
///
/// Lost particles move from `particles` to `lost`; the sum of the two is
/// always the initial count.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Beam {
    kinematics: Kinematics,
    pub particles: Vec<Particle>,
    pub lost: Vec<LostParticle>,
    initial_count: usize,
}

impl Beam {
    /// Beam from explicit coordinates; ids are assigned in order.
    pub fn from_coordinates(kinematics: Kinematics, coords: Vec<PhaseVec>) -> Result<Self> {
        if let Some(i) = coords.iter().position(|u| !is_finite(u)) {
            return Err(BeamlineError::InvalidBeam(format!(
                "particle {i} has non-finite coordinates"
            )));
        }
        let particles: Vec<Particle> = coords
            .into_iter()
            .enumerate()
            .map(|(i, coords)| Particle {
                id: ParticleId(i as u64),
                coords,
            })
            .collect();
        Ok(Self {
            kinematics,
            initial_count: particles.len(),
            particles,
            lost: Vec::new(),
        })
    }

    /// Beam from a row-major N×6 array.
    pub fn from_flat(kinematics: Kinematics, data: &[f64]) -> Result<Self> {
        if data.len() % 6 != 0 {
            return Err(BeamlineError::InvalidBeam(format!(
                "expected N×6 coordinates, got {} values",
                data.len()
            )));
        }
        let coords = data.chunks_exact(6).map(PhaseVec::from_column_slice).collect();
        Self::from_coordinates(kinematics, coords)
    }

    /// A one-particle beam.
    pub fn single(kinematics: Kinematics, coords: PhaseVec) -> Result<Self> {
        Self::from_coordinates(kinematics, vec![coords])
    }

    pub fn kinematics(&self) -> &Kinematics {
        &self.kinematics
    }

    /// Number of live particles.
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn initial_count(&self) -> usize {
        self.initial_count
    }

    /// Live fraction of the initial ensemble; 0 for a beam created empty.
    pub fn transmission(&self) -> f64 {
        if self.initial_count == 0 {
            0.0
        } else {
            self.particles.len() as f64 / self.initial_count as f64
        }
    }

    pub fn coordinates(&self) -> impl Iterator<Item = &PhaseVec> {
        self.particles.iter().map(|p| &p.coords)
    }

    /// Centroid; `None` for an empty beam.
    pub fn mean(&self) -> Option<PhaseVec> {
        if self.particles.is_empty() {
            return None;
        }
        let sum = self
            .coordinates()
            .fold(PhaseVec::zeros(), |acc, u| acc + u);
        Some(sum / self.particles.len() as f64)
    }

    /// Sample covariance (N − 1 normalisation); `None` below two particles.
    pub fn covariance(&self) -> Option<PhaseMatrix> {
        let n = self.particles.len();
        if n < 2 {
            return None;
        }
        let mean = self.mean()?;
        let sum = self.coordinates().fold(PhaseMatrix::zeros(), |acc, u| {
            let d = u - mean;
            acc + d * d.transpose()
        });
        Some(sum / (n - 1) as f64)
    }

    /// Standard deviation per coordinate; `None` below two particles.
    pub fn std_dev(&self) -> Option<PhaseVec> {
        self.covariance()
            .map(|c| c.diagonal().map(|v| v.max(0.0).sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::Species;
    use approx::assert_abs_diff_eq;

    fn kin() -> Kinematics {
        Kinematics::from_kinetic_energy(Species::Proton, 100.0).unwrap()
    }

    #[test]
    fn flat_input_must_be_six_dimensional() {
        let err = Beam::from_flat(kin(), &[0.0; 7]).unwrap_err();
        assert!(matches!(err, BeamlineError::InvalidBeam(_)));
        let beam = Beam::from_flat(kin(), &[0.0; 12]).unwrap();
        assert_eq!(beam.len(), 2);
        assert_eq!(beam.particles[1].id, ParticleId(1));
    }

    #[test]
    fn non_finite_particle_is_rejected() {
        let u = PhaseVec::new(f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert!(Beam::single(kin(), u).is_err());
    }

    #[test]
    fn statistics_of_two_particles() {
        let beam = Beam::from_coordinates(
            kin(),
            vec![
                PhaseVec::new(1e-3, 0.0, 0.0, 0.0, 0.0, 0.0),
                PhaseVec::new(-1e-3, 0.0, 2e-3, 0.0, 0.0, 0.0),
            ],
        )
        .unwrap();
        let mean = beam.mean().unwrap();
        assert_abs_diff_eq!(mean[2], 1e-3, epsilon = 1e-18);
        let cov = beam.covariance().unwrap();
        assert_abs_diff_eq!(cov[(0, 0)], 2e-6, epsilon = 1e-18);
        assert_abs_diff_eq!(cov[(0, 2)], -2e-6, epsilon = 1e-18);
        assert_abs_diff_eq!(beam.std_dev().unwrap()[0], 2e-6_f64.sqrt(), epsilon = 1e-15);
    }

    #[test]
    fn empty_beam_has_no_statistics() {
        let beam = Beam::from_coordinates(kin(), Vec::new()).unwrap();
        assert!(beam.mean().is_none());
        assert!(beam.covariance().is_none());
        assert_eq!(beam.transmission(), 0.0);
    }
}
