//! Reference-particle kinematics.
//!
//! A [`Kinematics`] value is the read-only context every integrator needs:
//! species, reference energy and the relativistic factors derived from it.
//! It is `Copy` and passed explicitly; there is no global particle database.
//!
//! ## Energy-like coordinate
//! The sixth phase-space coordinate is `pt = ΔE / (P0 c)`. The relative
//! momentum deviation follows as δ = sqrt(1 + 2 pt/β0 + pt²) − 1.

use crate::error::{BeamlineError, Result};
use serde::{Deserialize, Serialize};

/// Proton rest mass [MeV/c²] (CODATA 2018).
pub const PROTON_MASS_MEV: f64 = 938.272_088_16;
/// Electron rest mass [MeV/c²] (CODATA 2018).
pub const ELECTRON_MASS_MEV: f64 = 0.510_998_950_00;
/// Speed of light [m/s].
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Particle species of the reference particle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Species {
    Proton,
    Electron,
    Positron,
    /// Arbitrary species: rest mass [MeV/c²] and charge in units of e.
    Custom { mass_mev: f64, charge: f64 },
}

impl Species {
    pub fn mass_mev(&self) -> f64 {
        match self {
            Species::Proton => PROTON_MASS_MEV,
            Species::Electron | Species::Positron => ELECTRON_MASS_MEV,
            Species::Custom { mass_mev, .. } => *mass_mev,
        }
    }

    pub fn charge(&self) -> f64 {
        match self {
            Species::Proton | Species::Positron => 1.0,
            Species::Electron => -1.0,
            Species::Custom { charge, .. } => *charge,
        }
    }
}

/// Immutable reference kinematics.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Kinematics {
    species: Species,
    /// Total energy [MeV]
    total_energy_mev: f64,
}

impl Kinematics {
    /// Reference particle with the given kinetic energy [MeV].
    pub fn from_kinetic_energy(species: Species, kinetic_mev: f64) -> Result<Self> {
        Self::check_species(&species)?;
        if !kinetic_mev.is_finite() || kinetic_mev <= 0.0 {
            return Err(BeamlineError::InvalidKinematics(format!(
                "kinetic energy must be finite and > 0, got {kinetic_mev}"
            )));
        }
        Ok(Self {
            species,
            total_energy_mev: kinetic_mev + species.mass_mev(),
        })
    }

    /// Reference particle with the given momentum [MeV/c].
    pub fn from_momentum(species: Species, momentum_mev: f64) -> Result<Self> {
        Self::check_species(&species)?;
        if !momentum_mev.is_finite() || momentum_mev <= 0.0 {
            return Err(BeamlineError::InvalidKinematics(format!(
                "momentum must be finite and > 0, got {momentum_mev}"
            )));
        }
        let m = species.mass_mev();
        Ok(Self {
            species,
            total_energy_mev: momentum_mev.hypot(m),
        })
    }

    /// Reference particle with the given magnetic rigidity [T·m].
    pub fn from_rigidity(species: Species, brho: f64) -> Result<Self> {
        Self::check_species(&species)?;
        if !brho.is_finite() || brho <= 0.0 {
            return Err(BeamlineError::InvalidKinematics(format!(
                "rigidity must be finite and > 0, got {brho}"
            )));
        }
        let p = brho * SPEED_OF_LIGHT * 1e-6 * species.charge().abs();
        Self::from_momentum(species, p)
    }

    fn check_species(species: &Species) -> Result<()> {
        let m = species.mass_mev();
        if !m.is_finite() || m <= 0.0 {
            return Err(BeamlineError::InvalidKinematics(format!(
                "rest mass must be finite and > 0, got {m}"
            )));
        }
        let q = species.charge();
        if !q.is_finite() || q == 0.0 {
            return Err(BeamlineError::InvalidKinematics(format!(
                "charge must be finite and non-zero, got {q}"
            )));
        }
        Ok(())
    }

    pub fn species(&self) -> Species {
        self.species
    }

    pub fn mass_mev(&self) -> f64 {
        self.species.mass_mev()
    }

    pub fn total_energy_mev(&self) -> f64 {
        self.total_energy_mev
    }

    pub fn kinetic_energy_mev(&self) -> f64 {
        self.total_energy_mev - self.mass_mev()
    }

    /// Reference momentum [MeV/c].
    pub fn momentum_mev(&self) -> f64 {
        let m = self.mass_mev();
        ((self.total_energy_mev - m) * (self.total_energy_mev + m)).sqrt()
    }

    pub fn gamma(&self) -> f64 {
        self.total_energy_mev / self.mass_mev()
    }

    pub fn beta(&self) -> f64 {
        self.momentum_mev() / self.total_energy_mev
    }

    pub fn beta_gamma(&self) -> f64 {
        self.momentum_mev() / self.mass_mev()
    }

    /// Magnetic rigidity Bρ [T·m].
    pub fn rigidity(&self) -> f64 {
        self.momentum_mev() / (SPEED_OF_LIGHT * 1e-6 * self.species.charge().abs())
    }

    /// Relative momentum deviation δ for an energy coordinate `pt`.
    pub fn delta(&self, pt: f64) -> f64 {
        let beta = self.beta();
        (1.0 + 2.0 * pt / beta + pt * pt).sqrt() - 1.0
    }

    /// Energy coordinate `pt` for a relative momentum deviation δ.
    pub fn pt_from_delta(&self, delta: f64) -> f64 {
        let beta = self.beta();
        let p2 = (1.0 + delta) * (1.0 + delta);
        // pt = sqrt(p² + 1/(βγ)²) − 1/β, written to avoid cancellation
        let inv_bg = 1.0 / self.beta_gamma();
        let e = (p2 + inv_bg * inv_bg).sqrt();
        (p2 - 1.0) / (e + 1.0 / beta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn proton_230_mev() {
        let k = Kinematics::from_kinetic_energy(Species::Proton, 230.0).unwrap();
        assert_relative_eq!(k.gamma(), 1.245_131_452_7, epsilon = 1e-9);
        assert_relative_eq!(k.beta() * k.gamma(), k.beta_gamma(), epsilon = 1e-14);
        assert_relative_eq!(k.momentum_mev(), 696.0, max_relative = 1e-3);
    }

    #[test]
    fn rigidity_round_trip() {
        let k = Kinematics::from_kinetic_energy(Species::Proton, 70.0).unwrap();
        let k2 = Kinematics::from_rigidity(Species::Proton, k.rigidity()).unwrap();
        assert_relative_eq!(k.total_energy_mev(), k2.total_energy_mev(), epsilon = 1e-9);
    }

    #[test]
    fn delta_and_pt_are_inverse() {
        let k = Kinematics::from_kinetic_energy(Species::Electron, 5.0).unwrap();
        for d in [-0.02, -1e-4, 0.0, 3e-3, 0.05] {
            assert_abs_diff_eq!(k.delta(k.pt_from_delta(d)), d, epsilon = 1e-14);
        }
    }

    #[test]
    fn rejects_non_physical_energy() {
        assert!(Kinematics::from_kinetic_energy(Species::Proton, 0.0).is_err());
        assert!(Kinematics::from_momentum(Species::Proton, f64::NAN).is_err());
        let bad = Species::Custom {
            mass_mev: 100.0,
            charge: 0.0,
        };
        assert!(Kinematics::from_kinetic_energy(bad, 10.0).is_err());
    }
}
