use crate::core::models::polymer::Polymer;
use nalgebra::Point3;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GmmError {
    #[error("Gaussian width must be positive, got {0}")]
    InvalidSigma(f64),
    #[error("Mixture arrays disagree: {mus} centers, {sigmas} widths, {amplitudes} amplitudes")]
    LengthMismatch {
        mus: usize,
        sigmas: usize,
        amplitudes: usize,
    },
}

/// Isotropic Gaussian mixture, one component per residue of the base structure.
///
/// Widths and amplitudes are fixed for the whole experiment; only the centers move when the
/// structure is deformed.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianMixture {
    pub mus: Vec<Point3<f64>>,
    pub sigmas: Vec<f64>,
    pub amplitudes: Vec<f64>,
}

impl GaussianMixture {
    pub fn new(mus: Vec<Point3<f64>>, sigmas: Vec<f64>, amplitudes: Vec<f64>) -> Result<Self, GmmError> {
        if mus.len() != sigmas.len() || mus.len() != amplitudes.len() {
            return Err(GmmError::LengthMismatch {
                mus: mus.len(),
                sigmas: sigmas.len(),
                amplitudes: amplitudes.len(),
            });
        }
        if let Some(&bad) = sigmas.iter().find(|&&s| !(s > 0.0)) {
            return Err(GmmError::InvalidSigma(bad));
        }
        Ok(Self {
            mus,
            sigmas,
            amplitudes,
        })
    }

    /// Mixture centered on the polymer beads with a common width; amplitudes are the residue
    /// electron counts.
    pub fn from_polymer(polymer: &Polymer, sigma: f64) -> Result<Self, GmmError> {
        Self::new(
            polymer.coords.clone(),
            vec![sigma; polymer.len()],
            polymer.num_electrons.clone(),
        )
    }

    pub fn len(&self) -> usize {
        self.mus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mus.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_polymer_uses_electron_counts_and_common_sigma() {
        let polymer = Polymer {
            chain_ids: vec!['A', 'A'],
            residue_numbers: vec![1, 2],
            residue_names: vec!["ALA".into(), "GLY".into()],
            atom_names: vec!["CA".into(), "CA".into()],
            coords: vec![Point3::new(0.0, 0.0, 0.0), Point3::new(3.8, 0.0, 0.0)],
            num_electrons: vec![38.0, 30.0],
        };
        let gmm = GaussianMixture::from_polymer(&polymer, 2.0).unwrap();
        assert_eq!(gmm.len(), 2);
        assert_eq!(gmm.sigmas, vec![2.0, 2.0]);
        assert_eq!(gmm.amplitudes, vec![38.0, 30.0]);
        assert_eq!(gmm.mus[1].x, 3.8);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let mus = vec![Point3::origin()];
        assert_eq!(
            GaussianMixture::new(mus.clone(), vec![0.0], vec![1.0]).unwrap_err(),
            GmmError::InvalidSigma(0.0)
        );
        assert!(matches!(
            GaussianMixture::new(mus, vec![1.0, 1.0], vec![1.0]),
            Err(GmmError::LengthMismatch { .. })
        ));
    }
}
