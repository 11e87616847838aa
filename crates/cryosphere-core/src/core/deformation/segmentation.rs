use ndarray::Array2;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SegmentationError {
    #[error("The number of segments must be positive")]
    NoSegments,
    #[error("The number of residues must be positive")]
    NoResidues,
    #[error("Parameter '{name}' has {found} entries, expected one per segment ({expected})")]
    ParameterLength {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Temperature must be positive, got {0}")]
    InvalidTemperature(f64),
    #[error("Standard deviation of '{name}' must be positive, got {value}")]
    InvalidStd { name: &'static str, value: f64 },
}

/// Independent Gaussians, one per segment: `N(mean[s], std[s]²)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianParams {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl GaussianParams {
    pub fn new(mean: Vec<f64>, std: Vec<f64>) -> Self {
        Self { mean, std }
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    fn validate(&self, name: &'static str, n_segments: usize) -> Result<(), SegmentationError> {
        for found in [self.mean.len(), self.std.len()] {
            if found != n_segments {
                return Err(SegmentationError::ParameterLength {
                    name,
                    expected: n_segments,
                    found,
                });
            }
        }
        if let Some(&value) = self.std.iter().find(|&&s| !(s > 0.0)) {
            return Err(SegmentationError::InvalidStd { name, value });
        }
        Ok(())
    }

    /// Draws one value per segment: `mean + std · ε`, `ε ~ N(0, 1)`.
    pub fn sample(&self, rng: &mut impl Rng) -> Vec<f64> {
        self.mean
            .iter()
            .zip(&self.std)
            .map(|(m, s)| {
                let eps: f64 = rng.sample(StandardNormal);
                m + s * eps
            })
            .collect()
    }
}

/// Variational parameters of the segmentation GMM over residue indices.
///
/// Each segment is a 1D Gaussian over the residue index with a mixing proportion; each of the
/// three quantities (means, stds, proportions) is itself Gaussian-distributed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationParameters {
    pub means: GaussianParams,
    pub stds: GaussianParams,
    pub proportions: GaussianParams,
}

impl SegmentationParameters {
    /// Blocks of equal size along the sequence: segment `i` is centered on residue
    /// `N/S/2 + i·N/S` with width `N/S`, and all proportions are equal.
    pub fn uniform(n_residues: usize, n_segments: usize) -> Result<Self, SegmentationError> {
        if n_segments == 0 {
            return Err(SegmentationError::NoSegments);
        }
        if n_residues == 0 {
            return Err(SegmentationError::NoResidues);
        }
        let bound = n_residues as f64 / n_segments as f64;
        Ok(Self {
            means: GaussianParams::new(
                (0..n_segments).map(|i| bound / 2.0 + i as f64 * bound).collect(),
                vec![10.0; n_segments],
            ),
            stds: GaussianParams::new(vec![bound; n_segments], vec![10.0; n_segments]),
            proportions: GaussianParams::new(vec![0.0; n_segments], vec![1.0; n_segments]),
        })
    }

    pub fn n_segments(&self) -> usize {
        self.means.len()
    }

    pub fn validate(&self, n_segments: usize) -> Result<(), SegmentationError> {
        if n_segments == 0 {
            return Err(SegmentationError::NoSegments);
        }
        self.means.validate("means", n_segments)?;
        self.stds.validate("stds", n_segments)?;
        self.proportions.validate("proportions", n_segments)
    }
}

/// The prior over the segmentation parameters. Only the uniform prior is supported.
pub type SegmentationPrior = SegmentationParameters;

/// Soft assignment of residues to segments from one draw of the GMM parameters.
///
/// `seg[r, s] = softmax_s((-½ (r - m_s)² / σ_s² + log softmax(p)_s) / τ)`, so every row sums
/// to one.
pub fn segmentation_weights(
    n_residues: usize,
    means: &[f64],
    stds: &[f64],
    proportions: &[f64],
    tau: f64,
) -> Array2<f64> {
    let n_segments = means.len();
    let max_p = proportions.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let log_norm = max_p
        + proportions
            .iter()
            .map(|p| (p - max_p).exp())
            .sum::<f64>()
            .ln();
    let log_props: Vec<f64> = proportions.iter().map(|p| p - log_norm).collect();

    let mut seg = Array2::zeros((n_residues, n_segments));
    let mut logits = vec![0.0; n_segments];
    for (r, mut row) in seg.rows_mut().into_iter().enumerate() {
        let residue = r as f64;
        for s in 0..n_segments {
            let d = residue - means[s];
            logits[s] = (-0.5 * d * d / (stds[s] * stds[s]) + log_props[s]) / tau;
        }
        let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut total = 0.0;
        for (dst, &l) in row.iter_mut().zip(&logits) {
            *dst = (l - max).exp();
            total += *dst;
        }
        row.mapv_inplace(|v| v / total);
    }
    seg
}

/// Produces per-image segmentations from the variational segmentation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationModel {
    pub parameters: SegmentationParameters,
    pub n_residues: usize,
    pub tau: f64,
}

impl SegmentationModel {
    pub fn new(
        parameters: SegmentationParameters,
        n_residues: usize,
        tau: f64,
    ) -> Result<Self, SegmentationError> {
        if n_residues == 0 {
            return Err(SegmentationError::NoResidues);
        }
        if !(tau > 0.0) {
            return Err(SegmentationError::InvalidTemperature(tau));
        }
        parameters.validate(parameters.n_segments())?;
        Ok(Self {
            parameters,
            n_residues,
            tau,
        })
    }

    pub fn n_segments(&self) -> usize {
        self.parameters.n_segments()
    }

    /// Samples one segmentation per batch element, each `(n_residues, n_segments)`.
    pub fn sample(&self, batch_size: usize, rng: &mut impl Rng) -> Vec<Array2<f64>> {
        let p = &self.parameters;
        (0..batch_size)
            .map(|_| {
                let proportions = p.proportions.sample(rng);
                let means = p.means.sample(rng);
                let stds = p.stds.sample(rng);
                segmentation_weights(self.n_residues, &means, &stds, &proportions, self.tau)
            })
            .collect()
    }

    /// Segmentation at the mean of every variational parameter.
    pub fn mean_segmentation(&self) -> Array2<f64> {
        let p = &self.parameters;
        segmentation_weights(
            self.n_residues,
            &p.means.mean,
            &p.stds.mean,
            &p.proportions.mean,
            self.tau,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn uniform_prior_places_equal_blocks() {
        let prior = SegmentationParameters::uniform(100, 4).unwrap();
        assert_eq!(prior.means.mean, vec![12.5, 37.5, 62.5, 87.5]);
        assert_eq!(prior.means.std, vec![10.0; 4]);
        assert_eq!(prior.stds.mean, vec![25.0; 4]);
        assert_eq!(prior.stds.std, vec![10.0; 4]);
        assert_eq!(prior.proportions.mean, vec![0.0; 4]);
        assert_eq!(prior.proportions.std, vec![1.0; 4]);
        assert_eq!(
            SegmentationParameters::uniform(100, 0).unwrap_err(),
            SegmentationError::NoSegments
        );
    }

    #[test]
    fn sampled_segmentation_rows_sum_to_one() {
        let params = SegmentationParameters::uniform(50, 3).unwrap();
        let model = SegmentationModel::new(params, 50, 0.05).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let batch = model.sample(4, &mut rng);
        assert_eq!(batch.len(), 4);
        for seg in &batch {
            assert_eq!(seg.dim(), (50, 3));
            for row in seg.rows() {
                assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-12);
                assert!(row.iter().all(|&v| (0.0..=1.0).contains(&v)));
            }
        }
    }

    #[test]
    fn mean_segmentation_assigns_blocks_in_order() {
        let params = SegmentationParameters::uniform(30, 3).unwrap();
        let model = SegmentationModel::new(params, 30, 0.01).unwrap();
        let seg = model.mean_segmentation();
        let hard: Vec<usize> = seg
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f64::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                    .0
            })
            .collect();
        assert_eq!(hard[2], 0);
        assert_eq!(hard[15], 1);
        assert_eq!(hard[28], 2);
    }

    #[test]
    fn single_segment_takes_every_residue() {
        let seg = segmentation_weights(5, &[2.0], &[1.0], &[0.3], 1.0);
        assert!(seg.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn sampling_is_reproducible_with_a_seed() {
        let params = SegmentationParameters::uniform(20, 2).unwrap();
        let model = SegmentationModel::new(params, 20, 0.1).unwrap();
        let a = model.sample(2, &mut StdRng::seed_from_u64(3));
        let b = model.sample(2, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_models_are_rejected() {
        let params = SegmentationParameters::uniform(20, 2).unwrap();
        assert_eq!(
            SegmentationModel::new(params.clone(), 20, 0.0).unwrap_err(),
            SegmentationError::InvalidTemperature(0.0)
        );
        let mut short = params;
        short.stds.mean.pop();
        assert!(matches!(
            SegmentationModel::new(short, 20, 1.0),
            Err(SegmentationError::ParameterLength { name: "stds", .. })
        ));
    }
}
