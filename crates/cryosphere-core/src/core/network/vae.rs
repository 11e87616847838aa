use super::mlp::{Mlp, NetworkError};
use crate::core::deformation::deform::SegmentTransforms;
use nalgebra::Vector3;
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Diagonal Gaussian posterior over the latent variable of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct LatentDistribution {
    pub mean: Array1<f64>,
    pub log_var: Array1<f64>,
}

impl LatentDistribution {
    /// Reparameterized draw `μ + exp(½ log σ²) · ε`.
    pub fn sample(&self, rng: &mut impl Rng) -> Array1<f64> {
        let mut z = self.mean.clone();
        for (zi, lv) in z.iter_mut().zip(self.log_var.iter()) {
            let eps: f64 = rng.sample(StandardNormal);
            *zi += (0.5 * lv).exp() * eps;
        }
        z
    }
}

/// Amortized encoder: flattened image to `(mean, log-variance)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoder {
    mlp: Mlp,
    latent_dim: usize,
}

impl Encoder {
    pub fn new(side: usize, hidden: &[usize], latent_dim: usize, rng: &mut impl Rng) -> Self {
        Self {
            mlp: Mlp::new(side * side, hidden, 2 * latent_dim, rng),
            latent_dim,
        }
    }

    pub fn mlp(&self) -> &Mlp {
        &self.mlp
    }

    pub fn encode(&self, image: &Array2<f64>) -> Result<LatentDistribution, NetworkError> {
        let flat: Vec<f64> = image.iter().copied().collect();
        let out = self.mlp.forward(ArrayView1::from(&flat))?;
        let d = self.latent_dim;
        Ok(LatentDistribution {
            mean: out.slice(ndarray::s![..d]).to_owned(),
            log_var: out.slice(ndarray::s![d..]).to_owned(),
        })
    }
}

/// Non-amortized latent variables: one free `(mean, log-variance)` row per dataset image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatentTable {
    pub mean: Array2<f64>,
    pub log_var: Array2<f64>,
}

impl LatentTable {
    /// Means start at `0.01 · N(0, 1)`, log-variances at zero.
    pub fn new(n_images: usize, latent_dim: usize, rng: &mut impl Rng) -> Self {
        Self {
            mean: Array2::from_shape_simple_fn((n_images, latent_dim), || {
                0.01 * rng.sample::<f64, _>(StandardNormal)
            }),
            log_var: Array2::zeros((n_images, latent_dim)),
        }
    }

    pub fn len(&self) -> usize {
        self.mean.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.nrows() == 0
    }

    pub fn lookup(&self, index: usize) -> Result<LatentDistribution, NetworkError> {
        if index >= self.len() {
            return Err(NetworkError::UnknownImage {
                index,
                count: self.len(),
            });
        }
        Ok(LatentDistribution {
            mean: self.mean.row(index).to_owned(),
            log_var: self.log_var.row(index).to_owned(),
        })
    }
}

/// How each image obtains its latent posterior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum LatentEncoder {
    Amortized(Encoder),
    NonAmortized(LatentTable),
}

impl LatentEncoder {
    /// Posterior for dataset image `index`, whose (masked, real-space) pixels are `image`.
    pub fn posterior(
        &self,
        index: usize,
        image: &Array2<f64>,
    ) -> Result<LatentDistribution, NetworkError> {
        match self {
            Self::Amortized(encoder) => encoder.encode(image),
            Self::NonAmortized(table) => table.lookup(index),
        }
    }

    pub fn l2_penalty(&self) -> f64 {
        match self {
            Self::Amortized(encoder) => encoder.mlp.l2_penalty(),
            Self::NonAmortized(_) => 0.0,
        }
    }
}

/// Maps a latent vector to one rigid transform per segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decoder {
    mlp: Mlp,
    n_segments: usize,
}

impl Decoder {
    pub fn new(latent_dim: usize, hidden: &[usize], n_segments: usize, rng: &mut impl Rng) -> Self {
        Self {
            mlp: Mlp::new(latent_dim, hidden, 6 * n_segments, rng),
            n_segments,
        }
    }

    pub fn from_mlp(mlp: Mlp, n_segments: usize) -> Result<Self, NetworkError> {
        if mlp.out_dim() != 6 * n_segments {
            return Err(NetworkError::DecoderOutput {
                expected: 6 * n_segments,
                found: mlp.out_dim(),
            });
        }
        Ok(Self { mlp, n_segments })
    }

    pub fn mlp(&self) -> &Mlp {
        &self.mlp
    }

    pub fn n_segments(&self) -> usize {
        self.n_segments
    }

    /// Output row `s` holds `[tx, ty, tz, qx, qy, qz]`; the quaternion's real part is fixed to 1.
    pub fn decode(&self, latent: ArrayView1<'_, f64>) -> Result<SegmentTransforms, NetworkError> {
        let out = self.mlp.forward(latent)?.to_vec();
        let (quaternions, translations) = out
            .chunks_exact(6)
            .map(|c| ([1.0, c[3], c[4], c[5]], Vector3::new(c[0], c[1], c[2])))
            .unzip();
        Ok(SegmentTransforms {
            quaternions,
            translations,
        })
    }
}

/// Encoder/decoder pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vae {
    pub encoder: LatentEncoder,
    pub decoder: Decoder,
    pub latent_dim: usize,
}

impl Vae {
    /// Sum of squared encoder and decoder weights.
    pub fn l2_penalty(&self) -> f64 {
        self.encoder.l2_penalty() + self.decoder.mlp.l2_penalty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::network::mlp::Linear;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn decoder_splits_output_into_translation_and_quaternion() {
        let weight = Array2::zeros((12, 1));
        let bias = array![1.0, 2.0, 3.0, 0.1, 0.2, 0.3, -1.0, -2.0, -3.0, 0.4, 0.5, 0.6];
        let mlp = Mlp::from_layers(vec![Linear { weight, bias }]).unwrap();
        let decoder = Decoder::from_mlp(mlp, 2).unwrap();
        let t = decoder.decode(array![0.0].view()).unwrap();
        assert_eq!(t.quaternions, vec![[1.0, 0.1, 0.2, 0.3], [1.0, 0.4, 0.5, 0.6]]);
        assert_eq!(t.translations[1], Vector3::new(-1.0, -2.0, -3.0));
    }

    #[test]
    fn decoder_output_must_match_segment_count() {
        let mut rng = StdRng::seed_from_u64(0);
        let mlp = Mlp::new(2, &[], 7, &mut rng);
        assert_eq!(
            Decoder::from_mlp(mlp, 1).unwrap_err(),
            NetworkError::DecoderOutput { expected: 6, found: 7 }
        );
    }

    #[test]
    fn encoder_produces_latent_moments() {
        let mut rng = StdRng::seed_from_u64(5);
        let encoder = Encoder::new(4, &[8], 3, &mut rng);
        let dist = encoder.encode(&Array2::ones((4, 4))).unwrap();
        assert_eq!(dist.mean.len(), 3);
        assert_eq!(dist.log_var.len(), 3);
        assert!(encoder.encode(&Array2::ones((3, 3))).is_err());
    }

    #[test]
    fn zero_variance_sample_is_the_mean() {
        let dist = LatentDistribution {
            mean: array![1.0, -2.0],
            log_var: array![-200.0, -200.0],
        };
        let z = dist.sample(&mut StdRng::seed_from_u64(1));
        assert!((z[0] - 1.0).abs() < 1e-12 && (z[1] + 2.0).abs() < 1e-12);
    }

    #[test]
    fn latent_table_rejects_unknown_images() {
        let table = LatentTable::new(3, 2, &mut StdRng::seed_from_u64(2));
        assert_eq!(table.lookup(1).unwrap().mean.len(), 2);
        assert_eq!(
            table.lookup(3).unwrap_err(),
            NetworkError::UnknownImage { index: 3, count: 3 }
        );
    }

    #[test]
    fn non_amortized_encoders_carry_no_weight_penalty() {
        let mut rng = StdRng::seed_from_u64(9);
        let decoder = Decoder::new(2, &[4], 1, &mut rng);
        let vae = Vae {
            encoder: LatentEncoder::NonAmortized(LatentTable::new(2, 2, &mut rng)),
            decoder: decoder.clone(),
            latent_dim: 2,
        };
        assert_eq!(vae.l2_penalty(), decoder.mlp().l2_penalty());
    }
}
