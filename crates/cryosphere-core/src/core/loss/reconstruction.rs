use ndarray::{Array2, Zip};
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Data term comparing predicted and observed spectra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconstructionLoss {
    /// Mean `|P - T|²` over the band.
    FourierMse,
    /// `-Re⟨P, T⟩ / (‖P‖ ‖T‖)` over the band.
    #[default]
    Correlation,
}

impl ReconstructionLoss {
    /// Value reached when the prediction equals the observation.
    pub fn identity_value(self) -> f64 {
        match self {
            Self::FourierMse => 0.0,
            Self::Correlation => -1.0,
        }
    }
}

impl fmt::Display for ReconstructionLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FourierMse => "fourier-mse",
            Self::Correlation => "correlation",
        })
    }
}

impl FromStr for ReconstructionLoss {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fourier-mse" | "fourier_mse" | "mse" => Ok(Self::FourierMse),
            "correlation" => Ok(Self::Correlation),
            other => Err(format!(
                "unknown reconstruction loss '{other}' (expected 'fourier-mse' or 'correlation')"
            )),
        }
    }
}

fn in_band(band: Option<&Array2<f64>>, row: usize, col: usize) -> bool {
    band.is_none_or(|b| b[[row, col]] > 0.0)
}

fn image_mse(predicted: &Array2<Complex64>, target: &Array2<Complex64>, band: Option<&Array2<f64>>) -> f64 {
    let (mut sum, mut count) = (0.0, 0usize);
    for ((idx, p), t) in predicted.indexed_iter().zip(target.iter()) {
        if in_band(band, idx.0, idx.1) {
            sum += (p - t).norm_sqr();
            count += 1;
        }
    }
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Negative normalized correlation of one pair of spectra.
///
/// A pair where either spectrum is zero over the band has no defined correlation; it scores 0,
/// the value of an uncorrelated pair, and a warning is emitted.
fn image_correlation(
    predicted: &Array2<Complex64>,
    target: &Array2<Complex64>,
    band: Option<&Array2<f64>>,
) -> f64 {
    let (mut dot, mut pp, mut tt) = (0.0, 0.0, 0.0);
    for ((idx, p), t) in predicted.indexed_iter().zip(target.iter()) {
        if in_band(band, idx.0, idx.1) {
            dot += (p * t.conj()).re;
            pp += p.norm_sqr();
            tt += t.norm_sqr();
        }
    }
    let norm = (pp * tt).sqrt();
    if norm == 0.0 {
        warn!(
            predicted_norm = pp.sqrt(),
            target_norm = tt.sqrt(),
            "Zero spectrum in the correlation loss; scoring the pair as uncorrelated."
        );
        return 0.0;
    }
    -dot / norm
}

/// Reconstruction loss averaged over the batch.
///
/// `band`, when given, is a frequency mask on the centered spectrum; only entries where it is
/// positive contribute. Batches are compared pairwise and must have equal lengths.
pub fn reconstruction_loss(
    kind: ReconstructionLoss,
    predicted: &[Array2<Complex64>],
    target: &[Array2<Complex64>],
    band: Option<&Array2<f64>>,
) -> f64 {
    if predicted.is_empty() {
        return 0.0;
    }
    let per_image = |(p, t): (&Array2<Complex64>, &Array2<Complex64>)| match kind {
        ReconstructionLoss::FourierMse => image_mse(p, t, band),
        ReconstructionLoss::Correlation => image_correlation(p, t, band),
    };
    let total: f64 = predicted.iter().zip(target).map(per_image).sum();
    total / predicted.len() as f64
}

/// Multiplies every spectrum by a real frequency filter.
pub fn apply_band(spectra: &[Array2<Complex64>], band: &Array2<f64>) -> Vec<Array2<Complex64>> {
    spectra
        .iter()
        .map(|s| {
            let mut out = s.clone();
            Zip::from(&mut out).and(band).for_each(|v, &w| *v *= w);
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spectrum(values: &[f64]) -> Array2<Complex64> {
        Array2::from_shape_vec(
            (2, 2),
            values.iter().map(|&v| Complex64::new(v, -0.5 * v)).collect(),
        )
        .unwrap()
    }

    #[test]
    fn identical_spectra_reach_the_identity_value() {
        let s = vec![spectrum(&[1.0, 2.0, -3.0, 0.5]), spectrum(&[0.2, 0.0, 1.0, 4.0])];
        for kind in [ReconstructionLoss::FourierMse, ReconstructionLoss::Correlation] {
            assert_relative_eq!(
                reconstruction_loss(kind, &s, &s, None),
                kind.identity_value(),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn correlation_is_scale_invariant_and_sign_sensitive() {
        let p = vec![spectrum(&[1.0, 2.0, -3.0, 0.5])];
        let scaled = vec![spectrum(&[3.0, 6.0, -9.0, 1.5])];
        let negated = vec![spectrum(&[-1.0, -2.0, 3.0, -0.5])];
        let kind = ReconstructionLoss::Correlation;
        assert_relative_eq!(reconstruction_loss(kind, &p, &scaled, None), -1.0, epsilon = 1e-12);
        assert_relative_eq!(reconstruction_loss(kind, &p, &negated, None), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn band_restricts_the_compared_frequencies() {
        let p = vec![spectrum(&[1.0, 0.0, 0.0, 0.0])];
        let t = vec![spectrum(&[1.0, 0.0, 0.0, 8.0])];
        let band = Array2::from_shape_vec((2, 2), vec![1.0, 1.0, 1.0, 0.0]).unwrap();
        let kind = ReconstructionLoss::FourierMse;
        assert_eq!(reconstruction_loss(kind, &p, &t, Some(&band)), 0.0);
        assert!(reconstruction_loss(kind, &p, &t, None) > 0.0);
    }

    #[test]
    fn zero_prediction_scores_as_uncorrelated() {
        let zero = vec![Array2::zeros((2, 2))];
        let t = vec![spectrum(&[1.0, 2.0, -3.0, 0.5])];
        let kind = ReconstructionLoss::Correlation;
        assert_eq!(reconstruction_loss(kind, &zero, &t, None), 0.0);
        assert_eq!(reconstruction_loss(kind, &t, &zero, None), 0.0);
    }

    #[test]
    fn loss_kinds_parse_from_configuration_names() {
        assert_eq!("fourier-mse".parse(), Ok(ReconstructionLoss::FourierMse));
        assert_eq!("Correlation".parse(), Ok(ReconstructionLoss::Correlation));
        assert!("l1".parse::<ReconstructionLoss>().is_err());
        assert_eq!(ReconstructionLoss::FourierMse.to_string(), "fourier-mse");
    }
}
