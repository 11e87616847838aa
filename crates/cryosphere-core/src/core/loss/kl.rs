use crate::core::deformation::segmentation::{GaussianParams, SegmentationParameters, SegmentationPrior};
use crate::core::network::vae::LatentDistribution;

/// KL divergence of the latent posteriors from `N(0, I)`, averaged over the batch.
///
/// Per image: `-½ Σ_d (1 + log σ² - μ² - σ²)`. Zero for an empty batch.
pub fn latent_kl(posteriors: &[LatentDistribution]) -> f64 {
    if posteriors.is_empty() {
        return 0.0;
    }
    let total: f64 = posteriors
        .iter()
        .map(|p| {
            -0.5 * p
                .mean
                .iter()
                .zip(p.log_var.iter())
                .map(|(mu, lv)| 1.0 + lv - mu * mu - lv.exp())
                .sum::<f64>()
        })
        .sum();
    total / posteriors.len() as f64
}

/// `Σ_s KL(N(m_q, s_q²) ‖ N(m_p, s_p²))` for one group of segmentation parameters.
pub fn gaussian_kl(posterior: &GaussianParams, prior: &GaussianParams) -> f64 {
    posterior
        .mean
        .iter()
        .zip(&posterior.std)
        .zip(prior.mean.iter().zip(&prior.std))
        .map(|((mq, sq), (mp, sp))| {
            (sp / sq).ln() + (sq * sq + (mq - mp).powi(2)) / (2.0 * sp * sp) - 0.5
        })
        .sum()
}

/// KL of each segmentation parameter group against the prior, as `(means, stds, proportions)`.
pub fn segmentation_kl(
    posterior: &SegmentationParameters,
    prior: &SegmentationPrior,
) -> (f64, f64, f64) {
    (
        gaussian_kl(&posterior.means, &prior.means),
        gaussian_kl(&posterior.stds, &prior.stds),
        gaussian_kl(&posterior.proportions, &prior.proportions),
    )
}
