//! Training objective: a Fourier-space data term plus prior and structural regularizers.
//!
//! Every term is computed as a plain value, weighted by its beta and summed. A non-finite term
//! aborts the computation with [`LossError::NumericInstability`].

pub mod kl;
pub mod reconstruction;
pub mod structural;

use crate::core::deformation::segmentation::{SegmentationParameters, SegmentationPrior};
use crate::core::network::vae::LatentDistribution;
use nalgebra::Point3;
use ndarray::Array2;
use reconstruction::ReconstructionLoss;
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use structural::StructuralLossParameters;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LossError {
    #[error("Loss term '{term}' is not finite ({value})")]
    NumericInstability { term: &'static str, value: f64 },
    #[error("Got {predicted} predicted spectra for {target} observed spectra")]
    BatchMismatch { predicted: usize, target: usize },
    #[error("Spectrum {index} has shape {found:?}, expected {expected:?}")]
    SpectrumShape {
        index: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },
}

/// One value per loss term. Used both for the terms themselves and for their weights.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LossComponents {
    pub reconstruction: f64,
    pub kl_latent: f64,
    pub kl_segmentation_means: f64,
    pub kl_segmentation_stds: f64,
    pub kl_segmentation_proportions: f64,
    pub l2_penalty: f64,
    pub continuity: f64,
    pub clashing: f64,
}

/// Weight of every loss term in the total.
pub type Betas = LossComponents;

impl LossComponents {
    pub const NAMES: [&'static str; 8] = [
        "reconstruction",
        "kl_latent",
        "kl_segmentation_means",
        "kl_segmentation_stds",
        "kl_segmentation_proportions",
        "l2_penalty",
        "continuity",
        "clashing",
    ];

    /// Betas that keep only the data term.
    pub fn reconstruction_only() -> Self {
        Self {
            reconstruction: 1.0,
            ..Self::default()
        }
    }

    pub fn values(&self) -> [f64; 8] {
        [
            self.reconstruction,
            self.kl_latent,
            self.kl_segmentation_means,
            self.kl_segmentation_stds,
            self.kl_segmentation_proportions,
            self.l2_penalty,
            self.continuity,
            self.clashing,
        ]
    }

    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> {
        Self::NAMES.into_iter().zip(self.values())
    }

    pub fn weighted_sum(&self, betas: &Betas) -> f64 {
        self.values()
            .iter()
            .zip(betas.values())
            .map(|(v, b)| v * b)
            .sum()
    }
}

/// Loss values of one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossTerms {
    pub terms: LossComponents,
    pub betas: Betas,
    pub total: f64,
}

/// Settings that do not change during a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossSettings {
    pub reconstruction: ReconstructionLoss,
    pub clash_cutoff: f64,
}

/// Everything a loss evaluation needs from one forward pass.
#[derive(Debug, Clone, Copy)]
pub struct LossInputs<'a> {
    pub predicted: &'a [Array2<Complex64>],
    pub target: &'a [Array2<Complex64>],
    pub band: Option<&'a Array2<f64>>,
    pub latent: &'a [LatentDistribution],
    pub segmentation: &'a SegmentationParameters,
    pub prior: &'a SegmentationPrior,
    pub deformed: &'a [Vec<Point3<f64>>],
    pub structural: &'a StructuralLossParameters,
    pub l2_penalty: f64,
}

fn check_spectra(inputs: &LossInputs<'_>) -> Result<(), LossError> {
    if inputs.predicted.len() != inputs.target.len() {
        return Err(LossError::BatchMismatch {
            predicted: inputs.predicted.len(),
            target: inputs.target.len(),
        });
    }
    for (index, (p, t)) in inputs.predicted.iter().zip(inputs.target).enumerate() {
        let band_dim = inputs.band.map_or(t.dim(), |b| b.dim());
        if p.dim() != t.dim() || band_dim != t.dim() {
            return Err(LossError::SpectrumShape {
                index,
                expected: t.dim(),
                found: p.dim(),
            });
        }
    }
    Ok(())
}

pub fn compute_loss(
    inputs: &LossInputs<'_>,
    settings: &LossSettings,
    betas: &Betas,
) -> Result<LossTerms, LossError> {
    check_spectra(inputs)?;

    let (kl_means, kl_stds, kl_proportions) = kl::segmentation_kl(inputs.segmentation, inputs.prior);
    let terms = LossComponents {
        reconstruction: reconstruction::reconstruction_loss(
            settings.reconstruction,
            inputs.predicted,
            inputs.target,
            inputs.band,
        ),
        kl_latent: kl::latent_kl(inputs.latent),
        kl_segmentation_means: kl_means,
        kl_segmentation_stds: kl_stds,
        kl_segmentation_proportions: kl_proportions,
        l2_penalty: inputs.l2_penalty,
        continuity: structural::continuity_loss(inputs.deformed, inputs.structural),
        clashing: structural::clash_loss(inputs.deformed, inputs.structural, settings.clash_cutoff),
    };

    if let Some((term, value)) = terms.named().find(|(_, v)| !v.is_finite()) {
        return Err(LossError::NumericInstability { term, value });
    }
    let total = terms.weighted_sum(betas);
    if !total.is_finite() {
        return Err(LossError::NumericInstability {
            term: "total",
            value: total,
        });
    }
    Ok(LossTerms {
        terms,
        betas: *betas,
        total,
    })
}
