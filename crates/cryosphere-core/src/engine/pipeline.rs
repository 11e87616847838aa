use super::context::ExperimentContext;
use super::dataset::ParticleSample;
use super::error::EngineError;
use super::state::ModelState;
use crate::core::deformation::deform::{SegmentTransforms, deform};
use crate::core::density::renderer::project;
use crate::core::loss::{LossInputs, LossTerms, compute_loss};
use crate::core::network::vae::LatentDistribution;
use nalgebra::{Matrix3, Point3};
use ndarray::{Array1, Array2};
use rand::Rng;
use rustfft::num_complex::Complex64;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Intermediate and final quantities of one forward pass, indexed like the input batch.
#[derive(Debug, Clone)]
pub struct ForwardPass {
    pub posteriors: Vec<LatentDistribution>,
    pub latents: Vec<Array1<f64>>,
    pub transforms: Vec<SegmentTransforms>,
    pub segmentations: Vec<Array2<f64>>,
    pub deformed: Vec<Vec<Point3<f64>>>,
    /// Translated real-space projections, before the CTF.
    pub images: Vec<Array2<f64>>,
    /// Predicted spectra including the CTF, on the dataset's normalized scale.
    pub predicted: Vec<Array2<Complex64>>,
}

/// Predicts the spectra of `batch` under `model`.
///
/// Latents and segmentations are drawn from `rng`, all other stages are deterministic.
pub fn forward(
    context: &ExperimentContext<'_>,
    model: &ModelState,
    batch: &[ParticleSample],
    rng: &mut impl Rng,
) -> Result<ForwardPass, EngineError> {
    let vae = &model.vae;

    #[cfg(not(feature = "parallel"))]
    let iterator = batch.iter();
    #[cfg(feature = "parallel")]
    let iterator = batch.par_iter();

    let posteriors = iterator
        .map(|sample| vae.encoder.posterior(sample.index, &sample.image))
        .collect::<Result<Vec<_>, _>>()?;
    let latents: Vec<Array1<f64>> = posteriors.iter().map(|p| p.sample(rng)).collect();
    let transforms = latents
        .iter()
        .map(|z| vae.decoder.decode(z.view()))
        .collect::<Result<Vec<_>, _>>()?;

    let segmentations = model
        .segmentation_model(context.polymer.len(), context.config.model.tau_segmentation)?
        .sample(batch.len(), rng);
    let deformed = deform(&context.mixture.mus, &transforms, &segmentations)?;

    let rotations: Vec<Matrix3<f64>> = batch.iter().map(|s| s.rotation).collect();
    let mut projections = project(&deformed, &rotations, &context.render_params(), context.grid.as_ref())?;
    if let Some(mask) = &context.loss_mask {
        projections = projections.iter().map(|p| mask.apply(p)).collect();
    }
    let translations: Vec<[f64; 2]> = batch.iter().map(|s| s.translation).collect();
    let images = context.translator.transform(&projections, &translations)?;

    let indices: Vec<usize> = batch.iter().map(|s| s.index).collect();
    let ctfs = context.ctf.compute_ctf(&indices)?;
    let f_std = context.dataset.fourier_std();
    let predicted = context
        .fourier
        .to_fourier_batch(&images)
        .into_iter()
        .zip(&ctfs)
        .map(|(spectrum, ctf)| spectrum * &ctf.mapv(|c| Complex64::new(c / f_std, 0.0)))
        .collect();

    Ok(ForwardPass {
        posteriors,
        latents,
        transforms,
        segmentations,
        deformed,
        images,
        predicted,
    })
}

/// Runs the forward pass on `batch` and scores it against the observed spectra.
pub fn evaluate_batch(
    context: &ExperimentContext<'_>,
    model: &ModelState,
    batch: &[ParticleSample],
    rng: &mut impl Rng,
) -> Result<(ForwardPass, LossTerms), EngineError> {
    let pass = forward(context, model, batch, rng)?;
    let target: Vec<Array2<Complex64>> = batch.iter().map(|s| s.fourier.clone()).collect();
    let inputs = LossInputs {
        predicted: &pass.predicted,
        target: &target,
        band: Some(&context.band),
        latent: &pass.posteriors,
        segmentation: &model.segmentation,
        prior: &context.prior,
        deformed: &pass.deformed,
        structural: &context.structural,
        l2_penalty: model.vae.l2_penalty(),
    };
    let terms = compute_loss(&inputs, &context.loss_settings(), &context.config.loss.betas)?;
    Ok((pass, terms))
}
