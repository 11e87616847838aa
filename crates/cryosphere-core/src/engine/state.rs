use super::config::{ExperimentConfig, SegmentationStart};
use super::error::EngineError;
use crate::core::deformation::segmentation::{SegmentationModel, SegmentationParameters};
use crate::core::network::vae::{Decoder, Encoder, LatentEncoder, LatentTable, Vae};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Trainable parameters of an experiment at the end of an epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub epoch: usize,
    pub vae: Vae,
    pub segmentation: SegmentationParameters,
}

impl ModelState {
    /// Fresh parameters sized for `n_images` particles and `n_residues` residues.
    pub fn initialize(
        config: &ExperimentConfig,
        n_images: usize,
        n_residues: usize,
        rng: &mut impl Rng,
    ) -> Result<Self, EngineError> {
        let model = &config.model;
        let encoder = if model.amortized {
            LatentEncoder::Amortized(Encoder::new(
                config.image.npix_downsize,
                &model.encoder_hidden,
                model.latent_dimension,
                rng,
            ))
        } else {
            LatentEncoder::NonAmortized(LatentTable::new(n_images, model.latent_dimension, rng))
        };
        let decoder = Decoder::new(
            model.latent_dimension,
            &model.decoder_hidden,
            model.n_segments,
            rng,
        );
        let segmentation = match &model.segmentation_start {
            SegmentationStart::Uniform => SegmentationParameters::uniform(n_residues, model.n_segments)?,
            SegmentationStart::Explicit(params) => params.clone(),
        };
        Ok(Self {
            epoch: 0,
            vae: Vae {
                encoder,
                decoder,
                latent_dim: model.latent_dimension,
            },
            segmentation,
        })
    }

    pub fn segmentation_model(&self, n_residues: usize, tau: f64) -> Result<SegmentationModel, EngineError> {
        Ok(SegmentationModel::new(self.segmentation.clone(), n_residues, tau)?)
    }

    /// Rejects a state whose shapes cannot serve this experiment, typically a checkpoint from
    /// another run.
    pub fn check_compatible(&self, config: &ExperimentConfig, n_images: usize) -> Result<(), EngineError> {
        let model = &config.model;
        let mismatch = |what: String| Err(EngineError::ShapeMismatch(what));
        if self.vae.latent_dim != model.latent_dimension {
            return mismatch(format!(
                "checkpoint latent dimension {} differs from the configured {}",
                self.vae.latent_dim, model.latent_dimension
            ));
        }
        if self.vae.decoder.n_segments() != model.n_segments {
            return mismatch(format!(
                "checkpoint decoder drives {} segments, configured {}",
                self.vae.decoder.n_segments(),
                model.n_segments
            ));
        }
        self.segmentation.validate(model.n_segments)?;
        match &self.vae.encoder {
            LatentEncoder::Amortized(encoder) => {
                let side = config.image.npix_downsize;
                if encoder.mlp().in_dim() != side * side {
                    return mismatch(format!(
                        "checkpoint encoder reads {} pixels, images have {}",
                        encoder.mlp().in_dim(),
                        side * side
                    ));
                }
            }
            LatentEncoder::NonAmortized(table) => {
                if table.len() != n_images {
                    return mismatch(format!(
                        "checkpoint holds {} latent rows for {n_images} particles",
                        table.len()
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn checkpoint_path(directory: impl AsRef<Path>, epoch: usize) -> PathBuf {
        directory.as_ref().join(format!("ckpt{epoch}.json"))
    }

    /// Writes `ckpt{epoch}.json` into `directory` and returns its path.
    pub fn save(&self, directory: impl AsRef<Path>) -> Result<PathBuf, EngineError> {
        let path = Self::checkpoint_path(&directory, self.epoch);
        let json = serde_json::to_string(self)
            .map_err(|e| EngineError::Internal(format!("failed to serialize model state: {e}")))?;
        std::fs::write(&path, json).map_err(|e| EngineError::io(&path, e))?;
        info!(epoch = self.epoch, path = %path.display(), "Saved checkpoint.");
        Ok(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let state: Self = serde_json::from_str(&content)
            .map_err(|e| EngineError::Format(format!("{}: {e}", path.display())))?;
        info!(epoch = state.epoch, path = %path.display(), "Loaded checkpoint.");
        Ok(state)
    }
}
