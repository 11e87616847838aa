use crate::error::{CliError, Result};
use cryosphere::core::deformation::segmentation::SegmentationParameters;
use cryosphere::core::loss::Betas;
use cryosphere::core::loss::reconstruction::ReconstructionLoss;
use cryosphere::core::loss::structural::ClashMode;
use cryosphere::engine::config::{ImageConfig, SchedulerConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The experiment file as written by the user. Every field is optional so that
/// command-line overrides and defaults can fill the gaps.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub image: Option<ImageConfig>,
    pub model: Option<FileModelConfig>,
    pub optimizer: Option<FileOptimizerConfig>,
    pub scheduler: Option<SchedulerConfig>,
    pub loss: Option<FileLossConfig>,
    pub data: Option<FileDataConfig>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileModelConfig {
    pub latent_dimension: Option<usize>,
    pub n_segments: Option<usize>,
    pub tau_segmentation: Option<f64>,
    pub amortized: Option<bool>,
    pub encoder_hidden: Option<Vec<usize>>,
    pub decoder_hidden: Option<Vec<usize>>,
    pub segmentation_prior: Option<String>,
    pub segmentation_start: Option<SegmentationParameters>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileOptimizerConfig {
    pub name: Option<String>,
    pub learning_rate: Option<f64>,
    pub learning_rate_segmentation: Option<f64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileLossConfig {
    pub reconstruction: Option<ReconstructionLoss>,
    pub clashing: Option<ClashMode>,
    pub clash_cutoff: Option<f64>,
    pub lp_bandwidth: Option<f64>,
    pub loss_mask_radius: Option<f64>,
    pub betas: Option<FileBetas>,
}

#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileBetas {
    pub reconstruction: Option<f64>,
    pub kl_latent: Option<f64>,
    pub kl_segmentation_means: Option<f64>,
    pub kl_segmentation_stds: Option<f64>,
    pub kl_segmentation_proportions: Option<f64>,
    pub l2_penalty: Option<f64>,
    pub continuity: Option<f64>,
    pub clashing: Option<f64>,
}

impl FileBetas {
    /// Fills unset weights from `fallback`.
    pub fn resolve(&self, fallback: &Betas) -> Betas {
        Betas {
            reconstruction: self.reconstruction.unwrap_or(fallback.reconstruction),
            kl_latent: self.kl_latent.unwrap_or(fallback.kl_latent),
            kl_segmentation_means: self.kl_segmentation_means.unwrap_or(fallback.kl_segmentation_means),
            kl_segmentation_stds: self.kl_segmentation_stds.unwrap_or(fallback.kl_segmentation_stds),
            kl_segmentation_proportions: self
                .kl_segmentation_proportions
                .unwrap_or(fallback.kl_segmentation_proportions),
            l2_penalty: self.l2_penalty.unwrap_or(fallback.l2_penalty),
            continuity: self.continuity.unwrap_or(fallback.continuity),
            clashing: self.clashing.unwrap_or(fallback.clashing),
        }
    }

    pub fn slot(&mut self, name: &str) -> Option<&mut Option<f64>> {
        match name {
            "reconstruction" => Some(&mut self.reconstruction),
            "kl-latent" => Some(&mut self.kl_latent),
            "kl-segmentation-means" => Some(&mut self.kl_segmentation_means),
            "kl-segmentation-stds" => Some(&mut self.kl_segmentation_stds),
            "kl-segmentation-proportions" => Some(&mut self.kl_segmentation_proportions),
            "l2-penalty" => Some(&mut self.l2_penalty),
            "continuity" => Some(&mut self.continuity),
            "clashing" => Some(&mut self.clashing),
            _ => None,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileDataConfig {
    pub base_structure: Option<PathBuf>,
    pub particles: Option<PathBuf>,
    pub metadata: Option<PathBuf>,
    pub results: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub n_epochs: Option<usize>,
    pub input_mask_radius: Option<f64>,
    pub filter_amino_acids: Option<bool>,
    pub shuffle: Option<bool>,
    pub drop_last: Option<bool>,
    pub seed: Option<u64>,
    pub resume: Option<PathBuf>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading experiment configuration from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn full_file_parses() {
        let toml = r#"
            [image]
            apix = 1.0
            npix = 32
            npix-downsize = 16
            sigma-gmm = 2.0
            grid = "base"

            [model]
            latent-dimension = 4
            n-segments = 2
            tau-segmentation = 0.05
            amortized = false
            segmentation-prior = "uniform"

            [optimizer]
            name = "adam"
            learning-rate = 3e-4

            [scheduler]
            milestones = [2, 4]
            decay = 0.5

            [loss]
            reconstruction = "fourier-mse"
            clashing = { mode = "cutoff", min = 4.0, max = 10.0 }

            [loss.betas]
            kl-latent = 0.1
            continuity = 2.0

            [data]
            base-structure = "base.pdb"
            particles = "particles"
            metadata = "particles.star"
            results = "out"
            batch-size = 8
        "#;
        let config: FileConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.image.unwrap().npix_downsize, 16);
        let model = config.model.unwrap();
        assert_eq!(model.amortized, Some(false));
        assert_eq!(config.scheduler.unwrap().milestones, vec![2, 4]);
        let loss = config.loss.unwrap();
        assert_eq!(loss.reconstruction, Some(ReconstructionLoss::FourierMse));
        assert_eq!(loss.clashing, Some(ClashMode::Cutoff { min: 4.0, max: 10.0 }));
        let betas = loss.betas.unwrap().resolve(&Betas::default());
        assert_eq!(betas.kl_latent, 0.1);
        assert_eq!(betas.continuity, 2.0);
        assert_eq!(betas.clashing, 0.0);
        assert_eq!(config.data.unwrap().batch_size, Some(8));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[data]\nbatch-szie = 4").unwrap();
        assert!(matches!(
            FileConfig::from_file(file.path()),
            Err(CliError::FileParsing { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            FileConfig::from_file(Path::new("/nonexistent/experiment.toml")),
            Err(CliError::Io(_))
        ));
    }
}
