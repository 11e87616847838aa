use crate::core::deformation::segmentation::SegmentationParameters;
use crate::core::geometry::grid::GridKind;
use crate::core::loss::Betas;
use crate::core::loss::reconstruction::ReconstructionLoss;
use crate::core::loss::structural::ClashMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{parameter}': {reason}")]
    InvalidValue {
        parameter: &'static str,
        reason: String,
    },
    #[error("Unsupported optimizer '{0}': only 'adam' is available")]
    UnsupportedOptimizer(String),
    #[error("Unsupported segmentation prior '{0}': only 'uniform' is available")]
    UnsupportedPrior(String),
    #[error("Failed to read image settings from '{path}': {message}", path = path.display())]
    ImageSettings { path: PathBuf, message: String },
}

/// Acquisition and rendering settings of the particle images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ImageConfig {
    /// Pixel size of the raw images, in Å.
    pub apix: f64,
    /// Side of the raw images, in pixels.
    pub npix: usize,
    /// Side of the images the model works on.
    pub npix_downsize: usize,
    /// Width of every Gaussian of the mixture, in Å.
    pub sigma_gmm: f64,
    #[serde(default)]
    pub grid: GridKind,
    /// Optional truncation of each Gaussian, in units of its width.
    #[serde(default)]
    pub render_cutoff: Option<f64>,
}

impl ImageConfig {
    /// Pixel size of the downsampled images.
    pub fn apix_downsize(&self) -> f64 {
        self.npix as f64 * self.apix / self.npix_downsize as f64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.apix > 0.0) {
            return Err(invalid("apix", format!("must be positive, got {}", self.apix)));
        }
        if self.npix == 0 || self.npix_downsize == 0 {
            return Err(invalid("npix", "image sides must be positive".to_string()));
        }
        if self.npix_downsize > self.npix {
            return Err(invalid(
                "npix-downsize",
                format!("{} exceeds the raw side {}", self.npix_downsize, self.npix),
            ));
        }
        if !(self.sigma_gmm > 0.0) {
            return Err(invalid("sigma-gmm", format!("must be positive, got {}", self.sigma_gmm)));
        }
        if let Some(c) = self.render_cutoff {
            if !(c > 0.0) {
                return Err(invalid("render-cutoff", format!("must be positive, got {c}")));
            }
        }
        Ok(())
    }

    /// Reads and validates a standalone TOML image settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let to_err = |message: String| ConfigError::ImageSettings {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| to_err(e.to_string()))?;
        let config: Self = toml::from_str(&content).map_err(|e| to_err(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Initial values of the segmentation parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SegmentationStart {
    #[default]
    Uniform,
    Explicit(SegmentationParameters),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub latent_dimension: usize,
    pub n_segments: usize,
    pub tau_segmentation: f64,
    pub amortized: bool,
    pub encoder_hidden: Vec<usize>,
    pub decoder_hidden: Vec<usize>,
    pub segmentation_start: SegmentationStart,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
    /// Separate rate for the segmentation parameters; falls back to `learning_rate`.
    pub learning_rate_segmentation: Option<f64>,
}

impl OptimizerConfig {
    pub fn segmentation_learning_rate(&self) -> f64 {
        self.learning_rate_segmentation.unwrap_or(self.learning_rate)
    }
}

/// Piecewise-constant learning-rate decay at fixed epochs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    pub milestones: Vec<usize>,
    pub decay: f64,
}

impl SchedulerConfig {
    /// `base · decay^k`, `k` the number of milestones reached by `epoch`.
    pub fn learning_rate_at(&self, base: f64, epoch: usize) -> f64 {
        let reached = self.milestones.iter().filter(|&&m| m <= epoch).count();
        base * self.decay.powi(reached as i32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LossConfig {
    pub reconstruction: ReconstructionLoss,
    pub betas: Betas,
    pub clash_mode: ClashMode,
    pub clash_cutoff: f64,
    /// Low-pass bandwidth in Å restricting the compared frequencies.
    pub lp_bandwidth: Option<f64>,
    /// Radius, relative to the half image, of the real-space mask applied to predictions.
    pub loss_mask_radius: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataConfig {
    pub base_structure_path: PathBuf,
    pub particles_path: PathBuf,
    pub metadata_path: PathBuf,
    pub results_path: PathBuf,
    pub batch_size: usize,
    pub n_epochs: usize,
    pub input_mask_radius: Option<f64>,
    pub filter_amino_acids: bool,
    pub shuffle: bool,
    pub drop_last: bool,
    pub seed: u64,
    pub resume_model: Option<PathBuf>,
}

/// Complete, validated settings of one experiment. Built once and passed by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentConfig {
    pub image: ImageConfig,
    pub model: ModelConfig,
    pub optimizer: OptimizerConfig,
    pub loss: LossConfig,
    pub scheduler: Option<SchedulerConfig>,
    pub data: DataConfig,
}

fn invalid(parameter: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidValue { parameter, reason }
}

#[derive(Default)]
pub struct ExperimentConfigBuilder {
    image: Option<ImageConfig>,
    latent_dimension: Option<usize>,
    n_segments: Option<usize>,
    tau_segmentation: Option<f64>,
    amortized: Option<bool>,
    encoder_hidden: Option<Vec<usize>>,
    decoder_hidden: Option<Vec<usize>>,
    segmentation_start: Option<SegmentationStart>,
    segmentation_prior: Option<String>,
    optimizer: Option<String>,
    learning_rate: Option<f64>,
    learning_rate_segmentation: Option<f64>,
    scheduler: Option<SchedulerConfig>,
    reconstruction: Option<ReconstructionLoss>,
    betas: Option<Betas>,
    clash_mode: Option<ClashMode>,
    clash_cutoff: Option<f64>,
    lp_bandwidth: Option<f64>,
    loss_mask_radius: Option<f64>,
    base_structure_path: Option<PathBuf>,
    particles_path: Option<PathBuf>,
    metadata_path: Option<PathBuf>,
    results_path: Option<PathBuf>,
    batch_size: Option<usize>,
    n_epochs: Option<usize>,
    input_mask_radius: Option<f64>,
    filter_amino_acids: Option<bool>,
    shuffle: Option<bool>,
    drop_last: Option<bool>,
    seed: Option<u64>,
    resume_model: Option<PathBuf>,
}

impl ExperimentConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(mut self, image: ImageConfig) -> Self {
        self.image = Some(image);
        self
    }
    pub fn latent_dimension(mut self, dim: usize) -> Self {
        self.latent_dimension = Some(dim);
        self
    }
    pub fn n_segments(mut self, n: usize) -> Self {
        self.n_segments = Some(n);
        self
    }
    pub fn tau_segmentation(mut self, tau: f64) -> Self {
        self.tau_segmentation = Some(tau);
        self
    }
    pub fn amortized(mut self, amortized: bool) -> Self {
        self.amortized = Some(amortized);
        self
    }
    pub fn encoder_hidden(mut self, dims: Vec<usize>) -> Self {
        self.encoder_hidden = Some(dims);
        self
    }
    pub fn decoder_hidden(mut self, dims: Vec<usize>) -> Self {
        self.decoder_hidden = Some(dims);
        self
    }
    pub fn segmentation_start(mut self, start: SegmentationStart) -> Self {
        self.segmentation_start = Some(start);
        self
    }
    pub fn segmentation_prior(mut self, kind: impl Into<String>) -> Self {
        self.segmentation_prior = Some(kind.into());
        self
    }
    pub fn optimizer(mut self, name: impl Into<String>) -> Self {
        self.optimizer = Some(name.into());
        self
    }
    pub fn learning_rate(mut self, rate: f64) -> Self {
        self.learning_rate = Some(rate);
        self
    }
    pub fn learning_rate_segmentation(mut self, rate: Option<f64>) -> Self {
        self.learning_rate_segmentation = rate;
        self
    }
    pub fn scheduler(mut self, scheduler: Option<SchedulerConfig>) -> Self {
        self.scheduler = scheduler;
        self
    }
    pub fn reconstruction(mut self, kind: ReconstructionLoss) -> Self {
        self.reconstruction = Some(kind);
        self
    }
    pub fn betas(mut self, betas: Betas) -> Self {
        self.betas = Some(betas);
        self
    }
    pub fn clash_mode(mut self, mode: ClashMode) -> Self {
        self.clash_mode = Some(mode);
        self
    }
    pub fn clash_cutoff(mut self, cutoff: f64) -> Self {
        self.clash_cutoff = Some(cutoff);
        self
    }
    pub fn lp_bandwidth(mut self, bandwidth: Option<f64>) -> Self {
        self.lp_bandwidth = bandwidth;
        self
    }
    pub fn loss_mask_radius(mut self, radius: Option<f64>) -> Self {
        self.loss_mask_radius = radius;
        self
    }
    pub fn base_structure_path(mut self, path: PathBuf) -> Self {
        self.base_structure_path = Some(path);
        self
    }
    pub fn particles_path(mut self, path: PathBuf) -> Self {
        self.particles_path = Some(path);
        self
    }
    pub fn metadata_path(mut self, path: PathBuf) -> Self {
        self.metadata_path = Some(path);
        self
    }
    pub fn results_path(mut self, path: PathBuf) -> Self {
        self.results_path = Some(path);
        self
    }
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }
    pub fn n_epochs(mut self, n: usize) -> Self {
        self.n_epochs = Some(n);
        self
    }
    pub fn input_mask_radius(mut self, radius: Option<f64>) -> Self {
        self.input_mask_radius = radius;
        self
    }
    pub fn filter_amino_acids(mut self, filter: bool) -> Self {
        self.filter_amino_acids = Some(filter);
        self
    }
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = Some(shuffle);
        self
    }
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = Some(drop_last);
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
    pub fn resume_model(mut self, path: Option<PathBuf>) -> Self {
        self.resume_model = path;
        self
    }

    pub fn build(self) -> Result<ExperimentConfig, ConfigError> {
        let image = self.image.ok_or(ConfigError::MissingParameter("image"))?;
        image.validate()?;

        let optimizer_name = self
            .optimizer
            .ok_or(ConfigError::MissingParameter("optimizer"))?;
        if !optimizer_name.eq_ignore_ascii_case("adam") {
            return Err(ConfigError::UnsupportedOptimizer(optimizer_name));
        }
        let prior = self
            .segmentation_prior
            .ok_or(ConfigError::MissingParameter("segmentation_prior"))?;
        if !prior.eq_ignore_ascii_case("uniform") {
            return Err(ConfigError::UnsupportedPrior(prior));
        }

        let n_segments = self
            .n_segments
            .ok_or(ConfigError::MissingParameter("n_segments"))?;
        if n_segments == 0 {
            return Err(invalid("n_segments", "at least one segment is required".to_string()));
        }
        let tau_segmentation = self
            .tau_segmentation
            .ok_or(ConfigError::MissingParameter("tau_segmentation"))?;
        if !(tau_segmentation > 0.0) {
            return Err(invalid(
                "tau_segmentation",
                format!("must be positive, got {tau_segmentation}"),
            ));
        }
        let segmentation_start = self.segmentation_start.unwrap_or_default();
        if let SegmentationStart::Explicit(params) = &segmentation_start {
            params
                .validate(n_segments)
                .map_err(|e| invalid("segmentation_start", e.to_string()))?;
        }
        let model = ModelConfig {
            latent_dimension: self
                .latent_dimension
                .ok_or(ConfigError::MissingParameter("latent_dimension"))?,
            n_segments,
            tau_segmentation,
            amortized: self.amortized.unwrap_or(true),
            encoder_hidden: self.encoder_hidden.unwrap_or_default(),
            decoder_hidden: self.decoder_hidden.unwrap_or_default(),
            segmentation_start,
        };

        let learning_rate = self
            .learning_rate
            .ok_or(ConfigError::MissingParameter("learning_rate"))?;
        let optimizer = OptimizerConfig {
            learning_rate,
            learning_rate_segmentation: self.learning_rate_segmentation,
        };

        let clash_mode = self
            .clash_mode
            .ok_or(ConfigError::MissingParameter("clash_mode"))?;
        if let ClashMode::Cutoff { min, max } = clash_mode {
            if !(min >= 0.0 && max > min) {
                return Err(invalid(
                    "clash_mode",
                    format!("cutoff range ({min}, {max}] is empty"),
                ));
            }
        }
        let loss = LossConfig {
            reconstruction: self.reconstruction.unwrap_or_default(),
            betas: self.betas.ok_or(ConfigError::MissingParameter("betas"))?,
            clash_mode,
            clash_cutoff: self.clash_cutoff.unwrap_or(4.0),
            lp_bandwidth: self.lp_bandwidth,
            loss_mask_radius: self.loss_mask_radius,
        };

        let batch_size = self
            .batch_size
            .ok_or(ConfigError::MissingParameter("batch_size"))?;
        if batch_size == 0 {
            return Err(invalid("batch_size", "must be positive".to_string()));
        }
        let data = DataConfig {
            base_structure_path: self
                .base_structure_path
                .ok_or(ConfigError::MissingParameter("base_structure_path"))?,
            particles_path: self
                .particles_path
                .ok_or(ConfigError::MissingParameter("particles_path"))?,
            metadata_path: self
                .metadata_path
                .ok_or(ConfigError::MissingParameter("metadata_path"))?,
            results_path: self
                .results_path
                .ok_or(ConfigError::MissingParameter("results_path"))?,
            batch_size,
            n_epochs: self.n_epochs.unwrap_or(1),
            input_mask_radius: self.input_mask_radius,
            filter_amino_acids: self.filter_amino_acids.unwrap_or(true),
            shuffle: self.shuffle.unwrap_or(false),
            drop_last: self.drop_last.unwrap_or(false),
            seed: self.seed.unwrap_or(0),
            resume_model: self.resume_model,
        };

        Ok(ExperimentConfig {
            image,
            model,
            optimizer,
            loss,
            scheduler: self.scheduler,
            data,
        })
    }
}
