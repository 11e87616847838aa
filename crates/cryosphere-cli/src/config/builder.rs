use super::defaults::DefaultsConfig;
use super::file::FileConfig;
use super::models::AppConfig;
use crate::cli::EvaluateArgs;
use crate::error::{CliError, Result};
use cryosphere::engine::config::{ExperimentConfigBuilder, SegmentationStart};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub fn build_config(args: &EvaluateArgs) -> Result<AppConfig> {
    let defaults = DefaultsConfig::default();
    let file_config = FileConfig::from_file(&args.config)?;
    let mut file_config = apply_set_values(file_config, &args.set_values)?;
    let base_dir = args.config.parent().unwrap_or(Path::new(""));

    let image = file_config
        .image
        .take()
        .ok_or_else(|| CliError::Config("`image` section is required.".to_string()))?;
    let model = file_config.model.take().unwrap_or_default();
    let optimizer = file_config.optimizer.take().unwrap_or_default();
    let loss = file_config.loss.take().unwrap_or_default();
    let data = file_config.data.take().unwrap_or_default();

    let required_path = |value: Option<&PathBuf>, key: &str| -> Result<PathBuf> {
        value
            .map(|p| resolve_relative(base_dir, p))
            .ok_or_else(|| CliError::Config(format!("`data.{key}` is required.")))
    };

    let mut builder = ExperimentConfigBuilder::new()
        .image(image)
        .tau_segmentation(model.tau_segmentation.unwrap_or(defaults.tau_segmentation))
        .segmentation_prior(model.segmentation_prior.unwrap_or(defaults.segmentation_prior))
        .optimizer(optimizer.name.unwrap_or(defaults.optimizer))
        .learning_rate_segmentation(optimizer.learning_rate_segmentation)
        .scheduler(file_config.scheduler)
        .reconstruction(loss.reconstruction.unwrap_or(defaults.reconstruction))
        .betas(
            loss.betas
                .map(|b| b.resolve(&defaults.betas))
                .unwrap_or(defaults.betas),
        )
        .clash_cutoff(loss.clash_cutoff.unwrap_or(defaults.clash_cutoff))
        .lp_bandwidth(loss.lp_bandwidth)
        .loss_mask_radius(loss.loss_mask_radius)
        .base_structure_path(required_path(data.base_structure.as_ref(), "base-structure")?)
        .particles_path(required_path(data.particles.as_ref(), "particles")?)
        .metadata_path(required_path(data.metadata.as_ref(), "metadata")?)
        .results_path(match &args.results {
            Some(path) => path.clone(),
            None => required_path(data.results.as_ref(), "results")?,
        })
        .batch_size(args.batch_size.or(data.batch_size).unwrap_or(defaults.batch_size))
        .n_epochs(args.epochs.or(data.n_epochs).unwrap_or(defaults.n_epochs))
        .seed(args.seed.or(data.seed).unwrap_or(defaults.seed))
        .input_mask_radius(data.input_mask_radius)
        .resume_model(
            args.resume
                .clone()
                .or_else(|| data.resume.as_ref().map(|p| resolve_relative(base_dir, p))),
        );

    if let Some(dim) = model.latent_dimension {
        builder = builder.latent_dimension(dim);
    }
    if let Some(n) = model.n_segments {
        builder = builder.n_segments(n);
    }
    if let Some(amortized) = model.amortized {
        builder = builder.amortized(amortized);
    }
    if let Some(dims) = model.encoder_hidden {
        builder = builder.encoder_hidden(dims);
    }
    if let Some(dims) = model.decoder_hidden {
        builder = builder.decoder_hidden(dims);
    }
    if let Some(start) = model.segmentation_start {
        builder = builder.segmentation_start(SegmentationStart::Explicit(start));
    }
    if let Some(rate) = optimizer.learning_rate {
        builder = builder.learning_rate(rate);
    }
    if let Some(mode) = loss.clashing {
        builder = builder.clash_mode(mode);
    }
    if let Some(filter) = data.filter_amino_acids {
        builder = builder.filter_amino_acids(filter);
    }
    if let Some(shuffle) = data.shuffle {
        builder = builder.shuffle(shuffle);
    }
    if let Some(drop_last) = data.drop_last {
        builder = builder.drop_last(drop_last);
    }

    let core_config = builder.build().map_err(|e| CliError::Config(e.to_string()))?;
    Ok(AppConfig {
        source: args.config.clone(),
        core_config,
    })
}

fn resolve_relative(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid value for {}: {}", key, value)))
}

fn apply_set_values(mut config: FileConfig, set_values: &[String]) -> Result<FileConfig> {
    for kv_pair in set_values {
        let Some((key, value_str)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };

        if let Some(name) = key.strip_prefix("loss.betas.") {
            let mut betas = config
                .loss
                .get_or_insert_with(Default::default)
                .betas
                .unwrap_or_default();
            let slot = betas
                .slot(name)
                .ok_or_else(|| CliError::Config(format!("Unknown loss weight: {}", name)))?;
            *slot = Some(parse_value(key, value_str)?);
            config.loss.get_or_insert_with(Default::default).betas = Some(betas);
            continue;
        }

        match key {
            "image.sigma-gmm" => {
                config
                    .image
                    .as_mut()
                    .ok_or_else(|| CliError::Config(format!("{} requires an `image` section.", key)))?
                    .sigma_gmm = parse_value(key, value_str)?;
            }
            "image.render-cutoff" => {
                config
                    .image
                    .as_mut()
                    .ok_or_else(|| CliError::Config(format!("{} requires an `image` section.", key)))?
                    .render_cutoff = Some(parse_value(key, value_str)?);
            }
            "model.latent-dimension" => {
                config.model.get_or_insert_with(Default::default).latent_dimension =
                    Some(parse_value(key, value_str)?);
            }
            "model.n-segments" => {
                config.model.get_or_insert_with(Default::default).n_segments = Some(parse_value(key, value_str)?);
            }
            "model.tau-segmentation" => {
                config.model.get_or_insert_with(Default::default).tau_segmentation =
                    Some(parse_value(key, value_str)?);
            }
            "model.amortized" => {
                config.model.get_or_insert_with(Default::default).amortized = Some(parse_value(key, value_str)?);
            }
            "optimizer.learning-rate" => {
                config.optimizer.get_or_insert_with(Default::default).learning_rate =
                    Some(parse_value(key, value_str)?);
            }
            "optimizer.learning-rate-segmentation" => {
                config
                    .optimizer
                    .get_or_insert_with(Default::default)
                    .learning_rate_segmentation = Some(parse_value(key, value_str)?);
            }
            "loss.reconstruction" => {
                config.loss.get_or_insert_with(Default::default).reconstruction =
                    Some(value_str.parse().map_err(CliError::Config)?);
            }
            "loss.clash-cutoff" => {
                config.loss.get_or_insert_with(Default::default).clash_cutoff = Some(parse_value(key, value_str)?);
            }
            "loss.lp-bandwidth" => {
                config.loss.get_or_insert_with(Default::default).lp_bandwidth = Some(parse_value(key, value_str)?);
            }
            "loss.loss-mask-radius" => {
                config.loss.get_or_insert_with(Default::default).loss_mask_radius =
                    Some(parse_value(key, value_str)?);
            }
            "data.batch-size" => {
                config.data.get_or_insert_with(Default::default).batch_size = Some(parse_value(key, value_str)?);
            }
            "data.n-epochs" => {
                config.data.get_or_insert_with(Default::default).n_epochs = Some(parse_value(key, value_str)?);
            }
            "data.seed" => {
                config.data.get_or_insert_with(Default::default).seed = Some(parse_value(key, value_str)?);
            }
            "data.shuffle" => {
                config.data.get_or_insert_with(Default::default).shuffle = Some(parse_value(key, value_str)?);
            }
            "data.drop-last" => {
                config.data.get_or_insert_with(Default::default).drop_last = Some(parse_value(key, value_str)?);
            }
            "data.input-mask-radius" => {
                config.data.get_or_insert_with(Default::default).input_mask_radius =
                    Some(parse_value(key, value_str)?);
            }
            _ => {
                return Err(CliError::Config(format!(
                    "Unknown or unsupported key for --set: {}",
                    key
                )));
            }
        }
    }
    Ok(config)
}
