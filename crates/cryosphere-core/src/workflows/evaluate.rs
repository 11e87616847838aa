use crate::core::loss::{LossComponents, LossTerms};
use crate::engine::config::ExperimentConfig;
use crate::engine::context::ExperimentContext;
use crate::engine::dataset::DataLoader;
use crate::engine::error::EngineError;
use crate::engine::pipeline;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::state::ModelState;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

pub const RUN_LOG_FILE: &str = "run.log";
/// Target of the summary events a front end routes into [`RUN_LOG_FILE`].
pub const RUN_LOG_TARGET: &str = "cryosphere::run_log";
pub const METRICS_FILE: &str = "metrics.csv";

/// Mean loss terms of one pass over the dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub batches: usize,
    pub mean_terms: LossComponents,
    pub mean_total: f64,
    /// Encoder/decoder learning rate scheduled for this epoch.
    pub learning_rate: f64,
    /// Residues assigned to each segment by the mean segmentation.
    pub segment_sizes: Vec<usize>,
    pub checkpoint: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub epochs: Vec<EpochSummary>,
    pub model: ModelState,
}

/// Per-batch loss terms in CSV form.
struct MetricsWriter {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl MetricsWriter {
    fn create(directory: &Path) -> Result<Self, EngineError> {
        let path = directory.join(METRICS_FILE);
        let mut writer = csv::Writer::from_path(&path).map_err(|e| csv_error(&path, e))?;
        let header = ["epoch", "batch"]
            .into_iter()
            .chain(LossComponents::NAMES)
            .chain(["total"]);
        writer.write_record(header).map_err(|e| csv_error(&path, e))?;
        Ok(Self { writer, path })
    }

    fn record(&mut self, epoch: usize, batch: usize, terms: &LossTerms) -> Result<(), EngineError> {
        let row = [epoch.to_string(), batch.to_string()]
            .into_iter()
            .chain(terms.terms.values().into_iter().map(|v| v.to_string()))
            .chain([terms.total.to_string()]);
        self.writer.write_record(row).map_err(|e| csv_error(&self.path, e))?;
        self.writer.flush().map_err(|e| EngineError::io(&self.path, e))
    }
}

fn csv_error(path: &Path, error: csv::Error) -> EngineError {
    if error.is_io_error() {
        match error.into_kind() {
            csv::ErrorKind::Io(source) => EngineError::io(path, source),
            other => EngineError::Internal(format!("{other:?}")),
        }
    } else {
        EngineError::Internal(format!("failed to write '{}': {error}", path.display()))
    }
}

fn epoch_line(summary: &EpochSummary, betas: &LossComponents) -> String {
    let terms = &summary.mean_terms;
    let mut parts = vec![
        format!("Epoch: {}", summary.epoch),
        format!("Reconstruction loss: {}", terms.reconstruction),
        format!("KL prior latent: {}", terms.kl_latent),
        format!("KL prior segmentation means: {}", terms.kl_segmentation_means),
        format!("KL prior segmentation std: {}", terms.kl_segmentation_stds),
        format!("KL prior segmentation proportions: {}", terms.kl_segmentation_proportions),
        format!("l2 penalty: {}", terms.l2_penalty),
        format!("Continuity loss: {}", terms.continuity),
        format!("Clashing loss: {}", terms.clashing),
        format!("Total: {}", summary.mean_total),
        format!("Learning rate: {}", summary.learning_rate),
        format!("Segment sizes: {:?}", summary.segment_sizes),
    ];
    parts.extend(betas.named().map(|(name, beta)| format!("{name} beta: {beta}")));
    parts.join(" || ")
}

fn setup_lines(config: &ExperimentConfig, context: &ExperimentContext<'_>) -> Vec<String> {
    let image = &config.image;
    let data = &config.data;
    vec![
        format!("Using particles: {}. Using metadata: {}.", data.particles_path.display(), data.metadata_path.display()),
        format!("Find checkpoints at {}", data.results_path.display()),
        format!(
            "Running the amortized version: {}. Running for {} epochs.",
            config.model.amortized, data.n_epochs
        ),
        format!(
            "Image size: {}. Pixel size: {}. Working on downsampled images of size {} with pixel size {}.",
            image.npix,
            image.apix,
            image.npix_downsize,
            image.apix_downsize()
        ),
        format!(
            "Low pass filtering bandwidth: {:?}. Input images mask radius: {:?}. Loss mask radius: {:?}.",
            config.loss.lp_bandwidth, data.input_mask_radius, config.loss.loss_mask_radius
        ),
        format!(
            "Base structure: {} with {} residues.",
            data.base_structure_path.display(),
            context.polymer.len()
        ),
        format!(
            "Latent dimension: {}. Segments: {}.",
            config.model.latent_dimension, config.model.n_segments
        ),
        format!("Encoder hidden layers: {:?}", config.model.encoder_hidden),
        format!("Decoder hidden layers: {:?}", config.model.decoder_hidden),
        format!("Batch size: {}.", data.batch_size),
        format!(
            "Learning rate for the encoder and decoder: {}. Learning rate for the segmentation: {}.",
            config.optimizer.learning_rate,
            config.optimizer.segmentation_learning_rate()
        ),
    ]
}

fn segment_sizes(model: &ModelState, n_residues: usize, tau: f64) -> Result<Vec<usize>, EngineError> {
    let segmentation = model.segmentation_model(n_residues, tau)?.mean_segmentation();
    let mut sizes = vec![0; segmentation.ncols()];
    for row in segmentation.rows() {
        let hard = row
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (s, &w)| if w > best.1 { (s, w) } else { best })
            .0;
        sizes[hard] += 1;
    }
    Ok(sizes)
}

fn load_or_initialize(
    config: &ExperimentConfig,
    context: &ExperimentContext<'_>,
    rng: &mut StdRng,
) -> Result<(ModelState, usize), EngineError> {
    match &config.data.resume_model {
        Some(path) => {
            let model = ModelState::load(path)?;
            model.check_compatible(config, context.dataset.len())?;
            let first = model.epoch + 1;
            Ok((model, first))
        }
        None => Ok((
            ModelState::initialize(config, context.dataset.len(), context.polymer.len(), rng)?,
            0,
        )),
    }
}

/// Runs the forward pipeline and the loss over the whole dataset for the configured number of
/// epochs.
///
/// Each epoch writes `ckpt{epoch}.json` and one CSV row per batch in `metrics.csv` inside the
/// results directory, and emits a summary event on [`RUN_LOG_TARGET`]. The model is never updated, so repeated
/// epochs differ only through the random draws of the latents and segmentations.
#[instrument(skip_all, name = "evaluate_workflow")]
pub fn run(config: &ExperimentConfig, reporter: &ProgressReporter) -> Result<EvaluationResult, EngineError> {
    // === Phase 0: Setup ===
    reporter.report(Progress::PhaseStart { name: "Setup" });
    let results = &config.data.results_path;
    std::fs::create_dir_all(results).map_err(|e| EngineError::io(results, e))?;
    let context = ExperimentContext::setup(config, reporter)?;
    let mut rng = StdRng::seed_from_u64(config.data.seed);
    let (mut model, first_epoch) = load_or_initialize(config, &context, &mut rng)?;

    for line in setup_lines(config, &context) {
        info!(target: RUN_LOG_TARGET, "{line}");
    }
    let mut metrics = MetricsWriter::create(results)?;
    reporter.report(Progress::PhaseFinish);
    info!(
        particles = context.dataset.len(),
        residues = context.polymer.len(),
        first_epoch,
        "Setup complete."
    );

    // === Phase 1: Epochs ===
    let mut loader = DataLoader::new(
        &context.dataset,
        config.data.batch_size,
        config.data.shuffle,
        config.data.drop_last,
        config.data.seed,
    );
    let mut epochs = Vec::with_capacity(config.data.n_epochs);
    for epoch in first_epoch..first_epoch + config.data.n_epochs {
        let batches = loader.epoch_batches();
        reporter.report(Progress::EpochStart {
            epoch,
            total_batches: batches.len() as u64,
        });

        let mut sums = [0.0; 8];
        let mut total = 0.0;
        for (index, indices) in batches.iter().enumerate() {
            let batch = context.dataset.get_batch(indices)?;
            let (_, terms) = pipeline::evaluate_batch(&context, &model, &batch, &mut rng)?;
            debug!(epoch, batch = index, total = terms.total, "Batch evaluated.");
            metrics.record(epoch, index, &terms)?;
            for (sum, value) in sums.iter_mut().zip(terms.terms.values()) {
                *sum += value;
            }
            total += terms.total;
            reporter.report(Progress::BatchFinish { loss: terms.total });
        }

        let count = batches.len().max(1) as f64;
        let [reconstruction, kl_latent, kl_segmentation_means, kl_segmentation_stds, kl_segmentation_proportions, l2_penalty, continuity, clashing] =
            sums.map(|s| s / count);
        let mean_terms = LossComponents {
            reconstruction,
            kl_latent,
            kl_segmentation_means,
            kl_segmentation_stds,
            kl_segmentation_proportions,
            l2_penalty,
            continuity,
            clashing,
        };

        model.epoch = epoch;
        let checkpoint = model.save(results)?;
        let learning_rate = config.scheduler.as_ref().map_or(config.optimizer.learning_rate, |s| {
            s.learning_rate_at(config.optimizer.learning_rate, epoch)
        });
        let summary = EpochSummary {
            epoch,
            batches: batches.len(),
            mean_terms,
            mean_total: total / count,
            learning_rate,
            segment_sizes: segment_sizes(&model, context.polymer.len(), config.model.tau_segmentation)?,
            checkpoint,
        };
        info!(target: RUN_LOG_TARGET, "{}", epoch_line(&summary, &config.loss.betas));
        info!(epoch, mean_total = summary.mean_total, "Epoch complete.");
        reporter.report(Progress::EpochFinish {
            epoch,
            mean_terms,
            mean_total: summary.mean_total,
        });
        epochs.push(summary);
    }

    Ok(EvaluationResult { epochs, model })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::mrc::write_mrc;
    use crate::engine::config::tests::complete_builder;
    use ndarray::Array3;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const PDB: &str = "\
ATOM      1  N   ALA A   1      -6.700   0.000   1.000  1.00  0.00           N
ATOM      2  CA  ALA A   1      -5.700   0.000   1.000  1.00  0.00           C
ATOM      3  N   GLY A   2      -2.900   0.000  -1.000  1.00  0.00           N
ATOM      4  CA  GLY A   2      -1.900   0.000  -1.000  1.00  0.00           C
ATOM      5  N   ALA A   3       0.900   2.000   0.500  1.00  0.00           N
ATOM      6  CA  ALA A   3       1.900   2.000   0.500  1.00  0.00           C
ATOM      7  N   GLY A   4       4.700   2.000   0.000  1.00  0.00           N
ATOM      8  CA  GLY A   4       5.700   2.000   0.000  1.00  0.00           C
END
";

    const STAR: &str = "\
data_optics

loop_
_rlnOpticsGroup #1
_rlnVoltage #2
_rlnSphericalAberration #3
_rlnAmplitudeContrast #4
_rlnImagePixelSize #5
1 300.0 2.7 0.1 1.0

data_particles

loop_
_rlnImageName #1
_rlnAngleRot #2
_rlnAngleTilt #3
_rlnAnglePsi #4
_rlnOriginXAngst #5
_rlnOriginYAngst #6
_rlnDefocusU #7
_rlnDefocusV #8
_rlnDefocusAngle #9
_rlnOpticsGroup #10
1@stack.mrcs 0.0 0.0 0.0 0.0 0.0 15000.0 14000.0 10.0 1
2@stack.mrcs 30.0 45.0 10.0 1.0 -1.0 16000.0 15500.0 20.0 1
3@stack.mrcs 90.0 90.0 0.0 0.0 2.0 14000.0 14000.0 0.0 1
";

    fn write_inputs(dir: &Path) {
        std::fs::write(dir.join("base.pdb"), PDB).unwrap();
        std::fs::write(dir.join("particles.star"), STAR).unwrap();
        let frames = Array3::from_shape_fn((3, 32, 32), |(f, r, c)| {
            ((f + 2) as f64 * 0.3 + r as f64 * 0.21 + c as f64 * 0.13).cos()
        });
        write_mrc(dir.join("stack.mrcs"), &frames, 1.0, false).unwrap();
    }

    #[test]
    fn evaluation_writes_checkpoints_and_metrics() {
        let dir = TempDir::new().unwrap();
        write_inputs(dir.path());
        let results = dir.path().join("results");
        let config = complete_builder()
            .base_structure_path(dir.path().join("base.pdb"))
            .particles_path(dir.path().to_path_buf())
            .metadata_path(dir.path().join("particles.star"))
            .results_path(results.clone())
            .batch_size(2)
            .n_epochs(2)
            .build()
            .unwrap();

        let events = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            if let Progress::EpochFinish { epoch, .. } = event {
                events.lock().unwrap().push(epoch);
            }
        }));
        let result = run(&config, &reporter).unwrap();
        drop(reporter);

        assert_eq!(events.into_inner().unwrap(), vec![0, 1]);
        assert_eq!(result.epochs.len(), 2);
        assert_eq!(result.epochs[0].batches, 2);
        assert_eq!(result.epochs[1].segment_sizes.iter().sum::<usize>(), 4);
        assert!(result.epochs.iter().all(|e| e.mean_total.is_finite()));
        assert!(results.join("ckpt0.json").exists());
        assert!(results.join("ckpt1.json").exists());

        let metrics = std::fs::read_to_string(results.join(METRICS_FILE)).unwrap();
        let lines: Vec<&str> = metrics.lines().collect();
        assert_eq!(lines.len(), 1 + 2 * 2);
        assert!(lines[0].starts_with("epoch,batch,reconstruction,"));
        assert_eq!(lines[1].split(',').count(), 2 + LossComponents::NAMES.len() + 1);
    }

    #[test]
    fn epoch_line_lists_terms_and_betas() {
        let summary = EpochSummary {
            epoch: 1,
            batches: 2,
            mean_terms: LossComponents {
                reconstruction: -0.5,
                ..LossComponents::default()
            },
            mean_total: -0.5,
            learning_rate: 3e-4,
            segment_sizes: vec![2, 2],
            checkpoint: PathBuf::from("ckpt1.json"),
        };
        let betas = LossComponents {
            reconstruction: 1.0,
            ..LossComponents::default()
        };
        let line = epoch_line(&summary, &betas);
        assert!(line.starts_with("Epoch: 1 || Reconstruction loss: -0.5"));
        assert!(line.contains("Segment sizes: [2, 2]"));
        assert!(line.contains("reconstruction beta: 1"));
    }

    #[test]
    fn resuming_continues_after_the_checkpoint_epoch() {
        let dir = TempDir::new().unwrap();
        write_inputs(dir.path());
        let results = dir.path().join("results");
        let builder = || {
            complete_builder()
                .base_structure_path(dir.path().join("base.pdb"))
                .particles_path(dir.path().to_path_buf())
                .metadata_path(dir.path().join("particles.star"))
                .results_path(results.clone())
                .batch_size(3)
        };
        let reporter = ProgressReporter::new();
        let first = run(&builder().build().unwrap(), &reporter).unwrap();
        assert_eq!(first.model.epoch, 0);

        let resumed = builder()
            .resume_model(Some(results.join("ckpt0.json")))
            .build()
            .unwrap();
        let second = run(&resumed, &reporter).unwrap();
        assert_eq!(second.epochs[0].epoch, 1);
        assert_eq!(second.model.vae, first.model.vae);
        assert!(results.join("ckpt1.json").exists());
    }

    #[test]
    fn missing_structure_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        write_inputs(dir.path());
        let config = complete_builder()
            .base_structure_path(dir.path().join("absent.pdb"))
            .particles_path(dir.path().to_path_buf())
            .metadata_path(dir.path().join("particles.star"))
            .results_path(dir.path().join("results"))
            .build()
            .unwrap();
        assert!(matches!(
            run(&config, &ProgressReporter::new()),
            Err(EngineError::Io { .. })
        ));
    }
}
