use crate::cli::EvaluateArgs;
use crate::config::build_config;
use crate::error::Result;
use crate::logging::RunLogSink;
use crate::utils::progress::CliProgressHandler;
use cryosphere::core::loss::LossComponents;
use cryosphere::engine::progress::ProgressReporter;
use cryosphere::workflows;
use cryosphere::workflows::evaluate::RUN_LOG_FILE;
use tracing::info;

pub fn run(args: EvaluateArgs, run_log: &RunLogSink) -> Result<()> {
    info!("Merging configuration from {:?} and CLI arguments...", &args.config);
    let app_config = build_config(&args)?;
    let config = &app_config.core_config;

    let results = &config.data.results_path;
    std::fs::create_dir_all(results)?;
    run_log.attach(&results.join(RUN_LOG_FILE))?;

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!(
        "Evaluating {} epoch(s) with batches of {} from {}...",
        config.data.n_epochs,
        config.data.batch_size,
        app_config.source.display()
    );
    info!("Invoking the core evaluation workflow...");
    let result = workflows::evaluate::run(config, &reporter)?;

    for summary in &result.epochs {
        let terms = LossComponents::NAMES
            .iter()
            .zip(summary.mean_terms.values())
            .map(|(name, value)| format!("{name} {value:.4}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  Epoch {}: total {:.4} ({}) -> {}",
            summary.epoch,
            summary.mean_total,
            terms,
            summary.checkpoint.display()
        );
    }
    match result.epochs.last() {
        Some(last) => println!(
            "✓ Final segment sizes {:?}; results written to {}",
            last.segment_sizes,
            config.data.results_path.display()
        ),
        None => println!("No epochs were requested; only the setup ran."),
    }

    Ok(())
}
