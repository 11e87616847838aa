use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "cryoSPHERE CLI - Heterogeneous reconstruction of polymer structures from cryo-EM particle images.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the model over a particle dataset, recording losses and checkpoints per epoch.
    Evaluate(EvaluateArgs),
    /// Render the Gaussian mixture of a structure into an MRC density volume.
    Volume(VolumeArgs),
}

/// Arguments for the `evaluate` subcommand.
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Path to the experiment configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Override the directory receiving checkpoints, metrics and the run log.
    #[arg(short, long, value_name = "PATH")]
    pub results: Option<PathBuf>,

    /// Override the number of epochs.
    #[arg(short = 'e', long, value_name = "INT")]
    pub epochs: Option<usize>,

    /// Override the number of particles per batch.
    #[arg(short = 'b', long, value_name = "INT")]
    pub batch_size: Option<usize>,

    /// Override the random seed.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Resume from a saved checkpoint instead of initializing a new model.
    #[arg(long, value_name = "PATH")]
    pub resume: Option<PathBuf>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S loss.betas.kl-latent=0.1
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `volume` subcommand.
#[derive(Args, Debug)]
pub struct VolumeArgs {
    /// TOML file with the image settings (apix, npix, npix-downsize, sigma-gmm).
    #[arg(short = 'i', long, required = true, value_name = "PATH")]
    pub image_settings: PathBuf,

    /// Path to the input PDB structure.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub structure: PathBuf,

    /// Path for the output MRC volume.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn evaluate_collects_overrides() {
        let cli = Cli::try_parse_from([
            "cryosphere",
            "-vv",
            "evaluate",
            "--config",
            "experiment.toml",
            "-e",
            "3",
            "-S",
            "data.seed=4",
            "-S",
            "loss.clash-cutoff=3.5",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Evaluate(args) = cli.command else {
            panic!("expected the evaluate subcommand");
        };
        assert_eq!(args.config, PathBuf::from("experiment.toml"));
        assert_eq!(args.epochs, Some(3));
        assert_eq!(args.set_values, vec!["data.seed=4", "loss.clash-cutoff=3.5"]);
    }

    #[test]
    fn volume_requires_all_paths() {
        assert!(Cli::try_parse_from(["cryosphere", "volume", "--structure", "a.pdb"]).is_err());
    }
}
