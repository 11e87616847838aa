use cryosphere::engine::config::ExperimentConfig;
use std::path::PathBuf;

pub struct AppConfig {
    /// Experiment file the settings came from.
    pub source: PathBuf,
    pub core_config: ExperimentConfig,
}
