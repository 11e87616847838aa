use cryosphere::core::loss::Betas;
use cryosphere::core::loss::reconstruction::ReconstructionLoss;

/// Values used when neither the command line nor the experiment file sets them.
pub struct DefaultsConfig {
    pub optimizer: String,
    pub segmentation_prior: String,
    pub tau_segmentation: f64,
    pub reconstruction: ReconstructionLoss,
    pub betas: Betas,
    pub clash_cutoff: f64,
    pub batch_size: usize,
    pub n_epochs: usize,
    pub seed: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            optimizer: "adam".to_string(),
            segmentation_prior: "uniform".to_string(),
            tau_segmentation: 0.05,
            reconstruction: ReconstructionLoss::Correlation,
            betas: Betas::reconstruction_only(),
            clash_cutoff: 4.0,
            batch_size: 32,
            n_epochs: 1,
            seed: 0,
        }
    }
}
