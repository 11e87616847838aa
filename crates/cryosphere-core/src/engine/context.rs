use super::config::ExperimentConfig;
use super::dataset::ImageDataset;
use super::error::EngineError;
use super::progress::ProgressReporter;
use crate::core::deformation::segmentation::{SegmentationParameters, SegmentationPrior};
use crate::core::density::gmm::GaussianMixture;
use crate::core::density::renderer::RenderParams;
use crate::core::geometry::grid::SamplingGrid;
use crate::core::imaging::ctf::CtfModel;
use crate::core::imaging::filters::{Mask, low_pass_mask2d};
use crate::core::imaging::fourier::FourierTransform;
use crate::core::imaging::translate::ImageTranslator;
use crate::core::io::metadata::ParticleTable;
use crate::core::loss::LossSettings;
use crate::core::loss::structural::StructuralLossParameters;
use crate::core::models::polymer::Polymer;
use ndarray::Array2;
use tracing::{info, instrument};

/// Everything fixed for the duration of an experiment, built once from the configuration.
pub struct ExperimentContext<'a> {
    pub config: &'a ExperimentConfig,
    pub reporter: &'a ProgressReporter<'a>,
    pub polymer: Polymer,
    pub mixture: GaussianMixture,
    pub dataset: ImageDataset,
    pub ctf: CtfModel,
    pub grid: Box<dyn SamplingGrid>,
    pub translator: ImageTranslator,
    pub fourier: FourierTransform,
    /// Low-pass band restricting the compared frequencies.
    pub band: Array2<f64>,
    pub loss_mask: Option<Mask>,
    pub structural: StructuralLossParameters,
    pub prior: SegmentationPrior,
}

impl<'a> ExperimentContext<'a> {
    /// Loads the base structure, the particle metadata and the image stacks named by `config`.
    #[instrument(skip_all, name = "experiment_setup")]
    pub fn setup(config: &'a ExperimentConfig, reporter: &'a ProgressReporter<'a>) -> Result<Self, EngineError> {
        let data = &config.data;
        let image = &config.image;

        let polymer = Polymer::from_pdb(&data.base_structure_path, data.filter_amino_acids)
            .map_err(|e| EngineError::structure(&data.base_structure_path, e))?;
        info!(
            residues = polymer.len(),
            path = %data.base_structure_path.display(),
            "Loaded base structure."
        );

        let table = ParticleTable::load(&data.metadata_path, image.apix)?;
        let dataset = ImageDataset::new(
            image.apix,
            image.npix,
            &table,
            &data.particles_path,
            Some(image.npix_downsize),
            data.input_mask_radius,
        )?;
        Self::from_parts(config, reporter, polymer, &table, dataset)
    }

    /// Assembles a context from an already loaded structure, metadata table and dataset.
    pub fn from_parts(
        config: &'a ExperimentConfig,
        reporter: &'a ProgressReporter<'a>,
        polymer: Polymer,
        table: &ParticleTable,
        dataset: ImageDataset,
    ) -> Result<Self, EngineError> {
        let image = &config.image;
        let side = image.npix_downsize;
        let apix = image.apix_downsize();

        if table.len() != dataset.len() {
            return Err(EngineError::ShapeMismatch(format!(
                "metadata describes {} particles, dataset holds {}",
                table.len(),
                dataset.len()
            )));
        }
        if dataset.down_side() != side {
            return Err(EngineError::ShapeMismatch(format!(
                "dataset images are {} pixels wide, configured {side}",
                dataset.down_side()
            )));
        }

        let mixture = GaussianMixture::from_polymer(&polymer, image.sigma_gmm)?;
        let ctf = CtfModel::from_table(table, apix, side)?;
        let structural = StructuralLossParameters::from_polymer(&polymer, config.loss.clash_mode);
        info!(
            connect_pairs = structural.connect_pairs.len(),
            clash_pairs = structural.clash_pairs.len(),
            "Computed structural loss pairs."
        );
        let prior = SegmentationParameters::uniform(polymer.len(), config.model.n_segments)?;

        Ok(Self {
            config,
            reporter,
            mixture,
            ctf,
            grid: image.grid.build(side, apix),
            translator: ImageTranslator::new(side),
            fourier: FourierTransform::new(side),
            band: low_pass_mask2d(side, apix, config.loss.lp_bandwidth),
            loss_mask: config.loss.loss_mask_radius.map(|r| Mask::new(side, r)),
            structural,
            prior,
            polymer,
            dataset,
        })
    }

    pub fn loss_settings(&self) -> LossSettings {
        LossSettings {
            reconstruction: self.config.loss.reconstruction,
            clash_cutoff: self.config.loss.clash_cutoff,
        }
    }

    pub fn render_params(&self) -> RenderParams<'_> {
        RenderParams {
            sigmas: &self.mixture.sigmas,
            amplitudes: &self.mixture.amplitudes,
            cutoff: self.config.image.render_cutoff,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::config::tests::complete_builder;
    use crate::engine::dataset::tests::write_stack;
    use nalgebra::Point3;
    use std::path::Path;
    use tempfile::TempDir;

    /// Four CA beads on one chain, spaced 3.8 Å apart around the grid center.
    pub(crate) fn four_bead_polymer() -> Polymer {
        Polymer {
            chain_ids: vec!['A'; 4],
            residue_numbers: vec![1, 2, 3, 4],
            residue_names: vec!["ALA".to_string(); 4],
            atom_names: vec!["CA".to_string(); 4],
            coords: vec![
                Point3::new(-5.7, 0.0, 1.0),
                Point3::new(-1.9, 0.0, -1.0),
                Point3::new(1.9, 2.0, 0.5),
                Point3::new(5.7, 2.0, 0.0),
            ],
            num_electrons: vec![38.0, 38.0, 38.0, 38.0],
        }
    }

    /// Builds a context over `frames` synthetic 32-pixel particles downsampled to 16.
    pub(crate) fn context_in<'a>(
        dir: &Path,
        frames: usize,
        config: &'a ExperimentConfig,
        reporter: &'a ProgressReporter<'a>,
    ) -> ExperimentContext<'a> {
        let table = write_stack(dir, frames, config.image.npix);
        let dataset = ImageDataset::new(
            config.image.apix,
            config.image.npix,
            &table,
            dir,
            Some(config.image.npix_downsize),
            None,
        )
        .unwrap();
        ExperimentContext::from_parts(config, reporter, four_bead_polymer(), &table, dataset).unwrap()
    }

    #[test]
    fn context_is_sized_for_the_downsampled_images() {
        let dir = TempDir::new().unwrap();
        let config = complete_builder().lp_bandwidth(Some(6.0)).build().unwrap();
        let reporter = ProgressReporter::new();
        let context = context_in(dir.path(), 3, &config, &reporter);

        assert_eq!(context.grid.side_shape(), 16);
        assert_eq!(context.grid.pixel_size(), 2.0);
        assert_eq!(context.ctf.len(), 3);
        assert_eq!(context.band.dim(), (16, 16));
        assert!(context.band.iter().any(|&v| v == 0.0));
        assert_eq!(context.structural.connect_pairs, vec![[0, 1], [1, 2], [2, 3]]);
        assert!(
            context
                .structural
                .clash_pairs
                .iter()
                .all(|p| !context.structural.connect_pairs.contains(p))
        );
        assert_eq!(context.prior.n_segments(), 2);
    }

    #[test]
    fn mismatched_dataset_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = complete_builder().build().unwrap();
        let reporter = ProgressReporter::new();
        let mut table = write_stack(dir.path(), 3, 32);
        let dataset = ImageDataset::new(1.0, 32, &table, dir.path(), Some(16), None).unwrap();
        table.rotations.pop();
        assert!(matches!(
            ExperimentContext::from_parts(&config, &reporter, four_bead_polymer(), &table, dataset),
            Err(EngineError::ShapeMismatch(_))
        ));
    }
}
