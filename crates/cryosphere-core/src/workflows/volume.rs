use crate::core::density::gmm::GaussianMixture;
use crate::core::density::renderer::{RenderParams, structure_to_volume};
use crate::core::geometry::grid::BaseGrid;
use crate::core::io::mrc::write_mrc;
use crate::core::models::polymer::Polymer;
use crate::engine::config::ImageConfig;
use crate::engine::error::EngineError;
use ndarray::Array3;
use std::path::Path;
use tracing::{info, instrument};

/// Renders the Gaussian mixture of a structure on the downsampled `npix³` base grid and writes
/// it as an MRC volume tagged with the downsampled pixel size.
///
/// Only amino-acid residues are kept. Returns the rendered volume, indexed `[z][y][x]`.
#[instrument(skip_all, name = "volume_workflow")]
pub fn run(
    image: &ImageConfig,
    structure_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
) -> Result<Array3<f64>, EngineError> {
    image.validate()?;
    let structure_path = structure_path.as_ref();
    let output_path = output_path.as_ref();

    let polymer = Polymer::from_pdb(structure_path, true).map_err(|e| EngineError::structure(structure_path, e))?;
    let mixture = GaussianMixture::from_polymer(&polymer, image.sigma_gmm)?;
    let apix = image.apix_downsize();
    let grid = BaseGrid::new(image.npix_downsize, apix);
    let params = RenderParams {
        sigmas: &mixture.sigmas,
        amplitudes: &mixture.amplitudes,
        cutoff: image.render_cutoff,
    };
    let volume = structure_to_volume(&mixture.mus, &params, &grid)?;
    write_mrc(output_path, &volume, apix, true)?;
    info!(
        residues = polymer.len(),
        side = image.npix_downsize,
        apix,
        output = %output_path.display(),
        "Wrote density volume."
    );
    Ok(volume)
}
