use crate::cli::VolumeArgs;
use crate::error::{CliError, Result};
use cryosphere::engine::config::ImageConfig;
use cryosphere::workflows;
use tracing::info;

pub fn run(args: VolumeArgs) -> Result<()> {
    let image = ImageConfig::load(&args.image_settings).map_err(|e| CliError::FileParsing {
        path: args.image_settings.clone(),
        source: e.into(),
    })?;
    info!(
        "Rendering {:?} on a {}³ grid at {:.3} Å/pixel",
        &args.structure,
        image.npix_downsize,
        image.apix_downsize()
    );

    let volume = workflows::volume::run(&image, &args.structure, &args.output)?;
    println!(
        "✓ Density volume ({} voxels, total {:.2}) written to: {}",
        volume.len(),
        volume.sum(),
        args.output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const PDB: &str = "\
ATOM      1  N   GLY A   1      10.000  12.000  14.000  1.00  0.00           N
ATOM      2  CA  GLY A   1      11.000  12.000  14.000  1.00  0.00           C
END
";

    #[test]
    fn volume_is_written_from_image_settings() {
        let dir = TempDir::new().unwrap();
        let settings = dir.path().join("image.toml");
        fs::write(&settings, "apix = 1.0\nnpix = 16\nnpix-downsize = 8\nsigma-gmm = 2.0\n").unwrap();
        let structure = dir.path().join("model.pdb");
        fs::write(&structure, PDB).unwrap();
        let output = dir.path().join("model.mrc");

        run(VolumeArgs {
            image_settings: settings,
            structure,
            output: output.clone(),
        })
        .unwrap();
        assert!(output.exists());
    }

    #[test]
    fn invalid_image_settings_are_parse_errors() {
        let dir = TempDir::new().unwrap();
        let settings = dir.path().join("image.toml");
        fs::write(&settings, "apix = 1.0\nnpix = 8\nnpix-downsize = 16\nsigma-gmm = 2.0\n").unwrap();
        let result = run(VolumeArgs {
            image_settings: settings,
            structure: dir.path().join("model.pdb"),
            output: dir.path().join("model.mrc"),
        });
        assert!(matches!(result, Err(CliError::FileParsing { .. })));
    }
}
