//! Particle metadata from RELION and cryoSPARC.
//!
//! Both readers produce a [`ParticleTable`] with the same derived quantities: a pose rotation
//! that left-multiplies atom coordinates, a translation in Angstroms ordered (Y, X), the CTF
//! parameters in the units the CTF model expects, and the location of the particle image.
//! Two files describing the same particles yield equal tables.

pub mod cryosparc;
pub mod npy;
pub mod star;

use nalgebra::Matrix3;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("I/O error on '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unrecognized metadata file '{path}': expected a .star or .cs file", path = path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("STAR parse error on line {line}: {message}")]
    Star { line: usize, message: String },
    #[error("Invalid NumPy record file: {0}")]
    Npy(String),
    #[error("Required column '{0}' is missing")]
    MissingColumn(String),
    #[error("Invalid value '{value}' in column '{column}' of row {row}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },
    #[error("Particle {row} refers to unknown optics group '{group}'")]
    UnknownOpticsGroup { row: usize, group: String },
    #[error("Inconsistent metadata: {0}")]
    Inconsistent(String),
    #[error("The metadata file describes no particles")]
    Empty,
}

/// Per-particle CTF parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CtfParameters {
    /// Defocus along the major axis, Angstroms.
    pub defocus_u: f64,
    /// Defocus along the minor axis, Angstroms.
    pub defocus_v: f64,
    /// Astigmatism angle, degrees.
    pub defocus_angle: f64,
    /// Acceleration voltage, kV.
    pub voltage: f64,
    /// Spherical aberration, mm.
    pub spherical_aberration: f64,
    pub amplitude_contrast: f64,
    /// Phase shift, degrees.
    pub phase_shift: f64,
    pub scale: f64,
    pub b_factor: f64,
}

/// Location of a particle image: a frame of an MRC stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLocation {
    /// Stack path as written in the metadata, relative to the particles directory.
    pub path: PathBuf,
    /// Zero-based frame index within the stack.
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    Star,
    CryoSparc,
}

/// The normalized particle table, one row per particle, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleTable {
    pub source: MetadataSource,
    pub rotations: Vec<Matrix3<f64>>,
    /// In-plane translations in Angstroms, ordered (Y, X).
    pub translations: Vec<[f64; 2]>,
    pub ctf: Vec<CtfParameters>,
    pub images: Vec<ImageLocation>,
}

impl ParticleTable {
    pub fn len(&self) -> usize {
        self.rotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rotations.is_empty()
    }

    /// Loads a metadata file, dispatching on its extension.
    ///
    /// `apix` is the pixel size of the original images; it converts RELION translations given
    /// in pixels and cryoSPARC shifts when the file carries no pixel size of its own.
    pub fn load<P: AsRef<Path>>(path: P, apix: f64) -> Result<Self, MetadataError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let table = match extension.as_deref() {
            Some("star") => star::read_star(path, apix)?,
            Some("cs") => cryosparc::read_cs(path, apix)?,
            _ => {
                return Err(MetadataError::UnsupportedFormat {
                    path: path.to_path_buf(),
                });
            }
        };
        if table.is_empty() {
            return Err(MetadataError::Empty);
        }
        info!(
            "Loaded {} particles from {} ({:?}).",
            table.len(),
            path.display(),
            table.source
        );
        Ok(table)
    }

    pub(crate) fn check_lengths(&self) -> Result<(), MetadataError> {
        let n = self.rotations.len();
        if self.translations.len() != n || self.ctf.len() != n || self.images.len() != n {
            return Err(MetadataError::Inconsistent(format!(
                "column lengths disagree: {} rotations, {} translations, {} CTF rows, {} images",
                n,
                self.translations.len(),
                self.ctf.len(),
                self.images.len()
            )));
        }
        Ok(())
    }
}
