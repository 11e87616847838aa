use super::config::ConfigError;
use crate::core::deformation::deform::DeformError;
use crate::core::deformation::segmentation::SegmentationError;
use crate::core::density::gmm::GmmError;
use crate::core::density::renderer::RenderError;
use crate::core::imaging::ctf::CtfError;
use crate::core::imaging::translate::TranslateError;
use crate::core::io::metadata::MetadataError;
use crate::core::io::mrc::MrcError;
use crate::core::io::pdb::PdbError;
use crate::core::loss::LossError;
use crate::core::models::polymer::PolymerError;
use crate::core::network::mlp::NetworkError;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Numeric instability: loss term '{term}' evaluated to {value}")]
    NumericInstability { term: String, value: f64 },

    #[error("I/O error on '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Attaches the structure path to a structure loading failure.
    pub fn structure(path: impl AsRef<Path>, error: PolymerError) -> Self {
        match error {
            PolymerError::Pdb(PdbError::Io(source)) => Self::io(path, source),
            other => Self::Format(format!("{}: {}", path.as_ref().display(), other)),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl From<MrcError> for EngineError {
    fn from(e: MrcError) -> Self {
        match e {
            MrcError::Io { path, source } => Self::Io { path, source },
            other => Self::Format(other.to_string()),
        }
    }
}

impl From<MetadataError> for EngineError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::Io { path, source } => Self::Io { path, source },
            other => Self::Format(other.to_string()),
        }
    }
}

impl From<CtfError> for EngineError {
    fn from(e: CtfError) -> Self {
        match e {
            CtfError::IndexOutOfRange { .. } => Self::ShapeMismatch(e.to_string()),
            CtfError::InvalidGeometry { .. } => Self::Configuration(e.to_string()),
        }
    }
}

impl From<GmmError> for EngineError {
    fn from(e: GmmError) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl From<SegmentationError> for EngineError {
    fn from(e: SegmentationError) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl From<DeformError> for EngineError {
    fn from(e: DeformError) -> Self {
        match e {
            DeformError::NoSegments => Self::Configuration(e.to_string()),
            other => Self::ShapeMismatch(other.to_string()),
        }
    }
}

impl From<RenderError> for EngineError {
    fn from(e: RenderError) -> Self {
        Self::ShapeMismatch(e.to_string())
    }
}

impl From<TranslateError> for EngineError {
    fn from(e: TranslateError) -> Self {
        Self::ShapeMismatch(e.to_string())
    }
}

impl From<NetworkError> for EngineError {
    fn from(e: NetworkError) -> Self {
        Self::ShapeMismatch(e.to_string())
    }
}

impl From<LossError> for EngineError {
    fn from(e: LossError) -> Self {
        match e {
            LossError::NumericInstability { term, value } => Self::NumericInstability {
                term: term.to_string(),
                value,
            },
            other => Self::ShapeMismatch(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_errors_map_onto_the_taxonomy() {
        assert!(matches!(
            EngineError::from(DeformError::NoSegments),
            EngineError::Configuration(_)
        ));
        assert!(matches!(
            EngineError::from(RenderError::PoseCount { structures: 2, poses: 1 }),
            EngineError::ShapeMismatch(_)
        ));
        assert!(matches!(
            EngineError::from(LossError::NumericInstability { term: "clashing", value: f64::NAN }),
            EngineError::NumericInstability { ref term, .. } if term == "clashing"
        ));
        assert!(matches!(
            EngineError::from(MetadataError::UnsupportedFormat { path: "x.csv".into() }),
            EngineError::Format(_)
        ));
    }

    #[test]
    fn structure_io_failures_keep_the_path() {
        let err = EngineError::structure(
            "missing.pdb",
            PolymerError::Pdb(PdbError::Io(std::io::Error::from(std::io::ErrorKind::NotFound))),
        );
        assert!(matches!(err, EngineError::Io { ref path, .. } if path == Path::new("missing.pdb")));
        assert!(matches!(
            EngineError::structure("x.pdb", PolymerError::Empty),
            EngineError::Format(_)
        ));
    }
}
