use crate::core::models::atom::AtomicStructure;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Defines the interface for reading macromolecular structure formats.
///
/// Implementors handle format-specific parsing; the provided methods take care of opening
/// files and checking that the path carries the extension the format expects.
pub trait StructureFile {
    /// The error type for I/O and parsing operations.
    type Error: Error + From<io::Error>;

    /// File extension (without the dot) accepted by [`StructureFile::read_from_path`].
    const EXTENSION: &'static str;

    /// Reads the first model of a structure from a buffered reader.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails or I/O operations encounter issues.
    fn read_from(reader: &mut impl BufRead) -> Result<AtomicStructure, Self::Error>;

    /// Builds the error reported when a path does not carry [`StructureFile::EXTENSION`].
    fn unsupported_extension(path: &Path) -> Self::Error;

    /// Reads a structure from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the extension is not the format's, the file cannot be opened or
    /// parsing fails.
    fn read_from_path<P: AsRef<Path>>(path: P) -> Result<AtomicStructure, Self::Error> {
        let path = path.as_ref();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(Self::EXTENSION));
        if !matches {
            return Err(Self::unsupported_extension(path));
        }
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader)
    }
}
