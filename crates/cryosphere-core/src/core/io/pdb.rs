use crate::core::io::traits::StructureFile;
use crate::core::models::atom::{Atom, AtomicStructure, infer_element};
use itertools::Itertools;
use nalgebra::Point3;
use pdbtbx::{Format, PDB, ReadOptions, StrictnessLevel};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PdbError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid PDB content: {0}")]
    Parse(String),
    #[error("Unsupported structure file '{path}': only .pdb files are supported", path = path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("Structure file contains no ATOM/HETATM records")]
    Empty,
}

/// Reads PDB files through `pdbtbx`, keeping the first model and the first alternate location
/// of every residue.
pub struct PdbFile;

impl PdbFile {
    fn atoms_of_first_model(pdb: &PDB) -> Vec<Atom> {
        let Some(model) = pdb.models().next() else {
            return Vec::new();
        };
        let mut atoms = Vec::new();
        for chain in model.chains() {
            let chain_id = chain.id().chars().next().unwrap_or('A');
            for residue in chain.residues() {
                let primary = residue.conformers().find_map(|c| c.alternative_location());
                for conformer in residue.conformers() {
                    let alt_loc = conformer.alternative_location();
                    if alt_loc.is_some() && alt_loc != primary {
                        continue;
                    }
                    for atom in conformer.atoms() {
                        let (x, y, z) = atom.pos();
                        let element = atom
                            .element()
                            .map(|e| e.symbol().to_ascii_uppercase())
                            .unwrap_or_else(|| infer_element(atom.name()));
                        atoms.push(Atom {
                            serial: atom.serial_number(),
                            name: atom.name().trim().to_string(),
                            residue_name: conformer.name().trim().to_string(),
                            chain_id,
                            residue_number: residue.serial_number(),
                            element,
                            position: Point3::new(x, y, z),
                            is_hetero: atom.hetero(),
                        });
                    }
                }
            }
        }
        atoms
    }
}

impl StructureFile for PdbFile {
    type Error = PdbError;

    const EXTENSION: &'static str = "pdb";

    fn read_from(reader: &mut impl BufRead) -> Result<AtomicStructure, Self::Error> {
        let (pdb, warnings) = ReadOptions::default()
            .set_format(Format::Pdb)
            .set_level(StrictnessLevel::Loose)
            .read_raw(BufReader::new(reader))
            .map_err(|errors| PdbError::Parse(errors.iter().join("; ")))?;
        if !warnings.is_empty() {
            debug!(warnings = warnings.len(), "PDB parser reported warnings.");
        }
        if pdb.model_count() > 1 {
            warn!("More than one model in the structure file. Using the first one.");
        }

        let atoms = Self::atoms_of_first_model(&pdb);
        if atoms.is_empty() {
            return Err(PdbError::Empty);
        }
        Ok(AtomicStructure::new(atoms))
    }

    fn unsupported_extension(path: &Path) -> Self::Error {
        PdbError::UnsupportedFormat {
            path: path.to_path_buf(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::BufReader;
    use tempfile::tempdir;

    /// Formats one ATOM record with the fixed PDB column layout.
    pub(crate) fn atom_line(
        serial: usize,
        name: &str,
        res_name: &str,
        chain: char,
        res_id: isize,
        xyz: [f64; 3],
        element: &str,
    ) -> String {
        format!(
            "ATOM  {:>5} {:<4} {:>3} {}{:>4}    {:>8.3}{:>8.3}{:>8.3}{:>6.2}{:>6.2}          {:>2}",
            serial, name, res_name, chain, res_id, xyz[0], xyz[1], xyz[2], 1.0, 0.0, element
        )
    }

    fn read_str(content: &str) -> Result<AtomicStructure, PdbError> {
        PdbFile::read_from(&mut BufReader::new(content.as_bytes()))
    }

    #[test]
    fn reads_atom_records_in_file_order() {
        let content = [
            atom_line(1, "N", "ALA", 'A', 1, [1.0, 2.0, 3.0], "N"),
            atom_line(2, "CA", "ALA", 'A', 1, [2.0, 2.0, 3.0], "C"),
            atom_line(3, "CA", "GLY", 'B', 7, [-1.5, 0.25, 10.0], "C"),
            "END".to_string(),
        ]
        .join("\n");

        let structure = read_str(&content).unwrap();
        assert_eq!(structure.len(), 3);
        assert_eq!(structure.atoms[1].name, "CA");
        assert_eq!(structure.atoms[1].element, "C");
        assert_eq!(structure.atoms[2].chain_id, 'B');
        assert_eq!(structure.atoms[2].residue_number, 7);
        assert_eq!(structure.atoms[2].position, Point3::new(-1.5, 0.25, 10.0));
    }

    #[test]
    fn only_the_first_model_is_read() {
        let content = [
            "MODEL        1".to_string(),
            atom_line(1, "CA", "ALA", 'A', 1, [0.0, 0.0, 0.0], "C"),
            "ENDMDL".to_string(),
            "MODEL        2".to_string(),
            atom_line(1, "CA", "ALA", 'A', 1, [5.0, 0.0, 0.0], "C"),
            "ENDMDL".to_string(),
        ]
        .join("\n");

        let structure = read_str(&content).unwrap();
        assert_eq!(structure.len(), 1);
        assert_eq!(structure.atoms[0].position.x, 0.0);
    }

    #[test]
    fn blank_element_columns_are_inferred_from_atom_name() {
        let mut line = atom_line(1, "SD", "MET", 'A', 1, [0.0, 0.0, 0.0], "");
        line.truncate(66);
        let structure = read_str(&line).unwrap();
        assert_eq!(structure.atoms[0].element, "S");
    }

    #[test]
    fn invalid_coordinate_is_a_parse_error() {
        let line = atom_line(1, "CA", "ALA", 'A', 1, [0.0, 0.0, 0.0], "C").replacen("   0.000", "   abcde", 1);
        assert!(matches!(read_str(&line), Err(PdbError::Parse(_))));
    }

    #[test]
    fn only_the_first_alternate_location_is_kept() {
        let with_alt = |line: String, alt: char| {
            let mut chars: Vec<char> = line.chars().collect();
            chars[16] = alt;
            chars.into_iter().collect::<String>()
        };
        let content = [
            atom_line(1, "N", "SER", 'A', 1, [0.0, 0.0, 0.0], "N"),
            with_alt(atom_line(2, "CA", "SER", 'A', 1, [1.0, 0.0, 0.0], "C"), 'A'),
            with_alt(atom_line(3, "CA", "SER", 'A', 1, [1.2, 0.3, 0.0], "C"), 'B'),
            atom_line(4, "CA", "GLY", 'A', 2, [4.8, 0.0, 0.0], "C"),
        ]
        .join("\n");

        let structure = read_str(&content).unwrap();
        let cas: Vec<_> = structure.atoms.iter().filter(|a| a.name == "CA").collect();
        assert_eq!(cas.len(), 2);
        assert_eq!(cas[0].position, Point3::new(1.0, 0.0, 0.0));
        assert_eq!(structure.residues().count(), 2);
    }

    #[test]
    fn hetero_records_are_flagged() {
        let line = atom_line(1, "MG", "MG", 'A', 101, [0.0, 0.0, 0.0], "MG").replacen("ATOM  ", "HETATM", 1);
        let structure = read_str(&line).unwrap();
        assert!(structure.atoms[0].is_hetero);
        assert_eq!(structure.atoms[0].element, "MG");
    }

    #[test]
    fn structure_without_atoms_is_rejected() {
        assert!(matches!(read_str("END\n"), Err(PdbError::Empty | PdbError::Parse(_))));
    }

    #[test]
    fn non_pdb_extension_is_a_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("structure.cif");
        std::fs::write(&path, atom_line(1, "CA", "ALA", 'A', 1, [0.0; 3], "C")).unwrap();
        let result = PdbFile::read_from_path(&path);
        assert!(matches!(result, Err(PdbError::UnsupportedFormat { .. })));
    }

    #[test]
    fn read_from_path_succeeds_for_pdb_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("structure.pdb");
        std::fs::write(&path, atom_line(1, "CA", "ALA", 'A', 1, [0.0; 3], "C")).unwrap();
        let structure = PdbFile::read_from_path(&path).unwrap();
        assert_eq!(structure.len(), 1);
    }
}
