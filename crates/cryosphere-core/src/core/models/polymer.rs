use super::atom::{AtomicStructure, ResidueKind};
use super::elements::electron_count;
use crate::core::io::pdb::{PdbError, PdbFile};
use crate::core::io::traits::StructureFile;
use nalgebra::Point3;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PolymerError {
    #[error("Failed to read structure: {0}")]
    Pdb(#[from] PdbError),
    #[error("Unknown element '{element}' in residue {residue_name} {chain_id}{residue_number}")]
    UnknownElement {
        element: String,
        residue_name: String,
        chain_id: char,
        residue_number: isize,
    },
    #[error("No residue with a representative atom was found in the structure")]
    Empty,
}

/// Coarse-grained polymer: one bead per residue.
///
/// All fields are parallel arrays of the same length and share the ordering of the source
/// file. Every downstream component (Gaussian mixture, segmentation, structural losses) indexes
/// residues positionally into these arrays, so the ordering is part of the contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Polymer {
    pub chain_ids: Vec<char>,
    pub residue_numbers: Vec<isize>,
    pub residue_names: Vec<String>,
    /// Name of the representative atom of each bead ("CA" or "C1'").
    pub atom_names: Vec<String>,
    /// Bead coordinates in Angstroms.
    pub coords: Vec<Point3<f64>>,
    /// Total electron count of each residue, used as the Gaussian amplitude.
    pub num_electrons: Vec<f64>,
}

impl Polymer {
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Coarse grains an all-atom structure.
    ///
    /// Each residue is replaced by its representative atom, carrying the summed electron count
    /// of every atom of the residue. With `filter_amino_acids` only amino-acid residues are
    /// kept; otherwise nucleotides are kept as well. Residues of any other kind, and residues
    /// missing their representative atom, are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`PolymerError::UnknownElement`] if an atom's element has no electron count and
    /// [`PolymerError::Empty`] if no residue survives the filtering.
    pub fn from_structure(
        structure: &AtomicStructure,
        filter_amino_acids: bool,
    ) -> Result<Self, PolymerError> {
        let mut polymer = Polymer::default();
        let mut missing_representative = 0usize;

        for residue in structure.residues() {
            let first = &residue[0];
            let kind = first.residue_kind();
            let keep = match kind {
                ResidueKind::AminoAcid => true,
                ResidueKind::Nucleotide => !filter_amino_acids,
                ResidueKind::Other => false,
            };
            if !keep {
                continue;
            }
            let Some(representative_name) = kind.representative_atom() else {
                continue;
            };
            let Some(representative) = residue.iter().find(|a| a.name == representative_name)
            else {
                missing_representative += 1;
                continue;
            };

            let mut electrons = 0.0;
            for atom in residue {
                let count =
                    electron_count(&atom.element).ok_or_else(|| PolymerError::UnknownElement {
                        element: atom.element.clone(),
                        residue_name: atom.residue_name.clone(),
                        chain_id: atom.chain_id,
                        residue_number: atom.residue_number,
                    })?;
                electrons += f64::from(count);
            }

            polymer.chain_ids.push(first.chain_id);
            polymer.residue_numbers.push(first.residue_number);
            polymer.residue_names.push(first.residue_name.clone());
            polymer.atom_names.push(representative.name.clone());
            polymer.coords.push(representative.position);
            polymer.num_electrons.push(electrons);
        }

        if missing_representative > 0 {
            warn!(
                "{} residue(s) lack their representative atom and were skipped.",
                missing_representative
            );
        }
        if polymer.is_empty() {
            return Err(PolymerError::Empty);
        }
        debug!("Coarse-grained structure to {} residues.", polymer.len());
        Ok(polymer)
    }

    /// Reads the first model of a PDB file and coarse grains it.
    pub fn from_pdb<P: AsRef<Path>>(path: P, filter_amino_acids: bool) -> Result<Self, PolymerError> {
        let path = path.as_ref();
        let structure = PdbFile::read_from_path(path)?;
        let polymer = Self::from_structure(&structure, filter_amino_acids)?;
        info!(
            "Loaded base structure {} with {} residues.",
            path.display(),
            polymer.len()
        );
        Ok(polymer)
    }
}
