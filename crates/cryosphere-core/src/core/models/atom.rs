use super::elements::{AMINO_ACID_NAMES, NUCLEOTIDE_NAMES};
use nalgebra::Point3;
use std::str::FromStr;

/// Classification of the residue an atom belongs to.
///
/// The coarse-graining step keeps a single representative bead per residue, and which
/// atom represents the residue depends on this classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResidueKind {
    /// Standard or common non-standard amino acid.
    AminoAcid,
    /// Ribo- or deoxyribonucleotide.
    Nucleotide,
    /// Anything else (ligands, ions, water).
    #[default]
    Other,
}

impl ResidueKind {
    /// Classifies a residue from its three-letter (or shorter) name.
    pub fn from_residue_name(name: &str) -> Self {
        let upper = name.trim().to_ascii_uppercase();
        if AMINO_ACID_NAMES.contains(upper.as_str()) {
            ResidueKind::AminoAcid
        } else if NUCLEOTIDE_NAMES.contains(upper.as_str()) {
            ResidueKind::Nucleotide
        } else {
            ResidueKind::Other
        }
    }

    /// Name of the atom that stands in for the whole residue after coarse graining.
    pub fn representative_atom(&self) -> Option<&'static str> {
        match self {
            ResidueKind::AminoAcid => Some("CA"),
            ResidueKind::Nucleotide => Some("C1'"),
            ResidueKind::Other => None,
        }
    }
}

impl FromStr for ResidueKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "amino-acid" | "amino_acid" | "aa" | "protein" => Ok(ResidueKind::AminoAcid),
            "nucleotide" | "nt" | "nucleic-acid" => Ok(ResidueKind::Nucleotide),
            "other" => Ok(ResidueKind::Other),
            _ => Err(()),
        }
    }
}

/// A single atom record from a macromolecular structure file.
///
/// Records are immutable after loading; their order in the owning [`AtomicStructure`] is the
/// order of the file.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    /// Serial number from the file.
    pub serial: usize,
    /// Atom name (e.g., "CA", "C1'").
    pub name: String,
    /// Three-letter residue name (e.g., "ALA").
    pub residue_name: String,
    /// Single-character chain identifier.
    pub chain_id: char,
    /// Residue sequence number within the chain.
    pub residue_number: isize,
    /// Element symbol in upper case (e.g., "C", "SE").
    pub element: String,
    /// Cartesian coordinates in Angstroms.
    pub position: Point3<f64>,
    /// Whether the record was a HETATM record.
    pub is_hetero: bool,
}

impl Atom {
    /// Creates an atom with the given identity and position; the element is inferred from
    /// the atom name and can be overwritten afterwards.
    pub fn new(
        name: &str,
        residue_name: &str,
        chain_id: char,
        residue_number: isize,
        position: Point3<f64>,
    ) -> Self {
        Self {
            serial: 0,
            name: name.to_string(),
            residue_name: residue_name.to_string(),
            chain_id,
            residue_number,
            element: infer_element(name),
            position,
            is_hetero: false,
        }
    }

    pub fn residue_kind(&self) -> ResidueKind {
        ResidueKind::from_residue_name(&self.residue_name)
    }
}

/// Guesses an element symbol from an atom name when the element columns are blank.
pub fn infer_element(atom_name: &str) -> String {
    atom_name
        .trim()
        .chars()
        .find(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase().to_string())
        .unwrap_or_default()
}

/// An all-atom structure: the first model of a structure file, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomicStructure {
    pub atoms: Vec<Atom>,
}

impl AtomicStructure {
    pub fn new(atoms: Vec<Atom>) -> Self {
        Self { atoms }
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Iterates over residues as contiguous runs of atoms sharing chain and residue number.
    pub fn residues(&self) -> impl Iterator<Item = &[Atom]> {
        self.atoms
            .chunk_by(|a, b| a.chain_id == b.chain_id && a.residue_number == b.residue_number)
    }
}
