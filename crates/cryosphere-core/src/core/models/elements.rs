use phf::{Map, Set, phf_map, phf_set};

/// Number of electrons of the neutral atom, used as the scattering amplitude of each atom.
#[rustfmt::skip]
pub static ELECTRON_COUNTS: Map<&'static str, u32> = phf_map! {
    "H" => 1, "D" => 1, "HE" => 2,
    "LI" => 3, "BE" => 4, "B" => 5, "C" => 6, "N" => 7, "O" => 8, "F" => 9, "NE" => 10,
    "NA" => 11, "MG" => 12, "AL" => 13, "SI" => 14, "P" => 15, "S" => 16, "CL" => 17, "AR" => 18,
    "K" => 19, "CA" => 20, "MN" => 25, "FE" => 26, "CO" => 27, "NI" => 28, "CU" => 29, "ZN" => 30,
    "SE" => 34, "BR" => 35, "MO" => 42, "CD" => 48, "I" => 53, "W" => 74, "PT" => 78, "AU" => 79,
    "HG" => 80, "PB" => 82, "U" => 92,
};

#[rustfmt::skip]
pub static AMINO_ACID_NAMES: Set<&'static str> = phf_set! {
    "ALA", "ARG", "ASN", "ASP", "CYS", "GLN", "GLU", "GLY", "HIS", "ILE",
    "LEU", "LYS", "MET", "PHE", "PRO", "SER", "THR", "TRP", "TYR", "VAL",
    // Common non-standard and protonation-state variants
    "MSE", "SEC", "PYL", "HSD", "HSE", "HSP", "HIE", "HID", "HIP", "CYX",
};

#[rustfmt::skip]
pub static NUCLEOTIDE_NAMES: Set<&'static str> = phf_set! {
    "A", "C", "G", "U", "T", "DA", "DC", "DG", "DT", "DU",
    "ADE", "CYT", "GUA", "URA", "THY",
};

/// Looks up the electron count of an element symbol, case-insensitively.
pub fn electron_count(element: &str) -> Option<u32> {
    ELECTRON_COUNTS
        .get(element.trim().to_ascii_uppercase().as_str())
        .copied()
}
