use crate::core::models::polymer::Polymer;
use itertools::Itertools;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type Pair = [usize; 2];

/// Which bead pairs the clashing loss looks at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum ClashMode {
    /// Every pair that is not a connected pair.
    Full,
    /// Pairs whose base-structure distance lies in `(min, max]`, minus connected pairs.
    Cutoff { min: f64, max: f64 },
}

/// Pairs between consecutive residues of the same chain.
///
/// Beads `i` and `i + 1` are connected when they share a chain, their residue numbers differ by
/// exactly one and both use the same representative atom (so an amino acid is never bonded to a
/// nucleotide).
pub fn find_continuous_pairs(chain_ids: &[char], residue_numbers: &[isize], atom_names: &[String]) -> Vec<Pair> {
    let n = chain_ids.len().min(residue_numbers.len()).min(atom_names.len());
    (1..n)
        .filter(|&i| {
            chain_ids[i] == chain_ids[i - 1]
                && residue_numbers[i] - residue_numbers[i - 1] == 1
                && atom_names[i] == atom_names[i - 1]
        })
        .map(|i| [i - 1, i])
        .collect()
}

/// All pairs `i < j` with `min < |x_i - x_j| <= max`, sorted.
pub fn find_range_cutoff_pairs(coords: &[Point3<f64>], min: f64, max: f64) -> Vec<Pair> {
    if coords.is_empty() || max <= 0.0 {
        return Vec::new();
    }
    let points: Vec<[f64; 3]> = coords.iter().map(|p| [p.x, p.y, p.z]).collect();
    let kdtree: KdTree<f64, 3> = (&points).into();
    let (min_sq, max_sq) = (min * min, max * max);

    let mut pairs: Vec<Pair> = points
        .iter()
        .enumerate()
        .flat_map(|(i, q)| {
            kdtree
                .within::<SquaredEuclidean>(q, max_sq)
                .into_iter()
                .filter_map(move |neighbour| {
                    let j = neighbour.item as usize;
                    (j > i && neighbour.distance > min_sq && neighbour.distance <= max_sq)
                        .then_some([i, j])
                })
        })
        .collect();
    pairs.sort_unstable();
    pairs
}

/// Removes from `pairs` every pair also present in `to_remove`, in either orientation.
pub fn remove_duplicate_pairs(pairs: &[Pair], to_remove: &[Pair]) -> Vec<Pair> {
    let removed: HashSet<Pair> = to_remove
        .iter()
        .flat_map(|&[a, b]| [[a, b], [b, a]])
        .collect();
    pairs.iter().copied().filter(|p| !removed.contains(p)).collect()
}

pub fn calc_dist_by_pair_indices(coords: &[Point3<f64>], pairs: &[Pair]) -> Vec<f64> {
    pairs
        .iter()
        .map(|&[a, b]| (coords[a] - coords[b]).norm())
        .collect()
}

/// Pair sets and reference distances for the structural regularizers, computed once from the
/// base structure.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralLossParameters {
    pub connect_pairs: Vec<Pair>,
    pub connect_distances: Vec<f64>,
    pub clash_pairs: Vec<Pair>,
    pub clash_mode: ClashMode,
}

impl StructuralLossParameters {
    pub fn from_polymer(polymer: &Polymer, clash_mode: ClashMode) -> Self {
        let connect_pairs = find_continuous_pairs(
            &polymer.chain_ids,
            &polymer.residue_numbers,
            &polymer.atom_names,
        );
        let connect_distances = calc_dist_by_pair_indices(&polymer.coords, &connect_pairs);
        let candidates = match clash_mode {
            ClashMode::Full => (0..polymer.len())
                .tuple_combinations()
                .map(|(i, j)| [i, j])
                .collect(),
            ClashMode::Cutoff { min, max } => find_range_cutoff_pairs(&polymer.coords, min, max),
        };
        let clash_pairs = remove_duplicate_pairs(&candidates, &connect_pairs);
        Self {
            connect_pairs,
            connect_distances,
            clash_pairs,
            clash_mode,
        }
    }
}

/// Mean squared deviation of the connected-pair distances from their reference values, over the
/// batch and the pairs. Zero without pairs.
pub fn continuity_loss(deformed: &[Vec<Point3<f64>>], params: &StructuralLossParameters) -> f64 {
    let count = deformed.len() * params.connect_pairs.len();
    if count == 0 {
        return 0.0;
    }
    let total: f64 = deformed
        .iter()
        .map(|structure| {
            calc_dist_by_pair_indices(structure, &params.connect_pairs)
                .iter()
                .zip(&params.connect_distances)
                .map(|(d, d0)| (d - d0).powi(2))
                .sum::<f64>()
        })
        .sum();
    total / count as f64
}

/// Mean of `(cutoff - d)²` over the candidate pairs closer than `cutoff`, averaged over the
/// batch. A structure with no clashing pair contributes zero.
pub fn clash_loss(deformed: &[Vec<Point3<f64>>], params: &StructuralLossParameters, cutoff: f64) -> f64 {
    if deformed.is_empty() {
        return 0.0;
    }
    let total: f64 = deformed
        .iter()
        .map(|structure| {
            let (sum, count) = calc_dist_by_pair_indices(structure, &params.clash_pairs)
                .into_iter()
                .filter(|&d| d < cutoff)
                .fold((0.0, 0usize), |(s, c), d| (s + (cutoff - d).powi(2), c + 1));
            if count == 0 { 0.0 } else { sum / count as f64 }
        })
        .sum();
    total / deformed.len() as f64
}
