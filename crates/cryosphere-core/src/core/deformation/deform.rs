use crate::core::geometry::rotation::{axis_angle_to_quaternion, quaternion_to_axis_angle};
use nalgebra::{Matrix3, Point3, Vector3};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeformError {
    #[error("At least one segment is required to deform a structure")]
    NoSegments,
    #[error("Segmentation of batch element {index} has shape {found:?}, expected {expected:?}")]
    SegmentationShape {
        index: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("Batch element {index} has {quaternions} quaternions and {translations} translations for {segments} segments")]
    TransformCount {
        index: usize,
        segments: usize,
        quaternions: usize,
        translations: usize,
    },
    #[error("Got {transforms} transform sets for {segmentations} segmentations")]
    BatchMismatch {
        transforms: usize,
        segmentations: usize,
    },
}

/// Rigid motion of every segment for one image.
///
/// Quaternions are `(w, x, y, z)` and need not be unit; only their direction is used.
/// Translations are in Angstroms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentTransforms {
    pub quaternions: Vec<[f64; 4]>,
    pub translations: Vec<Vector3<f64>>,
}

impl SegmentTransforms {
    pub fn identity(n_segments: usize) -> Self {
        Self {
            quaternions: vec![[1.0, 0.0, 0.0, 0.0]; n_segments],
            translations: vec![Vector3::zeros(); n_segments],
        }
    }

    pub fn n_segments(&self) -> usize {
        self.quaternions.len()
    }
}

fn check_shapes(
    index: usize,
    n_residues: usize,
    transforms: &SegmentTransforms,
    segmentation: &Array2<f64>,
) -> Result<(), DeformError> {
    let n_segments = transforms.n_segments();
    if n_segments == 0 || segmentation.ncols() == 0 {
        return Err(DeformError::NoSegments);
    }
    if transforms.translations.len() != n_segments {
        return Err(DeformError::TransformCount {
            index,
            segments: n_segments,
            quaternions: transforms.quaternions.len(),
            translations: transforms.translations.len(),
        });
    }
    if segmentation.dim() != (n_residues, n_segments) {
        return Err(DeformError::SegmentationShape {
            index,
            expected: (n_residues, n_segments),
            found: segmentation.dim(),
        });
    }
    Ok(())
}

fn check_batch(
    positions: &[Point3<f64>],
    transforms: &[SegmentTransforms],
    segmentations: &[Array2<f64>],
) -> Result<(), DeformError> {
    if transforms.len() != segmentations.len() {
        return Err(DeformError::BatchMismatch {
            transforms: transforms.len(),
            segmentations: segmentations.len(),
        });
    }
    for (index, (t, seg)) in transforms.iter().zip(segmentations).enumerate() {
        check_shapes(index, positions.len(), t, seg)?;
    }
    Ok(())
}

/// Deforms one structure.
///
/// For residue `r`, each segment's rotation is scaled in axis-angle space by `seg[r, s]` and
/// the scaled rotations are applied in ascending segment order (segment 0 first). The residue
/// is then moved by `Σ_s seg[r, s] · t_s`.
fn deform_one(
    positions: &[Point3<f64>],
    transforms: &SegmentTransforms,
    segmentation: &Array2<f64>,
) -> Vec<Point3<f64>> {
    let axis_angles: Vec<Vector3<f64>> = transforms
        .quaternions
        .iter()
        .map(quaternion_to_axis_angle)
        .collect();

    positions
        .iter()
        .zip(segmentation.rows())
        .map(|(position, weights)| {
            let mut moved = position.coords;
            let mut translation = Vector3::zeros();
            for ((axis_angle, t), &w) in axis_angles
                .iter()
                .zip(&transforms.translations)
                .zip(weights.iter())
            {
                moved = axis_angle_to_quaternion(&(axis_angle * w)) * moved;
                translation += t * w;
            }
            Point3::from(moved + translation)
        })
        .collect()
}

/// Deforms the base structure once per batch element.
///
/// `positions` has one entry per residue; `segmentations[b]` is `(n_residues, n_segments)`.
/// Residue order is preserved.
pub fn deform(
    positions: &[Point3<f64>],
    transforms: &[SegmentTransforms],
    segmentations: &[Array2<f64>],
) -> Result<Vec<Vec<Point3<f64>>>, DeformError> {
    check_batch(positions, transforms, segmentations)?;

    #[cfg(not(feature = "parallel"))]
    let iterator = transforms.iter().zip(segmentations.iter());
    #[cfg(feature = "parallel")]
    let iterator = transforms.par_iter().zip(segmentations.par_iter());

    Ok(iterator
        .map(|(t, seg)| deform_one(positions, t, seg))
        .collect())
}

/// Overall rotation matrix of each residue: `R_{S-1} ··· R_1 · R_0`, where `R_s` is the
/// segmentation-scaled rotation of segment `s`.
pub fn rotation_matrices_per_residue(
    n_residues: usize,
    transforms: &SegmentTransforms,
    segmentation: &Array2<f64>,
) -> Result<Vec<Matrix3<f64>>, DeformError> {
    check_shapes(0, n_residues, transforms, segmentation)?;
    let axis_angles: Vec<Vector3<f64>> = transforms
        .quaternions
        .iter()
        .map(quaternion_to_axis_angle)
        .collect();
    Ok(segmentation
        .rows()
        .into_iter()
        .map(|weights| {
            axis_angles
                .iter()
                .zip(weights.iter())
                .map(|(aa, &w)| axis_angle_to_quaternion(&(aa * w)).to_rotation_matrix().into_inner())
                .rev()
                .fold(Matrix3::identity(), |acc, r| acc * r)
        })
        .collect())
}

/// Matrix form of [`deform`]: builds the composed per-residue rotation matrices and applies
/// them in one product. Produces the same positions as the sequential form.
pub fn deform_with_matrices(
    positions: &[Point3<f64>],
    transforms: &[SegmentTransforms],
    segmentations: &[Array2<f64>],
) -> Result<Vec<Vec<Point3<f64>>>, DeformError> {
    check_batch(positions, transforms, segmentations)?;
    transforms
        .iter()
        .zip(segmentations)
        .map(|(t, seg)| {
            let rotations = rotation_matrices_per_residue(positions.len(), t, seg)?;
            Ok(positions
                .iter()
                .zip(rotations)
                .zip(seg.rows())
                .map(|((p, r), weights)| {
                    let translation = t
                        .translations
                        .iter()
                        .zip(weights.iter())
                        .fold(Vector3::zeros(), |acc, (tv, &w)| acc + tv * w);
                    Point3::from(r * p.coords + translation)
                })
                .collect())
        })
        .collect()
}
