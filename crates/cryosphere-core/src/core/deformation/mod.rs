//! Segment-wise rigid deformation of a base structure.
//!
//! A soft segmentation assigns every residue a weight per segment; each segment carries a
//! rotation and a translation predicted per image, and residues move by the weighted blend.

pub mod deform;
pub mod segmentation;
