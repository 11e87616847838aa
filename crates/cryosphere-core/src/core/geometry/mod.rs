//! Spatial conventions shared by the imaging pipeline.
//!
//! - [`grid`] - Sampling lattices of physical coordinates at a pixel size
//! - [`rotation`] - Pose conventions (RELION Euler angles, cryoSPARC rotation vectors) and the
//!   quaternion / axis-angle conversions used by the deformation model

pub mod grid;
pub mod rotation;
