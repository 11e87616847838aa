//! Gaussian-mixture density of the coarse-grained structure and its rendering.
//!
//! - [`gmm`] - Per-residue Gaussian centers, widths and amplitudes
//! - [`renderer`] - Projection of (deformed, posed) mixtures onto a 2D grid and evaluation on a
//!   3D volume

pub mod gmm;
pub mod renderer;
