//! # Core Module
//!
//! The computational foundation of cryoSPHERE: molecular models, the Gaussian-mixture image
//! formation model and every numerical kernel used by the forward pipeline.
//!
//! ## Architecture
//!
//! - **Molecular Representation** ([`models`]) - Atoms, coarse-grained polymers and element tables
//! - **File I/O** ([`io`]) - PDB structures, MRC stacks and volumes, particle metadata
//! - **Geometry** ([`geometry`]) - Sampling grids and rotation conventions
//! - **Density** ([`density`]) - Gaussian mixtures and their projection/volume rendering
//! - **Imaging** ([`imaging`]) - Fourier transforms, CTF, masks, filters and image translation
//! - **Deformation** ([`deformation`]) - Segmentation model and rigid-segment deformation
//! - **Networks** ([`network`]) - Encoder/decoder multilayer perceptrons
//! - **Losses** ([`loss`]) - Reconstruction, KL priors and structural regularizers
//!
//! Kernels in [`density`], [`imaging`], [`deformation`] and [`loss`] are pure functions over
//! batches: index `i` of every batched input maps to index `i` of every batched output.

pub mod deformation;
pub mod density;
pub mod geometry;
pub mod imaging;
pub mod io;
pub mod loss;
pub mod models;
pub mod network;
