//! # cryoSPHERE Core Library
//!
//! Heterogeneous reconstruction of polymer structures from cryo-EM particle images. A base
//! structure is turned into a Gaussian mixture, rigidly deformed segment by segment, projected
//! under each particle's pose, corrupted by the microscope's contrast transfer function and
//! compared to the experimental image in Fourier space.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Polymer`, `GaussianMixture`),
//!   pure numerical kernels (rendering, deformation, CTF, Fourier transforms, losses) and file
//!   I/O (PDB, MRC, STAR, cryoSPARC). Nothing in the numerical kernels logs or mutates shared
//!   state; they return values.
//!
//! - **[`engine`]: The Logic Core.** Configuration, the error taxonomy, the particle dataset
//!   and loader, the trainable model state and the batched forward pipeline that ties the
//!   kernels together.
//!
//! - **[`workflows`]: The Public API.** Complete procedures such as evaluating a model over a
//!   dataset or converting a structure into a density volume.

pub mod core;
pub mod engine;
pub mod workflows;
