//! # Engine Module
//!
//! The logic core of cryoSPHERE: everything that turns the stateless kernels of
//! [`crate::core`] into an experiment over a particle dataset.
//!
//! ## Overview
//!
//! An experiment is described once by an immutable [`config::ExperimentConfig`]. Setup loads
//! the base structure, the particle metadata and the image stacks into an
//! [`context::ExperimentContext`], which also holds every quantity fixed for the run (Gaussian
//! mixture, CTF model, sampling grid, masks, structural pair sets, segmentation prior). The
//! trainable parameters live separately in a [`state::ModelState`], so the batched forward
//! pass in [`pipeline`] only ever borrows them.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Experiment settings and their validating builder
//! - **Data** ([`dataset`]) - Particle images, poses and translations, and the batch loader
//! - **Model State** ([`state`]) - Networks and segmentation parameters, with checkpoints
//! - **Forward Pipeline** ([`pipeline`]) - Encoding, deformation, rendering, CTF and losses
//! - **Progress Monitoring** ([`progress`]) - Callback-based reporting for front ends
//! - **Error Handling** ([`error`]) - The error taxonomy shared by every workflow

pub mod config;
pub mod context;
pub mod dataset;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod state;
