//! # Workflows Module
//!
//! Top-level entry points of cryoSPHERE. Each workflow loads its inputs, drives the engine and
//! writes its outputs, reporting progress along the way.
//!
//! - **Evaluation** ([`evaluate`]) - Runs the forward pipeline and the full objective over a
//!   particle dataset, writing checkpoints, per-batch metrics and the run log.
//! - **Volume Rendering** ([`volume`]) - Converts an atomic structure into a density volume on
//!   the downsampled base grid.

pub mod evaluate;
pub mod volume;
