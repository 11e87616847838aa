//! # Core Models Module
//!
//! Data structures describing the molecule being reconstructed.
//!
//! - [`atom`] - A single atom record as read from a structure file
//! - [`elements`] - Static element tables (electron counts used as scattering amplitudes)
//! - [`polymer`] - The coarse-grained polymer, one bead per residue, that every downstream
//!   component indexes positionally
//!
//! ```ignore
//! use cryosphere::core::models::polymer::Polymer;
//!
//! let polymer = Polymer::from_pdb("base.pdb", true)?;
//! assert_eq!(polymer.coords.len(), polymer.num_electrons.len());
//! ```

pub mod atom;
pub mod elements;
pub mod polymer;
