//! Provides input/output functionality for the file formats of a cryo-EM experiment.
//!
//! Structures are read from PDB files through the [`traits::StructureFile`] interface,
//! particle images and density volumes go through [`mrc`], and particle metadata
//! (poses, translations, CTF parameters, image locations) is read from either a RELION STAR
//! file or a cryoSPARC `.cs` file by [`metadata`], which normalizes both schemas into a single
//! [`metadata::ParticleTable`].

pub mod metadata;
pub mod mrc;
pub mod pdb;
pub mod traits;
