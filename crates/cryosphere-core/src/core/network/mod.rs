//! Encoder and decoder networks.
//!
//! Plain multilayer perceptrons over `ndarray`; the encoder maps images to a latent posterior
//! and the decoder maps latent samples to per-segment rigid transforms.

pub mod mlp;
pub mod vae;
