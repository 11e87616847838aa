//! Image-space and Fourier-space operators of the image-formation model.
//!
//! - [`fourier`] - Centered 2D FFT/IFFT and Fourier-crop downsampling
//! - [`ctf`] - Contrast transfer function evaluated on the centered frequency grid
//! - [`filters`] - Real-space circular masks and Fourier low-pass masks
//! - [`translate`] - Sub-pixel in-plane translation by bilinear resampling
//!
//! None of these operators log; they take inputs by reference and return new values.

pub mod ctf;
pub mod filters;
pub mod fourier;
pub mod translate;
