use ndarray::{Array2, Axis, s};
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Cyclically shifts both axes so that the zero frequency moves to the center (numpy
/// `fftshift` convention: `out[j] = in[(j - n/2) mod n]`).
pub fn fftshift2<T: Clone>(input: &Array2<T>) -> Array2<T> {
    let (rows, cols) = input.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        input[[(r + rows - rows / 2) % rows, (c + cols - cols / 2) % cols]].clone()
    })
}

/// Inverse of [`fftshift2`] (`out[j] = in[(j + n/2) mod n]`); differs from it for odd sizes.
pub fn ifftshift2<T: Clone>(input: &Array2<T>) -> Array2<T> {
    let (rows, cols) = input.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        input[[(r + rows / 2) % rows, (c + cols / 2) % cols]].clone()
    })
}

/// Centered 2D discrete Fourier transforms of square images of a fixed side.
///
/// `to_fourier(x) = fftshift(fft2(ifftshift(x)))` and
/// `to_primal(X) = real(fftshift(ifft2(ifftshift(X))))`, with the inverse normalized by `1/n²`
/// so that the pair round-trips exactly up to floating-point error.
#[derive(Clone)]
pub struct FourierTransform {
    side: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for FourierTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FourierTransform").field("side", &self.side).finish()
    }
}

impl FourierTransform {
    pub fn new(side: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            side,
            forward: planner.plan_fft_forward(side),
            inverse: planner.plan_fft_inverse(side),
        }
    }

    pub fn side(&self) -> usize {
        self.side
    }

    fn fft2(&self, data: &mut Array2<Complex64>, plan: &Arc<dyn Fft<f64>>) {
        let n = self.side;
        let mut scratch = vec![Complex64::default(); plan.get_inplace_scratch_len()];
        let mut line = vec![Complex64::default(); n];
        for axis in [Axis(1), Axis(0)] {
            for mut lane in data.lanes_mut(axis) {
                for (dst, src) in line.iter_mut().zip(lane.iter()) {
                    *dst = *src;
                }
                plan.process_with_scratch(&mut line, &mut scratch);
                for (dst, src) in lane.iter_mut().zip(line.iter()) {
                    *dst = *src;
                }
            }
        }
    }

    /// Transforms a real image to its centered spectrum.
    pub fn to_fourier(&self, image: &Array2<f64>) -> Array2<Complex64> {
        let mut data = ifftshift2(&image.mapv(|v| Complex64::new(v, 0.0)));
        self.fft2(&mut data, &self.forward);
        fftshift2(&data)
    }

    /// Transforms a complex image (e.g. a CTF-corrupted spectrum back to real space before
    /// taking the real part) to its centered spectrum.
    pub fn to_fourier_complex(&self, image: &Array2<Complex64>) -> Array2<Complex64> {
        let mut data = ifftshift2(image);
        self.fft2(&mut data, &self.forward);
        fftshift2(&data)
    }

    /// Transforms a centered spectrum back to a real image (real part of the inverse).
    pub fn to_primal(&self, spectrum: &Array2<Complex64>) -> Array2<f64> {
        let mut data = ifftshift2(spectrum);
        self.fft2(&mut data, &self.inverse);
        let norm = (self.side * self.side) as f64;
        fftshift2(&data).mapv(|c| c.re / norm)
    }

    pub fn to_fourier_batch(&self, images: &[Array2<f64>]) -> Vec<Array2<Complex64>> {
        #[cfg(not(feature = "parallel"))]
        let iterator = images.iter();
        #[cfg(feature = "parallel")]
        let iterator = images.par_iter();

        iterator.map(|image| self.to_fourier(image)).collect()
    }

    pub fn to_primal_batch(&self, spectra: &[Array2<Complex64>]) -> Vec<Array2<f64>> {
        #[cfg(not(feature = "parallel"))]
        let iterator = spectra.iter();
        #[cfg(feature = "parallel")]
        let iterator = spectra.par_iter();

        iterator.map(|spectrum| self.to_primal(spectrum)).collect()
    }

    /// Downsamples an image of this transform's side to `target`'s side by keeping the central
    /// block of its centered spectrum. The result is rescaled so that a constant image keeps its
    /// value.
    pub fn fourier_crop(&self, image: &Array2<f64>, target: &FourierTransform) -> Array2<f64> {
        if target.side == self.side {
            return image.clone();
        }
        let spectrum = self.to_fourier(image);
        let start = self.side / 2 - target.side / 2;
        let cropped = spectrum
            .slice(s![start..start + target.side, start..start + target.side])
            .to_owned();
        let scale = (target.side as f64 / self.side as f64).powi(2);
        target.to_primal(&cropped).mapv(|v| v * scale)
    }
}
