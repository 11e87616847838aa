use super::ctf::centered_frequencies;
use super::fourier::FourierTransform;
use ndarray::Array2;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Circular real-space mask on the normalized `[-1, 1]²` image grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    mask: Array2<f64>,
    num_masked: usize,
}

impl Mask {
    /// Keeps pixels strictly inside the circle of radius `rad` (1 reaches the image edge).
    pub fn new(im_size: usize, rad: f64) -> Self {
        let line = linspace(-1.0, 1.0, im_size);
        let mask = Array2::from_shape_fn((im_size, im_size), |(r, c)| {
            if line[c] * line[c] + line[r] * line[r] < rad * rad {
                1.0
            } else {
                0.0
            }
        });
        let num_masked = mask.iter().filter(|&&v| v > 0.0).count();
        Self { mask, num_masked }
    }

    /// Number of pixels the mask keeps.
    pub fn num_masked(&self) -> usize {
        self.num_masked
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.mask
    }

    pub fn apply(&self, image: &Array2<f64>) -> Array2<f64> {
        image * &self.mask
    }
}

/// Fourier-space low-pass mask: 1 where the radial frequency is below `1 / bandwidth`, 0
/// elsewhere. Without a bandwidth every frequency is kept.
pub fn low_pass_mask2d(side: usize, apix: f64, bandwidth: Option<f64>) -> Array2<f64> {
    let freq = centered_frequencies(side, apix);
    match bandwidth {
        Some(bandwidth) => Array2::from_shape_fn((side, side), |(r, c)| {
            let radial = (freq[r] * freq[r] + freq[c] * freq[c]).sqrt();
            if radial < 1.0 / bandwidth { 1.0 } else { 0.0 }
        }),
        None => Array2::ones((side, side)),
    }
}

/// Low-pass filters real-space images with a centered Fourier mask.
pub fn low_pass_images(
    images: &[Array2<f64>],
    lp_mask: &Array2<f64>,
    transform: &FourierTransform,
) -> Vec<Array2<f64>> {
    #[cfg(not(feature = "parallel"))]
    let iterator = images.iter();
    #[cfg(feature = "parallel")]
    let iterator = images.par_iter();

    iterator
        .map(|image| {
            let mut spectrum = transform.to_fourier(image);
            spectrum.zip_mut_with(lp_mask, |s, &m| *s *= m);
            transform.to_primal(&spectrum)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linspace_includes_both_ends() {
        assert_eq!(linspace(-1.0, 1.0, 5), vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert_eq!(linspace(0.0, 1.0, 1), vec![0.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn mask_keeps_the_inscribed_disc() {
        let mask = Mask::new(5, 1.0);
        let v = mask.values();
        assert_eq!(v[[2, 2]], 1.0);
        assert_eq!(v[[2, 0]], 0.0, "edge lies on the circle, which is excluded");
        assert_eq!(v[[0, 0]], 0.0);
        assert_eq!(v[[1, 1]], 1.0);
        assert_eq!(mask.num_masked(), 9);
    }

    #[test]
    fn mask_multiplies_images() {
        let mask = Mask::new(3, 0.5);
        let out = mask.apply(&Array2::from_elem((3, 3), 4.0));
        assert_eq!(out.sum(), 4.0);
        assert_eq!(out[[1, 1]], 4.0);
    }

    #[test]
    fn low_pass_mask_cuts_at_inverse_bandwidth() {
        // apix 1, n 8: frequencies are multiples of 1/8.
        let mask = low_pass_mask2d(8, 1.0, Some(4.0));
        assert_eq!(mask[[4, 4]], 1.0);
        assert_eq!(mask[[4, 5]], 1.0);
        assert_eq!(mask[[4, 6]], 0.0, "radial frequency 0.25 is not below 1/4");
        assert_eq!(low_pass_mask2d(8, 1.0, None).sum(), 64.0);
    }

    #[test]
    fn low_pass_filtering_keeps_constant_images() {
        let ft = FourierTransform::new(8);
        let mask = low_pass_mask2d(8, 1.0, Some(4.0));
        let images = vec![Array2::from_elem((8, 8), 1.5)];
        let filtered = low_pass_images(&images, &mask, &ft);
        for v in filtered[0].iter() {
            assert_relative_eq!(*v, 1.5, epsilon = 1e-9);
        }
    }
}
