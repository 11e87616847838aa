use super::filters::linspace;
use ndarray::Array2;
use thiserror::Error;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("Image of shape {found:?} does not match translator side {side}")]
    ImageShape { side: usize, found: (usize, usize) },
    #[error("Got {images} images but {translations} translations")]
    BatchMismatch { images: usize, translations: usize },
}

/// Translates square images in real space by bilinear resampling.
///
/// Pixel centers live on a normalized `[-1, 1]` grid with the corner pixels at ±1. A
/// translation of `t` pixels moves content by `t`: the output at `p` samples the input at
/// `p - t`. Sample locations leaving `(-1, 1)` wrap around by a full image width, so a shift
/// of one image width is the identity; samples between the last pixel and the wrapped edge
/// are zero-padded.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTranslator {
    side: usize,
    line: Vec<f64>,
}

impl ImageTranslator {
    pub fn new(side: usize) -> Self {
        Self {
            side,
            line: linspace(-1.0, 1.0, side),
        }
    }

    pub fn side(&self) -> usize {
        self.side
    }

    /// Translates one image; `translation` is `(y, x)` in pixels.
    pub fn translate(&self, image: &Array2<f64>, translation: [f64; 2]) -> Result<Array2<f64>, TranslateError> {
        let n = self.side;
        if image.dim() != (n, n) {
            return Err(TranslateError::ImageShape {
                side: n,
                found: image.dim(),
            });
        }
        let scale = 2.0 / n as f64;
        Ok(Array2::from_shape_fn((n, n), |(row, col)| {
            let gy = wrap(self.line[row] - translation[0] * scale);
            let gx = wrap(self.line[col] - translation[1] * scale);
            bilinear(image, gx, gy)
        }))
    }

    /// Translates a batch of images, one `(y, x)` translation per image.
    pub fn transform(
        &self,
        images: &[Array2<f64>],
        translations: &[[f64; 2]],
    ) -> Result<Vec<Array2<f64>>, TranslateError> {
        if images.len() != translations.len() {
            return Err(TranslateError::BatchMismatch {
                images: images.len(),
                translations: translations.len(),
            });
        }

        #[cfg(not(feature = "parallel"))]
        let iterator = images.iter().zip(translations.iter());
        #[cfg(feature = "parallel")]
        let iterator = images.par_iter().zip(translations.par_iter());

        iterator
            .map(|(image, &t)| self.translate(image, t))
            .collect()
    }
}

/// Folds a coordinate back by one image width once it leaves `[-1, 1]`. The corner pixels
/// themselves stay put so a zero translation is exact.
fn wrap(mut g: f64) -> f64 {
    if g > 1.0 {
        g -= 2.0;
    }
    if g < -1.0 {
        g += 2.0;
    }
    g.clamp(-1.0, 1.0)
}

/// Bilinear sample at normalized coordinates with corner-aligned pixels and zero padding.
fn bilinear(image: &Array2<f64>, gx: f64, gy: f64) -> f64 {
    let (h, w) = image.dim();
    let ix = (gx + 1.0) / 2.0 * (w as f64 - 1.0);
    let iy = (gy + 1.0) / 2.0 * (h as f64 - 1.0);
    let (x0, y0) = (ix.floor(), iy.floor());
    let (fx, fy) = (ix - x0, iy - y0);

    let at = |x: f64, y: f64| -> f64 {
        if x < 0.0 || y < 0.0 || x > (w - 1) as f64 || y > (h - 1) as f64 {
            0.0
        } else {
            image[[y as usize, x as usize]]
        }
    };
    at(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + at(x0 + 1.0, y0) * fx * (1.0 - fy)
        + at(x0, y0 + 1.0) * (1.0 - fx) * fy
        + at(x0 + 1.0, y0 + 1.0) * fx * fy
}
