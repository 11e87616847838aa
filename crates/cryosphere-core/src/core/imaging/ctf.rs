use crate::core::io::metadata::{CtfParameters, ParticleTable};
use ndarray::Array2;
use std::f64::consts::PI;
use thiserror::Error;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Error, PartialEq)]
pub enum CtfError {
    #[error("Particle index {index} out of range for {count} CTF entries")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("Invalid CTF geometry: side {side}, pixel size {pixel_size}")]
    InvalidGeometry { side: usize, pixel_size: f64 },
}

/// Sample frequencies of a length-`n` transform with spacing `d` (numpy `fftfreq`).
pub fn fftfreq(n: usize, d: f64) -> Vec<f64> {
    let scale = 1.0 / (n as f64 * d);
    (0..n)
        .map(|i| {
            let k = if i < n.div_ceil(2) { i as f64 } else { i as f64 - n as f64 };
            k * scale
        })
        .collect()
}

/// `fftfreq` reordered so that zero sits at index `n / 2`.
pub fn centered_frequencies(n: usize, d: f64) -> Vec<f64> {
    let freqs = fftfreq(n, d);
    (0..n).map(|j| freqs[(j + n - n / 2) % n]).collect()
}

/// Relativistic electron wavelength in Angstroms for an acceleration voltage in volts.
pub fn electron_wavelength(voltage_volts: f64) -> f64 {
    12.2639 / (voltage_volts + 0.97845e-6 * voltage_volts * voltage_volts).sqrt()
}

/// Evaluates the CTF of one particle at a spatial frequency `(kx, ky)` in 1/Å.
///
/// `γ(k) = π/2·Cs·λ³·k⁴ − π·λ·Δf(k)·k²` and
/// `CTF(k) = −scale·(√(1−w²)·sin(γ+φ) + w·cos(γ+φ))·exp(−B·k²/4)`, with defocus values in Å and
/// Cs converted from mm.
pub fn ctf_value(params: &CtfParameters, kx: f64, ky: f64) -> f64 {
    let lambda = electron_wavelength(params.voltage * 1e3);
    let cs = params.spherical_aberration * 1e7;
    let dfang = params.defocus_angle.to_radians();
    let phase_shift = params.phase_shift.to_radians();
    let w = params.amplitude_contrast;

    let k2 = kx * kx + ky * ky;
    let angle = ky.atan2(kx);
    let defocus = 0.5
        * (params.defocus_u
            + params.defocus_v
            + (params.defocus_u - params.defocus_v) * (2.0 * (angle - dfang)).cos());
    let gamma = 0.5 * PI * cs * lambda.powi(3) * k2 * k2 - PI * lambda * defocus * k2;
    let phase = gamma + phase_shift;
    let ctf = -((1.0 - w * w).sqrt() * phase.sin() + w * phase.cos());
    params.scale * ctf * (-params.b_factor / 4.0 * k2).exp()
}

/// Per-particle contrast transfer functions on a centered Fourier grid.
///
/// Rows of the returned images index `ky` and columns `kx`, matching the layout of
/// [`FourierTransform::to_fourier`](super::fourier::FourierTransform::to_fourier).
#[derive(Debug, Clone)]
pub struct CtfModel {
    params: Vec<CtfParameters>,
    frequencies: Vec<f64>,
    side: usize,
    pixel_size: f64,
}

impl CtfModel {
    pub fn new(params: Vec<CtfParameters>, pixel_size: f64, side: usize) -> Result<Self, CtfError> {
        if side == 0 || !(pixel_size > 0.0) {
            return Err(CtfError::InvalidGeometry { side, pixel_size });
        }
        Ok(Self {
            params,
            frequencies: centered_frequencies(side, pixel_size),
            side,
            pixel_size,
        })
    }

    pub fn from_table(table: &ParticleTable, pixel_size: f64, side: usize) -> Result<Self, CtfError> {
        Self::new(table.ctf.clone(), pixel_size, side)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn pixel_size(&self) -> f64 {
        self.pixel_size
    }

    pub fn parameters(&self, index: usize) -> Option<&CtfParameters> {
        self.params.get(index)
    }

    fn single(&self, params: &CtfParameters) -> Array2<f64> {
        let f = &self.frequencies;
        Array2::from_shape_fn((self.side, self.side), |(row, col)| {
            ctf_value(params, f[col], f[row])
        })
    }

    /// Computes the CTF image of each requested particle, in the order given.
    pub fn compute_ctf(&self, indices: &[usize]) -> Result<Vec<Array2<f64>>, CtfError> {
        let params = indices
            .iter()
            .map(|&index| {
                self.params.get(index).ok_or(CtfError::IndexOutOfRange {
                    index,
                    count: self.params.len(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        #[cfg(not(feature = "parallel"))]
        let iterator = params.iter();
        #[cfg(feature = "parallel")]
        let iterator = params.par_iter();

        Ok(iterator.map(|p| self.single(p)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params() -> CtfParameters {
        CtfParameters {
            defocus_u: 15000.0,
            defocus_v: 14000.0,
            defocus_angle: 30.0,
            voltage: 300.0,
            spherical_aberration: 2.7,
            amplitude_contrast: 0.1,
            phase_shift: 0.0,
            scale: 1.0,
            b_factor: 0.0,
        }
    }

    #[test]
    fn fftfreq_matches_numpy() {
        assert_eq!(fftfreq(4, 0.5), vec![0.0, 0.5, -1.0, -0.5]);
        assert_eq!(fftfreq(5, 1.0), vec![0.0, 0.2, 0.4, -0.4, -0.2]);
        assert_eq!(centered_frequencies(4, 0.5), vec![-1.0, -0.5, 0.0, 0.5]);
        assert_eq!(centered_frequencies(5, 1.0), vec![-0.4, -0.2, 0.0, 0.2, 0.4]);
    }

    #[test]
    fn wavelength_at_300kv() {
        assert_relative_eq!(electron_wavelength(300e3), 0.019687, epsilon = 1e-5);
    }

    #[test]
    fn zero_frequency_value_is_set_by_amplitude_contrast() {
        let p = params();
        assert_relative_eq!(ctf_value(&p, 0.0, 0.0), -p.amplitude_contrast, epsilon = 1e-12);
        let shifted = CtfParameters {
            phase_shift: 90.0,
            ..p
        };
        let expected = -(1.0 - 0.01f64).sqrt();
        assert_relative_eq!(ctf_value(&shifted, 0.0, 0.0), expected, epsilon = 1e-12);
    }

    #[test]
    fn matches_a_hand_computed_value() {
        let p = CtfParameters {
            defocus_u: 10000.0,
            defocus_v: 10000.0,
            phase_shift: 30.0,
            scale: 0.8,
            b_factor: 40.0,
            ..params()
        };
        // λ = 0.0196870 Å, |k|² = 0.01 Å⁻², γ = -6.1524832.
        assert_relative_eq!(ctf_value(&p, 0.06, 0.08), -0.4957795083680013, epsilon = 1e-9);
    }

    #[test]
    fn pure_defocus_reaches_the_first_maximum() {
        let p = CtfParameters {
            defocus_u: 10000.0,
            defocus_v: 10000.0,
            spherical_aberration: 0.0,
            amplitude_contrast: 0.0,
            ..params()
        };
        // Without Cs, γ = -π·λ·Δf·k², so the first lobe is -sin(γ) > 0.
        let k = (0.5 / (electron_wavelength(300e3) * 10000.0)).sqrt();
        assert_relative_eq!(ctf_value(&p, k, 0.0), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn magnitude_never_exceeds_scale() {
        let p = CtfParameters {
            scale: 0.7,
            ..params()
        };
        let model = CtfModel::new(vec![p], 1.2, 32).unwrap();
        let ctf = &model.compute_ctf(&[0]).unwrap()[0];
        assert!(ctf.iter().all(|v| v.abs() <= 0.7 + 1e-12));
        assert_eq!(ctf.dim(), (32, 32));
    }

    #[test]
    fn b_factor_attenuates_high_frequencies() {
        let sharp = params();
        let damped = CtfParameters {
            b_factor: 200.0,
            ..sharp
        };
        let (kx, ky) = (0.2, 0.1);
        let ratio = ctf_value(&damped, kx, ky) / ctf_value(&sharp, kx, ky);
        assert_relative_eq!(ratio, (-50.0 * 0.05f64).exp(), epsilon = 1e-9);
    }

    #[test]
    fn astigmatism_follows_defocus_angle() {
        // Along the astigmatism axis the defocus is dfU, perpendicular to it dfV.
        let p = params();
        let k = 0.05;
        let (c, s) = (30f64.to_radians().cos(), 30f64.to_radians().sin());
        let along_u = ctf_value(&p, k * c, k * s);
        let round_u = CtfParameters {
            defocus_v: p.defocus_u,
            ..p
        };
        assert_relative_eq!(along_u, ctf_value(&round_u, k, 0.0), epsilon = 1e-9);
        let along_v = ctf_value(&p, -k * s, k * c);
        let round_v = CtfParameters {
            defocus_u: p.defocus_v,
            ..p
        };
        assert_relative_eq!(along_v, ctf_value(&round_v, k, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn grid_layout_uses_rows_for_ky() {
        let p = params();
        let model = CtfModel::new(vec![p], 2.0, 8).unwrap();
        let ctf = &model.compute_ctf(&[0]).unwrap()[0];
        let f = centered_frequencies(8, 2.0);
        assert_relative_eq!(ctf[[1, 6]], ctf_value(&p, f[6], f[1]), epsilon = 1e-15);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let model = CtfModel::new(vec![params()], 1.0, 4).unwrap();
        assert_eq!(
            model.compute_ctf(&[0, 3]).unwrap_err(),
            CtfError::IndexOutOfRange { index: 3, count: 1 }
        );
        assert!(CtfModel::new(vec![], 0.0, 4).is_err());
    }
}
