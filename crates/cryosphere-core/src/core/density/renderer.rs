use crate::core::geometry::grid::SamplingGrid;
use nalgebra::{Matrix3, Point3};
use ndarray::{Array2, Array3};
use std::f64::consts::PI;
use thiserror::Error;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("Structure {index} has {found} centers, expected {expected}")]
    StructureLength {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("Got {structures} structures but {poses} poses")]
    PoseCount { structures: usize, poses: usize },
}

/// Width and amplitude of the components being rendered.
///
/// `cutoff`, when set, truncates each Gaussian beyond `cutoff · σ` along every axis. It never
/// changes values inside that range.
#[derive(Debug, Clone, Copy)]
pub struct RenderParams<'a> {
    pub sigmas: &'a [f64],
    pub amplitudes: &'a [f64],
    pub cutoff: Option<f64>,
}

/// Normalized 1D Gaussian of one component sampled on the grid lines.
///
/// Returns the index of the first line and the values from there on, skipping lines beyond the
/// cutoff.
fn profile(line: &[f64], mu: f64, sigma: f64, cutoff: Option<f64>) -> (usize, Vec<f64>) {
    let norm = 1.0 / (2.0 * PI * sigma * sigma).sqrt();
    let inv_two_var = 1.0 / (2.0 * sigma * sigma);
    let (start, end) = match cutoff {
        Some(c) => {
            let reach = c * sigma;
            let start = line.partition_point(|&x| x < mu - reach);
            let end = line.partition_point(|&x| x <= mu + reach);
            (start, end.max(start))
        }
        None => (0, line.len()),
    };
    let values = line[start..end]
        .iter()
        .map(|&x| norm * (-(x - mu) * (x - mu) * inv_two_var).exp())
        .collect();
    (start, values)
}

fn check_length(index: usize, found: usize, params: &RenderParams<'_>) -> Result<(), RenderError> {
    let expected = params.sigmas.len().min(params.amplitudes.len());
    if found != expected || params.sigmas.len() != params.amplitudes.len() {
        return Err(RenderError::StructureLength {
            index,
            expected,
            found,
        });
    }
    Ok(())
}

/// Projects a mixture along Z onto the 2D grid.
///
/// `image[row][col] = Σ_i A_i · g(x_col; μ_i.x, σ_i) · g(y_row; μ_i.y, σ_i)` with `g` the
/// normalized 1D Gaussian, so each component integrates over the plane to its amplitude.
pub fn render(mus: &[Point3<f64>], params: &RenderParams<'_>, grid: &dyn SamplingGrid) -> Array2<f64> {
    let n = grid.side_shape();
    let line = grid.line_coords();
    let mut image = Array2::zeros((n, n));
    for ((mu, &sigma), &amplitude) in mus.iter().zip(params.sigmas).zip(params.amplitudes) {
        let (x0, gx) = profile(line, mu.x, sigma, params.cutoff);
        let (y0, gy) = profile(line, mu.y, sigma, params.cutoff);
        for (dy, vy) in gy.iter().enumerate() {
            let weight = amplitude * vy;
            let mut row = image.row_mut(y0 + dy);
            for (dx, vx) in gx.iter().enumerate() {
                row[x0 + dx] += weight * vx;
            }
        }
    }
    image
}

/// Rotates every structure by its pose (`R · x`) and projects it.
pub fn project(
    structures: &[Vec<Point3<f64>>],
    rotations: &[Matrix3<f64>],
    params: &RenderParams<'_>,
    grid: &dyn SamplingGrid,
) -> Result<Vec<Array2<f64>>, RenderError> {
    if structures.len() != rotations.len() {
        return Err(RenderError::PoseCount {
            structures: structures.len(),
            poses: rotations.len(),
        });
    }
    for (index, structure) in structures.iter().enumerate() {
        check_length(index, structure.len(), params)?;
    }

    #[cfg(not(feature = "parallel"))]
    let iterator = structures.iter().zip(rotations.iter());
    #[cfg(feature = "parallel")]
    let iterator = structures.par_iter().zip(rotations.par_iter());

    Ok(iterator
        .map(|(structure, rotation)| {
            let rotated: Vec<Point3<f64>> = structure.iter().map(|p| rotation * p).collect();
            render(&rotated, params, grid)
        })
        .collect())
}

/// Evaluates a mixture on the `n³` grid, indexed `[z][y][x]`.
///
/// Each component integrates over the volume to its amplitude.
pub fn structure_to_volume(
    mus: &[Point3<f64>],
    params: &RenderParams<'_>,
    grid: &dyn SamplingGrid,
) -> Result<Array3<f64>, RenderError> {
    check_length(0, mus.len(), params)?;
    let n = grid.side_shape();
    let line = grid.line_coords();
    let mut volume = Array3::zeros((n, n, n));
    for ((mu, &sigma), &amplitude) in mus.iter().zip(params.sigmas).zip(params.amplitudes) {
        let (x0, gx) = profile(line, mu.x, sigma, params.cutoff);
        let (y0, gy) = profile(line, mu.y, sigma, params.cutoff);
        let (z0, gz) = profile(line, mu.z, sigma, params.cutoff);
        for (dz, vz) in gz.iter().enumerate() {
            for (dy, vy) in gy.iter().enumerate() {
                let weight = amplitude * vz * vy;
                for (dx, vx) in gx.iter().enumerate() {
                    volume[[z0 + dz, y0 + dy, x0 + dx]] += weight * vx;
                }
            }
        }
    }
    Ok(volume)
}
