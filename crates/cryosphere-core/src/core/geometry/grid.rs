use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A fixed square (or cubic) lattice of physical coordinates.
///
/// The lattice is separable: every axis uses the same 1D `line_coords`, so a 2D image pixel
/// `(row, col)` sits at `(line_coords[col], line_coords[row])` in (x, y) and a 3D voxel
/// `(z, y, x)` at the corresponding triple.
pub trait SamplingGrid: Send + Sync {
    /// Physical coordinate (Angstroms) of each lattice line, in increasing order.
    fn line_coords(&self) -> &[f64];
    /// Spacing between lattice lines in Angstroms.
    fn pixel_size(&self) -> f64;
    /// Number of lattice lines along each axis.
    fn side_shape(&self) -> usize;
}

/// Grid starting at the origin: coordinates `i · apix` for `i` in `0..n`.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseGrid {
    line_coords: Vec<f64>,
    pixel_size: f64,
}

impl BaseGrid {
    pub fn new(side_shape: usize, pixel_size: f64) -> Self {
        Self {
            line_coords: (0..side_shape).map(|i| i as f64 * pixel_size).collect(),
            pixel_size,
        }
    }
}

impl SamplingGrid for BaseGrid {
    fn line_coords(&self) -> &[f64] {
        &self.line_coords
    }
    fn pixel_size(&self) -> f64 {
        self.pixel_size
    }
    fn side_shape(&self) -> usize {
        self.line_coords.len()
    }
}

/// EMAN2-style centered grid: the origin sits at `floor(-n/2) · apix`, so for even `n` the
/// coordinate 0 falls on pixel `n/2`.
#[derive(Debug, Clone, PartialEq)]
pub struct Eman2Grid {
    line_coords: Vec<f64>,
    pixel_size: f64,
}

impl Eman2Grid {
    pub fn new(side_shape: usize, pixel_size: f64) -> Self {
        let origin = (-(side_shape as i64)).div_euclid(2);
        Self {
            line_coords: (0..side_shape as i64)
                .map(|i| (origin + i) as f64 * pixel_size)
                .collect(),
            pixel_size,
        }
    }
}

impl SamplingGrid for Eman2Grid {
    fn line_coords(&self) -> &[f64] {
        &self.line_coords
    }
    fn pixel_size(&self) -> f64 {
        self.pixel_size
    }
    fn side_shape(&self) -> usize {
        self.line_coords.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridKind {
    Base,
    #[default]
    Eman2,
}

impl GridKind {
    pub fn build(self, side_shape: usize, pixel_size: f64) -> Box<dyn SamplingGrid> {
        match self {
            GridKind::Base => Box::new(BaseGrid::new(side_shape, pixel_size)),
            GridKind::Eman2 => Box::new(Eman2Grid::new(side_shape, pixel_size)),
        }
    }
}

impl FromStr for GridKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Ok(GridKind::Base),
            "eman2" => Ok(GridKind::Eman2),
            other => Err(format!("unknown grid kind '{}' (expected 'base' or 'eman2')", other)),
        }
    }
}

impl fmt::Display for GridKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridKind::Base => write!(f, "base"),
            GridKind::Eman2 => write!(f, "eman2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_grid_starts_at_zero() {
        let grid = BaseGrid::new(4, 2.0);
        assert_eq!(grid.line_coords(), &[0.0, 2.0, 4.0, 6.0]);
        assert_eq!(grid.side_shape(), 4);
        assert_eq!(grid.pixel_size(), 2.0);
    }

    #[test]
    fn eman2_grid_is_centered_for_even_sides() {
        let grid = Eman2Grid::new(4, 1.5);
        assert_eq!(grid.line_coords(), &[-3.0, -1.5, 0.0, 1.5]);
    }

    #[test]
    fn eman2_grid_origin_uses_floor_for_odd_sides() {
        let grid = Eman2Grid::new(5, 1.0);
        assert_eq!(grid.line_coords(), &[-3.0, -2.0, -1.0, 0.0, 1.0]);
    }

    #[test]
    fn grid_kind_parses_and_builds() {
        let kind: GridKind = "EMAN2".parse().unwrap();
        assert_eq!(kind, GridKind::Eman2);
        assert_eq!(kind.to_string(), "eman2");
        let grid = GridKind::Base.build(3, 1.0);
        assert_eq!(grid.line_coords(), &[0.0, 1.0, 2.0]);
        assert!("cartesian".parse::<GridKind>().is_err());
    }
}
