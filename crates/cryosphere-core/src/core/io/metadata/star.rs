use super::{CtfParameters, ImageLocation, MetadataError, MetadataSource, ParticleTable};
use crate::core::geometry::rotation::relion_pose;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One `data_` block of a STAR file.
///
/// Key-value blocks are stored as a table with a single row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StarBlock {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl StarBlock {
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

enum State {
    Outside,
    Header,
    Loop,
    Pairs,
}

/// Parses every data block of a STAR document.
pub fn parse_star(reader: impl BufRead) -> Result<Vec<StarBlock>, MetadataError> {
    let mut blocks: Vec<StarBlock> = Vec::new();
    let mut state = State::Outside;

    for (line_num, line_res) in reader.lines().enumerate() {
        let line_num = line_num + 1;
        let line = line_res.map_err(|e| MetadataError::Star {
            line: line_num,
            message: e.to_string(),
        })?;
        let content = line.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }

        if let Some(name) = content.strip_prefix("data_") {
            blocks.push(StarBlock {
                name: name.to_string(),
                ..StarBlock::default()
            });
            state = State::Pairs;
            continue;
        }
        let Some(block) = blocks.last_mut() else {
            return Err(MetadataError::Star {
                line: line_num,
                message: "content before the first data_ block".to_string(),
            });
        };

        if content == "loop_" {
            state = State::Header;
            continue;
        }

        if let Some(column) = content.strip_prefix('_') {
            let mut parts = column.split_whitespace();
            let name = parts.next().unwrap_or("").to_string();
            match state {
                State::Header => block.columns.push(name),
                State::Pairs | State::Outside => {
                    let value = parts.next().ok_or_else(|| MetadataError::Star {
                        line: line_num,
                        message: format!("key '{}' has no value", name),
                    })?;
                    block.columns.push(name);
                    match block.rows.first_mut() {
                        Some(row) => row.push(value.to_string()),
                        None => block.rows.push(vec![value.to_string()]),
                    }
                    state = State::Pairs;
                }
                State::Loop => {
                    return Err(MetadataError::Star {
                        line: line_num,
                        message: "column label after loop rows".to_string(),
                    });
                }
            }
            continue;
        }

        match state {
            State::Header | State::Loop => {
                let values: Vec<String> = content.split_whitespace().map(str::to_string).collect();
                if values.len() != block.columns.len() {
                    return Err(MetadataError::Star {
                        line: line_num,
                        message: format!(
                            "expected {} values, found {}",
                            block.columns.len(),
                            values.len()
                        ),
                    });
                }
                block.rows.push(values);
                state = State::Loop;
            }
            State::Pairs | State::Outside => {
                return Err(MetadataError::Star {
                    line: line_num,
                    message: format!("unexpected content '{}'", content),
                });
            }
        }
    }
    Ok(blocks)
}

/// Column lookup over a particle row with fallback to its optics group.
struct RowView<'a> {
    particles: &'a StarBlock,
    row: usize,
    optics: Option<(&'a StarBlock, usize)>,
}

impl RowView<'_> {
    fn raw(&self, column: &str) -> Option<&str> {
        if let Some(i) = self.particles.column_index(column) {
            return Some(self.particles.rows[self.row][i].as_str());
        }
        let (block, row) = self.optics?;
        block
            .column_index(column)
            .map(|i| block.rows[row][i].as_str())
    }

    fn optional(&self, column: &str) -> Result<Option<f64>, MetadataError> {
        self.raw(column)
            .map(|value| {
                value.parse::<f64>().map_err(|_| MetadataError::InvalidValue {
                    column: column.to_string(),
                    row: self.row,
                    value: value.to_string(),
                })
            })
            .transpose()
    }

    fn required(&self, column: &str) -> Result<f64, MetadataError> {
        self.optional(column)?
            .ok_or_else(|| MetadataError::MissingColumn(column.to_string()))
    }
}

/// Splits a RELION `index@path` image name into a zero-based frame location.
pub fn parse_image_name(value: &str, row: usize) -> Result<ImageLocation, MetadataError> {
    let invalid = || MetadataError::InvalidValue {
        column: "rlnImageName".to_string(),
        row,
        value: value.to_string(),
    };
    let (index, path) = value.split_once('@').ok_or_else(invalid)?;
    let index: usize = index.trim().parse().map_err(|_| invalid())?;
    let index = index.checked_sub(1).ok_or_else(invalid)?;
    Ok(ImageLocation {
        path: PathBuf::from(path),
        index,
    })
}

pub fn read_star(path: &Path, apix: f64) -> Result<ParticleTable, MetadataError> {
    let file = File::open(path).map_err(|source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let blocks = parse_star(BufReader::new(file))?;
    table_from_blocks(&blocks, apix)
}

pub fn table_from_blocks(blocks: &[StarBlock], apix: f64) -> Result<ParticleTable, MetadataError> {
    let particles = blocks
        .iter()
        .find(|b| b.name == "particles")
        .or_else(|| blocks.iter().find(|b| b.column_index("rlnImageName").is_some()))
        .ok_or_else(|| MetadataError::MissingColumn("rlnImageName".to_string()))?;
    let optics = blocks.iter().find(|b| b.name == "optics");

    let optics_rows: HashMap<&str, usize> = match optics.and_then(|o| {
        o.column_index("rlnOpticsGroup").map(|i| (o, i))
    }) {
        Some((block, i)) => block
            .rows
            .iter()
            .enumerate()
            .map(|(r, row)| (row[i].as_str(), r))
            .collect(),
        None => HashMap::new(),
    };
    let group_column = particles.column_index("rlnOpticsGroup");
    let image_column = particles
        .column_index("rlnImageName")
        .ok_or_else(|| MetadataError::MissingColumn("rlnImageName".to_string()))?;

    let has_angstrom_origin = particles.column_index("rlnOriginXAngst").is_some();
    debug!(
        "Reading {} STAR particles (translations in {}).",
        particles.rows.len(),
        if has_angstrom_origin { "Angstroms" } else { "pixels" }
    );

    let n = particles.rows.len();
    let mut table = ParticleTable {
        source: MetadataSource::Star,
        rotations: Vec::with_capacity(n),
        translations: Vec::with_capacity(n),
        ctf: Vec::with_capacity(n),
        images: Vec::with_capacity(n),
    };

    for row in 0..n {
        let optics_row = match (optics, group_column) {
            (Some(block), Some(g)) => {
                let group = particles.rows[row][g].as_str();
                let r = optics_rows
                    .get(group)
                    .ok_or_else(|| MetadataError::UnknownOpticsGroup {
                        row,
                        group: group.to_string(),
                    })?;
                Some((block, *r))
            }
            _ => None,
        };
        let view = RowView {
            particles,
            row,
            optics: optics_row,
        };

        table.rotations.push(relion_pose(
            view.required("rlnAngleRot")?,
            view.required("rlnAngleTilt")?,
            view.required("rlnAnglePsi")?,
        ));

        let (shift_x, shift_y) = if has_angstrom_origin {
            (
                view.required("rlnOriginXAngst")?,
                view.required("rlnOriginYAngst")?,
            )
        } else {
            (
                view.optional("rlnOriginX")?.unwrap_or(0.0) * apix,
                view.optional("rlnOriginY")?.unwrap_or(0.0) * apix,
            )
        };
        table.translations.push([shift_y, shift_x]);

        table.ctf.push(CtfParameters {
            defocus_u: view.required("rlnDefocusU")?,
            defocus_v: view.required("rlnDefocusV")?,
            defocus_angle: view.required("rlnDefocusAngle")?,
            voltage: view.required("rlnVoltage")?,
            spherical_aberration: view.required("rlnSphericalAberration")?,
            amplitude_contrast: view.required("rlnAmplitudeContrast")?,
            phase_shift: view.optional("rlnPhaseShift")?.unwrap_or(0.0),
            scale: view.optional("rlnCtfScalefactor")?.unwrap_or(1.0),
            b_factor: view.optional("rlnCtfBfactor")?.unwrap_or(0.0),
        });

        table
            .images
            .push(parse_image_name(&particles.rows[row][image_column], row)?);
    }

    table.check_lengths()?;
    Ok(table)
}
