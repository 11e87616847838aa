//! MRC/MRCS image stacks and density volumes.
//!
//! Only the parts of the MRC2014 header needed to address frames and recover the pixel size
//! are interpreted. Data modes 0 (int8), 1 (int16), 2 (float32) and 6 (uint16) can be read;
//! files are always written in mode 2. Both byte orders are accepted on read, detected from the
//! machine stamp; output is little-endian.

use ndarray::{Array2, Array3};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const HEADER_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum MrcError {
    #[error("I/O error on '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid MRC header in '{path}': {message}", path = path.display())]
    InvalidHeader { path: PathBuf, message: String },
    #[error("Unsupported MRC data mode {mode} in '{path}'", path = path.display())]
    UnsupportedMode { path: PathBuf, mode: i32 },
    #[error("Frame {index} out of range: '{path}' holds {count} frame(s)", path = path.display())]
    FrameOutOfRange {
        path: PathBuf,
        index: usize,
        count: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataMode {
    Int8,
    Int16,
    Float32,
    Uint16,
}

impl DataMode {
    fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Int8),
            1 => Some(Self::Int16),
            2 => Some(Self::Float32),
            6 => Some(Self::Uint16),
            _ => None,
        }
    }

    fn bytes_per_value(self) -> usize {
        match self {
            Self::Int8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Float32 => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MrcHeader {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub mode: i32,
    /// Sampling along each axis (mx, my, mz).
    pub sampling: [usize; 3],
    /// Cell dimensions in Angstroms.
    pub cell: [f32; 3],
    /// Size of the extended header in bytes.
    pub extended_header_size: usize,
    pub little_endian: bool,
}

impl MrcHeader {
    /// Pixel size in Angstroms along X, or `None` if the header does not define one.
    pub fn pixel_size(&self) -> Option<f64> {
        let mx = self.sampling[0];
        (mx > 0 && self.cell[0] > 0.0).then(|| f64::from(self.cell[0]) / mx as f64)
    }

    fn data_offset(&self) -> u64 {
        (HEADER_SIZE + self.extended_header_size) as u64
    }

    fn parse(bytes: &[u8; HEADER_SIZE], path: &Path) -> Result<Self, MrcError> {
        // Machine stamp: 0x44 0x44 (or 0x44 0x41) little-endian, 0x11 0x11 big-endian. Some
        // writers leave it zeroed, in which case the byte order is guessed from the mode.
        let little_endian = match bytes[212] {
            0x11 => false,
            0x44 => true,
            _ => {
                let le = i32::from_le_bytes(word(bytes, 12));
                DataMode::from_code(le).is_some()
            }
        };
        let int = |offset: usize| {
            let w = word(bytes, offset);
            if little_endian {
                i32::from_le_bytes(w)
            } else {
                i32::from_be_bytes(w)
            }
        };
        let float = |offset: usize| {
            let w = word(bytes, offset);
            if little_endian {
                f32::from_le_bytes(w)
            } else {
                f32::from_be_bytes(w)
            }
        };

        let dims = [int(0), int(4), int(8)];
        if dims.iter().any(|&d| d <= 0) {
            return Err(MrcError::InvalidHeader {
                path: path.to_path_buf(),
                message: format!("non-positive dimensions {:?}", dims),
            });
        }
        let nsymbt = int(92);
        if nsymbt < 0 {
            return Err(MrcError::InvalidHeader {
                path: path.to_path_buf(),
                message: format!("negative extended header size {}", nsymbt),
            });
        }

        Ok(Self {
            nx: dims[0] as usize,
            ny: dims[1] as usize,
            nz: dims[2] as usize,
            mode: int(12),
            sampling: [int(28).max(0) as usize, int(32).max(0) as usize, int(36).max(0) as usize],
            cell: [float(40), float(44), float(48)],
            extended_header_size: nsymbt as usize,
            little_endian,
        })
    }
}

fn word(bytes: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[offset..offset + 4]);
    out
}

/// Random-access reader over the frames (sections) of an MRC file.
///
/// A 2D image file is a stack of one frame; a 3D volume is a stack of `nz` sections.
pub struct MrcStack {
    path: PathBuf,
    file: File,
    header: MrcHeader,
    mode: DataMode,
}

impl MrcStack {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MrcError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| MrcError::Io {
            path: path.clone(),
            source,
        };
        let mut file = File::open(&path).map_err(io_err)?;
        let mut bytes = [0u8; HEADER_SIZE];
        file.read_exact(&mut bytes).map_err(io_err)?;
        let header = MrcHeader::parse(&bytes, &path)?;
        let mode = DataMode::from_code(header.mode).ok_or_else(|| MrcError::UnsupportedMode {
            path: path.clone(),
            mode: header.mode,
        })?;
        Ok(Self {
            path,
            file,
            header,
            mode,
        })
    }

    pub fn header(&self) -> &MrcHeader {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.header.nz
    }

    pub fn is_empty(&self) -> bool {
        self.header.nz == 0
    }

    pub fn pixel_size(&self) -> Option<f64> {
        self.header.pixel_size()
    }

    /// Reads frame `index` as an `(ny, nx)` array, rows along Y.
    pub fn read_frame(&mut self, index: usize) -> Result<Array2<f64>, MrcError> {
        if index >= self.header.nz {
            return Err(MrcError::FrameOutOfRange {
                path: self.path.clone(),
                index,
                count: self.header.nz,
            });
        }
        let (nx, ny) = (self.header.nx, self.header.ny);
        let frame_bytes = nx * ny * self.mode.bytes_per_value();
        let offset = self.header.data_offset() + (index * frame_bytes) as u64;

        let mut raw = vec![0u8; frame_bytes];
        let path = &self.path;
        let io_err = |source| MrcError::Io {
            path: path.clone(),
            source,
        };
        self.file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
        self.file.read_exact(&mut raw).map_err(io_err)?;

        let values = decode(&raw, self.mode, self.header.little_endian);
        Array2::from_shape_vec((ny, nx), values).map_err(|e| MrcError::InvalidHeader {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    /// Reads every section as a `(nz, ny, nx)` array.
    pub fn read_all(&mut self) -> Result<Array3<f64>, MrcError> {
        let (nx, ny, nz) = (self.header.nx, self.header.ny, self.header.nz);
        let mut out = Array3::zeros((nz, ny, nx));
        for z in 0..nz {
            let frame = self.read_frame(z)?;
            out.index_axis_mut(ndarray::Axis(0), z).assign(&frame);
        }
        Ok(out)
    }
}

fn decode(raw: &[u8], mode: DataMode, little_endian: bool) -> Vec<f64> {
    let width = mode.bytes_per_value();
    raw.chunks_exact(width)
        .map(|c| match mode {
            DataMode::Int8 => f64::from(c[0] as i8),
            DataMode::Int16 => {
                let b = [c[0], c[1]];
                f64::from(if little_endian {
                    i16::from_le_bytes(b)
                } else {
                    i16::from_be_bytes(b)
                })
            }
            DataMode::Uint16 => {
                let b = [c[0], c[1]];
                f64::from(if little_endian {
                    u16::from_le_bytes(b)
                } else {
                    u16::from_be_bytes(b)
                })
            }
            DataMode::Float32 => {
                let b = [c[0], c[1], c[2], c[3]];
                f64::from(if little_endian {
                    f32::from_le_bytes(b)
                } else {
                    f32::from_be_bytes(b)
                })
            }
        })
        .collect()
}

/// Writes a `(nz, ny, nx)` array as a float32 MRC file with the given pixel size.
///
/// `is_volume` selects the space group: 1 for a density volume, 0 for an image stack.
pub fn write_mrc<P: AsRef<Path>>(
    path: P,
    data: &Array3<f64>,
    pixel_size: f64,
    is_volume: bool,
) -> Result<(), MrcError> {
    let path = path.as_ref();
    let (nz, ny, nx) = data.dim();
    let io_err = |source| MrcError::Io {
        path: path.to_path_buf(),
        source,
    };

    let (mut min, mut max, mut sum) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
    for &v in data.iter() {
        min = min.min(v);
        max = max.max(v);
        sum += v;
    }
    let count = data.len().max(1) as f64;
    let mean = sum / count;
    let rms = (data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count).sqrt();
    if data.is_empty() {
        min = 0.0;
        max = 0.0;
    }

    let mut header = [0u8; HEADER_SIZE];
    let mut put_i32 = |offset: usize, v: i32| header[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    put_i32(0, nx as i32);
    put_i32(4, ny as i32);
    put_i32(8, nz as i32);
    put_i32(12, 2);
    put_i32(28, nx as i32);
    put_i32(32, ny as i32);
    put_i32(36, nz as i32);
    put_i32(64, 1);
    put_i32(68, 2);
    put_i32(72, 3);
    put_i32(88, if is_volume { 1 } else { 0 });
    put_i32(92, 0);
    put_i32(220, 0);
    let put_f32 = |header: &mut [u8; HEADER_SIZE], offset: usize, v: f32| {
        header[offset..offset + 4].copy_from_slice(&v.to_le_bytes())
    };
    put_f32(&mut header, 40, (nx as f64 * pixel_size) as f32);
    put_f32(&mut header, 44, (ny as f64 * pixel_size) as f32);
    put_f32(&mut header, 48, (nz as f64 * pixel_size) as f32);
    for offset in [52, 56, 60] {
        put_f32(&mut header, offset, 90.0);
    }
    put_f32(&mut header, 76, min as f32);
    put_f32(&mut header, 80, max as f32);
    put_f32(&mut header, 84, mean as f32);
    put_f32(&mut header, 216, rms as f32);
    header[208..212].copy_from_slice(b"MAP ");
    header[212..216].copy_from_slice(&[0x44, 0x44, 0x00, 0x00]);

    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&header).map_err(io_err)?;
    for &v in data.iter() {
        writer.write_all(&(v as f32).to_le_bytes()).map_err(io_err)?;
    }
    writer.flush().map_err(io_err)?;
    Ok(())
}
