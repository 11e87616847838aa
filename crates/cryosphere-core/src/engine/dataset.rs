use super::error::EngineError;
use crate::core::imaging::filters::Mask;
use crate::core::imaging::fourier::FourierTransform;
use crate::core::io::metadata::{ImageLocation, ParticleTable};
use crate::core::io::mrc::MrcStack;
use nalgebra::Matrix3;
use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rustfft::num_complex::Complex64;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// One particle as consumed by the forward pipeline.
#[derive(Debug, Clone)]
pub struct ParticleSample {
    pub index: usize,
    /// Normalized real-space image, the inverse transform of `fourier`.
    pub image: Array2<f64>,
    pub rotation: Matrix3<f64>,
    /// In-plane translation in downsampled pixels, ordered (Y, X).
    pub translation: [f64; 2],
    /// Normalized centered spectrum.
    pub fourier: Array2<Complex64>,
}

/// Particle images addressed through a metadata table.
///
/// Frames are read lazily from their MRC stacks, Fourier-cropped to the working size, optionally
/// masked, and normalized in Fourier space by a standard deviation estimated once on about one
/// percent of the particles (the mean is fixed to zero).
pub struct ImageDataset {
    side: usize,
    down_side: usize,
    down_apix: f64,
    rotations: Vec<Matrix3<f64>>,
    translations: Vec<[f64; 2]>,
    images: Vec<ImageLocation>,
    stacks: HashMap<PathBuf, Mutex<MrcStack>>,
    mask: Option<Mask>,
    /// Plans at the raw and at the working side.
    full_fourier: FourierTransform,
    fourier: FourierTransform,
    f_std: f64,
}

impl std::fmt::Debug for ImageDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageDataset")
            .field("len", &self.len())
            .field("side", &self.side)
            .field("down_side", &self.down_side)
            .field("f_std", &self.f_std)
            .finish()
    }
}

fn stack_path(particles_path: &Path, location: &ImageLocation) -> PathBuf {
    particles_path.join(&location.path)
}

impl ImageDataset {
    #[instrument(skip_all, name = "dataset_setup", fields(particles = table.len()))]
    pub fn new(
        apix: f64,
        side: usize,
        table: &ParticleTable,
        particles_path: impl AsRef<Path>,
        down_side: Option<usize>,
        rad_mask: Option<f64>,
    ) -> Result<Self, EngineError> {
        let particles_path = particles_path.as_ref();
        let down_side = down_side.unwrap_or(side);
        if down_side == 0 || down_side > side {
            return Err(EngineError::Configuration(format!(
                "downsampled side {down_side} must be in 1..={side}"
            )));
        }
        if table.is_empty() {
            return Err(EngineError::Format("particle table is empty".to_string()));
        }

        let mut stacks = HashMap::new();
        for location in &table.images {
            let path = stack_path(particles_path, location);
            if !stacks.contains_key(&path) {
                let stack = MrcStack::open(&path)?;
                let header = stack.header();
                if header.nx != side || header.ny != side {
                    return Err(EngineError::ShapeMismatch(format!(
                        "'{}' holds {}x{} frames, expected {side}x{side}",
                        path.display(),
                        header.nx,
                        header.ny
                    )));
                }
                debug!(stack = %path.display(), frames = stack.len(), "Opened particle stack.");
                stacks.insert(path.clone(), Mutex::new(stack));
            }
            let frames = stacks
                .get(&path)
                .and_then(|s| s.lock().ok().map(|s| s.len()))
                .unwrap_or(0);
            if location.index >= frames {
                return Err(EngineError::Format(format!(
                    "frame {} out of range: '{}' holds {frames} frame(s)",
                    location.index,
                    path.display()
                )));
            }
        }

        let mut dataset = Self {
            side,
            down_side,
            down_apix: side as f64 * apix / down_side as f64,
            rotations: table.rotations.clone(),
            translations: table.translations.clone(),
            images: table
                .images
                .iter()
                .map(|l| ImageLocation {
                    path: stack_path(particles_path, l),
                    index: l.index,
                })
                .collect(),
            stacks,
            mask: rad_mask.map(|r| Mask::new(down_side, r)),
            full_fourier: FourierTransform::new(side),
            fourier: FourierTransform::new(down_side),
            f_std: 1.0,
        };
        dataset.f_std = dataset.estimate_fourier_std()?;
        info!(
            particles = dataset.len(),
            side,
            down_side,
            down_apix = dataset.down_apix,
            f_std = dataset.f_std,
            "Particle dataset ready."
        );
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.rotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rotations.is_empty()
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn down_side(&self) -> usize {
        self.down_side
    }

    pub fn down_apix(&self) -> f64 {
        self.down_apix
    }

    pub fn fourier_std(&self) -> f64 {
        self.f_std
    }

    /// Unnormalized spectrum of particle `index` after cropping and masking.
    fn raw_fourier(&self, index: usize) -> Result<Array2<Complex64>, EngineError> {
        let location = &self.images[index];
        let stack = self.stacks.get(&location.path).ok_or_else(|| {
            EngineError::Internal(format!("stack '{}' was not opened", location.path.display()))
        })?;
        let frame = stack
            .lock()
            .map_err(|_| EngineError::Internal("particle stack lock poisoned".to_string()))?
            .read_frame(location.index)?;
        let mut image = self.full_fourier.fourier_crop(&frame, &self.fourier);
        if let Some(mask) = &self.mask {
            image = mask.apply(&image);
        }
        Ok(self.fourier.to_fourier(&image))
    }

    /// Sample standard deviation of the spectra of every `len / 100`-th particle.
    fn estimate_fourier_std(&self) -> Result<f64, EngineError> {
        let step = (self.len() / 100).max(1);
        let mut values = Vec::new();
        for index in (0..self.len()).step_by(step) {
            values.extend(self.raw_fourier(index)?);
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<Complex64>() / n;
        let variance = values.iter().map(|v| (v - mean).norm_sqr()).sum::<f64>() / (n - 1.0).max(1.0);
        let std = variance.sqrt();
        if !(std.is_finite() && std > 0.0) {
            return Err(EngineError::NumericInstability {
                term: "fourier_std".to_string(),
                value: std,
            });
        }
        debug!(sampled = values.len(), std, "Estimated Fourier standard deviation.");
        Ok(std)
    }

    pub fn get(&self, index: usize) -> Result<ParticleSample, EngineError> {
        if index >= self.len() {
            return Err(EngineError::ShapeMismatch(format!(
                "particle {index} requested from a dataset of {}",
                self.len()
            )));
        }
        let fourier = self.raw_fourier(index)?.mapv(|v| v / self.f_std);
        let image = self.fourier.to_primal(&fourier);
        let [ty, tx] = self.translations[index];
        Ok(ParticleSample {
            index,
            image,
            rotation: self.rotations[index],
            translation: [ty / self.down_apix, tx / self.down_apix],
            fourier,
        })
    }

    /// Fetches a batch, preserving the order of `indices`.
    pub fn get_batch(&self, indices: &[usize]) -> Result<Vec<ParticleSample>, EngineError> {
        #[cfg(not(feature = "parallel"))]
        let iterator = indices.iter();
        #[cfg(feature = "parallel")]
        let iterator = indices.par_iter();

        iterator.map(|&i| self.get(i)).collect()
    }
}

/// Splits the dataset into batches of indices, epoch by epoch.
pub struct DataLoader<'a> {
    dataset: &'a ImageDataset,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    rng: StdRng,
}

impl<'a> DataLoader<'a> {
    pub fn new(dataset: &'a ImageDataset, batch_size: usize, shuffle: bool, drop_last: bool, seed: u64) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            drop_last,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn num_batches(&self) -> usize {
        batch_count(self.dataset.len(), self.batch_size, self.drop_last)
    }

    /// Index batches for the next epoch. Shuffled with the loader's seeded generator if enabled.
    pub fn epoch_batches(&mut self) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        split_batches(&order, self.batch_size, self.drop_last)
    }

    pub fn dataset(&self) -> &'a ImageDataset {
        self.dataset
    }
}

fn batch_count(len: usize, batch_size: usize, drop_last: bool) -> usize {
    if drop_last { len / batch_size } else { len.div_ceil(batch_size) }
}

fn split_batches(order: &[usize], batch_size: usize, drop_last: bool) -> Vec<Vec<usize>> {
    order
        .chunks(batch_size)
        .filter(|c| !drop_last || c.len() == batch_size)
        .map(<[usize]>::to_vec)
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::io::metadata::{CtfParameters, MetadataSource};
    use crate::core::io::mrc::write_mrc;
    use approx::assert_relative_eq;
    use ndarray::Array3;
    use tempfile::TempDir;

    pub(crate) fn ctf_parameters() -> CtfParameters {
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

    /// Writes `frames` random-ish images of side `side` into `dir/stack.mrcs` and returns the
    /// matching table.
    pub(crate) fn write_stack(dir: &Path, frames: usize, side: usize) -> ParticleTable {
        let data = Array3::from_shape_fn((frames, side, side), |(f, r, c)| {
            ((f + 1) as f64 * 0.7 + r as f64 * 0.31 - c as f64 * 0.17).sin()
        });
        write_mrc(dir.join("stack.mrcs"), &data, 1.0, false).unwrap();
        particle_table(frames)
    }

    /// Identity poses, shifted translations and one CTF for `frames` images of `stack.mrcs`.
    pub(crate) fn particle_table(frames: usize) -> ParticleTable {
        ParticleTable {
            source: MetadataSource::Star,
            rotations: vec![Matrix3::identity(); frames],
            translations: (0..frames).map(|i| [i as f64, -2.0]).collect(),
            ctf: vec![ctf_parameters(); frames],
            images: (0..frames)
                .map(|index| ImageLocation {
                    path: PathBuf::from("stack.mrcs"),
                    index,
                })
                .collect(),
        }
    }

    #[test]
    fn samples_are_normalized_and_translated_to_pixels() {
        let dir = TempDir::new().unwrap();
        let table = write_stack(dir.path(), 5, 16);
        let dataset = ImageDataset::new(1.0, 16, &table, dir.path(), Some(8), None).unwrap();
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.down_apix(), 2.0);

        let sample = dataset.get(3).unwrap();
        assert_eq!(sample.index, 3);
        assert_eq!(sample.translation, [1.5, -1.0]);
        assert_eq!(sample.fourier.dim(), (8, 8));
        let reconstructed = FourierTransform::new(8).to_primal(&sample.fourier);
        for (a, b) in reconstructed.iter().zip(sample.image.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }

        // With fewer than 100 particles every particle enters the estimate.
        let all: Vec<Complex64> = dataset
            .get_batch(&[0, 1, 2, 3, 4])
            .unwrap()
            .into_iter()
            .flat_map(|s| s.fourier.into_iter())
            .collect();
        let n = all.len() as f64;
        let mean = all.iter().sum::<Complex64>() / n;
        let var = all.iter().map(|v| (v - mean).norm_sqr()).sum::<f64>() / (n - 1.0);
        assert_relative_eq!(var.sqrt(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn star_and_cryosparc_sources_yield_the_same_samples_and_ctfs() {
        use crate::core::imaging::ctf::CtfModel;
        use crate::core::io::metadata::cryosparc::tests::cs_bytes;
        use crate::core::io::metadata::tests::{sample_particles, star_text};

        let dir = TempDir::new().unwrap();
        let apix = 1.5;
        let particles = sample_particles();
        let data = Array3::from_shape_fn((particles.len(), 16, 16), |(f, r, c)| {
            ((f as f64 + 0.3) * (r as f64 - 7.5)).cos() * (0.2 * c as f64).sin()
        });
        write_mrc(dir.path().join("stack.mrcs"), &data, apix, false).unwrap();
        let star_path = dir.path().join("particles.star");
        std::fs::write(&star_path, star_text(&particles, apix, "stack.mrcs")).unwrap();
        let cs_path = dir.path().join("particles.cs");
        std::fs::write(&cs_path, cs_bytes(&particles, apix, ">stack.mrcs")).unwrap();

        let star = ParticleTable::load(&star_path, apix).unwrap();
        let cs = ParticleTable::load(&cs_path, apix).unwrap();
        let star_set = ImageDataset::new(apix, 16, &star, dir.path(), Some(8), Some(0.9)).unwrap();
        let cs_set = ImageDataset::new(apix, 16, &cs, dir.path(), Some(8), Some(0.9)).unwrap();
        let indices: Vec<usize> = (0..particles.len()).collect();
        let star_ctf = CtfModel::from_table(&star, star_set.down_apix(), 8)
            .unwrap()
            .compute_ctf(&indices)
            .unwrap();
        let cs_ctf = CtfModel::from_table(&cs, cs_set.down_apix(), 8)
            .unwrap()
            .compute_ctf(&indices)
            .unwrap();

        for i in indices {
            let (a, b) = (star_set.get(i).unwrap(), cs_set.get(i).unwrap());
            assert_relative_eq!(a.rotation, b.rotation, epsilon = 1e-4);
            assert_relative_eq!(a.translation[0], b.translation[0], epsilon = 1e-4);
            assert_relative_eq!(a.translation[1], b.translation[1], epsilon = 1e-4);
            for (p, q) in a.fourier.iter().zip(b.fourier.iter()) {
                assert_relative_eq!(p.re, q.re, epsilon = 1e-4);
                assert_relative_eq!(p.im, q.im, epsilon = 1e-4);
            }
            for (p, q) in star_ctf[i].iter().zip(cs_ctf[i].iter()) {
                assert_relative_eq!(p, q, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn out_of_range_frames_fail_at_construction() {
        let dir = TempDir::new().unwrap();
        let mut table = write_stack(dir.path(), 2, 8);
        table.images[1].index = 7;
        assert!(matches!(
            ImageDataset::new(1.0, 8, &table, dir.path(), None, None),
            Err(EngineError::Format(_))
        ));
    }

    #[test]
    fn frame_size_must_match_the_configured_side() {
        let dir = TempDir::new().unwrap();
        let table = write_stack(dir.path(), 2, 8);
        assert!(matches!(
            ImageDataset::new(1.0, 16, &table, dir.path(), None, None),
            Err(EngineError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn loader_covers_every_particle_once_per_epoch() {
        let dir = TempDir::new().unwrap();
        let table = write_stack(dir.path(), 7, 8);
        let dataset = ImageDataset::new(1.0, 8, &table, dir.path(), None, Some(0.9)).unwrap();

        let mut loader = DataLoader::new(&dataset, 3, true, false, 42);
        assert_eq!(loader.num_batches(), 3);
        let batches = loader.epoch_batches();
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 1]);
        let mut seen: Vec<usize> = batches.concat();
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());

        let mut again = DataLoader::new(&dataset, 3, true, false, 42);
        assert_eq!(again.epoch_batches(), batches);

        let mut dropping = DataLoader::new(&dataset, 3, false, true, 0);
        assert_eq!(dropping.num_batches(), 2);
        assert_eq!(dropping.epoch_batches(), vec![vec![0, 1, 2], vec![3, 4, 5]]);
    }
}
