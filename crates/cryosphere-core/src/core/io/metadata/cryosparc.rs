use super::npy::RecordArray;
use super::{CtfParameters, ImageLocation, MetadataError, MetadataSource, ParticleTable};
use crate::core::geometry::rotation::cryosparc_pose;
use nalgebra::Vector3;
use std::path::{Path, PathBuf};
use tracing::debug;

pub fn read_cs(path: &Path, apix: f64) -> Result<ParticleTable, MetadataError> {
    let bytes = std::fs::read(path).map_err(|source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let records = RecordArray::parse(&bytes)?;
    table_from_records(&records, apix)
}

fn optional_column(
    records: &RecordArray,
    name: &str,
    default: f64,
) -> Result<Vec<f64>, MetadataError> {
    if records.field(name).is_none() {
        return Ok(vec![default; records.len]);
    }
    Ok(records.numeric(name)?.column(0).to_vec())
}

pub fn table_from_records(records: &RecordArray, apix: f64) -> Result<ParticleTable, MetadataError> {
    let n = records.len;
    let poses = records.numeric("alignments3D/pose")?;
    let shifts = records.numeric("alignments3D/shift")?;
    if poses.ncols() != 3 || shifts.ncols() != 2 {
        return Err(MetadataError::Inconsistent(format!(
            "alignments3D/pose must have 3 and alignments3D/shift 2 components, found {} and {}",
            poses.ncols(),
            shifts.ncols()
        )));
    }
    let psize = optional_column(records, "blob/psize_A", apix)?;

    let df1 = records.numeric("ctf/df1_A")?;
    let df2 = records.numeric("ctf/df2_A")?;
    let df_angle = records.numeric("ctf/df_angle_rad")?;
    let voltage = records.numeric("ctf/accel_kv")?;
    let cs = records.numeric("ctf/cs_mm")?;
    let amp = records.numeric("ctf/amp_contrast")?;
    let phase_shift = optional_column(records, "ctf/phase_shift_rad", 0.0)?;
    let scale = optional_column(records, "ctf/scale", 1.0)?;
    let b_factor = optional_column(records, "ctf/bfactor", 0.0)?;

    let paths = records.strings("blob/path")?;
    let indices = records.numeric("blob/idx")?;

    debug!("Reading {} cryoSPARC particles.", n);

    let mut table = ParticleTable {
        source: MetadataSource::CryoSparc,
        rotations: Vec::with_capacity(n),
        translations: Vec::with_capacity(n),
        ctf: Vec::with_capacity(n),
        images: Vec::with_capacity(n),
    };
    for i in 0..n {
        let rotvec = Vector3::new(poses[[i, 0]], poses[[i, 1]], poses[[i, 2]]);
        table.rotations.push(cryosparc_pose(&rotvec));
        // Shifts are stored in pixels, (x, y).
        table
            .translations
            .push([shifts[[i, 1]] * psize[i], shifts[[i, 0]] * psize[i]]);
        table.ctf.push(CtfParameters {
            defocus_u: df1[[i, 0]],
            defocus_v: df2[[i, 0]],
            defocus_angle: df_angle[[i, 0]].to_degrees(),
            voltage: voltage[[i, 0]],
            spherical_aberration: cs[[i, 0]],
            amplitude_contrast: amp[[i, 0]],
            phase_shift: phase_shift[i].to_degrees(),
            scale: scale[i],
            b_factor: b_factor[i],
        });

        let index = indices[[i, 0]];
        if index < 0.0 || index.fract() != 0.0 {
            return Err(MetadataError::InvalidValue {
                column: "blob/idx".to_string(),
                row: i,
                value: index.to_string(),
            });
        }
        let stack = paths[i].trim_start_matches('>');
        table.images.push(ImageLocation {
            path: PathBuf::from(stack),
            index: index as usize,
        });
    }

    table.check_lengths()?;
    Ok(table)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::super::npy::write_record_array;
    use super::super::tests::{Particle, cs_rotvec, sample_particles};
    use super::*;
    use approx::assert_relative_eq;

    const PATH_WIDTH: usize = 32;

    /// Encodes particles as a cryoSPARC `.cs` record array.
    pub(crate) fn cs_bytes(particles: &[Particle], apix: f64, stack: &str) -> Vec<u8> {
        let descr = format!(
            "[('uid', '<u8'), ('blob/path', '|S{}'), ('blob/idx', '<u4'), ('blob/psize_A', '<f4'), \
             ('alignments3D/pose', '<f4', (3,)), ('alignments3D/shift', '<f4', (2,)), \
             ('ctf/accel_kv', '<f4'), ('ctf/cs_mm', '<f4'), ('ctf/amp_contrast', '<f4'), \
             ('ctf/df1_A', '<f4'), ('ctf/df2_A', '<f4'), ('ctf/df_angle_rad', '<f4'), \
             ('ctf/phase_shift_rad', '<f4')]",
            PATH_WIDTH
        );
        let mut records = Vec::new();
        let f = |records: &mut Vec<u8>, v: f64| records.extend_from_slice(&(v as f32).to_le_bytes());
        for (uid, p) in particles.iter().enumerate() {
            records.extend_from_slice(&(uid as u64).to_le_bytes());
            let mut path = [0u8; PATH_WIDTH];
            path[..stack.len()].copy_from_slice(stack.as_bytes());
            records.extend_from_slice(&path);
            records.extend_from_slice(&(p.frame as u32).to_le_bytes());
            f(&mut records, apix);
            let rotvec = cs_rotvec(p.angles);
            for k in 0..3 {
                f(&mut records, rotvec[k]);
            }
            f(&mut records, p.shift_px[0]);
            f(&mut records, p.shift_px[1]);
            f(&mut records, p.ctf.voltage);
            f(&mut records, p.ctf.spherical_aberration);
            f(&mut records, p.ctf.amplitude_contrast);
            f(&mut records, p.ctf.defocus_u);
            f(&mut records, p.ctf.defocus_v);
            f(&mut records, p.ctf.defocus_angle.to_radians());
            f(&mut records, p.ctf.phase_shift.to_radians());
        }
        write_record_array(&descr, particles.len(), &records)
    }

    #[test]
    fn reads_cryosparc_fields_with_unit_conversions() {
        let bytes = cs_bytes(&sample_particles(), 2.0, ">J25/stack.mrc");
        let records = RecordArray::parse(&bytes).unwrap();
        let table = table_from_records(&records, 1.0).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.images[1].path, PathBuf::from("J25/stack.mrc"));
        assert_eq!(table.images[1].index, 1);
        // Particle 0 shift is (1.5, -2.0) px at the file's pixel size of 2 Å.
        assert_relative_eq!(table.translations[0][0], -4.0, epsilon = 1e-6);
        assert_relative_eq!(table.translations[0][1], 3.0, epsilon = 1e-6);
        assert_relative_eq!(table.ctf[0].defocus_angle, 35.0, epsilon = 1e-4);
        assert_eq!(table.ctf[0].scale, 1.0);
        assert_eq!(table.ctf[0].b_factor, 0.0);
    }

    #[test]
    fn missing_pose_field_is_reported() {
        let bytes = write_record_array("[('uid', '<u8')]", 1, &0u64.to_le_bytes());
        let records = RecordArray::parse(&bytes).unwrap();
        assert!(matches!(
            table_from_records(&records, 1.0),
            Err(MetadataError::MissingColumn(c)) if c == "alignments3D/pose"
        ));
    }
}
