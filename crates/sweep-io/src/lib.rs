//! sweep-io — scan directory ingest and result writers.
//!
//! Scans live as `scanNNN.3d` / `scanNNN.pose` pairs in one directory. The
//! `.pose` file holds the scanner translation and Euler angles (degrees);
//! the `.3d` file one `x y z [reflectance]` return per line. Output clouds
//! are written with hexadecimal floats so no precision is lost in text.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use hashbrown::HashSet;
use nalgebra::{Isometry3, Point3, Rotation3, Translation3, UnitQuaternion};
use sweep_core::{voxel_of, ScanSlice, Voxel};

/// Read consecutive scan pairs from `dir`, starting at number `start` and
/// stopping after `end` (or at the first missing pair).
///
/// The minimum-range filter drops returns closer than `min_range` to the
/// scanner. It runs on the scanner-local coordinates, before the pose
/// transform; filtering world coordinates would drop the wrong points.
pub fn read_directory(
    dir: &Path,
    start: usize,
    end: Option<usize>,
    min_range: f64,
) -> Result<Vec<ScanSlice>> {
    let mut scans = Vec::new();
    let mut index = start;
    loop {
        if end.is_some_and(|e| index > e) {
            break;
        }
        let points_path = dir.join(format!("scan{index:03}.3d"));
        let pose_path = dir.join(format!("scan{index:03}.pose"));
        if !points_path.is_file() || !pose_path.is_file() {
            break;
        }
        let pose = read_pose(&pose_path)?;
        let (mut local, mut reflectance) = read_points(&points_path)?;

        let keep: Vec<bool> = local.iter().map(|p| p.coords.norm() >= min_range).collect();
        if keep.iter().any(|k| !k) {
            let mut flags = keep.iter();
            local.retain(|_| *flags.next().unwrap());
            if let Some(refl) = reflectance.as_mut() {
                let mut flags = keep.iter();
                refl.retain(|_| *flags.next().unwrap());
            }
        }

        let world: Vec<Point3<f64>> = local.iter().map(|p| pose * p).collect();
        scans.push(ScanSlice {
            index,
            pose,
            world,
            local,
            reflectance,
        });
        index += 1;
    }
    if scans.is_empty() {
        bail!("no scans found in {}", dir.display());
    }
    Ok(scans)
}

/// Rigid transform `world = Rz(rz) * Ry(ry) * Rx(rx) * local + t`,
/// angles in degrees.
pub fn pose_isometry(t: [f64; 3], euler_deg: [f64; 3]) -> Isometry3<f64> {
    let rot = Rotation3::from_euler_angles(
        euler_deg[0].to_radians(),
        euler_deg[1].to_radians(),
        euler_deg[2].to_radians(),
    );
    Isometry3::from_parts(
        Translation3::new(t[0], t[1], t[2]),
        UnitQuaternion::from_rotation_matrix(&rot),
    )
}

fn read_pose(path: &Path) -> Result<Isometry3<f64>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let values: Vec<f64> = text
        .split_whitespace()
        .map(|tok| {
            tok.parse()
                .with_context(|| format!("{}: bad pose value {tok:?}", path.display()))
        })
        .collect::<Result<_>>()?;
    if values.len() != 6 {
        bail!(
            "{}: expected 6 pose values, found {}",
            path.display(),
            values.len()
        );
    }
    Ok(pose_isometry(
        [values[0], values[1], values[2]],
        [values[3], values[4], values[5]],
    ))
}

fn read_points(path: &Path) -> Result<(Vec<Point3<f64>>, Option<Vec<f64>>)> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut points = Vec::new();
    let mut reflectance: Option<Vec<f64>> = None;
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut cols = [0.0_f64; 4];
        let mut n = 0;
        for tok in line.split_whitespace() {
            if n == 4 {
                bail!("{}:{}: more than 4 columns", path.display(), lineno + 1);
            }
            cols[n] = tok.parse().with_context(|| {
                format!("{}:{}: bad number {tok:?}", path.display(), lineno + 1)
            })?;
            n += 1;
        }
        match n {
            3 if reflectance.is_none() => {}
            4 => {
                let refl = reflectance.get_or_insert_with(Vec::new);
                if refl.len() != points.len() {
                    bail!(
                        "{}:{}: reflectance column appears on some rows only",
                        path.display(),
                        lineno + 1
                    );
                }
                refl.push(cols[3]);
            }
            3 => bail!(
                "{}:{}: reflectance column appears on some rows only",
                path.display(),
                lineno + 1
            ),
            _ => bail!(
                "{}:{}: expected 3 or 4 columns, found {n}",
                path.display(),
                lineno + 1
            ),
        }
        points.push(Point3::new(cols[0], cols[1], cols[2]));
    }
    Ok((points, reflectance))
}

/// Hexadecimal rendering of a double with a fixed 13-digit mantissa.
///
/// 52 mantissa bits are exactly 13 hex digits, so the text round-trips to
/// the identical bit pattern (the printf `%a` family, without its
/// shortest-form trimming).
pub fn format_hex(v: f64) -> String {
    let bits = v.to_bits();
    let sign = if bits >> 63 == 1 { "-" } else { "" };
    let exp = ((bits >> 52) & 0x7ff) as i64;
    let mant = bits & ((1_u64 << 52) - 1);
    match exp {
        0 if mant == 0 => format!("{sign}0x0p+0"),
        0 => format!("{sign}0x0.{mant:013x}p-1022"),
        0x7ff if mant == 0 => format!("{sign}inf"),
        0x7ff => "nan".to_owned(),
        _ => format!("{sign}0x1.{mant:013x}p{:+}", exp - 1023),
    }
}

/// Split all returns into a static and a dynamic cloud, one `x y z r` line
/// per point, scans in input order.
pub fn write_partition(
    static_path: &Path,
    dynamic_path: &Path,
    scans: &[ScanSlice],
    free: &HashSet<Voxel>,
    voxel_size: f64,
) -> Result<()> {
    let mut stat = BufWriter::new(
        File::create(static_path).with_context(|| format!("creating {}", static_path.display()))?,
    );
    let mut dynp = BufWriter::new(
        File::create(dynamic_path)
            .with_context(|| format!("creating {}", dynamic_path.display()))?,
    );
    for scan in scans {
        for (j, p) in scan.world.iter().enumerate() {
            let refl = scan.reflectance.as_ref().map_or(0.0, |r| r[j]);
            let out: &mut BufWriter<File> = if free.contains(&voxel_of(p, voxel_size)) {
                &mut dynp
            } else {
                &mut stat
            };
            writeln!(
                out,
                "{} {} {} {}",
                format_hex(p.x),
                format_hex(p.y),
                format_hex(p.z),
                format_hex(refl)
            )?;
        }
    }
    stat.flush()?;
    dynp.flush()?;
    Ok(())
}

/// One `scanNNN.mask` per scan in `maskdir`: a `0` (static) or `1`
/// (dynamic) line per input point, in input order.
pub fn write_masks(
    maskdir: &Path,
    scans: &[ScanSlice],
    free: &HashSet<Voxel>,
    voxel_size: f64,
) -> Result<()> {
    fs::create_dir_all(maskdir)
        .with_context(|| format!("creating mask directory {}", maskdir.display()))?;
    for scan in scans {
        let path = maskdir.join(format!("scan{:03}.mask", scan.index));
        let mut out = BufWriter::new(
            File::create(&path).with_context(|| format!("creating {}", path.display()))?,
        );
        for p in &scan.world {
            let dynamic = free.contains(&voxel_of(p, voxel_size));
            writeln!(out, "{}", u8::from(dynamic))?;
        }
        out.flush()?;
    }
    Ok(())
}
