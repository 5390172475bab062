//! sweep-core — voxel grid arithmetic, scan data model and shared config types.

use clap::ValueEnum;
use nalgebra::{Isometry3, Point3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A cubic grid cell, addressed by floored integer coordinates.
///
/// Equality is component-wise; the derived `Ord` is lexicographic in
/// `(x, y, z)`, so voxels can live in ordered sets as well as hash maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Voxel {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl Voxel {
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }
}

/// Integer division rounding toward negative infinity.
///
/// Rust's `as`-casts and `%` truncate toward zero, which shifts every cell
/// boundary below the origin by one. All voxelization must go through this
/// function so that negative coordinates land in the correct cell.
#[inline]
pub fn floor_div(a: f64, b: f64) -> i64 {
    a.div_euclid(b) as i64
}

/// Euclidean remainder: `floor_rem(a, b)` lies in `[0, b)` for positive `b`.
#[inline]
pub fn floor_rem(a: f64, b: f64) -> f64 {
    a.rem_euclid(b)
}

/// The cell containing a world point for edge length `size`.
#[inline]
pub fn voxel_of(p: &Point3<f64>, size: f64) -> Voxel {
    Voxel::new(
        floor_div(p.x, size),
        floor_div(p.y, size),
        floor_div(p.z, size),
    )
}

/// The space diagonal of a cubic voxel, `size * sqrt(3)`.
///
/// This is the maximum distance between any two points inside one cell and
/// the characteristic length for angular and range thresholds.
#[inline]
pub fn voxel_diagonal(size: f64) -> f64 {
    size * 3.0_f64.sqrt()
}

/// One registered laser scan.
///
/// `world` holds the pose-transformed coordinates; `local` the untouched
/// scanner-frame coordinates the scan was recorded in. Both arrays are the
/// same length and `world[j] = pose * local[j]`.
#[derive(Clone, Debug)]
pub struct ScanSlice {
    /// Monotonically increasing scan number (file numbering, not list order).
    pub index: usize,
    /// Rigid transform from the scanner frame to the world frame.
    pub pose: Isometry3<f64>,
    /// World-frame points.
    pub world: Vec<Point3<f64>>,
    /// Scanner-local points, parallel to `world`.
    pub local: Vec<Point3<f64>>,
    /// Optional reflectance column, parallel to `world`.
    pub reflectance: Option<Vec<f64>>,
}

impl ScanSlice {
    pub fn len(&self) -> usize {
        self.world.len()
    }

    pub fn is_empty(&self) -> bool {
        self.world.is_empty()
    }

    /// The scanner position in the world frame.
    pub fn position(&self) -> Point3<f64> {
        self.pose.translation.vector.into()
    }
}

/// How far along each line of sight the ray walk may travel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum MaxrangeMethod {
    /// No truncation; rays run all the way to their return.
    None,
    /// Truncate at a stop plane fitted from local surface normals.
    Normals,
    /// Truncate at the single nearest neighbour (not implemented).
    #[value(name = "1nearest")]
    OneNearest,
}

/// How the surface normal for the stop plane is estimated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum NormalMethod {
    /// K nearest neighbours from a per-scan tree (not implemented).
    Knearest,
    /// Radius search of one voxel diagonal (not implemented).
    Range,
    /// All points seen within the angle one voxel subtends at the scanner.
    Angle,
    /// Like `knearest` but against a global tree (not implemented).
    KnearestGlobal,
    /// Like `range` but against a global tree (not implemented).
    RangeGlobal,
}

/// Errors surfaced by the carving engine. Geometry invariants are never
/// clamped away; they indicate bad input data or poses and abort the run.
#[derive(Debug, Error)]
pub enum CarveError {
    #[error("voxel size {0} is not a positive finite number")]
    InvalidVoxelSize(f64),

    #[error(
        "scan {scan} point {point} lies {dist:.6} from the scanner, \
         inside the voxel diagonal {min:.6}; it would shadow every other point"
    )]
    PointTooClose {
        scan: usize,
        point: usize,
        dist: f64,
        min: f64,
    },

    #[error(
        "scan {scan} point {point}: computed stop range {range:.6} exceeds \
         the point's own distance {dist:.6}"
    )]
    RangeBeyondPoint {
        scan: usize,
        point: usize,
        range: f64,
        dist: f64,
    },

    #[error("{0} is not implemented")]
    Unsupported(&'static str),
}

pub type CarveResult<T> = std::result::Result<T, CarveError>;
