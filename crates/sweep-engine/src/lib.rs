//! sweep-engine — line-of-sight occupancy carving over registered scans.
//!
//! For every return of every scan the engine walks the voxel grid from the
//! scanner toward the (possibly range-limited) return. A traversed voxel
//! whose returns all come from temporally distant scans was seen straight
//! through, so whatever produced those returns was transient: the voxel is
//! carved and every return inside it classified dynamic.

pub mod maxrange;
pub mod occupancy;
pub mod walk;

use hashbrown::HashSet;
use nalgebra::Point3;
use rayon::prelude::*;
use tracing::debug;

use occupancy::OccupancyIndex;
use sweep_core::{
    voxel_diagonal, voxel_of, CarveError, CarveResult, MaxrangeMethod, NormalMethod, ScanSlice,
    Voxel,
};
use walk::{walk_voxels, Walk};

/// Voxels some ray has carved. A point is dynamic iff its cell is in here.
pub type FreeVoxels = HashSet<Voxel>;

/// Carving configuration.
#[derive(Clone, Copy, Debug)]
pub struct CarveParams {
    /// Voxel edge length.
    pub voxel_size: f64,
    /// Sliding-window half width: scans within `diff` indices of the
    /// current one count as temporally adjacent.
    pub diff: usize,
    /// Surface thickness tolerance added to the stop-plane offset.
    pub fuzz: f64,
    pub maxrange: MaxrangeMethod,
    pub normal: NormalMethod,
    /// Neighbour count for the knearest normal methods.
    pub normal_knearest: usize,
}

impl CarveParams {
    pub fn validate(&self) -> CarveResult<()> {
        if !(self.voxel_size > 0.0) || !self.voxel_size.is_finite() {
            return Err(CarveError::InvalidVoxelSize(self.voxel_size));
        }
        Ok(())
    }
}

/// Sliding-window carving policy, one per walked scan.
///
/// Per traversed voxel: no returns at all is no evidence of emptiness, the
/// ray keeps going unmarked. Returns from a scan inside the window
/// `[slice - diff, slice + diff]` mean plausibly real geometry, the ray
/// stops. Returns only from outside the window mean the voxel was seen
/// through from here; it is marked free.
pub struct WindowPolicy<'a> {
    occupancy: &'a OccupancyIndex,
    slice: usize,
    diff: usize,
    freed: FreeVoxels,
}

impl<'a> WindowPolicy<'a> {
    pub fn new(occupancy: &'a OccupancyIndex, slice: usize, diff: usize) -> Self {
        Self {
            occupancy,
            slice,
            diff,
            freed: FreeVoxels::default(),
        }
    }

    pub fn visit(&mut self, voxel: Voxel) -> Walk {
        let Some(slices) = self.occupancy.get(&voxel) else {
            return Walk::Continue;
        };
        let lo = self.slice.saturating_sub(self.diff);
        let hi = self.slice + self.diff;
        if slices.range(lo..=hi).next().is_some() {
            return Walk::Stop;
        }
        self.freed.insert(voxel);
        Walk::Continue
    }

    pub fn into_freed(self) -> FreeVoxels {
        self.freed
    }
}

/// Traversal limits for every scan. `none` is free: all rays unlimited.
/// `normals` runs per scan in parallel, each worker owning its own angular
/// index and range array.
pub fn compute_max_ranges(
    scans: &[ScanSlice],
    params: &CarveParams,
) -> CarveResult<Vec<Vec<f64>>> {
    match params.maxrange {
        MaxrangeMethod::None => Ok(scans.iter().map(|s| maxrange::unbounded(s.len())).collect()),
        MaxrangeMethod::Normals => {
            match params.normal {
                NormalMethod::Angle => {}
                NormalMethod::Knearest => {
                    return Err(CarveError::Unsupported("normal method `knearest`"))
                }
                NormalMethod::Range => {
                    return Err(CarveError::Unsupported("normal method `range`"))
                }
                NormalMethod::KnearestGlobal => {
                    return Err(CarveError::Unsupported("normal method `knearest-global`"))
                }
                NormalMethod::RangeGlobal => {
                    return Err(CarveError::Unsupported("normal method `range-global`"))
                }
            }
            let diag = voxel_diagonal(params.voxel_size);
            scans
                .par_iter()
                .map(|scan| {
                    debug!(scan = scan.index, points = scan.len(), "computing traversal limits");
                    maxrange::normals(scan, diag, params.fuzz)
                })
                .collect()
        }
        MaxrangeMethod::OneNearest => Err(CarveError::Unsupported("maxrange method `1nearest`")),
    }
}

/// Walk every ray of one scan and return the voxels it frees.
pub fn carve_scan(
    scan: &ScanSlice,
    occupancy: &OccupancyIndex,
    max_ranges: &[f64],
    params: &CarveParams,
) -> FreeVoxels {
    let origin = scan.position();
    let mut policy = WindowPolicy::new(occupancy, scan.index, params.diff);
    for (j, p) in scan.world.iter().enumerate() {
        let target = if max_ranges[j].is_finite() {
            // Pull the endpoint back along the scanner-local ray, then move
            // it into the world frame with the scan's pose.
            let local = &scan.local[j];
            let factor = max_ranges[j] / local.coords.norm();
            scan.pose * Point3::from(local.coords * factor)
        } else {
            *p
        };
        walk_voxels(&origin, &target, params.voxel_size, |v| policy.visit(v));
    }
    policy.into_freed()
}

/// Carve every scan in parallel and union the freed sets. Each worker owns
/// its scan's set; the union is commutative, so the result depends only on
/// the inputs, never on scheduling or worker count.
pub fn carve(
    scans: &[ScanSlice],
    occupancy: &OccupancyIndex,
    max_ranges: &[Vec<f64>],
    params: &CarveParams,
) -> FreeVoxels {
    scans
        .par_iter()
        .zip(max_ranges.par_iter())
        .map(|(scan, ranges)| {
            let freed = carve_scan(scan, occupancy, ranges, params);
            debug!(scan = scan.index, freed = freed.len(), "scan carved");
            freed
        })
        .reduce(FreeVoxels::default, |a, b| {
            let (mut big, small) = if a.len() >= b.len() { (a, b) } else { (b, a) };
            big.extend(small);
            big
        })
}

/// A point is dynamic iff its voxel was carved.
pub fn is_dynamic(free: &FreeVoxels, p: &Point3<f64>, voxel_size: f64) -> bool {
    free.contains(&voxel_of(p, voxel_size))
}
