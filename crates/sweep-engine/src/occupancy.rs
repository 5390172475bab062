//! Which scans saw returns in which voxel.

use std::collections::BTreeSet;

use hashbrown::HashMap;
use sweep_core::{voxel_of, ScanSlice, Voxel};

/// Maps each occupied voxel to the ordered set of scan indices with at
/// least one return inside it. Voxels nobody hit are simply absent.
#[derive(Debug, Default)]
pub struct OccupancyIndex {
    cells: HashMap<Voxel, BTreeSet<usize>>,
}

impl OccupancyIndex {
    /// Bin every world-frame point of every scan.
    pub fn build(scans: &[ScanSlice], voxel_size: f64) -> Self {
        let mut index = Self::default();
        for scan in scans {
            for p in &scan.world {
                index.insert(voxel_of(p, voxel_size), scan.index);
            }
        }
        index
    }

    /// Record a return from `scan` in `voxel`. Re-inserting is a no-op.
    pub fn insert(&mut self, voxel: Voxel, scan: usize) {
        self.cells.entry(voxel).or_default().insert(scan);
    }

    /// Scan indices with returns in `voxel`, ascending; `None` if none.
    pub fn get(&self, voxel: &Voxel) -> Option<&BTreeSet<usize>> {
        self.cells.get(voxel)
    }

    /// Number of occupied voxels.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
