//! 3D digital differential analyzer over the voxel grid.
//!
//! Amanatides & Woo, "A Fast Voxel Traversal Algorithm for Ray Tracing",
//! Eurographics '87, with two changes: step counts are integers and each
//! `tMax` is reconstructed from its base value and counter, so long rays do
//! not accumulate floating point drift; and when a step crosses a cell
//! corner with mixed step signs, the grazed in-between voxel is emitted too.

use nalgebra::Point3;
use sweep_core::{floor_rem, voxel_of, Voxel};

/// Visitor verdict for a traversed voxel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Walk {
    Continue,
    Stop,
}

struct Axis {
    step: i64,
    t_delta: f64,
    t_max_start: f64,
    t_max: f64,
    /// Steps needed to move from the (corrected) start cell to the end cell.
    max_mult: i64,
    mult: i64,
}

impl Axis {
    fn prepare(
        start: f64,
        dir: f64,
        start_cell: &mut i64,
        cur_cell: &mut i64,
        end_cell: i64,
        size: f64,
    ) -> Axis {
        if dir == 0.0 {
            return Axis {
                step: 0,
                t_delta: 0.0,
                t_max_start: f64::INFINITY,
                t_max: f64::INFINITY,
                max_mult: 0,
                mult: 0,
            };
        }
        let step: i64 = if dir > 0.0 { 1 } else { -1 };
        let t_delta = step as f64 * size / dir;
        let t_max = t_delta * (1.0 - floor_rem(step as f64 * start / size, 1.0));
        let mut max_mult = (end_cell - *start_cell) * step;
        // A start exactly on a cell boundary, walking in the negative
        // direction, already sits in the cell below the floored one.
        if step == -1 && t_max == t_delta && *start_cell != end_cell {
            *cur_cell -= 1;
            *start_cell -= 1;
            max_mult -= 1;
        }
        Axis {
            step,
            t_delta,
            t_max_start: t_max,
            t_max,
            max_mult,
            mult: 0,
        }
    }

    fn advance(&mut self, base_cell: i64, cur_cell: &mut i64) {
        self.mult += 1;
        *cur_cell = base_cell + self.mult * self.step;
        self.t_max = self.t_max_start + self.mult as f64 * self.t_delta;
    }
}

/// Enumerate the voxels the segment `start → end` crosses, nearest first,
/// handing each to `visit`. The walk begins at `cell(start)`, never emits a
/// cell beyond `cell(end)`, and ends early when the visitor returns
/// [`Walk::Stop`]. A zero-length segment visits `cell(start)` exactly once.
pub fn walk_voxels<F>(start: &Point3<f64>, end: &Point3<f64>, size: f64, mut visit: F)
where
    F: FnMut(Voxel) -> Walk,
{
    let dir = end - start;
    let first = voxel_of(start, size);
    if dir.x == 0.0 && dir.y == 0.0 && dir.z == 0.0 {
        visit(first);
        return;
    }
    let end_voxel = voxel_of(end, size);
    if visit(first) == Walk::Stop {
        return;
    }
    if first == end_voxel {
        return;
    }

    let mut base = [first.x, first.y, first.z];
    let mut cur = [first.x, first.y, first.z];
    let ends = [end_voxel.x, end_voxel.y, end_voxel.z];
    let mut axes = [
        Axis::prepare(start.x, dir.x, &mut base[0], &mut cur[0], ends[0], size),
        Axis::prepare(start.y, dir.y, &mut base[1], &mut cur[1], ends[1], size),
        Axis::prepare(start.z, dir.z, &mut base[2], &mut cur[2], ends[2], size),
    ];

    // Boundary corrections may have shifted the current cell off cell(start).
    if cur != [first.x, first.y, first.z] {
        if visit(Voxel::new(cur[0], cur[1], cur[2])) == Walk::Stop {
            return;
        }
    }
    if cur == ends {
        return;
    }

    let positive = axes.iter().any(|a| a.step == 1);
    let negative = axes.iter().any(|a| a.step == -1);

    loop {
        let min_t = axes[0].t_max.min(axes[1].t_max).min(axes[2].t_max);
        let mut stepped = [false; 3];
        for i in 0..3 {
            if axes[i].t_max == min_t {
                axes[i].advance(base[i], &mut cur[i]);
                stepped[i] = true;
            }
        }

        // Stepping across a corner in two or three axes at once skips the
        // voxel the segment grazed on the way. That voxel only exists when
        // the step signs are mixed: it sits one cell up on each negatively
        // stepped axis. Its extra cell is allowed one step past max_mult.
        let multi = stepped.iter().filter(|&&s| s).count() >= 2;
        if multi && positive && negative {
            let mut graced = cur;
            let mut in_bounds = true;
            for i in 0..3 {
                if !stepped[i] {
                    continue;
                }
                if axes[i].step < 0 {
                    if axes[i].mult > axes[i].max_mult + 1 {
                        in_bounds = false;
                    }
                    graced[i] += 1;
                } else if axes[i].mult > axes[i].max_mult {
                    in_bounds = false;
                }
            }
            if !in_bounds {
                return;
            }
            // When no stepped axis is negative the "graced" cell collapses
            // onto the current one; emitting it would be a duplicate.
            if graced != cur {
                if visit(Voxel::new(graced[0], graced[1], graced[2])) == Walk::Stop {
                    return;
                }
            }
        }

        // The endpoint cell is the definitive stopping cell: check counters
        // before emitting, so nothing past cell(end) is ever visited.
        if (0..3).any(|i| stepped[i] && axes[i].mult > axes[i].max_mult) {
            return;
        }
        if visit(Voxel::new(cur[0], cur[1], cur[2])) == Walk::Stop {
            return;
        }
        if cur == ends {
            return;
        }
    }
}
