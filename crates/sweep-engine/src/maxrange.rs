//! Per-ray traversal limits.
//!
//! Without a limit every ray runs all the way to its return, which lets it
//! carve voxels behind the surface it actually hit. The `normals` method
//! fits a local plane at each return, offsets it one voxel diagonal (plus
//! `fuzz`) toward the scanner, and stops rays at that plane. Each processed
//! point also shortens the rays of every point in its angular shadow, so
//! the plane is fitted once per local patch rather than once per point.

use nalgebra::{Matrix3, Vector3};
use sweep_core::{CarveError, CarveResult, ScanSlice};
use sweep_sphere::SphereTree;

/// No truncation: every ray may reach its return.
pub fn unbounded(n: usize) -> Vec<f64> {
    vec![f64::INFINITY; n]
}

/// Stop-plane traversal limits for one scan, computed in the scanner frame.
///
/// Limits are filled closest-return-first; a point whose limit was already
/// set by a closer point's shadow keeps it. Finite limits never exceed the
/// point's own distance.
pub fn normals(scan: &ScanSlice, voxel_diag: f64, fuzz: f64) -> CarveResult<Vec<f64>> {
    let n = scan.len();
    let mut ranges = unbounded(n);
    if n == 0 {
        return Ok(ranges);
    }

    let locals: Vec<[f64; 3]> = scan.local.iter().map(|p| [p.x, p.y, p.z]).collect();
    let tree = SphereTree::build(&locals);

    let distances: Vec<f64> = scan.local.iter().map(|p| p.coords.norm()).collect();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| distances[a].total_cmp(&distances[b]));

    for &j in &order {
        if ranges[j].is_finite() {
            continue;
        }
        let dist = distances[j];
        let p = scan.local[j].coords;
        let p_hat = p / dist;

        let alpha = shadow_angle(voxel_diag, dist);
        let shadow = tree.search([p_hat.x, p_hat.y, p_hat.z], alpha);

        let mut normal = match plane_normal(&locals, &shadow) {
            Some(normal) => normal,
            // Too few neighbours to fit a plane; stop perpendicular to the
            // line of sight instead.
            None => -p_hat,
        };
        // The normal must point toward the scanner, i.e. against the ray.
        if normal.dot(&p_hat) >= 0.0 {
            normal = -normal;
        }

        // Stop plane parallel to the local surface, one voxel diagonal
        // (plus fuzz) in front of it. For any unit direction q the ray/plane
        // intersection distance is dividend / (q . normal).
        let base = p + normal * (voxel_diag + fuzz);
        let dividend = base.dot(&normal);
        let divisor = p_hat.dot(&normal);
        if divisor == 0.0 {
            // Plane parallel to the line of sight; shoot no ray at all.
            ranges[j] = 0.0;
            continue;
        }
        let range = dividend / divisor;
        if range > dist {
            return Err(CarveError::RangeBeyondPoint {
                scan: scan.index,
                point: j,
                range,
                dist,
            });
        }
        ranges[j] = range.max(0.0);

        if dist < voxel_diag {
            return Err(CarveError::PointTooClose {
                scan: scan.index,
                point: j,
                dist,
                min: voxel_diag,
            });
        }

        // Everything inside the shadow cone stops at the same plane, unless
        // it lies in front of the plane (processed on its own turn) or is
        // already limited by a closer point.
        for k in shadow {
            if k == j {
                continue;
            }
            let dist_k = distances[k];
            let q_hat = scan.local[k].coords / dist_k;
            let div_k = q_hat.dot(&normal);
            if div_k == 0.0 {
                continue;
            }
            let cand = dividend / div_k;
            if cand > dist_k {
                continue;
            }
            let cand = cand.max(0.0);
            if ranges[k] < cand {
                continue;
            }
            ranges[k] = cand;
        }
    }
    Ok(ranges)
}

/// Full angle under which a voxel's circumsphere is seen from distance
/// `dist`, worst case (target on the far side of the sphere). The arcsine
/// argument is clamped so returns between one and two diagonals out get a
/// hemisphere cone instead of NaN.
fn shadow_angle(voxel_diag: f64, dist: f64) -> f64 {
    2.0 * (voxel_diag / (dist - voxel_diag)).clamp(-1.0, 1.0).asin()
}

/// Unit normal of the plane best fitting the selected points: the
/// eigenvector for the smallest eigenvalue of their covariance.
fn plane_normal(points: &[[f64; 3]], idx: &[usize]) -> Option<Vector3<f64>> {
    if idx.len() < 3 {
        return None;
    }
    let mut mean = Vector3::zeros();
    for &i in idx {
        mean += Vector3::from(points[i]);
    }
    mean /= idx.len() as f64;

    let mut cov = Matrix3::zeros();
    for &i in idx {
        let v = Vector3::from(points[i]) - mean;
        cov += v * v.transpose();
    }

    let eig = cov.symmetric_eigen();
    let mut min_k = 0;
    for k in 1..3 {
        if eig.eigenvalues[k] < eig.eigenvalues[min_k] {
            min_k = k;
        }
    }
    Some(eig.eigenvectors.column(min_k).into_owned())
}
