use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sweep_core::{voxel_diagonal, CarveError, MaxrangeMethod, NormalMethod};
use sweep_engine::{carve, compute_max_ranges, occupancy::OccupancyIndex, CarveParams};

/// Classify the returns of a registered scan sequence as static or dynamic
/// by carving voxels that some line of sight passed straight through.
#[derive(Parser, Debug)]
#[command(name = "voxelsweep", version, about)]
struct Args {
    /// Directory holding scanNNN.3d / scanNNN.pose pairs.
    input_dir: PathBuf,

    /// First scan number to process (0-based).
    #[arg(short, long, default_value_t = 0)]
    start: usize,

    /// Last scan number to process; -1 runs to the last scan present.
    #[arg(short, long, default_value_t = -1)]
    end: i64,

    /// Voxel edge length.
    #[arg(long, default_value_t = 10.0)]
    voxel_size: f64,

    /// Scans this many indices before and after the current one count as
    /// temporally adjacent and protect a voxel from carving.
    #[arg(long, default_value_t = 0)]
    diff: usize,

    /// Surface thickness tolerance added to the stop-plane offset.
    #[arg(long, default_value_t = 0.0)]
    fuzz: f64,

    /// How to limit ray traversal along each line of sight.
    #[arg(long, default_value = "none")]
    maxrange_method: MaxrangeMethod,

    /// How to pick the points a surface normal is estimated from.
    #[arg(long, default_value = "angle")]
    normal_method: NormalMethod,

    /// Neighbour count for the knearest normal methods.
    #[arg(long, default_value_t = 40)]
    normal_knearest: usize,

    /// Skip the subvoxel accuracy refinement.
    #[arg(long)]
    no_subvoxel_accuracy: bool,

    /// Parallel worker count.
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Directory for per-scan mask files (default: <input-dir>/masks).
    #[arg(long)]
    maskdir: Option<PathBuf>,

    /// Log filter, e.g. "info" or "sweep_engine=debug".
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log))
        .init();

    if args.end < -1 {
        bail!("end ({}) cannot be below -1", args.end);
    }
    let end = (args.end >= 0).then_some(args.end as usize);
    if let Some(e) = end {
        if e < args.start {
            bail!("end ({e}) cannot be smaller than start ({})", args.start);
        }
    }
    if args.jobs == 0 {
        bail!("jobs must be at least 1");
    }
    if !(args.fuzz >= 0.0) {
        bail!("fuzz ({}) must be non-negative", args.fuzz);
    }
    if !args.no_subvoxel_accuracy {
        return Err(CarveError::Unsupported(
            "subvoxel accuracy refinement (pass --no-subvoxel-accuracy)",
        )
        .into());
    }
    let params = CarveParams {
        voxel_size: args.voxel_size,
        diff: args.diff,
        fuzz: args.fuzz,
        maxrange: args.maxrange_method,
        normal: args.normal_method,
        normal_knearest: args.normal_knearest,
    };
    params.validate()?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.jobs)
        .build()
        .context("building the worker pool")?;

    let total = Instant::now();
    let min_range = voxel_diagonal(args.voxel_size);
    let scans = sweep_io::read_directory(&args.input_dir, args.start, end, min_range)?;
    let points: usize = scans.iter().map(|s| s.len()).sum();
    info!(scans = scans.len(), points, "scans loaded");

    let occupancy = OccupancyIndex::build(&scans, args.voxel_size);
    if occupancy.is_empty() {
        bail!("no voxel is occupied by any scan");
    }
    info!(voxels = occupancy.len(), "occupancy index built");

    let phase = Instant::now();
    let max_ranges = pool.install(|| compute_max_ranges(&scans, &params))?;
    info!(elapsed = ?phase.elapsed(), "traversal limits computed");

    let phase = Instant::now();
    let free = pool.install(|| carve(&scans, &occupancy, &max_ranges, &params));
    info!(
        freed = free.len(),
        percent = 100 * free.len() / occupancy.len(),
        elapsed = ?phase.elapsed(),
        "voxels carved"
    );

    sweep_io::write_partition(
        Path::new("scan000.3d"),
        Path::new("scan001.3d"),
        &scans,
        &free,
        args.voxel_size,
    )?;
    let maskdir = args
        .maskdir
        .unwrap_or_else(|| args.input_dir.join("masks"));
    sweep_io::write_masks(&maskdir, &scans, &free, args.voxel_size)?;

    info!(elapsed = ?total.elapsed(), "done");
    Ok(())
}
