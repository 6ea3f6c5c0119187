//! raybvh CLI - Build, optimize and trace random or grid scenes.

use std::env;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use raybvh::prelude::*;

/// Command line options shared by every command.
struct Options {
    level: &'static str,
    triangles: usize,
    rays: usize,
    seed: u64,
    optimize: bool,
    build: BuildConfig,
    optimizer: OptimizerConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            level: "info",
            triangles: 100_000,
            rays: 1_000_000,
            seed: 1,
            optimize: true,
            build: BuildConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut options = Options::default();
    let mut commands: Vec<&str> = Vec::new();
    let mut iter = args[1..].iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-v" | "--verbose" => options.level = "debug",
            "-vv" | "--trace" => options.level = "trace",
            "-q" | "--quiet" => options.level = "warn",
            "--no-optimize" => options.optimize = false,
            "-n" | "--triangles" => options.triangles = parse_value(arg, iter.next()),
            "-r" | "--rays" => options.rays = parse_value(arg, iter.next()),
            "--seed" => options.seed = parse_value(arg, iter.next()),
            "--bins" => options.build.bin_count = parse_value(arg, iter.next()),
            "--max-depth" => options.build.max_depth = parse_value(arg, iter.next()),
            "--stride" => options.optimizer.stride = parse_value(arg, iter.next()),
            _ => commands.push(arg.as_str()),
        }
    }

    let _guard = init_tracing(options.level);

    let result = match commands.first().copied() {
        Some("bench") | Some("b") => cmd_bench(&options),
        Some("grid") | Some("g") => cmd_grid(&options),
        Some("help") | Some("h") | None => {
            print_help();
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> T {
    match value.map(|v| v.parse::<T>()) {
        Some(Ok(v)) => v,
        _ => {
            eprintln!("Error: {} expects a numeric value", flag);
            std::process::exit(1);
        }
    }
}

/// Console logging filtered by `RUST_LOG`, falling back to `level`.
fn console_subscriber(
    level: &str,
) -> impl tracing::Subscriber + for<'a> LookupSpan<'a> + Send + Sync + 'static {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry().with(filter).with(fmt_layer)
}

/// Adds a Chrome trace written to `trace.json` when run with `RAYBVH_TRACE=1`.
#[cfg(feature = "trace")]
fn init_tracing(level: &str) -> Option<tracing_chrome::FlushGuard> {
    let subscriber = console_subscriber(level);
    if env::var("RAYBVH_TRACE").ok().as_deref() != Some("1") {
        let _ = tracing::subscriber::set_global_default(subscriber);
        return None;
    }

    let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .file("trace.json")
        .build();
    if tracing::subscriber::set_global_default(subscriber.with(chrome_layer)).is_err() {
        return None;
    }
    Some(guard)
}

#[cfg(not(feature = "trace"))]
fn init_tracing(level: &str) {
    let _ = tracing::subscriber::set_global_default(console_subscriber(level));
}

/// Random small triangles scattered in the unit cube.
fn random_mesh(count: usize, rng: &mut StdRng) -> TriangleMesh {
    let triangles = (0..count)
        .map(|_| {
            let center = Vector3::new(rng.gen(), rng.gen(), rng.gen());
            let mut vertex = || {
                let offset = Vector3::new(
                    rng.gen_range(-0.01..0.01),
                    rng.gen_range(-0.01..0.01),
                    rng.gen_range(-0.01..0.01),
                );
                center + offset
            };
            Triangle::new(vertex(), vertex(), vertex())
        })
        .collect();
    TriangleMesh::from_triangles(triangles)
}

/// Rays from random points on a sphere around the unit cube toward random
/// points inside it.
fn random_rays(count: usize, rng: &mut StdRng) -> Vec<Ray> {
    let center = Vector3::splat(0.5);
    (0..count)
        .map(|_| {
            let on_sphere = loop {
                let p = Vector3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                );
                let len = p.length();
                if len > 1e-3 && len <= 1.0 {
                    break p / len;
                }
            };
            let origin = center + on_sphere * 2.0;
            let target = Vector3::new(rng.gen(), rng.gen(), rng.gen());
            Ray::new(origin, (target - origin).normalize())
        })
        .collect()
}

fn build(mesh: TriangleMesh, options: &Options) -> Result<AccelerationStructure> {
    let start = Instant::now();
    let optimizer = options.optimize.then_some(&options.optimizer);
    let accel = AccelerationStructure::new(mesh, &options.build, optimizer)?;
    println!("Built in {:.2?}", start.elapsed());
    println!("  {}", accel.stats());
    if let Some(report) = accel.optimize_report() {
        println!(
            "  optimizer: {} passes, {} reinsertions, {} rollbacks, SAH {:.3} -> {:.3}",
            report.passes,
            report.reinsertions,
            report.rollbacks,
            report.initial_cost,
            report.final_cost
        );
    }
    Ok(accel)
}

fn cmd_bench(options: &Options) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mesh = random_mesh(options.triangles, &mut rng);
    let rays = random_rays(options.rays, &mut rng);
    tracing::info!(triangles = mesh.len(), rays = rays.len(), seed = options.seed, "scene generated");

    let accel = build(mesh, options)?;
    accel.validate()?;

    let start = Instant::now();
    let hits = rays
        .par_iter()
        .filter(|ray| accel.raycast(ray).is_some())
        .count();
    let elapsed = start.elapsed();
    println!(
        "Closest hit: {}/{} rays hit in {:.2?} ({:.2} Mrays/s)",
        hits,
        rays.len(),
        elapsed,
        rays.len() as f64 / elapsed.as_secs_f64().max(1e-9) / 1e6
    );

    let start = Instant::now();
    let occluded = rays.par_iter().filter(|ray| accel.occluded(ray)).count();
    println!("Any hit:     {}/{} rays occluded in {:.2?}", occluded, rays.len(), start.elapsed());

    if occluded != hits {
        return Err(Error::invariant(format!(
            "closest-hit found {} hits but any-hit found {}",
            hits, occluded
        )));
    }
    Ok(())
}

/// 10x10 grid of unit cells at z = 1, two triangles per cell, hit by one
/// ray per cell center.
fn cmd_grid(options: &Options) -> Result<()> {
    let mut mesh = TriangleMesh::new();
    let mut positions = Vec::with_capacity(11 * 11);
    for y in 0..=10 {
        for x in 0..=10 {
            positions.push(Vector3::new(x as Real, y as Real, 1.0));
        }
    }
    let mut indices = Vec::with_capacity(200);
    for y in 0..10u32 {
        for x in 0..10u32 {
            let i = y * 11 + x;
            indices.push([i, i + 1, i + 12]);
            indices.push([i, i + 12, i + 11]);
        }
    }
    mesh.add_indexed(&positions, &indices, None, None)?;

    let accel = build(mesh, options)?;
    accel.validate()?;

    let mut hits = 0;
    for y in 0..10 {
        for x in 0..10 {
            let origin = Vector3::new(x as Real + 0.5, y as Real + 0.5, 0.0);
            match accel.raycast(&Ray::new(origin, Vector3::Z)) {
                Some(hit) if (hit.distance - 1.0).abs() < 1e-4 => hits += 1,
                Some(hit) => tracing::warn!(x, y, distance = hit.distance, "unexpected hit distance"),
                None => tracing::warn!(x, y, "cell missed"),
            }
        }
    }
    println!("Grid: {}/100 cell rays hit at t = 1", hits);
    if hits != 100 {
        return Err(Error::invariant(format!("{} grid rays missed", 100 - hits)));
    }
    Ok(())
}

fn print_help() {
    println!("raybvh - Parallel SAH BVH toolkit");
    println!();
    println!("USAGE:");
    println!("    raybvh [OPTIONS] <COMMAND>");
    println!();
    println!("COMMANDS:");
    println!("    b, bench                      Random triangles, build + optimize, trace rays");
    println!("    g, grid                       10x10 two-triangle grid, one ray per cell");
    println!("    h, help                       Show this help");
    println!();
    println!("OPTIONS:");
    println!("    -n, --triangles <N>  Triangle count for bench (default 100000)");
    println!("    -r, --rays <N>       Ray count for bench (default 1000000)");
    println!("    --seed <S>           Random seed (default 1)");
    println!("    --bins <N>           SAH bin count (default 32)");
    println!("    --max-depth <N>      Maximum tree depth (default 64)");
    println!("    --stride <N>         Initial optimizer stride (default 9)");
    println!("    --no-optimize        Skip the reinsertion optimizer");
    println!("    -v, --verbose        Show debug output");
    println!("    -vv, --trace         Show trace output (very verbose)");
    println!("    -q, --quiet          Only show warnings and errors");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG             Overrides the log filter");
    println!("    RAYBVH_TRACE=1       Write trace.json (requires the `trace` feature)");
    println!();
    println!("EXAMPLES:");
    println!("    raybvh bench -n 1000000 -r 4000000");
    println!("    raybvh -v bench --no-optimize");
    println!("    raybvh grid");
}
