//! Terratin CLI - terrain TIN build tool.
//!
//! Usage: terratin <COMMAND> [OPTIONS]
//!
//! Run `terratin --help` for available commands.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};

use terratin::dem::{DemGrid, NO_DATA};
use terratin::map::VectorMap;
use terratin::pipeline::{build_tile_mesh, MeshPrefs, TileBuildContext};
use terratin::terrain::TerrainTable;

#[derive(Parser)]
#[command(name = "terratin")]
#[command(author, version, about = "Terrain TIN build CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display elevation grid information
    Info {
        /// Input ESRI ASCII grid (.asc)
        input: PathBuf,
    },

    /// Build a tile mesh and write its border file
    Build {
        /// Input ESRI ASCII grid (.asc)
        input: PathBuf,

        /// Directory for border files (neighbors read, this tile written)
        #[arg(short, long)]
        border_dir: Option<PathBuf>,

        /// Maximum mesh vertices
        #[arg(long, default_value = "78000")]
        max_points: usize,

        /// Vertical error tolerance in meters
        #[arg(long, default_value = "5.0")]
        max_error: f64,

        /// Triangle size tolerance in meters
        #[arg(long, default_value = "1500.0")]
        max_tri_size: f64,

        /// Ignore finished neighbors and build standalone
        #[arg(long)]
        standalone: bool,

        /// Split burned constraint edges against the grid
        #[arg(long)]
        split_constraints: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Info { input } => cmd_info(&input)?,
        Commands::Build {
            input,
            border_dir,
            max_points,
            max_error,
            max_tri_size,
            standalone,
            split_constraints,
        } => {
            let mut prefs = MeshPrefs::default()
                .with_max_points(max_points)
                .with_max_error(max_error)
                .with_max_tri_size(max_tri_size);
            if standalone {
                prefs = prefs.standalone();
            }
            if split_constraints {
                prefs = prefs.splitting_constraints();
            }
            cmd_build(&input, border_dir.as_deref(), &prefs)?;
        }
    }
    Ok(())
}

fn cmd_info(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let dem = load_ascii_grid(input)?;

    let mut min = f32::MAX;
    let mut max = f32::MIN;
    let mut voids = 0usize;
    for y in 0..dem.height() {
        for x in 0..dem.width() {
            let v = dem.get(x, y);
            if v == NO_DATA {
                voids += 1;
            } else {
                min = min.min(v);
                max = max.max(v);
            }
        }
    }

    println!("Grid: {}", input.display());
    println!("  Posts:     {} x {}", dem.width(), dem.height());
    println!(
        "  Extent:    {:.6} .. {:.6} lon, {:.6} .. {:.6} lat",
        dem.west, dem.east, dem.south, dem.north
    );
    if voids < dem.width() * dem.height() {
        println!("  Elevation: {:.1} .. {:.1} m", min, max);
    }
    println!("  Voids:     {}", voids);
    Ok(())
}

fn cmd_build(
    input: &Path,
    border_dir: Option<&Path>,
    prefs: &MeshPrefs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut dem = load_ascii_grid(input)?;
    dem.fill_nearest();
    let mut map = VectorMap::new();
    let terrains = TerrainTable::new();

    let south = dem.south.floor() as i32;
    let west = dem.west.floor() as i32;
    let mut ctx = TileBuildContext::new(south, west);
    if let Some(dir) = border_dir {
        ctx = ctx.with_border_dir(dir).load_neighbors(&terrains);
    }

    let start = Instant::now();
    let (mesh, stats) = build_tile_mesh(&mut map, &dem, &terrains, prefs, &mut ctx)?;
    let elapsed = start.elapsed();

    println!("Built tile {:+03}{:+04} in {:.2?}", south, west, elapsed);
    println!("  Vertices:  {}", mesh.num_vertices());
    println!("  Faces:     {}", mesh.num_faces());
    println!("  Wet ratio: {:.3}", stats.wet_ratio);
    println!(
        "  Refined:   {} error points, {} size points",
        stats.error_points, stats.size_points
    );
    println!(
        "  DEM error: mean {:.3} m, worst {:.3} m",
        stats.error.mean,
        stats.error.max.abs().max(stats.error.min.abs())
    );
    Ok(())
}

/// Minimal ESRI ASCII grid reader. Rows are listed north to south.
fn load_ascii_grid(path: &Path) -> Result<DemGrid, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    let mut lines = text.lines();

    let mut ncols = 0usize;
    let mut nrows = 0usize;
    let mut xll = 0.0f64;
    let mut yll = 0.0f64;
    let mut cellsize = 0.0f64;
    let mut nodata = -9999.0f32;

    let mut first_data_line = None;
    for line in lines.by_ref() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "ncols" => ncols = value.parse()?,
            "nrows" => nrows = value.parse()?,
            "xllcorner" => xll = value.parse()?,
            "yllcorner" => yll = value.parse()?,
            "cellsize" => cellsize = value.parse()?,
            "nodata_value" => nodata = value.parse()?,
            _ => {
                first_data_line = Some(line);
                break;
            }
        }
    }
    if ncols < 2 || nrows < 2 || cellsize <= 0.0 {
        return Err(format!("{}: not an ASCII grid", path.display()).into());
    }

    let east = xll + cellsize * (ncols - 1) as f64;
    let north = yll + cellsize * (nrows - 1) as f64;
    let mut dem = DemGrid::new(ncols, nrows, xll, yll, east, north);

    let mut values = first_data_line
        .into_iter()
        .chain(lines)
        .flat_map(str::split_whitespace);
    for row in 0..nrows {
        let y = nrows - 1 - row;
        for x in 0..ncols {
            let Some(tok) = values.next() else {
                return Err(format!("{}: truncated grid data", path.display()).into());
            };
            let v: f32 = tok.parse()?;
            dem.set(x, y, if v == nodata { NO_DATA } else { v });
        }
    }
    Ok(dem)
}
