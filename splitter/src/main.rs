//! # PrintSplit CLI
//!
//! Splits a local STL file into printable sections without any queue or
//! storage infrastructure. Useful for development and for one-off runs.

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use memmap2::Mmap;
use tracing::info;

use job_types::{Dimensions, HoleSpacing, HoleSpec};
use printsplit_splitter::{SplitEngine, SplitProgress, SplitRequest};

#[derive(Parser)]
#[command(name = "printsplit")]
#[command(version, about = "Split an STL model into printable sections")]
struct Cli {
    /// Input STL file
    input: PathBuf,

    /// Output directory for part files and the bundle archive
    #[arg(short, long, default_value = "./parts")]
    output: PathBuf,

    /// Maximum piece size along X in millimeters
    #[arg(long, default_value_t = 200.0)]
    max_x: f64,

    /// Maximum piece size along Y in millimeters
    #[arg(long, default_value_t = 200.0)]
    max_y: f64,

    /// Maximum piece size along Z in millimeters
    #[arg(long, default_value_t = 200.0)]
    max_z: f64,

    /// Equalize piece sizes instead of leaving a small last row
    #[arg(long)]
    balanced: bool,

    /// Drill filament alignment holes across the cuts
    #[arg(long)]
    holes: bool,

    /// Hole diameter in millimeters
    #[arg(long, default_value_t = 2.0)]
    hole_diameter: f64,

    /// Hole depth per side in millimeters
    #[arg(long, default_value_t = 3.0)]
    hole_depth: f64,

    /// Hole spacing: sparse, normal, or dense
    #[arg(long, default_value = "normal")]
    spacing: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let spacing = match cli.spacing.as_str() {
        "sparse" => HoleSpacing::Sparse,
        "normal" => HoleSpacing::Normal,
        "dense" => HoleSpacing::Dense,
        other => bail!("unknown spacing {:?}, expected sparse, normal, or dense", other),
    };

    let alignment_holes = HoleSpec {
        enabled: cli.holes,
        diameter_mm: cli.hole_diameter,
        depth_mm: cli.hole_depth,
        spacing,
    };
    alignment_holes.validate()?;

    let dimensions = Dimensions::new(cli.max_x, cli.max_y, cli.max_z);
    dimensions.validate()?;

    let request = SplitRequest {
        dimensions,
        balanced_cutting: cli.balanced,
        smart_boundaries: false,
        alignment_holes,
    };

    let file = File::open(&cli.input)
        .with_context(|| format!("opening {}", cli.input.display()))?;
    // Large models are mapped rather than read into memory.
    let mmap = unsafe { Mmap::map(&file) }.context("memory-mapping input")?;

    let engine = SplitEngine::with_progress(Arc::new(|progress: &SplitProgress| {
        info!(percent = progress.percent, "{}", progress.message);
    }));
    let outcome = engine
        .split(&mmap, &request)
        .context("splitting model")?;

    fs::create_dir_all(&cli.output)
        .with_context(|| format!("creating {}", cli.output.display()))?;
    for part in &outcome.parts {
        let path = cli.output.join(&part.name);
        fs::write(&path, &part.bytes)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    let zip_path = cli.output.join("all-parts.zip");
    fs::write(&zip_path, &outcome.zip_bytes)
        .with_context(|| format!("writing {}", zip_path.display()))?;

    println!(
        "Split into {} parts ({} x {} x {} sections) in {}",
        outcome.total_parts(),
        outcome.sections[0],
        outcome.sections[1],
        outcome.sections[2],
        cli.output.display()
    );
    Ok(())
}
