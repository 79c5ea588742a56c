//! flyblob CLI — correct the foreground blobs of one frame into ellipses.

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use flyblob::{BlobCorrector, CorrectionConfig, Ellipse, RepairStats, ScoreImage};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "flyblob")]
#[command(about = "Repair mis-segmented foreground blobs into one ellipse per animal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Threshold a score image, label it and correct the blobs.
    Correct(CliCorrectArgs),

    /// Print the default configuration as JSON.
    DefaultConfig,
}

#[derive(Debug, Clone, Args)]
struct CliCorrectArgs {
    /// Grayscale image whose intensities encode the foreground score.
    #[arg(long)]
    scores: PathBuf,

    /// Path to write the corrected detections (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Correction configuration (JSON). Missing fields take defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Score per intensity unit.
    #[arg(long, default_value = "1.0")]
    score_scale: f32,
}

#[derive(Serialize)]
struct CorrectionReport {
    image_size: [u32; 2],
    ellipses: Vec<Ellipse>,
    stats: RepairStats,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Correct(args) => run_correct(&args),
        Commands::DefaultConfig => run_default_config(),
    }
}

// ── default-config ────────────────────────────────────────────────────

fn run_default_config() -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(&CorrectionConfig::default())?);
    Ok(())
}

// ── correct ───────────────────────────────────────────────────────────

fn load_scores(args: &CliCorrectArgs) -> CliResult<ScoreImage> {
    tracing::info!("Loading score image: {}", args.scores.display());
    let img = image::open(&args.scores).map_err(|e| -> CliError {
        format!("Failed to open image {}: {}", args.scores.display(), e).into()
    })?;
    let gray = img.to_luma32f();
    let scale = args.score_scale;
    // to_luma32f normalizes to [0, 1]; scale back to the 8-bit range first.
    let scores = ScoreImage::from_fn(gray.width(), gray.height(), |x, y| {
        image::Luma([gray.get_pixel(x, y)[0] * 255.0 * scale])
    });
    tracing::info!("Image size: {}x{}", scores.width(), scores.height());
    Ok(scores)
}

fn run_correct(args: &CliCorrectArgs) -> CliResult<()> {
    let config = match &args.config {
        Some(path) => {
            tracing::info!("Loading config: {}", path.display());
            CorrectionConfig::from_json_file(path)?
        }
        None => CorrectionConfig::default(),
    };
    let scores = load_scores(args)?;

    let mut corrector = BlobCorrector::new(config)?;
    let frame = corrector.detect(&scores);
    tracing::info!("Detected {} animals", frame.ellipses.len());

    let report = CorrectionReport {
        image_size: [scores.width(), scores.height()],
        ellipses: frame.ellipses,
        stats: frame.stats,
    };
    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(&args.out, &json)?;
    tracing::info!("Results written to {}", args.out.display());
    Ok(())
}
