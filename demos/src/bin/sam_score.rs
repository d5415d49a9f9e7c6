//! SAM Score Tool
//!
//! Prints the SAM perceptual loss and the embedding cosine score between
//! two images, e.g. an enhanced output and its reference.
//!
//! ## Usage
//!
//! ```bash
//! # Fetch MobileSAM on first use and compare two images
//! cargo run --release --bin sam_score -- output.png reference.png
//!
//! # Use a local checkpoint and custom taps
//! cargo run --release --bin sam_score -- a.png b.png --checkpoint mobile_sam.pt --taps GELU_3,Conv2d_BN_33
//! ```

use std::{path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use burn::tensor::cast::ToElement;
use clap::Parser;
use semilight_burn::{
    weights::{ensure_checkpoint, load_encoder, EncoderKind},
    PerceptualLossConfig,
};
use semilight_demos::{create_device, init_logging, SamScoreConfig, SelectedBackend, BACKEND_NAME};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// First image
    left: PathBuf,

    /// Second image
    right: PathBuf,

    /// Encoder kind (only vit_t can be built)
    #[arg(long)]
    encoder: Option<EncoderKind>,

    /// Checkpoint file, skips the cache lookup
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Cache directory for downloaded checkpoints
    #[arg(long)]
    weights_dir: Option<PathBuf>,

    /// Feature taps, comma separated
    #[arg(long, value_delimiter = ',')]
    taps: Option<Vec<String>>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = if let Some(config_path) = &args.config {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        serde_json::from_str::<SamScoreConfig>(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?
    } else {
        SamScoreConfig::default()
    };

    // Command line overrides
    if let Some(encoder) = args.encoder {
        config.encoder = encoder;
    }
    if let Some(dir) = args.weights_dir {
        config.weights_dir = dir;
    }
    if let Some(taps) = args.taps {
        config.extractor.taps = taps;
    }

    let device = create_device();
    println!("Using backend: {BACKEND_NAME}");

    let checkpoint = match args.checkpoint {
        Some(path) => path,
        None => ensure_checkpoint(&config.weights_dir, config.encoder)
            .context("Failed to obtain encoder checkpoint")?,
    };

    let start = Instant::now();
    let encoder = load_encoder::<SelectedBackend>(config.encoder, &checkpoint, &device)
        .with_context(|| format!("Failed to load {}", checkpoint.display()))?;
    let loss = PerceptualLossConfig::new()
        .with_extractor(config.extractor.clone())
        .init(encoder)
        .context("Failed to build perceptual loss")?;
    println!("Encoder loaded in {:.2?}", start.elapsed());

    let left = image::open(&args.left)
        .with_context(|| format!("Failed to open image: {}", args.left.display()))?;
    let right = image::open(&args.right)
        .with_context(|| format!("Failed to open image: {}", args.right.display()))?;

    let start = Instant::now();
    let distance = loss
        .forward_images(&left, &right, &device)
        .context("Failed to compute perceptual loss")?
        .into_scalar()
        .to_f32();
    let score = loss
        .score_images(&left, &right, &device)
        .context("Failed to compute SAM score")?
        .into_scalar()
        .to_f32();

    println!("Taps: {}", loss.extractor().taps().join(", "));
    println!("Perceptual loss: {distance:.6}");
    println!("SAM score: {score:.6}");
    println!("Computed in {:.2?}", start.elapsed());

    Ok(())
}
