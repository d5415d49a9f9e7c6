//! Checkpoint Fetching Tool
//!
//! Downloads a SAM image encoder checkpoint unless it is already cached.
//!
//! ## Usage
//!
//! ```bash
//! # MobileSAM into weights/
//! cargo run --bin fetch_weights -- vit_t
//!
//! # Every checkpoint into the per-user cache
//! cargo run --bin fetch_weights -- vit_t vit_b vit_l vit_h --user-cache
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use semilight_burn::weights::{ensure_checkpoint, user_cache_dir, EncoderKind, DEFAULT_WEIGHTS_DIR};
use semilight_demos::init_logging;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Encoders to fetch (vit_t, vit_b, vit_l, vit_h)
    #[arg(default_value = "vit_t")]
    encoders: Vec<EncoderKind>,

    /// Cache directory
    #[arg(short, long, default_value = DEFAULT_WEIGHTS_DIR, conflicts_with = "user_cache")]
    dir: PathBuf,

    /// Use the per-user cache directory instead of --dir
    #[arg(long)]
    user_cache: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let dir = if args.user_cache {
        user_cache_dir().context("No per-user cache directory on this platform")?
    } else {
        args.dir
    };

    for kind in args.encoders {
        let path = ensure_checkpoint(&dir, kind)
            .with_context(|| format!("Failed to fetch checkpoint for {kind}"))?;
        println!("{kind}: {}", path.display());
    }

    Ok(())
}
