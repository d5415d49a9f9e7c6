//! Command line tools for semilight.
//!
//! ## Available tools
//!
//! - `dataset_test`: load every dataset variant and print tensor statistics
//! - `fetch_weights`: download a SAM encoder checkpoint into the cache
//! - `sam_score`: SAM perceptual loss and cosine score between two images
//!
//! ## Usage
//!
//! ```bash
//! # Inspect a dataset root laid out as <root>/<phase>/{input,GT,candidate}
//! cargo run --bin dataset_test -- --dataset-path data/LOL --variant wo_blur
//!
//! # Cache the MobileSAM checkpoint under weights/
//! cargo run --bin fetch_weights -- vit_t
//!
//! # Compare two images
//! cargo run --bin sam_score -- a.png b.png
//! ```

pub mod backend;
pub mod config;

pub use backend::{create_device, SelectedBackend, SelectedDevice, BACKEND_NAME};
pub use config::{DatasetTestConfig, SamScoreConfig};

/// Installs the `tracing` subscriber used by every tool.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` when `verbose`.
pub fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
