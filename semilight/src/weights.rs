//! SAM encoder checkpoints: download, cache and load.
//!
//! Checkpoints are fetched once into a cache directory (`weights/` by
//! default) and reused afterwards. Only the MobileSAM `vit_t` encoder has an
//! in-crate implementation; the other kinds resolve to a file and URL but
//! cannot be built.

use std::{
    fmt,
    fs::{self, File},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use backbones::{TinyViT, TinyViTConfig, TinyViTError};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, Recorder},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cache directory used when none is given.
pub const DEFAULT_WEIGHTS_DIR: &str = "weights";

const CHUNK_SIZE: usize = 8192;
const PROGRESS_STEP: u64 = 8 * 1024 * 1024;

const MOBILE_SAM_URL: &str = "https://github.com/ChaoningZhang/MobileSAM/raw/master/weights/";
const SEGMENT_ANYTHING_URL: &str = "https://dl.fbaipublicfiles.com/segment_anything/";

#[derive(Error, Debug)]
pub enum WeightError {
    #[error("Unknown encoder '{name}', expected one of vit_t, vit_b, vit_l, vit_h")]
    UnknownEncoder { name: String },

    /// The kind resolves to a checkpoint but has no encoder in this crate.
    #[error("Encoder {kind} is not available, only vit_t can be built")]
    UnsupportedEncoder { kind: EncoderKind },

    /// The server answered with a non-success status.
    #[error("Download of {url} failed with status {status}")]
    DownloadFailed { url: String, status: u16 },

    /// The request never produced a response.
    #[error("Download of {url} failed")]
    Transport {
        url: String,
        #[source]
        source: Box<ureq::Transport>,
    },

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load checkpoint {}: {reason}", path.display())]
    LoadFailed { path: PathBuf, reason: String },

    #[error(transparent)]
    Encoder(#[from] TinyViTError),
}

pub type WeightResult<T> = Result<T, WeightError>;

/// SAM image encoder variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    VitT,
    VitB,
    VitL,
    VitH,
}

impl EncoderKind {
    pub const ALL: [Self; 4] = [Self::VitT, Self::VitB, Self::VitL, Self::VitH];

    pub const fn name(self) -> &'static str {
        match self {
            Self::VitT => "vit_t",
            Self::VitB => "vit_b",
            Self::VitL => "vit_l",
            Self::VitH => "vit_h",
        }
    }

    /// Checkpoint file name, both in the cache and on the server.
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::VitT => "mobile_sam.pt",
            Self::VitB => "sam_vit_b_01ec64.pth",
            Self::VitL => "sam_vit_l_0b3195.pth",
            Self::VitH => "sam_vit_h_4b8939.pth",
        }
    }

    pub fn url(self) -> String {
        let base = match self {
            Self::VitT => MOBILE_SAM_URL,
            Self::VitB | Self::VitL | Self::VitH => SEGMENT_ANYTHING_URL,
        };
        format!("{base}{}", self.file_name())
    }
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncoderKind {
    type Err = WeightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| WeightError::UnknownEncoder {
                name: s.to_string(),
            })
    }
}

/// Per-user cache directory, for callers that prefer it over `weights/`.
pub fn user_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("semilight").join(DEFAULT_WEIGHTS_DIR))
}

/// Returns the cached checkpoint for `kind`, downloading it first if needed.
pub fn ensure_checkpoint(dir: &Path, kind: EncoderKind) -> WeightResult<PathBuf> {
    let destination = dir.join(kind.file_name());
    if destination.is_file() {
        tracing::debug!(path = %destination.display(), "checkpoint already cached");
        return Ok(destination);
    }

    fs::create_dir_all(dir).map_err(|source| WeightError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    download(&kind.url(), &destination)?;

    Ok(destination)
}

/// Streams `url` into `destination` and returns the number of bytes written.
///
/// Data goes to a `.part` sibling first, so `destination` only ever holds a
/// complete file.
pub fn download(url: &str, destination: &Path) -> WeightResult<u64> {
    tracing::info!(url, destination = %destination.display(), "downloading checkpoint");

    let response = match ureq::get(url).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(status, _)) => {
            tracing::error!(url, status, "checkpoint download failed");
            return Err(WeightError::DownloadFailed {
                url: url.to_string(),
                status,
            });
        }
        Err(ureq::Error::Transport(transport)) => {
            tracing::error!(url, error = %transport, "checkpoint download failed");
            return Err(WeightError::Transport {
                url: url.to_string(),
                source: Box::new(transport),
            });
        }
    };

    let partial = partial_path(destination);
    let written = match write_stream(response.into_reader(), &partial) {
        Ok(written) => written,
        Err(err) => {
            let _ = fs::remove_file(&partial);
            return Err(err);
        }
    };
    fs::rename(&partial, destination).map_err(|source| WeightError::Io {
        path: destination.to_path_buf(),
        source,
    })?;

    tracing::info!(path = %destination.display(), bytes = written, "checkpoint downloaded");
    Ok(written)
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn write_stream(mut reader: impl Read, path: &Path) -> WeightResult<u64> {
    let io_error = |source| WeightError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::create(path).map_err(io_error)?;
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut written = 0u64;
    let mut next_report = PROGRESS_STEP;

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error(err)),
        };
        file.write_all(&buffer[..n]).map_err(io_error)?;
        written += n as u64;

        if written >= next_report {
            tracing::info!(bytes = written, "download progress");
            next_report += PROGRESS_STEP;
        }
    }

    file.sync_all().map_err(io_error)?;
    Ok(written)
}

/// Builds the encoder for `kind` and loads `checkpoint` into it.
pub fn load_encoder<B: Backend>(
    kind: EncoderKind,
    checkpoint: &Path,
    device: &B::Device,
) -> WeightResult<TinyViT<B>> {
    match kind {
        EncoderKind::VitT => load_tiny_vit(&TinyViTConfig::vit_t(), checkpoint, device),
        other => Err(WeightError::UnsupportedEncoder { kind: other }),
    }
}

/// Loads a MobileSAM checkpoint (full SAM model or bare image encoder) into TinyViT.
pub fn load_tiny_vit<B: Backend>(
    config: &TinyViTConfig,
    checkpoint: &Path,
    device: &B::Device,
) -> WeightResult<TinyViT<B>> {
    tracing::info!(path = %checkpoint.display(), "loading TinyViT checkpoint");
    let model = config.init::<B>(device)?;

    let mut load_args = LoadArgs::new(checkpoint.to_path_buf())
        .with_key_remap("^image_encoder\\.", "")
        .with_key_remap("^patch_embed\\.seq\\.0\\.", "patch_embed.conv1.")
        .with_key_remap("^patch_embed\\.seq\\.2\\.", "patch_embed.conv2.")
        .with_key_remap("^neck\\.0\\.", "neck.conv1.")
        .with_key_remap("^neck\\.1\\.", "neck.norm1.")
        .with_key_remap("^neck\\.2\\.", "neck.conv2.")
        .with_key_remap("^neck\\.3\\.", "neck.norm2.")
        .with_key_remap("^layers\\.0\\.", "conv_stage.");
    for stage in 1..config.depths.len() {
        load_args = load_args.with_key_remap(
            &format!("^layers\\.{stage}\\."),
            &format!("stages.{}.", stage - 1),
        );
    }

    let record = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(load_args, device)
        .map_err(|e| WeightError::LoadFailed {
            path: checkpoint.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(model.load_record(record))
}
