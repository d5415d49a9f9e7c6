//! Dataset family for semi-supervised low-light enhancement.
//!
//! All datasets index sorted path lists collected from a root laid out as
//! `<root>/<phase>/{input,GT,candidate}`. Items are host-side
//! [`ImageTensor`](crate::image_tensor::ImageTensor) values with every random
//! parameter drawn fresh per access. The batchers in [`batcher`] turn them into
//! `[B, 3, H, W]` tensors on a device.
//!
//! Each dataset offers a fallible `try_get`. The [`Dataset`](burn::data::dataset::Dataset)
//! impls return `None` only for out-of-range indices and panic on load errors.

pub mod batcher;
mod bank;
mod folder;
mod inference;
mod labeled;
mod unlabeled;

use std::path::PathBuf;

use burn::prelude::*;

pub use bank::{BankDataset, BankItem, CandidateFolder, CandidateSource};
pub use batcher::{
    BankBatch, BankBatcher, InferenceBatch, InferenceBatcher, LabeledBatch, LabeledBatcher,
    WeakStrongBatch, WeakStrongBatcher,
};
pub use folder::{collect_images, is_image_file, load_image, IMAGE_EXTENSIONS};
pub use inference::{InferenceDataset, InferenceItem};
pub use labeled::{LabeledDataset, LabeledItem, Split};
pub use unlabeled::{StrongMode, UnlabeledDataset, WeakStrongItem};

use crate::{
    error::{DatasetError, DatasetResult},
    random::RngStream,
};

/// Shared configuration of the paired dataset family.
#[derive(Config, Debug)]
pub struct PairedDatasetConfig {
    /// Dataset root holding one directory per phase.
    pub root: PathBuf,
    #[config(default = "String::from(\"train\")")]
    pub phase: String,
    /// Canonical size images are resized to before cropping.
    #[config(default = 280)]
    pub load_size: u32,
    /// Tile size of every produced tensor.
    #[config(default = 256)]
    pub fine_size: u32,
    /// Seed for reproducible draws. Unseeded datasets use OS entropy.
    #[config(default = "None")]
    pub seed: Option<u64>,
}

impl PairedDatasetConfig {
    pub fn phase_dir(&self) -> PathBuf {
        self.root.join(&self.phase)
    }

    pub fn input_dir(&self) -> PathBuf {
        self.phase_dir().join("input")
    }

    pub fn target_dir(&self) -> PathBuf {
        self.phase_dir().join("GT")
    }

    pub fn candidate_dir(&self) -> PathBuf {
        self.phase_dir().join("candidate")
    }

    /// Per-item generators; `domain` keeps datasets built from one seed apart.
    pub(crate) fn rng_stream(&self, domain: &str) -> RngStream {
        match self.seed {
            Some(seed) => RngStream::seeded(seed, domain),
            None => RngStream::from_entropy(),
        }
    }

    pub(crate) fn validate(&self) -> DatasetResult<()> {
        if self.fine_size == 0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: "fine size must be positive".to_string(),
            });
        }
        Ok(())
    }
}

pub(crate) fn check_index(index: usize, len: usize) -> DatasetResult<()> {
    if index < len {
        Ok(())
    } else {
        Err(DatasetError::IndexOutOfRange { index, len })
    }
}

/// Shared body of the `Dataset::get` impls.
pub(crate) fn get_or_panic<T>(
    index: usize,
    len: usize,
    try_get: impl FnOnce(usize) -> DatasetResult<T>,
) -> Option<T> {
    if index >= len {
        return None;
    }
    match try_get(index) {
        Ok(item) => Some(item),
        Err(err) => panic!("{}", error_chain(&err)),
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::path::Path;

    use image::{Rgb, RgbImage};

    /// Writes `count` distinct PNG images named `000.png`, `001.png`, ...
    pub fn write_images(dir: &Path, count: usize, width: u32, height: u32) {
        std::fs::create_dir_all(dir).unwrap();
        for i in 0..count {
            let image = RgbImage::from_fn(width, height, |x, y| {
                Rgb([
                    (x * 255 / width.max(1)) as u8,
                    (y * 255 / height.max(1)) as u8,
                    (i * 40 % 256) as u8,
                ])
            });
            image.save(dir.join(format!("{i:03}.png"))).unwrap();
        }
    }
}
