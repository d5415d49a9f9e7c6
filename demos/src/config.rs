//! JSON configuration for the command line tools.
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Command line flags are applied on top.

use std::path::PathBuf;

use semilight_burn::{
    weights::{EncoderKind, DEFAULT_WEIGHTS_DIR},
    FeatureExtractorConfig, GaussianNoiseConfig, StrongVariant,
};
use serde::{Deserialize, Serialize};

/// Configuration for `dataset_test`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetTestConfig {
    /// Dataset root holding `<phase>/{input,GT,candidate}`.
    pub dataset_path: PathBuf,
    pub phase: String,
    pub load_size: u32,
    pub fine_size: u32,
    /// Strong augmentation ablation used for the unlabeled views.
    pub variant: StrongVariant,
    /// Additive noise on the strong view, off when `None`.
    pub noise: Option<GaussianNoiseConfig>,
    /// Seed for reproducible item generation.
    pub seed: Option<u64>,
    pub num_samples: usize,
    pub batch_size: usize,
    pub num_workers: usize,
}

impl Default for DatasetTestConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("datasets/LOL"),
            phase: "train".to_string(),
            load_size: 280,
            fine_size: 256,
            variant: StrongVariant::Full,
            noise: None,
            seed: None,
            num_samples: 4,
            batch_size: 2,
            num_workers: 2,
        }
    }
}

/// Configuration for `sam_score`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamScoreConfig {
    pub encoder: EncoderKind,
    /// Directory holding (or receiving) the encoder checkpoint.
    pub weights_dir: PathBuf,
    pub extractor: FeatureExtractorConfig,
}

impl Default for SamScoreConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderKind::VitT,
            weights_dir: PathBuf::from(DEFAULT_WEIGHTS_DIR),
            extractor: FeatureExtractorConfig::new(),
        }
    }
}
