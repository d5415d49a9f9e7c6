//! # semilight-burn
//!
//! Data pipeline and perceptual loss for semi-supervised low-light image
//! enhancement, built on the Burn deep learning framework.
//!
//! ## Overview
//!
//! - [`dataset`]: labeled pairs, unlabeled weak/strong views, bank
//!   candidates and plain inference folders, with Burn batchers
//! - [`geometry`]: pair-aligned crop and dihedral rotation
//! - [`augmentation`]: the strong photometric policy, its ablation variants
//!   and additive Gaussian noise
//! - [`features`]: named intermediate activations of a frozen SAM encoder
//! - [`losses`]: SAM perceptual loss and embedding cosine score
//! - [`weights`]: checkpoint download and loading (`pretrained` feature)
//!
//! ## Example
//!
//! ```no_run
//! use burn::data::dataset::Dataset;
//! use semilight_burn::{
//!     PairedDatasetConfig, StrongVariant, UnlabeledDataset,
//! };
//!
//! let config = PairedDatasetConfig::new("data/LOL".into());
//! let dataset = UnlabeledDataset::new(&config, StrongVariant::Full.config().init()?)?;
//! let item = dataset.get(0).expect("non-empty dataset");
//! assert_eq!(item.weak.shape(), item.strong.shape());
//! # Ok::<(), semilight_burn::DatasetError>(())
//! ```

pub mod augmentation;
pub mod dataset;
pub mod error;
pub mod features;
pub mod geometry;
pub mod image_tensor;
pub mod losses;
pub mod random;
#[cfg(feature = "pretrained")]
pub mod weights;

pub use augmentation::{
    AugmentationStage, GaussianNoise, GaussianNoiseConfig, StrongAugmentation,
    StrongAugmentationConfig, StrongAugmentationParams, StrongVariant, TensorDegradation,
};
pub use dataset::{
    BankDataset, BankItem, CandidateFolder, CandidateSource, InferenceDataset, InferenceItem,
    LabeledDataset, LabeledItem, PairedDatasetConfig, Split, StrongMode, UnlabeledDataset,
    WeakStrongItem,
};
pub use error::{DatasetError, DatasetResult, FeatureError, FeatureResult};
pub use features::{FeatureExtractor, FeatureExtractorConfig};
pub use geometry::{
    GeometricPairTransform, GeometricPairTransformConfig, PairTransformParams, Rotation,
};
pub use image_tensor::ImageTensor;
pub use losses::{cosine_similarity, feature_distance, PerceptualLoss, PerceptualLossConfig};
pub use random::RngStream;
#[cfg(feature = "pretrained")]
pub use weights::{EncoderKind, WeightError, WeightResult};
