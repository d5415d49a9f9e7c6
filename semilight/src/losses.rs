//! SAM-based perceptual losses and scores.
//!
//! - [`cosine_similarity`]: per-sample cosine agreement of two feature maps
//! - [`PerceptualLoss`]: mean squared error between tapped encoder features,
//!   plus the embedding cosine score

mod perceptual;
mod similarity;

pub use perceptual::{feature_distance, PerceptualLoss, PerceptualLossConfig};
pub use similarity::cosine_similarity;
