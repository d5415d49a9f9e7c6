use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building or reading a dataset.
///
/// Directory problems surface when a dataset is constructed; decode and I/O
/// failures surface from the per-item accessors.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// The configured directory does not exist or is not a directory.
    #[error("Dataset directory not found: {}", path.display())]
    DirectoryNotFound {
        /// The directory that was expected.
        path: PathBuf,
    },

    /// The directory exists but holds no file with a supported image extension.
    #[error("No image files found under {}", path.display())]
    EmptyDirectory {
        /// The scanned directory.
        path: PathBuf,
    },

    /// Recursing through a directory failed.
    #[error("Failed to walk directory {}", path.display())]
    DirectoryWalkFailed {
        /// The directory being scanned.
        path: PathBuf,
        /// The underlying walk error.
        #[source]
        source: walkdir::Error,
    },

    /// An image could not be opened or decoded.
    #[error("Failed to load image {}", path.display())]
    ImageLoadFailed {
        /// The file that failed to load.
        path: PathBuf,
        /// The underlying decode error.
        #[source]
        source: image::ImageError,
    },

    /// Paired directories hold a different number of images.
    #[error("Paired directories differ in size: {inputs} inputs, {targets} targets")]
    PairCountMismatch { inputs: usize, targets: usize },

    #[error("Index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// The injected candidate source has nothing for this index.
    #[error("No candidate available for index {index}")]
    MissingCandidate { index: usize },

    #[error("Invalid dataset configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

pub type DatasetResult<T> = Result<T, DatasetError>;

/// Errors raised by feature extraction and the perceptual losses.
#[derive(Error, Debug)]
pub enum FeatureError {
    /// A configured tap names no module of the encoder.
    #[error("Unknown feature tap '{tap}'")]
    UnknownTap { tap: String },

    /// The tap list is empty.
    #[error("At least one feature tap must be configured")]
    NoTaps,

    /// The same tap was configured twice.
    #[error("Feature tap '{tap}' is configured more than once")]
    DuplicateTap { tap: String },

    /// An input tensor does not match what the adapter expects.
    #[error("Invalid input tensor shape: expected {expected}, got {actual}")]
    InvalidTensorShape {
        /// The expected tensor shape.
        expected: String,
        /// The actual tensor shape.
        actual: String,
    },

    /// The encoder's forward pass diverged from its published module trace.
    #[error("Encoder reported '{actual}' at position {position}, trace expects '{expected}'")]
    TraceMismatch {
        position: usize,
        expected: String,
        actual: String,
    },

    /// A configured tap produced no output during the forward pass.
    #[error("Feature tap '{tap}' was not captured")]
    TapNotCaptured { tap: String },

    /// Two feature lists being compared differ in length.
    #[error("Feature lists differ in length: {left} vs {right}")]
    FeatureCountMismatch { left: usize, right: usize },

    /// Two matched features differ in shape.
    #[error("Feature '{tap}' differs in shape: {left:?} vs {right:?}")]
    FeatureShapeMismatch {
        tap: String,
        left: Vec<usize>,
        right: Vec<usize>,
    },
}

pub type FeatureResult<T> = Result<T, FeatureError>;
