use std::path::PathBuf;

use burn::data::dataset::Dataset;

use super::{
    check_index, collect_images,
    folder::{load_image, resize_square},
    get_or_panic, PairedDatasetConfig,
};
use crate::{
    error::{DatasetError, DatasetResult},
    geometry::{GeometricPairTransform, GeometricPairTransformConfig},
    image_tensor::ImageTensor,
    random::RngStream,
};

/// How labeled pairs are prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    /// Resize to the load size, then crop and rotate both images identically.
    Train,
    /// Resize both images to the tile size.
    Validation,
}

/// A low-light input with its ground truth.
#[derive(Debug, Clone)]
pub struct LabeledItem {
    pub input: ImageTensor,
    pub target: ImageTensor,
    pub input_path: PathBuf,
}

/// Paired `<phase>/input` and `<phase>/GT` images, matched by sorted position.
pub struct LabeledDataset {
    pairs: Vec<(PathBuf, PathBuf)>,
    split: Split,
    transform: GeometricPairTransform,
    fine_size: u32,
    rng: RngStream,
}

impl LabeledDataset {
    pub fn new(config: &PairedDatasetConfig, split: Split) -> DatasetResult<Self> {
        config.validate()?;
        let transform = GeometricPairTransformConfig::new()
            .with_load_size(config.load_size)
            .with_crop_size(config.fine_size)
            .init()?;

        let inputs = collect_images(&config.input_dir())?;
        let targets = collect_images(&config.target_dir())?;
        if inputs.len() != targets.len() {
            return Err(DatasetError::PairCountMismatch {
                inputs: inputs.len(),
                targets: targets.len(),
            });
        }

        tracing::info!(
            root = %config.phase_dir().display(),
            pairs = inputs.len(),
            ?split,
            "loaded labeled dataset"
        );

        Ok(Self {
            pairs: inputs.into_iter().zip(targets).collect(),
            split,
            transform,
            fine_size: config.fine_size,
            rng: config.rng_stream("labeled"),
        })
    }

    pub const fn split(&self) -> Split {
        self.split
    }

    pub fn try_get(&self, index: usize) -> DatasetResult<LabeledItem> {
        check_index(index, self.pairs.len())?;
        let (input_path, target_path) = &self.pairs[index];

        let input = load_image(input_path)?;
        let target = load_image(target_path)?;

        let (input, target) = match self.split {
            Split::Train => {
                let mut rng = self.rng.rng_for(index);
                self.transform.apply_pair(&input, &target, &mut rng)
            }
            Split::Validation => (
                resize_square(&input, self.fine_size),
                resize_square(&target, self.fine_size),
            ),
        };

        Ok(LabeledItem {
            input: ImageTensor::from_rgb8(&input),
            target: ImageTensor::from_rgb8(&target),
            input_path: input_path.clone(),
        })
    }
}

impl Dataset<LabeledItem> for LabeledDataset {
    fn get(&self, index: usize) -> Option<LabeledItem> {
        get_or_panic(index, self.len(), |i| self.try_get(i))
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }
}
