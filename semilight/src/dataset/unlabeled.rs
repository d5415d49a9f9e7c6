use std::{fmt, path::PathBuf, sync::Arc};

use burn::data::dataset::Dataset;
use rand::rngs::StdRng;

use super::{
    check_index, collect_images,
    folder::{load_image, resize_square},
    get_or_panic, PairedDatasetConfig,
};
use crate::{
    augmentation::{GaussianNoise, StrongAugmentation, TensorDegradation},
    error::DatasetResult,
    image_tensor::ImageTensor,
    random::RngStream,
};

const UNLABELED_DOMAIN: &str = "unlabeled";

/// Source of the strong view.
#[derive(Clone)]
pub enum StrongMode {
    /// The photometric strong policy applied to the resized image.
    Policy(StrongAugmentation),
    /// An injected degradation applied to the weak tensor.
    Degradation(Arc<dyn TensorDegradation>),
}

impl fmt::Debug for StrongMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy(policy) => f.debug_tuple("Policy").field(policy).finish(),
            Self::Degradation(_) => f.write_str("Degradation"),
        }
    }
}

impl From<StrongAugmentation> for StrongMode {
    fn from(policy: StrongAugmentation) -> Self {
        Self::Policy(policy)
    }
}

/// Weak and strong views of one unlabeled image.
#[derive(Debug, Clone)]
pub struct WeakStrongItem {
    pub weak: ImageTensor,
    pub strong: ImageTensor,
    pub path: PathBuf,
}

/// Unlabeled `<phase>/input` images resized to the tile size.
pub struct UnlabeledDataset {
    paths: Vec<PathBuf>,
    fine_size: u32,
    strong: StrongMode,
    noise: Option<GaussianNoise>,
    rng: RngStream,
}

impl UnlabeledDataset {
    pub fn new(
        config: &PairedDatasetConfig,
        strong: impl Into<StrongMode>,
    ) -> DatasetResult<Self> {
        config.validate()?;
        let paths = collect_images(&config.input_dir())?;
        let strong = strong.into();

        tracing::info!(
            root = %config.phase_dir().display(),
            images = paths.len(),
            strong = ?strong,
            "loaded unlabeled dataset"
        );

        Ok(Self {
            paths,
            fine_size: config.fine_size,
            strong,
            noise: None,
            rng: config.rng_stream(UNLABELED_DOMAIN),
        })
    }

    /// Adds Gaussian noise on top of every strong view.
    pub fn with_noise(mut self, noise: GaussianNoise) -> Self {
        self.noise = Some(noise);
        self
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn try_get(&self, index: usize) -> DatasetResult<WeakStrongItem> {
        check_index(index, self.paths.len())?;
        let path = &self.paths[index];
        let mut rng = self.rng.rng_for(index);
        let (weak, strong) = self.views(load_image(path)?, &mut rng);

        Ok(WeakStrongItem {
            weak,
            strong,
            path: path.clone(),
        })
    }

    /// Weak and strong views of an already loaded image.
    pub(crate) fn views(
        &self,
        image: image::DynamicImage,
        rng: &mut StdRng,
    ) -> (ImageTensor, ImageTensor) {
        let weak = ImageTensor::from_rgb8(&resize_square(&image, self.fine_size));

        let strong = match &self.strong {
            StrongMode::Policy(policy) if policy.is_baseline() => weak.clone(),
            StrongMode::Policy(policy) => {
                ImageTensor::from_rgb32f(&policy.augment(&weak.to_rgb32f(), rng))
            }
            StrongMode::Degradation(degradation) => degradation.degrade(&weak, rng),
        };
        let strong = match &self.noise {
            Some(noise) => noise.perturb(&strong, rng),
            None => strong,
        };

        (weak, strong)
    }
}

impl Dataset<WeakStrongItem> for UnlabeledDataset {
    fn get(&self, index: usize) -> Option<WeakStrongItem> {
        get_or_panic(index, self.len(), |i| self.try_get(i))
    }

    fn len(&self) -> usize {
        self.paths.len()
    }
}
