use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use burn::data::dataset::Dataset;

use super::{
    collect_images,
    folder::{load_image, resize_square},
    get_or_panic, PairedDatasetConfig, StrongMode, UnlabeledDataset,
};
use crate::{
    augmentation::GaussianNoise,
    error::{DatasetError, DatasetResult},
    image_tensor::ImageTensor,
};

/// Supplies the bank candidate paired with an unlabeled image.
pub trait CandidateSource: Send + Sync {
    fn candidate(&self, index: usize) -> Option<PathBuf>;
}

/// Candidates taken by sorted position from a directory.
#[derive(Debug, Clone)]
pub struct CandidateFolder {
    paths: Vec<PathBuf>,
}

impl CandidateFolder {
    pub fn new(dir: &Path) -> DatasetResult<Self> {
        Ok(Self {
            paths: collect_images(dir)?,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl CandidateSource for CandidateFolder {
    fn candidate(&self, index: usize) -> Option<PathBuf> {
        self.paths.get(index).cloned()
    }
}

/// Weak/strong views together with the current bank candidate.
#[derive(Debug, Clone)]
pub struct BankItem {
    pub weak: ImageTensor,
    pub strong: ImageTensor,
    pub candidate: ImageTensor,
    pub candidate_path: PathBuf,
}

/// Unlabeled images paired with reliable-bank candidates.
///
/// Candidates are resized to the tile size unless
/// [`with_candidate_resize(false)`](Self::with_candidate_resize) keeps them at
/// native resolution.
pub struct BankDataset {
    unlabeled: UnlabeledDataset,
    candidates: Arc<dyn CandidateSource>,
    resize_candidates: bool,
    fine_size: u32,
}

impl BankDataset {
    /// Uses `<root>/<phase>/candidate` as the candidate source.
    pub fn new(
        config: &PairedDatasetConfig,
        strong: impl Into<StrongMode>,
    ) -> DatasetResult<Self> {
        let folder = CandidateFolder::new(&config.candidate_dir())?;
        let available = folder.len();
        let dataset = Self::with_source(config, strong, Arc::new(folder))?;

        if available < dataset.len() {
            tracing::warn!(
                candidates = available,
                images = dataset.len(),
                "candidate bank is smaller than the unlabeled set"
            );
        }

        Ok(dataset)
    }

    pub fn with_source(
        config: &PairedDatasetConfig,
        strong: impl Into<StrongMode>,
        candidates: Arc<dyn CandidateSource>,
    ) -> DatasetResult<Self> {
        Ok(Self {
            unlabeled: UnlabeledDataset::new(config, strong)?,
            candidates,
            resize_candidates: true,
            fine_size: config.fine_size,
        })
    }

    pub fn with_candidate_resize(mut self, resize: bool) -> Self {
        self.resize_candidates = resize;
        self
    }

    pub fn with_noise(mut self, noise: GaussianNoise) -> Self {
        self.unlabeled = self.unlabeled.with_noise(noise);
        self
    }

    pub fn try_get(&self, index: usize) -> DatasetResult<BankItem> {
        let item = self.unlabeled.try_get(index)?;
        let candidate_path = self
            .candidates
            .candidate(index)
            .ok_or(DatasetError::MissingCandidate { index })?;

        let candidate = load_image(&candidate_path)?;
        let candidate = if self.resize_candidates {
            resize_square(&candidate, self.fine_size)
        } else {
            candidate.into_rgb8()
        };

        Ok(BankItem {
            weak: item.weak,
            strong: item.strong,
            candidate: ImageTensor::from_rgb8(&candidate),
            candidate_path,
        })
    }
}

impl Dataset<BankItem> for BankDataset {
    fn get(&self, index: usize) -> Option<BankItem> {
        get_or_panic(index, self.len(), |i| self.try_get(i))
    }

    fn len(&self) -> usize {
        self.unlabeled.len()
    }
}
