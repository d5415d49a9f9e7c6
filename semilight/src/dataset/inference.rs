use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;

use super::{check_index, collect_images, folder::load_image, get_or_panic};
use crate::{error::DatasetResult, image_tensor::ImageTensor};

/// A test image at native resolution with the path it came from.
#[derive(Debug, Clone)]
pub struct InferenceItem {
    pub image: ImageTensor,
    pub path: PathBuf,
}

/// Images under `<root>/input`, unaugmented and not resized.
pub struct InferenceDataset {
    paths: Vec<PathBuf>,
}

impl InferenceDataset {
    pub fn new(root: impl AsRef<Path>) -> DatasetResult<Self> {
        let dir = root.as_ref().join("input");
        let paths = collect_images(&dir)?;
        tracing::info!(root = %dir.display(), images = paths.len(), "loaded inference dataset");

        Ok(Self { paths })
    }

    pub fn try_get(&self, index: usize) -> DatasetResult<InferenceItem> {
        check_index(index, self.paths.len())?;
        let path = &self.paths[index];
        let image = load_image(path)?.into_rgb8();

        Ok(InferenceItem {
            image: ImageTensor::from_rgb8(&image),
            path: path.clone(),
        })
    }
}

impl Dataset<InferenceItem> for InferenceDataset {
    fn get(&self, index: usize) -> Option<InferenceItem> {
        get_or_panic(index, self.len(), |i| self.try_get(i))
    }

    fn len(&self) -> usize {
        self.paths.len()
    }
}
