use backbones::{ImageEncoder, TinyViT};
use burn::prelude::*;
use image::DynamicImage;

use super::cosine_similarity;
use crate::{
    error::{FeatureError, FeatureResult},
    features::{FeatureExtractor, FeatureExtractorConfig},
    image_tensor::ImageTensor,
};

/// Configuration for [`PerceptualLoss`].
#[derive(Config, Debug)]
pub struct PerceptualLossConfig {
    #[config(default = "FeatureExtractorConfig::new()")]
    pub extractor: FeatureExtractorConfig,
}

impl PerceptualLossConfig {
    pub fn init<B: Backend, E: ImageEncoder<B>>(
        &self,
        encoder: E,
    ) -> FeatureResult<PerceptualLoss<B, E>> {
        Ok(PerceptualLoss {
            extractor: self.extractor.init(encoder)?,
        })
    }
}

/// Perceptual distance and similarity through a frozen SAM image encoder.
///
/// Inputs are `[batch, 3, height, width]` tensors in `[0, 1]` on a
/// non-autodiff backend. The returned values carry no gradient.
pub struct PerceptualLoss<B: Backend, E = TinyViT<B>> {
    extractor: FeatureExtractor<B, E>,
}

impl<B: Backend, E: ImageEncoder<B>> PerceptualLoss<B, E> {
    pub fn extractor(&self) -> &FeatureExtractor<B, E> {
        &self.extractor
    }

    /// Mean over taps of the MSE between the tapped features of `x` and `y`.
    ///
    /// # Shapes
    /// - x: `[batch, 3, height, width]`
    /// - y: `[batch, 3, height, width]`
    /// - output: `[1]`
    pub fn forward(&self, x: Tensor<B, 4>, y: Tensor<B, 4>) -> FeatureResult<Tensor<B, 1>> {
        let fx = self.extractor.features(x)?;
        let fy = self.extractor.features(y)?;
        feature_distance(&fx, &fy, self.extractor.taps())
    }

    pub fn forward_images(
        &self,
        x: &DynamicImage,
        y: &DynamicImage,
        device: &B::Device,
    ) -> FeatureResult<Tensor<B, 1>> {
        self.forward(image_tensor(x, device), image_tensor(y, device))
    }

    /// Cosine similarity of the final embeddings, one value per sample.
    pub fn score(&self, x: Tensor<B, 4>, y: Tensor<B, 4>) -> FeatureResult<Tensor<B, 1>> {
        let ex = self.extractor.embed(x)?;
        let ey = self.extractor.embed(y)?;
        if ex.dims() != ey.dims() {
            return Err(FeatureError::FeatureShapeMismatch {
                tap: "embedding".to_string(),
                left: ex.dims().to_vec(),
                right: ey.dims().to_vec(),
            });
        }
        Ok(cosine_similarity(ex, ey))
    }

    pub fn score_images(
        &self,
        x: &DynamicImage,
        y: &DynamicImage,
        device: &B::Device,
    ) -> FeatureResult<Tensor<B, 1>> {
        self.score(image_tensor(x, device), image_tensor(y, device))
    }
}

fn image_tensor<B: Backend>(image: &DynamicImage, device: &B::Device) -> Tensor<B, 4> {
    ImageTensor::from_rgb32f(&image.to_rgb32f())
        .into_tensor::<B>(device)
        .unsqueeze()
}

/// Mean over feature pairs of their mean squared error.
///
/// Empty lists, lists of different length, and pairs of different shape are
/// errors.
pub fn feature_distance<B: Backend>(
    left: &[Tensor<B, 4>],
    right: &[Tensor<B, 4>],
    taps: &[String],
) -> FeatureResult<Tensor<B, 1>> {
    if left.len() != right.len() {
        return Err(FeatureError::FeatureCountMismatch {
            left: left.len(),
            right: right.len(),
        });
    }

    let mut total: Option<Tensor<B, 1>> = None;
    for (i, (a, b)) in left.iter().zip(right).enumerate() {
        if a.dims() != b.dims() {
            return Err(FeatureError::FeatureShapeMismatch {
                tap: taps.get(i).cloned().unwrap_or_else(|| i.to_string()),
                left: a.dims().to_vec(),
                right: b.dims().to_vec(),
            });
        }
        let mse = a.clone().sub(b.clone()).powf_scalar(2.0).mean();
        total = Some(match total {
            Some(sum) => sum.add(mse),
            None => mse,
        });
    }

    let total = total.ok_or(FeatureError::NoTaps)?;
    Ok(total.div_scalar(left.len() as f32))
}

#[cfg(test)]
mod tests {
    use backbones::TinyViTConfig;
    use burn::{
        backend::ndarray::NdArray,
        tensor::{Distribution, Tolerance},
    };
    use image::{Rgb, RgbImage};

    use super::*;

    type TestBackend = NdArray<f32>;

    fn small_loss() -> PerceptualLoss<TestBackend> {
        let device = Default::default();
        let encoder = TinyViTConfig::new()
            .with_img_size(64)
            .with_embed_dims(vec![8, 16, 24, 32])
            .with_depths(vec![1, 1, 2, 1])
            .with_num_heads(vec![1, 2, 3, 4])
            .with_neck_dim(16)
            .init::<TestBackend>(&device)
            .unwrap();
        let taps = vec!["GELU_3".to_string(), "Conv2d_BN_11".to_string()];

        PerceptualLossConfig::new()
            .with_extractor(FeatureExtractorConfig::new().with_taps(taps))
            .init(encoder)
            .unwrap()
    }

    #[test]
    fn identical_inputs_have_zero_loss_and_unit_score() {
        let device = Default::default();
        let loss = small_loss();
        let x = Tensor::<TestBackend, 4>::random([2, 3, 64, 48], Distribution::Default, &device);

        let distance = loss.forward(x.clone(), x.clone()).unwrap();
        let score = loss.score(x.clone(), x).unwrap();

        distance
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([0.0f32]), Tolerance::default());
        score
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([1.0f32, 1.0]), Tolerance::default());
    }

    #[test]
    fn different_inputs_have_positive_loss() {
        let device = Default::default();
        let loss = small_loss();
        let x = Tensor::<TestBackend, 4>::zeros([1, 3, 64, 64], &device);
        let y = Tensor::<TestBackend, 4>::ones([1, 3, 64, 64], &device);

        let distance = loss.forward(x, y).unwrap().into_scalar().elem::<f32>();

        assert!(distance > 0.0);
    }

    #[test]
    fn image_inputs_of_different_sizes_are_comparable() {
        let device = Default::default();
        let loss = small_loss();
        let a = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, Rgb([200, 10, 10])));
        let b = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 32, Rgb([10, 200, 10])));

        let distance = loss.forward_images(&a, &b, &device).unwrap();
        let score = loss.score_images(&a, &b, &device).unwrap();

        assert_eq!(distance.dims(), [1]);
        assert_eq!(score.dims(), [1]);
    }

    #[test]
    fn mismatched_feature_lists_are_rejected() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 4>::zeros([1, 2, 3, 3], &device);
        let b = Tensor::<TestBackend, 4>::zeros([1, 2, 4, 4], &device);
        let taps = vec!["x_1".to_string()];

        let count = feature_distance(&[a.clone()], &[a.clone(), a.clone()], &taps);
        let shape = feature_distance(&[a], &[b], &taps);

        assert!(matches!(
            count,
            Err(FeatureError::FeatureCountMismatch { left: 1, right: 2 })
        ));
        assert!(matches!(
            shape,
            Err(FeatureError::FeatureShapeMismatch { ref tap, .. }) if tap == "x_1"
        ));
    }

    #[test]
    fn empty_feature_lists_are_rejected() {
        let empty: [Tensor<TestBackend, 4>; 0] = [];

        let result = feature_distance(&empty, &empty, &[]);

        assert!(matches!(result, Err(FeatureError::NoTaps)));
    }

    #[test]
    fn feature_distance_averages_over_taps() {
        let device = Default::default();
        let zeros = Tensor::<TestBackend, 4>::zeros([1, 1, 2, 2], &device);
        let ones = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
        let twos = ones.clone().mul_scalar(2.0);

        let distance = feature_distance(&[zeros.clone(), zeros], &[ones, twos], &[]).unwrap();

        // (1 + 4) / 2
        distance
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([2.5f32]), Tolerance::default());
    }
}
