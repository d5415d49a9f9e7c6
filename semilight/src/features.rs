//! Named intermediate features of a SAM image encoder.
//!
//! A tap is named `"{class}_{position}"`, where `position` indexes the encoder's
//! module trace (every submodule in the order its forward pass completes, root
//! last). Taps are resolved once against that trace when the extractor is built.
//! Each forward pass then records into a recorder that lives only for that call.
//!
//! Inputs go through the SAM preprocessing: resize so the long side matches the
//! encoder, scale to pixel range, normalize per channel and zero-pad the bottom
//! and right edges to a square.

use std::{collections::HashSet, marker::PhantomData};

use backbones::{ImageEncoder, LayerOutput, TinyViT};
use burn::{
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};
use burn_extra_ops::LayerHook;
use image::DynamicImage;

use crate::{
    error::{FeatureError, FeatureResult},
    image_tensor::ImageTensor,
};

/// Configuration for [`FeatureExtractor`].
#[derive(Config, Debug)]
pub struct FeatureExtractorConfig {
    /// Taps to capture, in output order.
    #[config(
        default = "vec![\"GELU_3\".to_string(), \"Conv2d_BN_33\".to_string(), \"Conv2d_BN_57\".to_string()]"
    )]
    pub taps: Vec<String>,
    #[config(default = "[123.675, 116.28, 103.53]")]
    pub pixel_mean: [f32; 3],
    #[config(default = "[58.395, 57.12, 57.375]")]
    pub pixel_std: [f32; 3],
    /// Factor taking `[0, 1]` inputs to the pixel range of the mean and std.
    #[config(default = 255.0)]
    pub input_scale: f32,
}

impl FeatureExtractorConfig {
    pub fn init<B: Backend, E: ImageEncoder<B>>(
        &self,
        encoder: E,
    ) -> FeatureResult<FeatureExtractor<B, E>> {
        let trace = encoder.module_trace();
        let plan = TapPlan::new(&trace, &self.taps)?;

        tracing::debug!(taps = ?self.taps, trace_len = trace.len(), "resolved feature taps");

        Ok(FeatureExtractor {
            encoder,
            trace,
            plan,
            pixel_mean: self.pixel_mean,
            pixel_std: self.pixel_std,
            input_scale: self.input_scale,
            _backend: PhantomData,
        })
    }
}

/// Resolved taps: trace position to output slot.
#[derive(Debug, Clone)]
struct TapPlan {
    names: Vec<String>,
    slots: Vec<Option<usize>>,
}

impl TapPlan {
    fn new(trace: &[&'static str], taps: &[String]) -> FeatureResult<Self> {
        if taps.is_empty() {
            return Err(FeatureError::NoTaps);
        }
        let mut slots = vec![None; trace.len()];
        let mut seen = HashSet::new();

        for (slot, tap) in taps.iter().enumerate() {
            if !seen.insert(tap.as_str()) {
                return Err(FeatureError::DuplicateTap { tap: tap.clone() });
            }
            let position = Self::resolve(trace, tap).ok_or_else(|| FeatureError::UnknownTap {
                tap: tap.clone(),
            })?;
            slots[position] = Some(slot);
        }

        Ok(Self {
            names: taps.to_vec(),
            slots,
        })
    }

    fn resolve(trace: &[&'static str], tap: &str) -> Option<usize> {
        let (class, position) = tap.rsplit_once('_')?;
        let position: usize = position.parse().ok()?;
        (trace.get(position) == Some(&class)).then_some(position)
    }
}

/// Call-scoped hook that validates the trace and keeps tapped outputs.
struct TapRecorder<'a, B: Backend> {
    trace: &'a [&'static str],
    plan: &'a TapPlan,
    position: usize,
    captured: Vec<Option<Tensor<B, 4>>>,
    error: Option<FeatureError>,
}

impl<'a, B: Backend> TapRecorder<'a, B> {
    fn new(trace: &'a [&'static str], plan: &'a TapPlan) -> Self {
        Self {
            trace,
            plan,
            position: 0,
            captured: vec![None; plan.names.len()],
            error: None,
        }
    }

    fn finish(self) -> FeatureResult<Vec<Tensor<B, 4>>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.position != self.trace.len() {
            return Err(FeatureError::TraceMismatch {
                position: self.position,
                expected: self.trace[self.position].to_string(),
                actual: "<end of forward pass>".to_string(),
            });
        }

        self.captured
            .into_iter()
            .zip(&self.plan.names)
            .map(|(tensor, tap)| {
                tensor.ok_or_else(|| FeatureError::TapNotCaptured { tap: tap.clone() })
            })
            .collect()
    }
}

impl<B: Backend> LayerHook<B> for TapRecorder<'_, B> {
    fn on_output(&mut self, class: &'static str, output: LayerOutput<'_, B>) {
        let position = self.position;
        self.position += 1;
        if self.error.is_some() {
            return;
        }

        match self.trace.get(position) {
            Some(expected) if *expected == class => {
                if let Some(slot) = self.plan.slots[position] {
                    self.captured[slot] = Some(output.to_map());
                }
            }
            expected => {
                self.error = Some(FeatureError::TraceMismatch {
                    position,
                    expected: expected.unwrap_or(&"<end of trace>").to_string(),
                    actual: class.to_string(),
                });
            }
        }
    }
}

/// SAM preprocessing plus tapped encoder forward passes.
///
/// The encoder runs in inference mode. Use a non-autodiff backend, e.g. the
/// `inner()` backend of a training loop, with `model.valid()` weights.
pub struct FeatureExtractor<B: Backend, E = TinyViT<B>> {
    encoder: E,
    trace: Vec<&'static str>,
    plan: TapPlan,
    pixel_mean: [f32; 3],
    pixel_std: [f32; 3],
    input_scale: f32,
    _backend: PhantomData<B>,
}

impl<B: Backend, E: ImageEncoder<B>> FeatureExtractor<B, E> {
    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Configured tap names in output order.
    pub fn taps(&self) -> &[String] {
        &self.plan.names
    }

    /// Output size `(height, width)` of the long-side resize for an input.
    pub fn preprocess_shape(&self, height: usize, width: usize) -> (usize, usize) {
        let target = self.encoder.img_size() as f64;
        let scale = target / height.max(width) as f64;
        let resize = |side: usize| ((side as f64 * scale + 0.5) as usize).max(1);
        (resize(height), resize(width))
    }

    /// Resizes, normalizes and pads a `[batch, 3, height, width]` tensor in `[0, 1]`.
    pub fn prepare_tensor(&self, input: Tensor<B, 4>) -> FeatureResult<Tensor<B, 4>> {
        let [batch, channels, height, width] = input.dims();
        if batch == 0 || channels != ImageTensor::CHANNELS || height == 0 || width == 0 {
            return Err(FeatureError::InvalidTensorShape {
                expected: "[batch, 3, height, width] with non-zero sizes".to_string(),
                actual: format!("{:?}", input.dims()),
            });
        }

        let device = input.device();
        let size = self.encoder.img_size();
        let (new_h, new_w) = self.preprocess_shape(height, width);
        let x = if (new_h, new_w) == (height, width) {
            input
        } else {
            interpolate(
                input,
                [new_h, new_w],
                InterpolateOptions::new(InterpolateMode::Bilinear),
            )
        };

        let mean = Tensor::<B, 1>::from_floats(self.pixel_mean, &device).reshape([1, 3, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(self.pixel_std, &device).reshape([1, 3, 1, 1]);
        let x = x.mul_scalar(self.input_scale).sub(mean).div(std);

        Ok(x.pad(
            (0, size - new_w, 0, size - new_h),
            B::FloatElem::from_elem(0.0),
        ))
    }

    /// Converts an image to a prepared `[1, 3, size, size]` tensor.
    pub fn prepare_image(
        &self,
        image: &DynamicImage,
        device: &B::Device,
    ) -> FeatureResult<Tensor<B, 4>> {
        let tensor = ImageTensor::from_rgb32f(&image.to_rgb32f())
            .into_tensor::<B>(device)
            .unsqueeze::<4>();
        self.prepare_tensor(tensor)
    }

    fn run(&self, input: Tensor<B, 4>) -> FeatureResult<(Vec<Tensor<B, 4>>, Tensor<B, 4>)> {
        let x = self.prepare_tensor(input.detach())?;
        let mut recorder = TapRecorder::new(&self.trace, &self.plan);
        let embedding = self.encoder.forward_hooked(x, &mut recorder);
        Ok((recorder.finish()?, embedding))
    }

    /// Tapped features of a `[batch, 3, height, width]` tensor in `[0, 1]`, in tap order.
    pub fn features(&self, input: Tensor<B, 4>) -> FeatureResult<Vec<Tensor<B, 4>>> {
        self.run(input).map(|(features, _)| features)
    }

    /// Final encoder embedding of a `[batch, 3, height, width]` tensor in `[0, 1]`.
    pub fn embed(&self, input: Tensor<B, 4>) -> FeatureResult<Tensor<B, 4>> {
        self.run(input).map(|(_, embedding)| embedding)
    }

    /// Tapped features and final embedding from a single forward pass.
    pub fn features_and_embedding(
        &self,
        input: Tensor<B, 4>,
    ) -> FeatureResult<(Vec<Tensor<B, 4>>, Tensor<B, 4>)> {
        self.run(input)
    }
}

#[cfg(test)]
mod tests {
    use backbones::TinyViTConfig;
    use burn::{
        backend::ndarray::NdArray,
        tensor::{s, Distribution, Tolerance},
    };
    use burn_extra_ops::emit;

    use super::*;

    type TestBackend = NdArray<f32>;

    fn small_encoder() -> TinyViT<TestBackend> {
        TinyViTConfig::new()
            .with_img_size(64)
            .with_embed_dims(vec![8, 16, 24, 32])
            .with_depths(vec![1, 1, 2, 1])
            .with_num_heads(vec![1, 2, 3, 4])
            .with_neck_dim(16)
            .init(&Default::default())
            .unwrap()
    }

    fn tap(trace: &[&'static str], position: usize) -> String {
        format!("{}_{}", trace[position], position)
    }

    #[test]
    fn default_taps_resolve_against_vit_t() {
        let device = Default::default();
        let encoder = TinyViTConfig::vit_t().init::<TestBackend>(&device).unwrap();

        let extractor = FeatureExtractorConfig::new().init(encoder).unwrap();

        assert_eq!(extractor.taps(), ["GELU_3", "Conv2d_BN_33", "Conv2d_BN_57"]);
    }

    #[test]
    fn unknown_and_malformed_taps_are_rejected() {
        for bad in ["GELU_0", "Conv2d_BN_100000", "nonsense", "GELU_x"] {
            let result = FeatureExtractorConfig::new()
                .with_taps(vec![bad.to_string()])
                .init(small_encoder());

            assert!(
                matches!(result, Err(FeatureError::UnknownTap { ref tap }) if tap == bad),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn empty_tap_list_is_rejected() {
        let result = FeatureExtractorConfig::new()
            .with_taps(Vec::new())
            .init(small_encoder());

        assert!(matches!(result, Err(FeatureError::NoTaps)));
    }

    #[test]
    fn duplicate_taps_are_rejected() {
        let encoder = small_encoder();
        let trace = ImageEncoder::<TestBackend>::module_trace(&encoder);
        let name = tap(&trace, 3);

        let result = FeatureExtractorConfig::new()
            .with_taps(vec![name.clone(), name])
            .init(encoder);

        assert!(matches!(result, Err(FeatureError::DuplicateTap { .. })));
    }

    #[test]
    fn features_follow_tap_order_with_stable_shapes() {
        let device = Default::default();
        let encoder = small_encoder();
        let trace = ImageEncoder::<TestBackend>::module_trace(&encoder);
        let last = trace.len() - 1;
        let taps = vec![tap(&trace, last), tap(&trace, 3), tap(&trace, 1)];
        let extractor = FeatureExtractorConfig::new()
            .with_taps(taps)
            .init(encoder)
            .unwrap();

        let a = Tensor::<TestBackend, 4>::random([1, 3, 48, 64], Distribution::Default, &device);
        let b = Tensor::<TestBackend, 4>::random([1, 3, 64, 40], Distribution::Default, &device);
        let fa = extractor.features(a).unwrap();
        let fb = extractor.features(b).unwrap();

        assert_eq!(fa.len(), 3);
        assert_eq!(fa[0].dims(), [1, 16, 4, 4]);
        for (x, y) in fa.iter().zip(&fb) {
            assert_eq!(x.dims(), y.dims());
        }
    }

    #[test]
    fn preprocessing_resizes_the_long_side_and_pads_with_zeros() {
        let device = Default::default();
        let extractor = FeatureExtractorConfig::new()
            .with_taps(vec!["GELU_3".to_string()])
            .init(small_encoder())
            .unwrap();

        assert_eq!(extractor.preprocess_shape(30, 40), (48, 64));
        assert_eq!(extractor.preprocess_shape(7, 640), (1, 64));

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 16], &device);
        let x = extractor.prepare_tensor(input).unwrap();

        assert_eq!(x.dims(), [1, 3, 64, 64]);
        let valid = x.clone().slice(s![.., 0..1, .., 0..32]).mean().into_data();
        let expected = (255.0 - 123.675) / 58.395;
        valid.assert_approx_eq::<f32>(&TensorData::from([expected as f32]), Tolerance::default());
        let padded = x
            .slice(s![.., .., .., 32..64])
            .abs()
            .sum()
            .into_scalar()
            .elem::<f32>();
        assert_eq!(padded, 0.0);
    }

    #[test]
    fn wrong_channel_count_is_rejected() {
        let device = Default::default();
        let extractor = FeatureExtractorConfig::new()
            .with_taps(vec!["GELU_3".to_string()])
            .init(small_encoder())
            .unwrap();

        let result = extractor.features(Tensor::zeros([1, 1, 64, 64], &device));

        assert!(matches!(result, Err(FeatureError::InvalidTensorShape { .. })));
    }

    /// Publishes a trace its forward pass does not follow.
    struct Drifting;

    impl ImageEncoder<TestBackend> for Drifting {
        fn img_size(&self) -> usize {
            8
        }

        fn module_trace(&self) -> Vec<&'static str> {
            vec!["Conv2d", "GELU", "Drifting"]
        }

        fn forward_hooked(
            &self,
            input: Tensor<TestBackend, 4>,
            hook: &mut dyn LayerHook<TestBackend>,
        ) -> Tensor<TestBackend, 4> {
            let x = emit(hook, "Conv2d", input);
            let x = emit(hook, "LayerNorm", x);
            emit(hook, "Drifting", x)
        }
    }

    #[test]
    fn trace_drift_is_reported() {
        let device = Default::default();
        let extractor = FeatureExtractorConfig::new()
            .with_taps(vec!["GELU_1".to_string()])
            .init(Drifting)
            .unwrap();

        let result = extractor.features(Tensor::zeros([1, 3, 8, 8], &device));

        assert!(matches!(
            result,
            Err(FeatureError::TraceMismatch { position: 1, .. })
        ));
    }
}
