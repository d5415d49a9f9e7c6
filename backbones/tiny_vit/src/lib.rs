//! # TinyViT image encoder
//!
//! Burn implementation of the TinyViT encoder used by MobileSAM (`vit_t`).
//! The network is a conv stem, one MBConv stage and three windowed-attention
//! stages, followed by the SAM neck that projects to a 256-channel embedding at
//! 1/16 of the input resolution.
//!
//! Every module reports its output through [`LayerHook`] in the order the
//! reference network completes its submodules, and [`ModuleTrace`] lists the
//! same sequence statically. Together they let a caller address an
//! intermediate activation as `"{class}_{position}"`, e.g. `GELU_3`.
//!
//! ## Reference
//! - Paper: https://arxiv.org/abs/2207.10666 (TinyViT)
//! - Paper: https://arxiv.org/abs/2306.14289 (MobileSAM)

mod conv;
mod transformer;

use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Gelu, PaddingConfig2d,
    },
    prelude::*,
};
use burn_extra_ops::{emit, LayerHook, ModuleTrace, NoHook};
use thiserror::Error;

pub use conv::{
    Conv2dBn, Conv2dBnConfig, ConvLayer, MBConv, MBConvConfig, PatchMerging, PatchMergingConfig,
};
pub use transformer::{
    attention_bias_indices, Attention, AttentionConfig, BasicLayer, Mlp, MlpConfig, TinyViTBlock,
    TinyViTBlockConfig,
};

/// Class names reported to hooks, matching the reference module classes.
pub mod class {
    pub const CONV2D: &str = "Conv2d";
    pub const BATCH_NORM_2D: &str = "BatchNorm2d";
    pub const CONV2D_BN: &str = "Conv2d_BN";
    pub const GELU: &str = "GELU";
    pub const SEQUENTIAL: &str = "Sequential";
    pub const PATCH_EMBED: &str = "PatchEmbed";
    pub const MBCONV: &str = "MBConv";
    pub const PATCH_MERGING: &str = "PatchMerging";
    pub const CONV_LAYER: &str = "ConvLayer";
    pub const LAYER_NORM: &str = "LayerNorm";
    pub const LINEAR: &str = "Linear";
    pub const ATTENTION: &str = "Attention";
    pub const DROPOUT: &str = "Dropout";
    pub const MLP: &str = "Mlp";
    pub const TINY_VIT_BLOCK: &str = "TinyViTBlock";
    pub const BASIC_LAYER: &str = "BasicLayer";
    pub const LAYER_NORM_2D: &str = "LayerNorm2d";
    pub const TINY_VIT: &str = "TinyViT";
}

#[derive(Error, Debug)]
pub enum TinyViTError {
    #[error("Invalid TinyViT configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

pub type TinyViTResult<T> = Result<T, TinyViTError>;

/// Two stride-2 Conv2d+BN layers with a GELU in between (4x downsampling).
#[derive(Module, Debug)]
pub struct PatchEmbed<B: Backend> {
    conv1: Conv2dBn<B>,
    act: Gelu,
    conv2: Conv2dBn<B>,
}

impl<B: Backend> PatchEmbed<B> {
    fn new(in_chans: usize, embed_dim: usize, device: &B::Device) -> Self {
        let stem = |channels: [usize; 2]| {
            Conv2dBnConfig::new(channels)
                .with_kernel_size(3)
                .with_stride(2)
                .with_padding(1)
                .init(device)
        };

        Self {
            conv1: stem([in_chans, embed_dim / 2]),
            act: Gelu::new(),
            conv2: stem([embed_dim / 2, embed_dim]),
        }
    }

    pub fn forward_hooked(&self, x: Tensor<B, 4>, hook: &mut dyn LayerHook<B>) -> Tensor<B, 4> {
        let x = self.conv1.forward_hooked(x, hook);
        let x = emit(hook, class::GELU, self.act.forward(x));
        let x = self.conv2.forward_hooked(x, hook);
        let x = emit(hook, class::SEQUENTIAL, x);

        emit(hook, class::PATCH_EMBED, x)
    }
}

impl<B: Backend> ModuleTrace for PatchEmbed<B> {
    fn trace(&self, out: &mut Vec<&'static str>) {
        self.conv1.trace(out);
        out.push(class::GELU);
        self.conv2.trace(out);
        out.extend([class::SEQUENTIAL, class::PATCH_EMBED]);
    }
}

/// Channel-wise layer normalization for `[batch, channels, height, width]` maps.
#[derive(Module, Debug)]
pub struct LayerNorm2d<B: Backend> {
    weight: Param<Tensor<B, 1>>,
    bias: Param<Tensor<B, 1>>,
    eps: f64,
}

impl<B: Backend> LayerNorm2d<B> {
    pub fn new(channels: usize, eps: f64, device: &B::Device) -> Self {
        Self {
            weight: Param::from_tensor(Tensor::ones([channels], device)),
            bias: Param::from_tensor(Tensor::zeros([channels], device)),
            eps,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = x.dims();
        let mean = x.clone().mean_dim(1);
        let centered = x - mean;
        let var = centered.clone().powf_scalar(2.0).mean_dim(1);
        let x = centered / var.add_scalar(self.eps).sqrt();

        let weight = self.weight.val().reshape([1, channels, 1, 1]);
        let bias = self.bias.val().reshape([1, channels, 1, 1]);
        x * weight + bias
    }
}

/// Projection from the last stage to the SAM embedding space.
#[derive(Module, Debug)]
pub struct Neck<B: Backend> {
    conv1: Conv2d<B>,
    norm1: LayerNorm2d<B>,
    conv2: Conv2d<B>,
    norm2: LayerNorm2d<B>,
}

impl<B: Backend> Neck<B> {
    fn new(in_dim: usize, out_dim: usize, device: &B::Device) -> Self {
        Self {
            conv1: Conv2dConfig::new([in_dim, out_dim], [1, 1])
                .with_bias(false)
                .init(device),
            norm1: LayerNorm2d::new(out_dim, 1e-6, device),
            conv2: Conv2dConfig::new([out_dim, out_dim], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            norm2: LayerNorm2d::new(out_dim, 1e-6, device),
        }
    }

    pub fn forward_hooked(&self, x: Tensor<B, 4>, hook: &mut dyn LayerHook<B>) -> Tensor<B, 4> {
        let x = emit(hook, class::CONV2D, self.conv1.forward(x));
        let x = emit(hook, class::LAYER_NORM_2D, self.norm1.forward(x));
        let x = emit(hook, class::CONV2D, self.conv2.forward(x));
        let x = emit(hook, class::LAYER_NORM_2D, self.norm2.forward(x));

        emit(hook, class::SEQUENTIAL, x)
    }
}

impl<B: Backend> ModuleTrace for Neck<B> {
    fn trace(&self, out: &mut Vec<&'static str>) {
        out.extend([
            class::CONV2D,
            class::LAYER_NORM_2D,
            class::CONV2D,
            class::LAYER_NORM_2D,
            class::SEQUENTIAL,
        ]);
    }
}

/// Configuration for [`TinyViT`].
///
/// Defaults are the MobileSAM `vit_t` encoder.
#[derive(Config, Debug)]
pub struct TinyViTConfig {
    #[config(default = 1024)]
    pub img_size: usize,
    #[config(default = 3)]
    pub in_chans: usize,
    #[config(default = "vec![64, 128, 160, 320]")]
    pub embed_dims: Vec<usize>,
    #[config(default = "vec![2, 2, 6, 2]")]
    pub depths: Vec<usize>,
    #[config(default = "vec![2, 4, 5, 10]")]
    pub num_heads: Vec<usize>,
    #[config(default = "vec![7, 7, 14, 7]")]
    pub window_sizes: Vec<usize>,
    #[config(default = 4.0)]
    pub mlp_ratio: f64,
    #[config(default = 4.0)]
    pub mbconv_expand_ratio: f64,
    #[config(default = 3)]
    pub local_conv_size: usize,
    #[config(default = 256)]
    pub neck_dim: usize,
    #[config(default = 0.0)]
    pub drop_rate: f64,
}

impl TinyViTConfig {
    /// The MobileSAM image encoder.
    pub fn vit_t() -> Self {
        Self::new()
    }

    fn validate(&self) -> TinyViTResult<()> {
        let stages = self.embed_dims.len();
        let invalid = |reason: String| Err(TinyViTError::InvalidConfiguration { reason });

        if stages < 2 {
            return invalid(format!("expected at least 2 stages, got {stages}"));
        }
        for (name, len) in [
            ("depths", self.depths.len()),
            ("num_heads", self.num_heads.len()),
            ("window_sizes", self.window_sizes.len()),
        ] {
            if len != stages {
                return invalid(format!("{name} has {len} entries, embed_dims has {stages}"));
            }
        }
        let total_stride = 4 << (stages - 2);
        if self.img_size % total_stride != 0 {
            return invalid(format!(
                "img_size {} is not a multiple of {total_stride}",
                self.img_size
            ));
        }
        for (dim, heads) in self.embed_dims.iter().zip(&self.num_heads).skip(1) {
            if dim % heads != 0 {
                return invalid(format!("dim {dim} is not divisible by {heads} heads"));
            }
        }
        Ok(())
    }

    /// Side length of the token grid entering stage `index`.
    ///
    /// Each stage halves the grid except the last, which keeps its input resolution.
    fn stage_resolution(&self, index: usize) -> usize {
        let patches = self.img_size / 4;
        let last = self.embed_dims.len() - 1;
        let halvings = if index == last { index - 1 } else { index };
        patches >> halvings
    }

    fn merge(&self, index: usize) -> PatchMergingConfig {
        let resolution = self.stage_resolution(index);
        let stride = resolution / self.stage_resolution(index + 1);

        PatchMergingConfig::new(
            [resolution, resolution],
            self.embed_dims[index],
            self.embed_dims[index + 1],
        )
        .with_stride(stride)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> TinyViTResult<TinyViT<B>> {
        self.validate()?;

        let patch_embed = PatchEmbed::new(self.in_chans, self.embed_dims[0], device);

        let conv_blocks = (0..self.depths[0])
            .map(|_| {
                MBConvConfig::new(self.embed_dims[0], self.embed_dims[0])
                    .with_expand_ratio(self.mbconv_expand_ratio)
                    .init(device)
            })
            .collect();
        let conv_stage = ConvLayer::new(conv_blocks, self.merge(0).init(device));

        let last = self.embed_dims.len() - 1;
        let stages = (1..=last)
            .map(|index| {
                let resolution = self.stage_resolution(index);
                let blocks = (0..self.depths[index])
                    .map(|_| {
                        TinyViTBlockConfig::new(
                            self.embed_dims[index],
                            [resolution, resolution],
                            self.num_heads[index],
                        )
                        .with_window_size(self.window_sizes[index])
                        .with_mlp_ratio(self.mlp_ratio)
                        .with_drop(self.drop_rate)
                        .with_local_conv_size(self.local_conv_size)
                        .init(device)
                    })
                    .collect();
                let downsample = (index < last).then(|| self.merge(index).init(device));
                BasicLayer::new(blocks, downsample)
            })
            .collect();

        Ok(TinyViT {
            patch_embed,
            conv_stage,
            stages,
            neck: Neck::new(self.embed_dims[last], self.neck_dim, device),
            img_size: self.img_size,
            embed_resolution: self.stage_resolution(last),
        })
    }
}

/// TinyViT encoder producing `[batch, neck_dim, img_size / 16, img_size / 16]` embeddings.
#[derive(Module, Debug)]
pub struct TinyViT<B: Backend> {
    patch_embed: PatchEmbed<B>,
    conv_stage: ConvLayer<B>,
    stages: Vec<BasicLayer<B>>,
    neck: Neck<B>,
    img_size: usize,
    embed_resolution: usize,
}

impl<B: Backend> TinyViT<B> {
    /// Square input resolution the encoder expects.
    pub const fn img_size(&self) -> usize {
        self.img_size
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward_hooked(x, &mut NoHook)
    }

    /// Runs the encoder, reporting every completed submodule to `hook`.
    ///
    /// # Shapes
    /// - input: `[batch, in_chans, img_size, img_size]`
    /// - output: `[batch, neck_dim, img_size / 16, img_size / 16]`
    pub fn forward_hooked(&self, x: Tensor<B, 4>, hook: &mut dyn LayerHook<B>) -> Tensor<B, 4> {
        let x = self.patch_embed.forward_hooked(x, hook);
        let mut x = self.conv_stage.forward_hooked(x, hook);
        for stage in &self.stages {
            x = stage.forward_hooked(x, hook);
        }

        let [batch, _, channels] = x.dims();
        let side = self.embed_resolution;
        let x = x.reshape([batch, side, side, channels]).permute([0, 3, 1, 2]);
        let x = self.neck.forward_hooked(x, hook);

        emit(hook, class::TINY_VIT, x)
    }
}

impl<B: Backend> ModuleTrace for TinyViT<B> {
    fn trace(&self, out: &mut Vec<&'static str>) {
        self.patch_embed.trace(out);
        self.conv_stage.trace(out);
        for stage in &self.stages {
            stage.trace(out);
        }
        self.neck.trace(out);
        out.push(class::TINY_VIT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, tensor::Distribution};
    use burn_extra_ops::LayerOutput;

    type TestBackend = NdArray<f32>;

    fn small_config() -> TinyViTConfig {
        TinyViTConfig::new()
            .with_img_size(64)
            .with_embed_dims(vec![8, 16, 24, 32])
            .with_depths(vec![1, 1, 2, 1])
            .with_num_heads(vec![1, 2, 3, 4])
            .with_neck_dim(16)
    }

    #[derive(Default)]
    struct Collect {
        classes: Vec<&'static str>,
        shapes: Vec<Vec<usize>>,
    }

    impl LayerHook<TestBackend> for Collect {
        fn on_output(&mut self, class: &'static str, output: LayerOutput<'_, TestBackend>) {
            self.classes.push(class);
            self.shapes.push(output.dims());
        }
    }

    #[test]
    fn vit_t_trace_places_default_taps() {
        let device = Default::default();
        let model = TinyViTConfig::vit_t().init::<TestBackend>(&device).unwrap();

        let trace = model.module_trace();

        assert_eq!(trace[3], class::GELU);
        assert_eq!(trace[33], class::CONV2D_BN);
        assert_eq!(trace[57], class::CONV2D_BN);
        assert_eq!(trace[53], class::ATTENTION);
        assert_eq!(trace.last(), Some(&class::TINY_VIT));
    }

    #[test]
    fn forward_emits_exactly_the_static_trace() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 4>::random([1, 3, 64, 64], Distribution::Default, &device);

        let mut hook = Collect::default();
        let y = model.forward_hooked(x, &mut hook);

        assert_eq!(y.dims(), [1, 16, 4, 4]);
        assert_eq!(hook.classes, model.module_trace());
        assert_eq!(hook.shapes.last(), Some(&vec![1, 16, 4, 4]));
    }

    #[test]
    fn stage_resolutions_keep_the_last_merge_at_full_size() {
        let config = small_config();

        let resolutions: Vec<usize> = (0..4).map(|i| config.stage_resolution(i)).collect();

        assert_eq!(resolutions, vec![16, 8, 4, 4]);
    }

    #[test]
    fn mismatched_stage_lists_are_rejected() {
        let device = Default::default();
        let config = small_config().with_depths(vec![1, 1, 1]);

        let result = config.init::<TestBackend>(&device);

        assert!(matches!(
            result,
            Err(TinyViTError::InvalidConfiguration { .. })
        ));
    }
}
