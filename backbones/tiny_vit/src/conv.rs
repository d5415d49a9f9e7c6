//! Convolutional building blocks: Conv2d+BN, MBConv, patch merging and the first stage.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Gelu, PaddingConfig2d,
    },
    prelude::*,
};
use burn_extra_ops::{emit, Identity, LayerHook, ModuleTrace};

use crate::class;

/// Bias-free convolution followed by batch normalization.
#[derive(Config, Debug)]
pub struct Conv2dBnConfig {
    channels: [usize; 2],
    #[config(default = 1)]
    kernel_size: usize,
    #[config(default = 1)]
    stride: usize,
    #[config(default = 0)]
    padding: usize,
    #[config(default = 1)]
    groups: usize,
}

impl Conv2dBnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Conv2dBn<B> {
        let c = Conv2dConfig::new(self.channels, [self.kernel_size, self.kernel_size])
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
            .with_groups(self.groups)
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(self.channels[1]).init(device);

        Conv2dBn { c, bn }
    }
}

#[derive(Module, Debug)]
pub struct Conv2dBn<B: Backend> {
    c: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Conv2dBn<B> {
    pub fn forward_hooked(&self, x: Tensor<B, 4>, hook: &mut dyn LayerHook<B>) -> Tensor<B, 4> {
        let x = emit(hook, class::CONV2D, self.c.forward(x));
        let x = emit(hook, class::BATCH_NORM_2D, self.bn.forward(x));
        emit(hook, class::CONV2D_BN, x)
    }
}

impl<B: Backend> ModuleTrace for Conv2dBn<B> {
    fn trace(&self, out: &mut Vec<&'static str>) {
        out.extend([class::CONV2D, class::BATCH_NORM_2D, class::CONV2D_BN]);
    }
}

/// Inverted residual block: 1x1 expand, depthwise 3x3, 1x1 project.
#[derive(Config, Debug)]
pub struct MBConvConfig {
    in_chans: usize,
    out_chans: usize,
    #[config(default = 4.0)]
    expand_ratio: f64,
}

impl MBConvConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MBConv<B> {
        let hidden = (self.in_chans as f64 * self.expand_ratio) as usize;

        MBConv {
            conv1: Conv2dBnConfig::new([self.in_chans, hidden]).init(device),
            conv2: Conv2dBnConfig::new([hidden, hidden])
                .with_kernel_size(3)
                .with_padding(1)
                .with_groups(hidden)
                .init(device),
            conv3: Conv2dBnConfig::new([hidden, self.out_chans]).init(device),
            act: Gelu::new(),
            drop_path: Identity::new(),
        }
    }
}

#[derive(Module, Debug)]
pub struct MBConv<B: Backend> {
    conv1: Conv2dBn<B>,
    conv2: Conv2dBn<B>,
    conv3: Conv2dBn<B>,
    act: Gelu,
    drop_path: Identity<B>,
}

impl<B: Backend> MBConv<B> {
    pub fn forward_hooked(&self, x: Tensor<B, 4>, hook: &mut dyn LayerHook<B>) -> Tensor<B, 4> {
        let shortcut = x.clone();

        let x = self.conv1.forward_hooked(x, hook);
        let x = emit(hook, class::GELU, self.act.forward(x));
        let x = self.conv2.forward_hooked(x, hook);
        let x = emit(hook, class::GELU, self.act.forward(x));
        let x = self.conv3.forward_hooked(x, hook);
        let x = self.drop_path.forward_hooked(x, hook);
        let x = emit(hook, class::GELU, self.act.forward(x + shortcut));

        emit(hook, class::MBCONV, x)
    }
}

impl<B: Backend> ModuleTrace for MBConv<B> {
    fn trace(&self, out: &mut Vec<&'static str>) {
        self.conv1.trace(out);
        out.push(class::GELU);
        self.conv2.trace(out);
        out.push(class::GELU);
        self.conv3.trace(out);
        self.drop_path.trace(out);
        out.extend([class::GELU, class::MBCONV]);
    }
}

/// Downsamples a token grid between stages.
///
/// `stride` is 2 for a regular merge and 1 when the next stage keeps the
/// resolution (the last merge of the SAM encoders).
#[derive(Config, Debug)]
pub struct PatchMergingConfig {
    input_resolution: [usize; 2],
    dim: usize,
    out_dim: usize,
    #[config(default = 2)]
    stride: usize,
}

impl PatchMergingConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PatchMerging<B> {
        PatchMerging {
            conv1: Conv2dBnConfig::new([self.dim, self.out_dim]).init(device),
            conv2: Conv2dBnConfig::new([self.out_dim, self.out_dim])
                .with_kernel_size(3)
                .with_stride(self.stride)
                .with_padding(1)
                .with_groups(self.out_dim)
                .init(device),
            conv3: Conv2dBnConfig::new([self.out_dim, self.out_dim]).init(device),
            act: Gelu::new(),
            input_resolution: self.input_resolution,
        }
    }
}

#[derive(Module, Debug)]
pub struct PatchMerging<B: Backend> {
    conv1: Conv2dBn<B>,
    conv2: Conv2dBn<B>,
    conv3: Conv2dBn<B>,
    act: Gelu,
    input_resolution: [usize; 2],
}

impl<B: Backend> PatchMerging<B> {
    pub fn forward_hooked(&self, x: Tensor<B, 4>, hook: &mut dyn LayerHook<B>) -> Tensor<B, 3> {
        let x = self.conv1.forward_hooked(x, hook);
        let x = emit(hook, class::GELU, self.act.forward(x));
        let x = self.conv2.forward_hooked(x, hook);
        let x = emit(hook, class::GELU, self.act.forward(x));
        let x = self.conv3.forward_hooked(x, hook);

        let x: Tensor<B, 3> = x.flatten(2, 3).swap_dims(1, 2);
        emit(hook, class::PATCH_MERGING, x)
    }

    /// Same as [`Self::forward_hooked`] for tokens laid out row-major on `input_resolution`.
    pub fn forward_tokens(&self, x: Tensor<B, 3>, hook: &mut dyn LayerHook<B>) -> Tensor<B, 3> {
        let [batch, _, channels] = x.dims();
        let [h, w] = self.input_resolution;
        let x = x.reshape([batch, h, w, channels]).permute([0, 3, 1, 2]);

        self.forward_hooked(x, hook)
    }
}

impl<B: Backend> ModuleTrace for PatchMerging<B> {
    fn trace(&self, out: &mut Vec<&'static str>) {
        self.conv1.trace(out);
        out.push(class::GELU);
        self.conv2.trace(out);
        out.push(class::GELU);
        self.conv3.trace(out);
        out.push(class::PATCH_MERGING);
    }
}

/// First stage: a stack of MBConv blocks followed by a patch merge.
#[derive(Module, Debug)]
pub struct ConvLayer<B: Backend> {
    blocks: Vec<MBConv<B>>,
    downsample: PatchMerging<B>,
}

impl<B: Backend> ConvLayer<B> {
    pub fn new(blocks: Vec<MBConv<B>>, downsample: PatchMerging<B>) -> Self {
        Self { blocks, downsample }
    }

    pub fn forward_hooked(&self, x: Tensor<B, 4>, hook: &mut dyn LayerHook<B>) -> Tensor<B, 3> {
        let mut x = x;
        for block in &self.blocks {
            x = block.forward_hooked(x, hook);
        }
        let x = self.downsample.forward_hooked(x, hook);

        emit(hook, class::CONV_LAYER, x)
    }
}

impl<B: Backend> ModuleTrace for ConvLayer<B> {
    fn trace(&self, out: &mut Vec<&'static str>) {
        for block in &self.blocks {
            block.trace(out);
        }
        self.downsample.trace(out);
        out.push(class::CONV_LAYER);
    }
}
