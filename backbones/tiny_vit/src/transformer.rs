//! Windowed attention stages.

use burn::{
    module::Param,
    nn::{Dropout, DropoutConfig, Gelu, LayerNorm, LayerNormConfig, Linear, LinearConfig},
    prelude::*,
    tensor::{activation::softmax, s},
};
use burn_extra_ops::{emit, Identity, LayerHook, ModuleTrace};

use crate::{
    class,
    conv::{Conv2dBn, Conv2dBnConfig, PatchMerging},
};

/// Feed-forward block with a leading layer norm.
#[derive(Config, Debug)]
pub struct MlpConfig {
    in_features: usize,
    hidden_features: usize,
    #[config(default = 0.0)]
    drop: f64,
}

impl MlpConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Mlp<B> {
        Mlp {
            norm: LayerNormConfig::new(self.in_features).init(device),
            fc1: LinearConfig::new(self.in_features, self.hidden_features).init(device),
            fc2: LinearConfig::new(self.hidden_features, self.in_features).init(device),
            act: Gelu::new(),
            drop: DropoutConfig::new(self.drop).init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    norm: LayerNorm<B>,
    fc1: Linear<B>,
    fc2: Linear<B>,
    act: Gelu,
    drop: Dropout,
}

impl<B: Backend> Mlp<B> {
    pub fn forward_hooked(&self, x: Tensor<B, 3>, hook: &mut dyn LayerHook<B>) -> Tensor<B, 3> {
        let x = emit(hook, class::LAYER_NORM, self.norm.forward(x));
        let x = emit(hook, class::LINEAR, self.fc1.forward(x));
        let x = emit(hook, class::GELU, self.act.forward(x));
        let x = emit(hook, class::DROPOUT, self.drop.forward(x));
        let x = emit(hook, class::LINEAR, self.fc2.forward(x));
        let x = emit(hook, class::DROPOUT, self.drop.forward(x));

        emit(hook, class::MLP, x)
    }
}

impl<B: Backend> ModuleTrace for Mlp<B> {
    fn trace(&self, out: &mut Vec<&'static str>) {
        out.extend([
            class::LAYER_NORM,
            class::LINEAR,
            class::GELU,
            class::DROPOUT,
            class::LINEAR,
            class::DROPOUT,
            class::MLP,
        ]);
    }
}

/// Multi-head self-attention over one window with learned relative-offset biases.
#[derive(Config, Debug)]
pub struct AttentionConfig {
    dim: usize,
    num_heads: usize,
    /// Side length of the (square) window the attention runs over.
    resolution: usize,
}

impl AttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Attention<B> {
        let key_dim = self.dim / self.num_heads;
        let inner_dim = key_dim * self.num_heads;
        let num_offsets = self.resolution * self.resolution;

        Attention {
            norm: LayerNormConfig::new(self.dim).init(device),
            qkv: LinearConfig::new(self.dim, 3 * inner_dim).init(device),
            proj: LinearConfig::new(inner_dim, self.dim).init(device),
            attention_biases: Param::from_tensor(Tensor::zeros(
                [self.num_heads, num_offsets],
                device,
            )),
            num_heads: self.num_heads,
            key_dim,
            resolution: self.resolution,
            scale: (key_dim as f64).powf(-0.5),
        }
    }
}

#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    norm: LayerNorm<B>,
    qkv: Linear<B>,
    proj: Linear<B>,
    attention_biases: Param<Tensor<B, 2>>,
    num_heads: usize,
    key_dim: usize,
    resolution: usize,
    scale: f64,
}

/// Index into the bias table for every (query, key) pair of a `resolution`² window.
///
/// Offsets are numbered in first-seen order while scanning query points row-major,
/// which for a square grid reduces to `|dy| * resolution + |dx|`.
pub fn attention_bias_indices(resolution: usize) -> Vec<i64> {
    let points: Vec<(usize, usize)> = (0..resolution)
        .flat_map(|y| (0..resolution).map(move |x| (y, x)))
        .collect();

    points
        .iter()
        .flat_map(|&(y1, x1)| {
            points
                .iter()
                .map(move |&(y2, x2)| (y1.abs_diff(y2) * resolution + x1.abs_diff(x2)) as i64)
        })
        .collect()
}

impl<B: Backend> Attention<B> {
    fn bias(&self, tokens: usize, device: &B::Device) -> Tensor<B, 4> {
        let indices = attention_bias_indices(self.resolution);
        let indices =
            Tensor::<B, 1, Int>::from_data(TensorData::new(indices, [tokens * tokens]), device);

        self.attention_biases
            .val()
            .select(1, indices)
            .reshape([1, self.num_heads, tokens, tokens])
    }

    pub fn forward_hooked(&self, x: Tensor<B, 3>, hook: &mut dyn LayerHook<B>) -> Tensor<B, 3> {
        let [batch, tokens, _] = x.dims();
        let device = x.device();
        let kd = self.key_dim;

        let x = emit(hook, class::LAYER_NORM, self.norm.forward(x));
        let qkv = emit(hook, class::LINEAR, self.qkv.forward(x));

        // Per head the projection is laid out as [q | k | v].
        let qkv = qkv.reshape([batch, tokens, self.num_heads, 3 * kd]);
        let q = qkv.clone().slice(s![.., .., .., 0..kd]).swap_dims(1, 2);
        let k = qkv.clone().slice(s![.., .., .., kd..2 * kd]).swap_dims(1, 2);
        let v = qkv.slice(s![.., .., .., 2 * kd..3 * kd]).swap_dims(1, 2);

        let attn = q.matmul(k.swap_dims(2, 3)).mul_scalar(self.scale)
            + self.bias(tokens, &device);
        let attn = softmax(attn, 3);

        let x = attn
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, tokens, self.num_heads * kd]);
        let x = emit(hook, class::LINEAR, self.proj.forward(x));

        emit(hook, class::ATTENTION, x)
    }
}

impl<B: Backend> ModuleTrace for Attention<B> {
    fn trace(&self, out: &mut Vec<&'static str>) {
        out.extend([
            class::LAYER_NORM,
            class::LINEAR,
            class::LINEAR,
            class::ATTENTION,
        ]);
    }
}

#[derive(Config, Debug)]
pub struct TinyViTBlockConfig {
    dim: usize,
    input_resolution: [usize; 2],
    num_heads: usize,
    #[config(default = 7)]
    window_size: usize,
    #[config(default = 4.0)]
    mlp_ratio: f64,
    #[config(default = 0.0)]
    drop: f64,
    #[config(default = 3)]
    local_conv_size: usize,
}

impl TinyViTBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TinyViTBlock<B> {
        let hidden = (self.dim as f64 * self.mlp_ratio) as usize;

        TinyViTBlock {
            attn: AttentionConfig::new(self.dim, self.num_heads, self.window_size).init(device),
            drop_path: Identity::new(),
            local_conv: Conv2dBnConfig::new([self.dim, self.dim])
                .with_kernel_size(self.local_conv_size)
                .with_padding(self.local_conv_size / 2)
                .with_groups(self.dim)
                .init(device),
            mlp: MlpConfig::new(self.dim, hidden)
                .with_drop(self.drop)
                .init(device),
            input_resolution: self.input_resolution,
            window_size: self.window_size,
        }
    }
}

/// Window attention, depthwise local convolution, then the MLP.
#[derive(Module, Debug)]
pub struct TinyViTBlock<B: Backend> {
    attn: Attention<B>,
    drop_path: Identity<B>,
    local_conv: Conv2dBn<B>,
    mlp: Mlp<B>,
    input_resolution: [usize; 2],
    window_size: usize,
}

impl<B: Backend> TinyViTBlock<B> {
    fn windowed_attention(
        &self,
        x: Tensor<B, 3>,
        hook: &mut dyn LayerHook<B>,
    ) -> Tensor<B, 3> {
        let [h, w] = self.input_resolution;
        let ws = self.window_size;
        if h == ws && w == ws {
            return self.attn.forward_hooked(x, hook);
        }

        let [batch, tokens, channels] = x.dims();
        let x = x.reshape([batch, h, w, channels]);

        let pad_b = (ws - h % ws) % ws;
        let pad_r = (ws - w % ws) % ws;
        let padded = pad_b > 0 || pad_r > 0;
        let x = if padded {
            x.permute([0, 3, 1, 2])
                .pad((0, pad_r, 0, pad_b), B::FloatElem::from_elem(0.0))
                .permute([0, 2, 3, 1])
        } else {
            x
        };

        let (ph, pw) = (h + pad_b, w + pad_r);
        let (nh, nw) = (ph / ws, pw / ws);

        let windows = x
            .reshape([batch, nh, ws, nw, ws, channels])
            .swap_dims(2, 3)
            .reshape([batch * nh * nw, ws * ws, channels]);
        let windows = self.attn.forward_hooked(windows, hook);

        let x = windows
            .reshape([batch, nh, nw, ws, ws, channels])
            .swap_dims(2, 3)
            .reshape([batch, ph, pw, channels]);
        let x = if padded {
            x.slice(s![.., 0..h, 0..w, ..])
        } else {
            x
        };

        x.reshape([batch, tokens, channels])
    }

    pub fn forward_hooked(&self, x: Tensor<B, 3>, hook: &mut dyn LayerHook<B>) -> Tensor<B, 3> {
        let [batch, tokens, channels] = x.dims();
        let [h, w] = self.input_resolution;

        let residual = x.clone();
        let x = self.windowed_attention(x, hook);
        let x = residual + self.drop_path.forward_hooked(x, hook);

        let x = x.swap_dims(1, 2).reshape([batch, channels, h, w]);
        let x = self.local_conv.forward_hooked(x, hook);
        let x = x.reshape([batch, channels, tokens]).swap_dims(1, 2);

        let mlp = self.mlp.forward_hooked(x.clone(), hook);
        let x = x + self.drop_path.forward_hooked(mlp, hook);

        emit(hook, class::TINY_VIT_BLOCK, x)
    }
}

impl<B: Backend> ModuleTrace for TinyViTBlock<B> {
    fn trace(&self, out: &mut Vec<&'static str>) {
        self.attn.trace(out);
        self.drop_path.trace(out);
        self.local_conv.trace(out);
        self.mlp.trace(out);
        self.drop_path.trace(out);
        out.push(class::TINY_VIT_BLOCK);
    }
}

/// Attention stage: a stack of blocks with an optional trailing patch merge.
#[derive(Module, Debug)]
pub struct BasicLayer<B: Backend> {
    blocks: Vec<TinyViTBlock<B>>,
    downsample: Option<PatchMerging<B>>,
}

impl<B: Backend> BasicLayer<B> {
    pub fn new(blocks: Vec<TinyViTBlock<B>>, downsample: Option<PatchMerging<B>>) -> Self {
        Self { blocks, downsample }
    }

    pub fn forward_hooked(&self, x: Tensor<B, 3>, hook: &mut dyn LayerHook<B>) -> Tensor<B, 3> {
        let mut x = x;
        for block in &self.blocks {
            x = block.forward_hooked(x, hook);
        }
        let x = match &self.downsample {
            Some(downsample) => downsample.forward_tokens(x, hook),
            None => x,
        };

        emit(hook, class::BASIC_LAYER, x)
    }
}

impl<B: Backend> ModuleTrace for BasicLayer<B> {
    fn trace(&self, out: &mut Vec<&'static str>) {
        for block in &self.blocks {
            block.trace(out);
        }
        if let Some(downsample) = &self.downsample {
            downsample.trace(out);
        }
        out.push(class::BASIC_LAYER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, tensor::Distribution};
    use burn_extra_ops::NoHook;

    type TestBackend = NdArray<f32>;

    #[test]
    fn bias_indices_follow_first_seen_offset_order() {
        assert_eq!(
            attention_bias_indices(2),
            vec![0, 1, 2, 3, 1, 0, 3, 2, 2, 3, 0, 1, 3, 2, 1, 0]
        );
    }

    #[test]
    fn bias_indices_cover_every_offset() {
        let indices = attention_bias_indices(7);

        assert_eq!(indices.len(), 49 * 49);
        assert_eq!(indices.iter().copied().max(), Some(48));
    }

    #[test]
    fn attention_preserves_token_shape() {
        let device = Default::default();
        let attn = AttentionConfig::new(8, 2, 3).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 3>::random([4, 9, 8], Distribution::Default, &device);

        let y = attn.forward_hooked(x, &mut NoHook);

        assert_eq!(y.dims(), [4, 9, 8]);
    }

    #[test]
    fn block_pads_grids_that_do_not_tile_into_windows() {
        let device = Default::default();
        let block = TinyViTBlockConfig::new(8, [8, 8], 2)
            .with_window_size(7)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 3>::random([2, 64, 8], Distribution::Default, &device);

        let y = block.forward_hooked(x, &mut NoHook);

        assert_eq!(y.dims(), [2, 64, 8]);
    }

    #[test]
    fn block_uses_a_single_window_when_grid_matches() {
        let device = Default::default();
        let block = TinyViTBlockConfig::new(8, [4, 4], 2)
            .with_window_size(4)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 3>::random([1, 16, 8], Distribution::Default, &device);

        let y = block.forward_hooked(x, &mut NoHook);

        assert_eq!(y.dims(), [1, 16, 8]);
        assert_eq!(block.module_trace().len(), 17);
    }
}
