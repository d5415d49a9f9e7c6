//! Image encoder implementations for perceptual feature extraction
//!
//! This crate provides a unified interface over pretrained image encoders whose
//! intermediate activations can be observed during a forward pass.

use burn::prelude::*;
use burn_extra_ops::{LayerHook, ModuleTrace, NoHook};

pub use burn_extra_ops::{LayerOutput, Observable};
pub use tiny_vit::{TinyViT, TinyViTConfig, TinyViTError, TinyViTResult};

/// Unified encoder trait for feature extraction
pub trait ImageEncoder<B: Backend> {
    /// Side length of the square input the encoder expects.
    fn img_size(&self) -> usize;

    /// Class names of every submodule in the order the forward pass reports them.
    ///
    /// Position `i` of this list corresponds to the `i`-th call the hook
    /// receives from [`ImageEncoder::forward_hooked`].
    fn module_trace(&self) -> Vec<&'static str>;

    /// Forward pass reporting each completed submodule to `hook`
    ///
    /// # Arguments
    /// * `input` - Input tensor of shape `[batch_size, 3, img_size, img_size]`
    ///
    /// # Returns
    /// Final image embedding of shape `[batch_size, channels, height, width]`
    fn forward_hooked(&self, input: Tensor<B, 4>, hook: &mut dyn LayerHook<B>) -> Tensor<B, 4>;

    /// Forward pass without observation
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward_hooked(input, &mut NoHook)
    }
}

/// Implement ImageEncoder trait for TinyViT
impl<B: Backend> ImageEncoder<B> for TinyViT<B> {
    fn img_size(&self) -> usize {
        TinyViT::img_size(self)
    }

    fn module_trace(&self) -> Vec<&'static str> {
        ModuleTrace::module_trace(self)
    }

    fn forward_hooked(&self, input: Tensor<B, 4>, hook: &mut dyn LayerHook<B>) -> Tensor<B, 4> {
        TinyViT::forward_hooked(self, input, hook)
    }
}
