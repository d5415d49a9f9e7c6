//! Burn batchers for the dataset items.
//!
//! Items of one batch must share a resolution. Inference items keep their
//! native size, so mixed-resolution test sets need a batch size of one.

use std::{marker::PhantomData, path::PathBuf};

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use super::{BankItem, InferenceItem, LabeledItem, WeakStrongItem};
use crate::image_tensor::ImageTensor;

fn stack<B: Backend>(images: Vec<ImageTensor>, device: &B::Device) -> Tensor<B, 4> {
    let tensors: Vec<Tensor<B, 3>> = images
        .into_iter()
        .map(|image| image.into_tensor::<B>(device))
        .collect();
    Tensor::stack(tensors, 0)
}

macro_rules! batcher {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Default)]
        pub struct $name<B: Backend> {
            _phantom: PhantomData<B>,
        }

        impl<B: Backend> $name<B> {
            pub const fn new() -> Self {
                Self {
                    _phantom: PhantomData,
                }
            }
        }
    };
}

batcher!(
    /// Stacks [`LabeledItem`]s into a [`LabeledBatch`].
    LabeledBatcher
);
batcher!(
    /// Stacks [`WeakStrongItem`]s into a [`WeakStrongBatch`].
    WeakStrongBatcher
);
batcher!(
    /// Stacks [`BankItem`]s into a [`BankBatch`].
    BankBatcher
);
batcher!(
    /// Stacks [`InferenceItem`]s into an [`InferenceBatch`].
    InferenceBatcher
);

#[derive(Clone, Debug)]
pub struct LabeledBatch<B: Backend> {
    /// `[B, 3, H, W]`
    pub inputs: Tensor<B, 4>,
    /// `[B, 3, H, W]`
    pub targets: Tensor<B, 4>,
    pub paths: Vec<PathBuf>,
}

impl<B: Backend> Batcher<B, LabeledItem, LabeledBatch<B>> for LabeledBatcher<B> {
    fn batch(&self, items: Vec<LabeledItem>, device: &B::Device) -> LabeledBatch<B> {
        let mut inputs = Vec::with_capacity(items.len());
        let mut targets = Vec::with_capacity(items.len());
        let mut paths = Vec::with_capacity(items.len());

        for item in items {
            inputs.push(item.input);
            targets.push(item.target);
            paths.push(item.input_path);
        }

        LabeledBatch {
            inputs: stack(inputs, device),
            targets: stack(targets, device),
            paths,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WeakStrongBatch<B: Backend> {
    pub weak: Tensor<B, 4>,
    pub strong: Tensor<B, 4>,
    pub paths: Vec<PathBuf>,
}

impl<B: Backend> Batcher<B, WeakStrongItem, WeakStrongBatch<B>> for WeakStrongBatcher<B> {
    fn batch(&self, items: Vec<WeakStrongItem>, device: &B::Device) -> WeakStrongBatch<B> {
        let mut weak = Vec::with_capacity(items.len());
        let mut strong = Vec::with_capacity(items.len());
        let mut paths = Vec::with_capacity(items.len());

        for item in items {
            weak.push(item.weak);
            strong.push(item.strong);
            paths.push(item.path);
        }

        WeakStrongBatch {
            weak: stack(weak, device),
            strong: stack(strong, device),
            paths,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BankBatch<B: Backend> {
    pub weak: Tensor<B, 4>,
    pub strong: Tensor<B, 4>,
    pub candidates: Tensor<B, 4>,
    /// Where each candidate came from, so an updated bank can be written back.
    pub candidate_paths: Vec<PathBuf>,
}

impl<B: Backend> Batcher<B, BankItem, BankBatch<B>> for BankBatcher<B> {
    fn batch(&self, items: Vec<BankItem>, device: &B::Device) -> BankBatch<B> {
        let mut weak = Vec::with_capacity(items.len());
        let mut strong = Vec::with_capacity(items.len());
        let mut candidates = Vec::with_capacity(items.len());
        let mut candidate_paths = Vec::with_capacity(items.len());

        for item in items {
            weak.push(item.weak);
            strong.push(item.strong);
            candidates.push(item.candidate);
            candidate_paths.push(item.candidate_path);
        }

        BankBatch {
            weak: stack(weak, device),
            strong: stack(strong, device),
            candidates: stack(candidates, device),
            candidate_paths,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InferenceBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub paths: Vec<PathBuf>,
}

impl<B: Backend> Batcher<B, InferenceItem, InferenceBatch<B>> for InferenceBatcher<B> {
    fn batch(&self, items: Vec<InferenceItem>, device: &B::Device) -> InferenceBatch<B> {
        let (images, paths): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| (item.image, item.path))
            .unzip();

        InferenceBatch {
            images: stack(images, device),
            paths,
        }
    }
}
