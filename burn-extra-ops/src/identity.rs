//! Identity module implementation

use burn::prelude::*;

use crate::hook::{emit, LayerHook, ModuleTrace, Observable};

/// Identity module that returns input unchanged.
///
/// Stands in for disabled stochastic-depth layers, which still show up as a
/// module in traced forward passes.
#[derive(Module, Debug)]
pub struct Identity<B: Backend> {
    _phantom: std::marker::PhantomData<B>,
}

impl<B: Backend> Identity<B> {
    pub const CLASS: &'static str = "Identity";

    /// Create new Identity module
    pub const fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }

    /// Forward pass (identity function)
    pub const fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        input
    }

    /// Forward pass that reports the unchanged input to `hook`.
    pub fn forward_hooked<T: Observable<B>>(&self, input: T, hook: &mut dyn LayerHook<B>) -> T {
        emit(hook, Self::CLASS, input)
    }
}

impl<B: Backend> ModuleTrace for Identity<B> {
    fn trace(&self, out: &mut Vec<&'static str>) {
        out.push(Self::CLASS);
    }
}

impl<B: Backend> Default for Identity<B> {
    fn default() -> Self {
        Self::new()
    }
}
