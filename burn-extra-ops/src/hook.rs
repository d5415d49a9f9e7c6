//! Forward hooks for observing intermediate module outputs.
//!
//! Burn modules are plain structs, so there is no registry to attach callbacks to.
//! Modules that support observation take a `&mut dyn LayerHook<B>` in a
//! `forward_hooked` method and report every completed submodule through [`emit`].
//! The hook lives exactly as long as the borrow passed to that call.

use burn::prelude::*;

/// Output of one completed module, borrowed for the duration of the callback.
#[derive(Debug)]
pub enum LayerOutput<'a, B: Backend> {
    /// Token sequence of shape `[batch, tokens, channels]`.
    Tokens(&'a Tensor<B, 3>),
    /// Feature map of shape `[batch, channels, height, width]`.
    Map(&'a Tensor<B, 4>),
}

impl<B: Backend> LayerOutput<'_, B> {
    /// Shape of the borrowed tensor.
    pub fn dims(&self) -> Vec<usize> {
        match self {
            Self::Tokens(tensor) => tensor.dims().to_vec(),
            Self::Map(tensor) => tensor.dims().to_vec(),
        }
    }

    /// Owned rank-4 copy of the output.
    ///
    /// Token sequences gain a unit axis at dim 1, giving `[batch, 1, tokens, channels]`.
    pub fn to_map(&self) -> Tensor<B, 4> {
        match self {
            Self::Tokens(tensor) => (*tensor).clone().unsqueeze_dim(1),
            Self::Map(tensor) => (*tensor).clone(),
        }
    }
}

/// Receives the output of every submodule as it completes.
pub trait LayerHook<B: Backend> {
    /// Called once per completed module with its class name.
    fn on_output(&mut self, class: &'static str, output: LayerOutput<'_, B>);
}

/// Hook that ignores every output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHook;

impl<B: Backend> LayerHook<B> for NoHook {
    fn on_output(&mut self, _class: &'static str, _output: LayerOutput<'_, B>) {}
}

/// Tensors that can be reported to a [`LayerHook`].
pub trait Observable<B: Backend> {
    fn observe(&self) -> LayerOutput<'_, B>;
}

impl<B: Backend> Observable<B> for Tensor<B, 3> {
    fn observe(&self) -> LayerOutput<'_, B> {
        LayerOutput::Tokens(self)
    }
}

impl<B: Backend> Observable<B> for Tensor<B, 4> {
    fn observe(&self) -> LayerOutput<'_, B> {
        LayerOutput::Map(self)
    }
}

/// Reports `output` to `hook` under `class` and hands it back.
pub fn emit<B: Backend, T: Observable<B>>(
    hook: &mut dyn LayerHook<B>,
    class: &'static str,
    output: T,
) -> T {
    hook.on_output(class, output.observe());
    output
}

/// Static list of hook events a module emits during one forward pass.
///
/// Implementations append class names in the same order `forward_hooked`
/// reports them, so callers can resolve tap positions without running the model.
pub trait ModuleTrace {
    fn trace(&self, out: &mut Vec<&'static str>);

    /// Convenience wrapper returning a fresh trace.
    fn module_trace(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        self.trace(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[derive(Default)]
    struct Collect {
        events: Vec<(&'static str, Vec<usize>)>,
    }

    impl LayerHook<TestBackend> for Collect {
        fn on_output(&mut self, class: &'static str, output: LayerOutput<'_, TestBackend>) {
            self.events.push((class, output.dims()));
        }
    }

    #[test]
    fn emit_reports_class_and_shape_in_order() {
        let device = Default::default();
        let mut hook = Collect::default();

        let tokens = Tensor::<TestBackend, 3>::zeros([2, 5, 4], &device);
        let map = Tensor::<TestBackend, 4>::zeros([2, 4, 3, 3], &device);
        let tokens = emit(&mut hook, "Linear", tokens);
        let _ = emit(&mut hook, "Conv2d", map);

        assert_eq!(tokens.dims(), [2, 5, 4]);
        assert_eq!(
            hook.events,
            vec![("Linear", vec![2, 5, 4]), ("Conv2d", vec![2, 4, 3, 3])]
        );
    }

    #[test]
    fn token_outputs_become_rank_four_with_unit_axis() {
        let device = Default::default();
        let tokens = Tensor::<TestBackend, 3>::ones([2, 6, 8], &device);

        let map = tokens.observe().to_map();

        assert_eq!(map.dims(), [2, 1, 6, 8]);
    }
}
