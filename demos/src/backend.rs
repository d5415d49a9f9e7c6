//! Backend chosen at compile time from the `cuda`, `wgpu` or default `ndarray` feature.

use burn::prelude::*;
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        pub type SelectedBackend = burn::backend::Cuda;
        pub const BACKEND_NAME: &str = "CUDA (NVIDIA GPU)";
    } else if #[cfg(feature = "wgpu")] {
        pub type SelectedBackend = burn::backend::Wgpu;
        pub const BACKEND_NAME: &str = "WGPU (GPU)";
    } else {
        pub type SelectedBackend = burn::backend::NdArray;
        pub const BACKEND_NAME: &str = "NdArray (CPU)";
    }
}

pub type SelectedDevice = Device<SelectedBackend>;

/// Default device of [`SelectedBackend`].
pub fn create_device() -> SelectedDevice {
    SelectedDevice::default()
}
