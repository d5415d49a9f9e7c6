//! Additional operations for the Burn deep learning framework
//!
//! This crate provides pieces that are commonly needed around pretrained
//! encoders but are not available in the core Burn framework: forward hooks
//! for observing intermediate outputs, an identity module that still takes
//! part in traced forward passes, and axis-wise L2 normalization.

pub mod hook;
mod identity;
mod normalize;

// Convenient re-exports
pub use hook::{emit, LayerHook, LayerOutput, ModuleTrace, NoHook, Observable};
pub use identity::Identity;
pub use normalize::l2_normalize;
