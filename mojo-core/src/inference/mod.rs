//! Inference backend abstraction.
//!
//! The `InferenceModel` trait decouples the worker from any specific backend
//! (identity stub, ONNX Runtime, …). A model is "given N floats, produce N
//! floats, or fail"; the session layer turns every failure into passthrough.
//!
//! `&mut self` on `process` expresses that backends may be stateful (recurrent
//! state, scratch tensors). Once loaded, a model is owned by the worker thread
//! alone, so no lock guards it.

pub mod session;
pub mod stub;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::{OnnxLoader, OnnxModel};

pub use session::{InferenceSession, PassthroughReason, SessionOutcome};
pub use stub::{PassthroughLoader, StubModel};

use std::path::Path;

use crate::error::Result;

/// Contract for inference backends.
pub trait InferenceModel: Send + 'static {
    /// Short human-readable identifier used in logs and status events.
    fn name(&self) -> &str;

    /// One-time warm-up after construction (pre-allocate, dummy forward pass).
    ///
    /// Runs on the loading thread, before the model is handed to the worker.
    ///
    /// # Errors
    /// Returns an error if the model cannot run at all.
    fn warm_up(&mut self) -> Result<()>;

    /// Transform `input` into `output`. Both slices have the same length,
    /// which varies from call to call.
    ///
    /// # Errors
    /// Any backend fault. The caller falls back to passthrough.
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()>;

    /// Clear internal state.
    fn reset(&mut self);
}

/// Builds models from an opaque source location.
///
/// Called from non-real-time threads only.
pub trait ModelLoader: Send + Sync + 'static {
    /// # Errors
    /// `MojoError::ModelNotFound` for a missing source, `MojoError::ModelLoad`
    /// (or a backend-specific variant) when the source is rejected.
    fn load(&self, source: &Path) -> Result<Box<dyn InferenceModel>>;
}

impl<F> ModelLoader for F
where
    F: Fn(&Path) -> Result<Box<dyn InferenceModel>> + Send + Sync + 'static,
{
    fn load(&self, source: &Path) -> Result<Box<dyn InferenceModel>> {
        self(source)
    }
}
