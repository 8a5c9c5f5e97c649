//! # mojo-core
//!
//! Real-time audio to inference bridge.
//!
//! ## Architecture
//!
//! ```text
//! audio callback ─► submit_input ─► SPSC input ring ─► Worker (own thread)
//!       ▲                │                                  │
//!       │            WakeSignal ────── wakes ──────────────►│
//!       │                                          InferenceSession
//!       │                                       (model or passthrough)
//!       │                                                   │
//!       └─────────────── SPSC output ring ◄─────────────────┘
//! ```
//!
//! The audio side never allocates, locks or blocks: it performs one bounded
//! ring write, one bounded ring read and a non-blocking wake. Model loading,
//! inference and logging all happen off the real-time thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod inference;
pub mod ipc;

// Convenience re-exports for downstream crates
pub use audio::{EffectParams, EffectProcessor, GainSettings};
pub use buffering::{sample_ring, SampleConsumer, SampleProducer};
pub use engine::{
    worker::DiagnosticsSnapshot, EngineConfig, EngineController, InferenceEngine,
};
pub use error::{MojoError, Result};
pub use inference::{InferenceModel, ModelLoader, PassthroughLoader, StubModel};
pub use ipc::events::{EngineStatus, EngineStatusEvent};

#[cfg(feature = "onnx")]
pub use inference::{OnnxLoader, OnnxModel};
