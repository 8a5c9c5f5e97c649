//! Status events published by the engine.
//!
//! Hosts subscribe through `EngineController::subscribe_status` and forward
//! the events to whatever UI or log they own. Events are serialised with
//! camelCase fields and lowercase enum values.

use serde::{Deserialize, Serialize};

/// Emitted whenever the engine's readiness state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (model name, error message, …).
    pub detail: Option<String>,
}

/// Current state of the inference engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Worker running without a model: output equals input.
    Passthrough,
    /// A model load is in progress on a non-real-time thread.
    Loading,
    /// A model is loaded and owned by the worker.
    Ready,
    /// The worker has shut down.
    Stopped,
}

impl EngineStatus {
    pub fn is_ready(self) -> bool {
        self == EngineStatus::Ready
    }
}
