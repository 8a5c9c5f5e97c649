//! Worker-owned inference session: `{Absent, Ready(model)}`.
//!
//! This is the single boundary where backend code runs. Errors, panics and
//! non-finite output are caught here and converted into passthrough, so
//! nothing from the backend reaches the real-time thread.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use super::InferenceModel;

/// Why a cycle passed its input through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    /// No model has been loaded yet.
    NoModel,
    /// The model returned an error, panicked, or produced non-finite samples.
    InferenceFailed,
}

/// Result of one [`InferenceSession::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Inferred,
    Passthrough(PassthroughReason),
}

/// The worker's view of the loaded model.
#[derive(Default)]
pub enum InferenceSession {
    #[default]
    Absent,
    Ready(Box<dyn InferenceModel>),
}

impl InferenceSession {
    pub fn is_ready(&self) -> bool {
        matches!(self, InferenceSession::Ready(_))
    }

    pub fn model_name(&self) -> Option<&str> {
        match self {
            InferenceSession::Absent => None,
            InferenceSession::Ready(model) => Some(model.name()),
        }
    }

    /// Replace the current model, returning the previous one (if any).
    pub fn install(&mut self, model: Box<dyn InferenceModel>) -> Option<Box<dyn InferenceModel>> {
        match std::mem::replace(self, InferenceSession::Ready(model)) {
            InferenceSession::Absent => None,
            InferenceSession::Ready(previous) => Some(previous),
        }
    }

    /// Fill `output` from `input`, by inference when possible.
    ///
    /// `output` always ends up with `input.len()` valid samples: model output on
    /// success, a copy of `input` otherwise.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> SessionOutcome {
        debug_assert_eq!(input.len(), output.len());

        let model = match self {
            InferenceSession::Absent => {
                output.copy_from_slice(input);
                return SessionOutcome::Passthrough(PassthroughReason::NoModel);
            }
            InferenceSession::Ready(model) => model,
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| model.process(input, output)));
        let failure = match result {
            Ok(Ok(())) if output.iter().all(|s| s.is_finite()) => None,
            Ok(Ok(())) => Some("model produced non-finite samples".to_string()),
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(format!("model panicked: {}", panic_message(payload.as_ref()))),
        };

        match failure {
            None => SessionOutcome::Inferred,
            Some(reason) => {
                warn!(
                    model = model.name(),
                    samples = input.len(),
                    error = %reason,
                    "inference failed, passing block through"
                );
                output.copy_from_slice(input);
                SessionOutcome::Passthrough(PassthroughReason::InferenceFailed)
            }
        }
    }
}

impl fmt::Debug for InferenceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceSession::Absent => f.write_str("InferenceSession::Absent"),
            InferenceSession::Ready(model) => f
                .debug_tuple("InferenceSession::Ready")
                .field(&model.name())
                .finish(),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
