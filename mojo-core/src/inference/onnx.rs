//! ONNX Runtime backend via the `ort` crate.
//!
//! Expects a single-input, single-output graph:
//! - `input`: `f32 [1, N]`
//! - `output`: `f32 [1, N]`
//!
//! `N` is whatever the worker drained this cycle, so the graph must accept a
//! dynamic second axis. Sessions run with one intra-op thread: the worker is
//! already a dedicated background thread and extra ORT threads only add jitter.

use std::path::{Path, PathBuf};

use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::TensorRef;
use tracing::info;

use crate::{
    error::{MojoError, Result},
    inference::{InferenceModel, ModelLoader},
};

const INPUT_NAME: &str = "input";
const OUTPUT_NAME: &str = "output";
const WARM_UP_SAMPLES: usize = 512;

fn create_session(model_path: &Path) -> Result<Session> {
    SessionBuilder::new()
        .map_err(|e| MojoError::OnnxSession(e.to_string()))?
        .with_intra_threads(1)
        .map_err(|e| MojoError::OnnxSession(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::All)
        .map_err(|e| MojoError::OnnxSession(e.to_string()))?
        .commit_from_file(model_path)
        .map_err(|e| MojoError::OnnxSession(e.to_string()))
}

/// A loaded ONNX graph.
pub struct OnnxModel {
    path: PathBuf,
    name: String,
    session: Session,
}

impl OnnxModel {
    /// Build a session from `path`.
    ///
    /// # Errors
    /// `MojoError::ModelNotFound` if the file is missing, `MojoError::OnnxSession`
    /// if ONNX Runtime rejects it.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(MojoError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let size_mb = std::fs::metadata(path)
            .map(|m| m.len() as f64 / 1_048_576.0)
            .unwrap_or(0.0);
        info!("loading OnnxModel from {:?} ({:.2} MB)", path, size_mb);

        let session = create_session(path)?;
        info!("  inputs:");
        for input in session.inputs().iter() {
            info!("    {}", input.name());
        }
        info!("  outputs:");
        for output in session.outputs().iter() {
            info!("    {}", output.name());
        }

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("onnx")
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            name,
            session,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InferenceModel for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn warm_up(&mut self) -> Result<()> {
        let silence = vec![0.0f32; WARM_UP_SAMPLES];
        let mut scratch = vec![0.0f32; WARM_UP_SAMPLES];
        self.process(&silence, &mut scratch)?;
        info!(model = %self.name, "OnnxModel warm-up complete");
        Ok(())
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        let tensor = TensorRef::from_array_view(([1_i64, input.len() as i64], input))
            .map_err(|e| MojoError::OnnxSession(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![INPUT_NAME => tensor])
            .map_err(|e| MojoError::OnnxSession(e.to_string()))?;

        let (_, data) = outputs[OUTPUT_NAME]
            .try_extract_tensor::<f32>()
            .map_err(|e| MojoError::OnnxSession(e.to_string()))?;

        if data.len() != output.len() {
            return Err(MojoError::Inference(format!(
                "model returned {} samples for {} inputs",
                data.len(),
                output.len()
            )));
        }
        output.copy_from_slice(data);
        Ok(())
    }

    fn reset(&mut self) {}
}

/// Loads `.onnx` files as [`OnnxModel`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxLoader;

impl ModelLoader for OnnxLoader {
    fn load(&self, source: &Path) -> Result<Box<dyn InferenceModel>> {
        Ok(Box::new(OnnxModel::open(source)?))
    }
}
