//! `StubModel`: identity backend used when no inference runtime is compiled in.
//!
//! `PassthroughLoader` accepts any existing regular file as a "model" and
//! yields a `StubModel`, so the load → ready → process path can be exercised
//! end-to-end without a real backend.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{MojoError, Result};
use crate::inference::{InferenceModel, ModelLoader};

/// Copies input to output.
#[derive(Debug, Clone)]
pub struct StubModel {
    name: String,
    blocks_processed: u64,
}

impl StubModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks_processed: 0,
        }
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }
}

impl Default for StubModel {
    fn default() -> Self {
        Self::new("stub")
    }
}

impl InferenceModel for StubModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn warm_up(&mut self) -> Result<()> {
        debug!("StubModel::warm_up is a no-op");
        Ok(())
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        output.copy_from_slice(input);
        self.blocks_processed += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.blocks_processed = 0;
    }
}

/// Validates that the model source is a readable file and loads a `StubModel`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughLoader;

impl ModelLoader for PassthroughLoader {
    fn load(&self, source: &Path) -> Result<Box<dyn InferenceModel>> {
        if !source.is_file() {
            return Err(MojoError::ModelNotFound {
                path: source.to_path_buf(),
            });
        }
        // Surface unreadable files as load failures rather than later faults.
        std::fs::File::open(source)?;

        let name = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("stub")
            .to_string();
        info!(path = ?source, name = %name, "no inference backend compiled in, loading identity stub");
        Ok(Box::new(StubModel::new(name)))
    }
}
