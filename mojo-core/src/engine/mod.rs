//! `InferenceEngine`: facade over the input ring, wake signal and worker.
//!
//! ## Lifecycle
//!
//! ```text
//! InferenceEngine::new()      → worker spawned, status = Passthrough
//!     └─► attach_output()     → worker starts writing results
//!         └─► load_model()    → status = Loading → Ready (or back on failure)
//!             └─► drop        → shutdown flag + wake, bounded join, status = Stopped
//! ```
//!
//! ## Threading
//!
//! `submit_input` is the only call made from the real-time thread. It takes
//! `&mut self` because it writes through the input ring's producer half; every
//! other operation is available on the cloneable [`EngineController`] so a
//! non-real-time thread can load models while the audio thread owns the engine.

pub mod wake;
pub mod worker;

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::{
    buffering::{sample_ring, SampleProducer, INPUT_RING_CAPACITY, OUTPUT_RING_CAPACITY},
    error::{MojoError, Result},
    inference::{session::panic_message, InferenceModel, ModelLoader},
    ipc::events::{EngineStatus, EngineStatusEvent},
};

use wake::WakeSignal;
use worker::{DiagnosticsSnapshot, Worker, WorkerContext, WorkerDiagnostics};

/// Broadcast channel capacity for status events buffered for slow consumers.
const BROADCAST_CAP: usize = 64;

/// Configuration for `InferenceEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EngineConfig {
    /// Input ring capacity in samples. Default: 4096.
    pub input_capacity: usize,
    /// Output ring capacity in samples, used by hosts that build the output
    /// ring from this config. Default: 512.
    pub output_capacity: usize,
    /// Worker wait timeout; bounds shutdown latency. Default: 100 ms.
    pub wait_timeout_ms: u64,
    /// How long teardown waits for the worker before giving up. Default: 2000 ms.
    pub shutdown_timeout_ms: u64,
    /// OS thread name for the worker.
    pub worker_thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_capacity: INPUT_RING_CAPACITY,
            output_capacity: OUTPUT_RING_CAPACITY,
            wait_timeout_ms: 100,
            shutdown_timeout_ms: 2_000,
            worker_thread_name: "InferenceEngine".into(),
        }
    }
}

impl EngineConfig {
    /// Clamp every field into its supported range.
    pub fn normalize(&mut self) {
        self.input_capacity = self.input_capacity.clamp(64, 1 << 20);
        self.output_capacity = self.output_capacity.clamp(64, 1 << 20);
        self.wait_timeout_ms = self.wait_timeout_ms.clamp(1, 1_000);
        self.shutdown_timeout_ms = self.shutdown_timeout_ms.clamp(10, 30_000);
        let name = self.worker_thread_name.trim();
        self.worker_thread_name = if name.is_empty() {
            "InferenceEngine".into()
        } else {
            name.into()
        };
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

struct ControllerInner {
    loader: Box<dyn ModelLoader>,
    models_tx: Sender<Box<dyn InferenceModel>>,
    outputs_tx: Sender<SampleProducer>,
    wake: Arc<WakeSignal>,
    /// Published only after a fully warmed-up model has been handed to the worker.
    ready: AtomicBool,
    /// Serialises concurrent `load_model` calls.
    load_lock: Mutex<()>,
    status: Mutex<EngineStatus>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    diagnostics: Arc<WorkerDiagnostics>,
}

/// Cloneable handle for non-real-time threads.
///
/// `EngineController` is `Send + Sync`; it stays valid after the engine is
/// dropped (loads then fail because the worker is gone).
#[derive(Clone)]
pub struct EngineController {
    inner: Arc<ControllerInner>,
}

impl EngineController {
    /// Load and warm up a model, then hand it to the worker.
    ///
    /// Must not be called from the real-time thread. Concurrent calls are
    /// serialised. On failure any previously loaded model stays active and
    /// the engine otherwise keeps running in passthrough.
    ///
    /// # Errors
    /// Whatever the loader or the model's warm-up reports; loader panics are
    /// reported as `MojoError::ModelLoad`.
    pub fn load_model(&self, source: impl AsRef<Path>) -> Result<()> {
        let source = source.as_ref();
        let _guard = self.inner.load_lock.lock();
        let previous = self.status();

        self.set_status(EngineStatus::Loading, Some(source.display().to_string()));
        info!(path = ?source, "loading model");

        match self.build_model(source).and_then(|model| self.hand_off(model)) {
            Ok(name) => {
                self.inner.ready.store(true, Ordering::Release);
                self.set_status(EngineStatus::Ready, Some(name.clone()));
                info!(path = ?source, model = %name, "model ready");
                Ok(())
            }
            Err(e) => {
                error!(path = ?source, error = %e, "model load failed");
                // A restored Ready carries no detail so it never reads as a
                // successful load of the failed source.
                let detail = (!previous.is_ready()).then(|| e.to_string());
                self.set_status(previous, detail);
                Err(e)
            }
        }
    }

    /// `true` once a model has been loaded successfully.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Hand the output ring's producer half to the worker.
    ///
    /// Call during setup, before relying on results. A later call replaces the
    /// previous destination.
    pub fn attach_output(&self, producer: SampleProducer) {
        if self.inner.outputs_tx.send(producer).is_err() {
            error!("attach_output after the inference worker stopped");
            return;
        }
        self.inner.wake.signal();
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.inner.status.lock()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.inner.status_tx.subscribe()
    }

    /// Snapshot of worker and ring counters.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.inner.diagnostics.snapshot()
    }

    /// Zero every counter, e.g. between renders.
    pub fn reset_diagnostics(&self) {
        self.inner.diagnostics.reset();
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn build_model(&self, source: &Path) -> Result<Box<dyn InferenceModel>> {
        let loader = &self.inner.loader;
        panic::catch_unwind(AssertUnwindSafe(|| {
            let mut model = loader.load(source)?;
            model.warm_up()?;
            Ok(model)
        }))
        .unwrap_or_else(|payload| {
            Err(MojoError::ModelLoad(format!(
                "loader panicked: {}",
                panic_message(payload.as_ref())
            )))
        })
    }

    fn hand_off(&self, model: Box<dyn InferenceModel>) -> Result<String> {
        let name = model.name().to_string();
        self.inner
            .models_tx
            .send(model)
            .map_err(|_| MojoError::ModelLoad("inference worker has stopped".into()))?;
        self.inner.wake.signal();
        Ok(name)
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.inner.status.lock() = new_status;
        let _ = self.inner.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl std::fmt::Debug for EngineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineController")
            .field("status", &self.status())
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

/// The real-time side of the bridge plus ownership of the worker thread.
pub struct InferenceEngine {
    input: SampleProducer,
    wake: Arc<WakeSignal>,
    shutdown: Arc<AtomicBool>,
    controller: EngineController,
    diagnostics: Arc<WorkerDiagnostics>,
    worker: Option<JoinHandle<()>>,
    exited_rx: Receiver<()>,
    shutdown_timeout: Duration,
}

impl InferenceEngine {
    /// Build the input ring and start the worker in passthrough mode.
    ///
    /// # Errors
    /// `MojoError::InvalidCapacity` for a zero input capacity,
    /// `MojoError::WorkerSpawn` if the OS refuses the thread.
    pub fn new<L: ModelLoader>(config: EngineConfig, loader: L) -> Result<Self> {
        let (input, consumer) = sample_ring(config.input_capacity)?;
        let wake = Arc::new(WakeSignal::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let diagnostics = Arc::new(WorkerDiagnostics::default());
        let (models_tx, models_rx) = unbounded();
        let (outputs_tx, outputs_rx) = unbounded();
        let (exited_tx, exited_rx) = crossbeam_channel::bounded::<()>(1);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        let worker = Worker::new(WorkerContext {
            input: consumer,
            wake: Arc::clone(&wake),
            shutdown: Arc::clone(&shutdown),
            models: models_rx,
            outputs: outputs_rx,
            wait_timeout: config.wait_timeout(),
            diagnostics: Arc::clone(&diagnostics),
        });

        let handle = thread::Builder::new()
            .name(config.worker_thread_name.clone())
            .spawn(move || {
                worker::run(worker);
                let _ = exited_tx.send(());
            })
            .map_err(|e| MojoError::WorkerSpawn(e.to_string()))?;

        info!(
            input_capacity = config.input_capacity,
            wait_timeout_ms = config.wait_timeout_ms,
            "inference engine started, passthrough until a model loads"
        );

        let controller = EngineController {
            inner: Arc::new(ControllerInner {
                loader: Box::new(loader),
                models_tx,
                outputs_tx,
                wake: Arc::clone(&wake),
                ready: AtomicBool::new(false),
                load_lock: Mutex::new(()),
                status: Mutex::new(EngineStatus::Passthrough),
                status_tx,
                diagnostics: Arc::clone(&diagnostics),
            }),
        };

        Ok(Self {
            input,
            wake,
            shutdown,
            controller,
            diagnostics,
            worker: Some(handle),
            exited_rx,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// Start with the loader matching the compiled-in backend.
    #[cfg(feature = "onnx")]
    pub fn with_default_loader(config: EngineConfig) -> Result<Self> {
        Self::new(config, crate::inference::OnnxLoader)
    }

    /// Start with the loader matching the compiled-in backend.
    #[cfg(not(feature = "onnx"))]
    pub fn with_default_loader(config: EngineConfig) -> Result<Self> {
        Self::new(config, crate::inference::PassthroughLoader)
    }

    /// Queue samples for the worker and wake it. Real-time safe.
    ///
    /// Returns how many samples were accepted; the rest are dropped and counted
    /// in `input_dropped`.
    pub fn submit_input(&mut self, samples: &[f32]) -> usize {
        let written = self.input.write(samples);
        let dropped = samples.len() - written;
        if dropped > 0 {
            self.diagnostics
                .input_dropped
                .fetch_add(dropped, Ordering::Relaxed);
        }
        if written > 0 {
            self.wake.signal();
        }
        written
    }

    /// Free slots in the input ring.
    pub fn input_free_space(&self) -> usize {
        self.input.free_space()
    }

    pub fn load_model(&self, source: impl AsRef<Path>) -> Result<()> {
        self.controller.load_model(source)
    }

    pub fn is_ready(&self) -> bool {
        self.controller.is_ready()
    }

    pub fn attach_output(&self, producer: SampleProducer) {
        self.controller.attach_output(producer);
    }

    pub fn status(&self) -> EngineStatus {
        self.controller.status()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.controller.diagnostics()
    }

    /// A handle for non-real-time threads.
    pub fn controller(&self) -> EngineController {
        self.controller.clone()
    }
}

impl Drop for InferenceEngine {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.signal();

        match self.exited_rx.recv_timeout(self.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.worker.take() {
                    if handle.join().is_err() {
                        error!("inference worker panicked");
                    }
                }
                info!("inference engine stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                // Dropping the JoinHandle detaches the stuck thread.
                error!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "inference worker did not exit within the shutdown timeout, detaching it"
                );
            }
        }

        self.controller.set_status(EngineStatus::Stopped, None);
    }
}
