//! Background inference worker.
//!
//! ## Cycle
//!
//! ```text
//! WaitingForWork ── wake / timeout ──► Draining ──► Processing   ──┐
//!       ▲                                   └─────► Passthrough  ──┤
//!       └──────────── write results to output ring (drop excess) ◄─┘
//!
//! Stopping: shutdown flag seen at the top of a cycle or right after waking.
//! ```
//!
//! 1. Check shutdown; wait on the wake signal with a timeout; check shutdown.
//! 2. Adopt a newly attached output producer and any newly loaded model.
//! 3. Nothing queued → `Idle`. No output attached → `Detached` (input stays queued).
//! 4. Drain *all* ready input into preallocated scratch.
//! 5. Adopt a model loaded during the drain, then run the session (or pass through).
//! 6. Write as much as fits into the output ring; count the rest as dropped.
//!
//! The wait timeout bounds how stale a shutdown request can be and doubles as
//! a liveness tick when no wake arrives.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::Receiver;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    buffering::{SampleConsumer, SampleProducer},
    engine::wake::WakeSignal,
    inference::{InferenceModel, InferenceSession, PassthroughReason, SessionOutcome},
};

#[derive(Default)]
pub struct WorkerDiagnostics {
    pub cycles: AtomicUsize,
    pub wait_timeouts: AtomicUsize,
    pub idle_cycles: AtomicUsize,
    pub detached_cycles: AtomicUsize,
    pub samples_in: AtomicUsize,
    pub samples_out: AtomicUsize,
    pub input_dropped: AtomicUsize,
    pub output_dropped: AtomicUsize,
    pub inference_calls: AtomicUsize,
    pub inference_errors: AtomicUsize,
    pub passthrough_blocks: AtomicUsize,
}

impl WorkerDiagnostics {
    pub fn reset(&self) {
        self.cycles.store(0, Ordering::Relaxed);
        self.wait_timeouts.store(0, Ordering::Relaxed);
        self.idle_cycles.store(0, Ordering::Relaxed);
        self.detached_cycles.store(0, Ordering::Relaxed);
        self.samples_in.store(0, Ordering::Relaxed);
        self.samples_out.store(0, Ordering::Relaxed);
        self.input_dropped.store(0, Ordering::Relaxed);
        self.output_dropped.store(0, Ordering::Relaxed);
        self.inference_calls.store(0, Ordering::Relaxed);
        self.inference_errors.store(0, Ordering::Relaxed);
        self.passthrough_blocks.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            idle_cycles: self.idle_cycles.load(Ordering::Relaxed),
            detached_cycles: self.detached_cycles.load(Ordering::Relaxed),
            samples_in: self.samples_in.load(Ordering::Relaxed),
            samples_out: self.samples_out.load(Ordering::Relaxed),
            input_dropped: self.input_dropped.load(Ordering::Relaxed),
            output_dropped: self.output_dropped.load(Ordering::Relaxed),
            inference_calls: self.inference_calls.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            passthrough_blocks: self.passthrough_blocks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub cycles: usize,
    pub wait_timeouts: usize,
    pub idle_cycles: usize,
    pub detached_cycles: usize,
    pub samples_in: usize,
    pub samples_out: usize,
    pub input_dropped: usize,
    pub output_dropped: usize,
    pub inference_calls: usize,
    pub inference_errors: usize,
    pub passthrough_blocks: usize,
}

/// Everything the worker needs, passed as one struct so the spawn closure stays tidy.
pub struct WorkerContext {
    pub input: SampleConsumer,
    pub wake: Arc<WakeSignal>,
    pub shutdown: Arc<AtomicBool>,
    /// Freshly loaded models, installed between cycles.
    pub models: Receiver<Box<dyn InferenceModel>>,
    /// Output ring producers handed over by `attach_output`.
    pub outputs: Receiver<SampleProducer>,
    pub wait_timeout: Duration,
    pub diagnostics: Arc<WorkerDiagnostics>,
}

/// What a single cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Shutdown was requested; the loop must exit.
    Stopping,
    /// Nothing was queued. `woken` is false when the wait timed out.
    Idle { woken: bool },
    /// Input is queued but no output ring is attached yet.
    Detached { pending: usize },
    /// A block was drained, processed and written back.
    Processed {
        drained: usize,
        written: usize,
        outcome: SessionOutcome,
    },
}

pub struct Worker {
    ctx: WorkerContext,
    session: InferenceSession,
    output: Option<SampleProducer>,
    scratch_in: Vec<f32>,
    scratch_out: Vec<f32>,
}

impl Worker {
    pub fn new(ctx: WorkerContext) -> Self {
        let capacity = ctx.input.capacity();
        Self {
            ctx,
            session: InferenceSession::Absent,
            output: None,
            scratch_in: vec![0.0; capacity],
            scratch_out: vec![0.0; capacity],
        }
    }

    pub fn session(&self) -> &InferenceSession {
        &self.session
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Run one wait → drain → process → write cycle.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        if self.stop_requested() {
            return CycleOutcome::Stopping;
        }

        let woken = self.ctx.wake.wait(self.ctx.wait_timeout);
        if self.stop_requested() {
            return CycleOutcome::Stopping;
        }

        let diagnostics = Arc::clone(&self.ctx.diagnostics);
        diagnostics.cycles.fetch_add(1, Ordering::Relaxed);
        if !woken {
            diagnostics.wait_timeouts.fetch_add(1, Ordering::Relaxed);
        }

        self.adopt_output();
        // Install loads every cycle so replaced models are released even
        // while no audio flows.
        adopt_models(&self.ctx.models, &mut self.session);

        let available = self.ctx.input.ready_samples();
        if available == 0 {
            diagnostics.idle_cycles.fetch_add(1, Ordering::Relaxed);
            return CycleOutcome::Idle { woken };
        }
        let Some(output) = self.output.as_mut() else {
            diagnostics.detached_cycles.fetch_add(1, Ordering::Relaxed);
            return CycleOutcome::Detached { pending: available };
        };

        // ── Drain ────────────────────────────────────────────────────────
        let drained = self.ctx.input.read(&mut self.scratch_in[..available]);
        diagnostics.samples_in.fetch_add(drained, Ordering::Relaxed);

        // ── Process ──────────────────────────────────────────────────────
        // Adopt again after draining so a load that completed before the
        // drained samples were submitted always applies to them.
        adopt_models(&self.ctx.models, &mut self.session);

        let input = &self.scratch_in[..drained];
        let results = &mut self.scratch_out[..drained];
        let outcome = self.session.process(input, results);
        match outcome {
            SessionOutcome::Inferred => {
                diagnostics.inference_calls.fetch_add(1, Ordering::Relaxed);
            }
            SessionOutcome::Passthrough(reason) => {
                if reason == PassthroughReason::InferenceFailed {
                    diagnostics.inference_calls.fetch_add(1, Ordering::Relaxed);
                    diagnostics.inference_errors.fetch_add(1, Ordering::Relaxed);
                }
                diagnostics.passthrough_blocks.fetch_add(1, Ordering::Relaxed);
            }
        }

        // ── Write back ───────────────────────────────────────────────────
        let written = output.write(results);
        diagnostics.samples_out.fetch_add(written, Ordering::Relaxed);
        if written < drained {
            diagnostics
                .output_dropped
                .fetch_add(drained - written, Ordering::Relaxed);
            debug!(
                drained,
                written,
                dropped = drained - written,
                "output ring full, dropping excess results"
            );
        }

        CycleOutcome::Processed {
            drained,
            written,
            outcome,
        }
    }

    fn stop_requested(&self) -> bool {
        self.ctx.shutdown.load(Ordering::Acquire)
    }

    fn adopt_output(&mut self) {
        // Keep only the most recent attachment.
        if let Some(producer) = self.ctx.outputs.try_iter().last() {
            info!(capacity = producer.capacity(), "output ring attached");
            self.output = Some(producer);
        }
    }
}

fn adopt_models(models: &Receiver<Box<dyn InferenceModel>>, session: &mut InferenceSession) {
    for mut model in models.try_iter() {
        // Warm-up passes may leave recurrent state behind.
        model.reset();
        let name = model.name().to_string();
        if let Some(previous) = session.install(model) {
            info!(previous = previous.name(), model = %name, "model replaced");
        } else {
            info!(model = %name, "model installed, leaving passthrough");
        }
    }
}

/// Run cycles until shutdown is requested.
pub fn run(mut worker: Worker) {
    info!("inference worker started");

    while worker.run_cycle() != CycleOutcome::Stopping {}

    let snap = worker.ctx.diagnostics.snapshot();
    info!(
        cycles = snap.cycles,
        wait_timeouts = snap.wait_timeouts,
        samples_in = snap.samples_in,
        samples_out = snap.samples_out,
        input_dropped = snap.input_dropped,
        output_dropped = snap.output_dropped,
        inference_calls = snap.inference_calls,
        inference_errors = snap.inference_errors,
        passthrough_blocks = snap.passthrough_blocks,
        "inference worker stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbeam_channel::{unbounded, Sender};

    use crate::buffering::sample_ring;
    use crate::error::{MojoError, Result};

    struct NegateModel;

    impl InferenceModel for NegateModel {
        fn name(&self) -> &str {
            "negate"
        }
        fn warm_up(&mut self) -> Result<()> {
            Ok(())
        }
        fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
            for (o, i) in output.iter_mut().zip(input) {
                *o = -i;
            }
            Ok(())
        }
        fn reset(&mut self) {}
    }

    /// Fails whenever the block starts with a sentinel value.
    struct SentinelFailModel;

    impl InferenceModel for SentinelFailModel {
        fn name(&self) -> &str {
            "sentinel"
        }
        fn warm_up(&mut self) -> Result<()> {
            Ok(())
        }
        fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
            if input.first() == Some(&13.0) {
                return Err(MojoError::Inference("sentinel block".into()));
            }
            output.fill(0.5);
            Ok(())
        }
        fn reset(&mut self) {}
    }

    /// Counts how many instances have been dropped.
    struct CountedModel {
        drops: Arc<AtomicUsize>,
    }

    impl InferenceModel for CountedModel {
        fn name(&self) -> &str {
            "counted"
        }
        fn warm_up(&mut self) -> Result<()> {
            Ok(())
        }
        fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
            output.copy_from_slice(input);
            Ok(())
        }
        fn reset(&mut self) {}
    }

    impl Drop for CountedModel {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        worker: Worker,
        input: SampleProducer,
        wake: Arc<WakeSignal>,
        shutdown: Arc<AtomicBool>,
        models: Sender<Box<dyn InferenceModel>>,
        outputs: Sender<SampleProducer>,
        diagnostics: Arc<WorkerDiagnostics>,
    }

    fn harness(input_capacity: usize) -> Harness {
        harness_with_timeout(input_capacity, Duration::from_millis(20))
    }

    fn harness_with_timeout(input_capacity: usize, wait_timeout: Duration) -> Harness {
        let (input, consumer) = sample_ring(input_capacity).expect("input ring");
        let wake = Arc::new(WakeSignal::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let (models_tx, models_rx) = unbounded();
        let (outputs_tx, outputs_rx) = unbounded();
        let diagnostics = Arc::new(WorkerDiagnostics::default());

        let worker = Worker::new(WorkerContext {
            input: consumer,
            wake: Arc::clone(&wake),
            shutdown: Arc::clone(&shutdown),
            models: models_rx,
            outputs: outputs_rx,
            wait_timeout,
            diagnostics: Arc::clone(&diagnostics),
        });

        Harness {
            worker,
            input,
            wake,
            shutdown,
            models: models_tx,
            outputs: outputs_tx,
            diagnostics,
        }
    }

    fn attach(h: &Harness, capacity: usize) -> SampleConsumer {
        let (producer, consumer) = sample_ring(capacity).expect("output ring");
        h.outputs.send(producer).expect("attach output");
        consumer
    }

    #[test]
    fn spurious_wake_writes_nothing() {
        let mut h = harness(64);
        let results = attach(&h, 64);

        h.wake.signal();
        assert_eq!(h.worker.run_cycle(), CycleOutcome::Idle { woken: true });
        assert_eq!(results.ready_samples(), 0);
        assert!(h.worker.has_output());
    }

    #[test]
    fn timeout_without_wake_is_an_idle_cycle() {
        let mut h = harness(64);
        assert_eq!(h.worker.run_cycle(), CycleOutcome::Idle { woken: false });
        assert_eq!(h.diagnostics.snapshot().wait_timeouts, 1);
    }

    #[test]
    fn detached_worker_leaves_input_queued() {
        let mut h = harness(64);
        h.input.write(&[1.0, 2.0, 3.0]);
        h.wake.signal();

        assert_eq!(
            h.worker.run_cycle(),
            CycleOutcome::Detached { pending: 3 }
        );

        let mut results = attach(&h, 64);
        h.wake.signal();
        assert!(matches!(
            h.worker.run_cycle(),
            CycleOutcome::Processed { drained: 3, written: 3, .. }
        ));
        let mut out = [0.0f32; 3];
        results.read(&mut out);
        assert_eq!(out, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn passthrough_without_model_drains_everything_ready() {
        let mut h = harness(256);
        let mut results = attach(&h, 256);

        h.input.write(&[0.1; 40]);
        h.input.write(&[0.2; 60]);
        h.wake.signal();

        assert_eq!(
            h.worker.run_cycle(),
            CycleOutcome::Processed {
                drained: 100,
                written: 100,
                outcome: SessionOutcome::Passthrough(PassthroughReason::NoModel),
            }
        );
        let mut out = vec![0.0f32; 100];
        assert_eq!(results.read(&mut out), 100);
        assert!(out[..40].iter().all(|s| *s == 0.1));
        assert!(out[40..].iter().all(|s| *s == 0.2));
    }

    #[test]
    fn loaded_model_is_adopted_on_the_next_cycle() {
        let mut h = harness(64);
        let mut results = attach(&h, 64);
        h.models.send(Box::new(NegateModel)).expect("send model");

        h.input.write(&[0.25, -0.5]);
        h.wake.signal();
        assert!(matches!(
            h.worker.run_cycle(),
            CycleOutcome::Processed {
                outcome: SessionOutcome::Inferred,
                ..
            }
        ));
        assert_eq!(h.worker.session().model_name(), Some("negate"));

        let mut out = [0.0f32; 2];
        results.read(&mut out);
        assert_eq!(out, [-0.25, 0.5]);
    }

    #[test]
    fn replaced_models_are_released_during_idle_cycles() {
        let mut h = harness(64);
        let _results = attach(&h, 64);
        let drops = Arc::new(AtomicUsize::new(0));
        let counted = || {
            Box::new(CountedModel {
                drops: Arc::clone(&drops),
            }) as Box<dyn InferenceModel>
        };

        for _ in 0..3 {
            h.models.send(counted()).expect("send model");
        }
        assert_eq!(h.worker.run_cycle(), CycleOutcome::Idle { woken: false });
        assert_eq!(drops.load(Ordering::SeqCst), 2);
        assert_eq!(h.worker.session().model_name(), Some("counted"));

        // Loads spread over idle cycles without an output attached.
        let mut h2 = harness(64);
        for expected in 0..4 {
            h2.models.send(counted()).expect("send model");
            assert_eq!(h2.worker.run_cycle(), CycleOutcome::Idle { woken: false });
            assert_eq!(drops.load(Ordering::SeqCst), 2 + expected);
        }

        drop(h);
        drop(h2);
        assert_eq!(drops.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn failed_inference_passes_that_block_through_exactly() {
        let mut h = harness(64);
        let mut results = attach(&h, 64);
        h.models.send(Box::new(SentinelFailModel)).expect("send model");

        h.input.write(&[13.0, 1.5, -2.5]);
        h.wake.signal();
        assert!(matches!(
            h.worker.run_cycle(),
            CycleOutcome::Processed {
                outcome: SessionOutcome::Passthrough(PassthroughReason::InferenceFailed),
                ..
            }
        ));
        let mut out = [0.0f32; 3];
        results.read(&mut out);
        assert_eq!(out, [13.0, 1.5, -2.5]);

        // The next block is inferred again.
        h.input.write(&[1.0, 1.0]);
        h.wake.signal();
        h.worker.run_cycle();
        let mut out = [0.0f32; 2];
        results.read(&mut out);
        assert_eq!(out, [0.5, 0.5]);

        let snap = h.diagnostics.snapshot();
        assert_eq!(snap.inference_calls, 2);
        assert_eq!(snap.inference_errors, 1);
    }

    #[test]
    fn output_overflow_drops_excess_results() {
        let mut h = harness(64);
        let mut results = attach(&h, 8);

        let block: Vec<f32> = (0..20).map(|i| i as f32).collect();
        h.input.write(&block);
        h.wake.signal();
        assert!(matches!(
            h.worker.run_cycle(),
            CycleOutcome::Processed { drained: 20, written: 8, .. }
        ));
        assert_eq!(h.diagnostics.snapshot().output_dropped, 12);

        let mut out = [0.0f32; 8];
        results.read(&mut out);
        assert_eq!(&out[..], &block[..8]);
    }

    #[test]
    fn shutdown_is_observed_before_and_after_waiting() {
        let mut h = harness(64);
        h.shutdown.store(true, Ordering::Release);
        assert_eq!(h.worker.run_cycle(), CycleOutcome::Stopping);

        let mut h = harness_with_timeout(64, Duration::from_secs(5));
        let _results = attach(&h, 64);
        h.input.write(&[1.0; 4]);
        let shutdown = Arc::clone(&h.shutdown);
        let wake = Arc::clone(&h.wake);
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            shutdown.store(true, Ordering::Release);
            wake.signal();
        });
        // Whether the flag lands before or during the wait, no work is done.
        assert_eq!(h.worker.run_cycle(), CycleOutcome::Stopping);
        stopper.join().expect("stopper panicked");
        assert_eq!(h.input.ready_samples(), 4);
    }

    #[test]
    fn run_exits_promptly_on_shutdown() {
        let h = harness(64);
        let shutdown = Arc::clone(&h.shutdown);
        let wake = Arc::clone(&h.wake);
        let worker = h.worker;

        let handle = std::thread::spawn(move || run(worker));
        std::thread::sleep(Duration::from_millis(30));
        let start = std::time::Instant::now();
        shutdown.store(true, Ordering::Release);
        wake.signal();
        handle.join().expect("worker panicked");
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
