//! Real-time processing callback built on top of `InferenceEngine`.
//!
//! # Design constraints
//!
//! `EffectProcessor::process_block` runs on the host's audio thread. It
//! **must not** allocate, lock or perform I/O. All scratch space is sized in
//! `prepare`, and the only shared state it touches is the input ring, the
//! output ring and the gain atomics in [`EffectParams`].
//!
//! # Signal flow
//!
//! ```text
//! channels ─► input gain ─► submit(ch 0) ─► [worker]
//!                 │                             │
//!                 └──── dry ◄── not enough ─────┤
//!                              results yet      ▼
//!                                        output ring ─► fan-out ─► output gain
//! ```

use std::sync::{atomic::Ordering, Arc};

use atomic_float::AtomicF32;
use serde::{Deserialize, Serialize};

use crate::{
    buffering::{sample_ring, SampleConsumer},
    engine::InferenceEngine,
    error::Result,
};

/// Lowest gain the parameters accept, in dB.
pub const MIN_GAIN_DB: f32 = -60.0;
/// Highest gain the parameters accept, in dB.
pub const MAX_GAIN_DB: f32 = 12.0;
/// At or below this level a gain is treated as silence.
pub const SILENCE_DB: f32 = -100.0;

/// Convert decibels to a linear factor; `SILENCE_DB` and below map to 0.
#[inline]
pub fn decibels_to_gain(db: f32) -> f32 {
    if db <= SILENCE_DB {
        0.0
    } else {
        10.0_f32.powf(db * 0.05)
    }
}

/// Serializable snapshot of [`EffectParams`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct GainSettings {
    pub input_gain_db: f32,
    pub output_gain_db: f32,
}

impl Default for GainSettings {
    fn default() -> Self {
        Self {
            input_gain_db: 0.0,
            output_gain_db: 0.0,
        }
    }
}

/// Gain parameters shared between a control thread and the audio thread.
///
/// Values are stored in dB and clamped to `MIN_GAIN_DB..=MAX_GAIN_DB`.
#[derive(Debug)]
pub struct EffectParams {
    input_gain_db: AtomicF32,
    output_gain_db: AtomicF32,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self::from_settings(GainSettings::default())
    }
}

impl EffectParams {
    pub fn from_settings(settings: GainSettings) -> Self {
        let params = Self {
            input_gain_db: AtomicF32::new(0.0),
            output_gain_db: AtomicF32::new(0.0),
        };
        params.apply(settings);
        params
    }

    pub fn apply(&self, settings: GainSettings) {
        self.set_input_gain_db(settings.input_gain_db);
        self.set_output_gain_db(settings.output_gain_db);
    }

    pub fn settings(&self) -> GainSettings {
        GainSettings {
            input_gain_db: self.input_gain_db(),
            output_gain_db: self.output_gain_db(),
        }
    }

    pub fn set_input_gain_db(&self, db: f32) {
        self.input_gain_db.store(clamp_db(db), Ordering::Relaxed);
    }

    pub fn set_output_gain_db(&self, db: f32) {
        self.output_gain_db.store(clamp_db(db), Ordering::Relaxed);
    }

    pub fn input_gain_db(&self) -> f32 {
        self.input_gain_db.load(Ordering::Relaxed)
    }

    pub fn output_gain_db(&self) -> f32 {
        self.output_gain_db.load(Ordering::Relaxed)
    }
}

fn clamp_db(db: f32) -> f32 {
    if db.is_nan() {
        0.0
    } else {
        db.clamp(MIN_GAIN_DB, MAX_GAIN_DB)
    }
}

fn apply_gain(channels: &mut [&mut [f32]], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for channel in channels.iter_mut() {
        for sample in channel.iter_mut() {
            *sample *= gain;
        }
    }
}

/// Host-facing block processor: gain staging around the inference bridge.
pub struct EffectProcessor {
    engine: InferenceEngine,
    results: SampleConsumer,
    params: Arc<EffectParams>,
    scratch: Vec<f32>,
}

impl EffectProcessor {
    /// Build an output ring of `output_capacity` samples and attach it to
    /// `engine`.
    ///
    /// # Errors
    /// `MojoError::InvalidCapacity` for a zero capacity.
    pub fn new(
        engine: InferenceEngine,
        output_capacity: usize,
        params: Arc<EffectParams>,
    ) -> Result<Self> {
        let (producer, consumer) = sample_ring(output_capacity)?;
        engine.attach_output(producer);
        Ok(Self::with_results(engine, consumer, params))
    }

    /// Use an existing consumer as the result source. The caller is
    /// responsible for feeding its producer half.
    pub fn with_results(
        engine: InferenceEngine,
        results: SampleConsumer,
        params: Arc<EffectParams>,
    ) -> Self {
        Self {
            engine,
            results,
            params,
            scratch: Vec::new(),
        }
    }

    /// Preallocate scratch for blocks up to `max_block` samples. Not real-time safe.
    pub fn prepare(&mut self, max_block: usize) {
        self.scratch.clear();
        self.scratch.resize(max_block, 0.0);
    }

    /// Process one block in place. Channel 0 sets the block length; a shorter
    /// channel receives only the results that fit.
    ///
    /// Channel 0 (after input gain) is sent to the engine. When at least a
    /// full block of results is queued it replaces every channel; otherwise
    /// the dry signal is kept. Results are read in `prepare`-sized pieces, so
    /// without a prior `prepare` the output stays dry.
    pub fn process_block(&mut self, channels: &mut [&mut [f32]]) {
        let Some(block_len) = channels.first().map(|c| c.len()) else {
            return;
        };

        apply_gain(channels, decibels_to_gain(self.params.input_gain_db()));

        self.engine.submit_input(&*channels[0]);

        if !self.scratch.is_empty() && self.results.ready_samples() >= block_len {
            let mut offset = 0;
            while offset < block_len {
                let want = (block_len - offset).min(self.scratch.len());
                let got = self.results.read(&mut self.scratch[..want]);
                for channel in channels.iter_mut() {
                    // Shorter channels only take the part of the block they hold.
                    let end = (offset + got).min(channel.len());
                    if end > offset {
                        channel[offset..end].copy_from_slice(&self.scratch[..end - offset]);
                    }
                }
                offset += got;
                if got < want {
                    break;
                }
            }
        }

        apply_gain(channels, decibels_to_gain(self.params.output_gain_db()));
    }

    /// Discard queued results, e.g. after a transport jump.
    pub fn reset(&mut self) {
        let queued = self.results.ready_samples();
        self.results.discard(queued);
    }

    /// Results currently queued for the next blocks.
    pub fn queued_results(&self) -> usize {
        self.results.ready_samples()
    }

    pub fn params(&self) -> &Arc<EffectParams> {
        &self.params
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;

    use crate::{engine::EngineConfig, inference::PassthroughLoader};

    fn processor_with_manual_results() -> (EffectProcessor, crate::buffering::SampleProducer) {
        let engine =
            InferenceEngine::new(EngineConfig::default(), PassthroughLoader).expect("engine");
        let (producer, consumer) = sample_ring(256).expect("ring");
        let processor =
            EffectProcessor::with_results(engine, consumer, Arc::new(EffectParams::default()));
        (processor, producer)
    }

    #[test]
    fn decibel_conversion() {
        assert_abs_diff_eq!(decibels_to_gain(0.0), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(decibels_to_gain(-6.0), 0.501_187, epsilon = 1e-5);
        assert_abs_diff_eq!(decibels_to_gain(12.0), 3.981_072, epsilon = 1e-5);
        assert_eq!(decibels_to_gain(-100.0), 0.0);
        assert_eq!(decibels_to_gain(-140.0), 0.0);
    }

    #[test]
    fn params_clamp_to_supported_range() {
        let params = EffectParams::default();
        params.set_input_gain_db(40.0);
        params.set_output_gain_db(-200.0);
        assert_eq!(params.input_gain_db(), MAX_GAIN_DB);
        assert_eq!(params.output_gain_db(), MIN_GAIN_DB);

        params.set_input_gain_db(f32::NAN);
        assert_eq!(params.input_gain_db(), 0.0);
    }

    #[test]
    fn gain_settings_round_trip_through_params() {
        let settings = GainSettings {
            input_gain_db: -12.0,
            output_gain_db: 3.0,
        };
        let params = EffectParams::from_settings(settings);
        assert_eq!(params.settings(), settings);

        let json = serde_json::to_value(settings).expect("serialize gains");
        assert_eq!(json["inputGainDb"], -12.0);
    }

    #[test]
    fn dry_signal_kept_until_full_block_is_queued() {
        let (mut processor, mut producer) = processor_with_manual_results();
        processor.prepare(8);

        producer.write(&[9.0; 4]);

        let mut left = [0.5f32; 8];
        let mut right = [0.25f32; 8];
        processor.process_block(&mut [&mut left[..], &mut right[..]]);

        assert_eq!(left, [0.5; 8]);
        assert_eq!(right, [0.25; 8]);
        assert_eq!(processor.queued_results(), 4);
    }

    #[test]
    fn results_fan_out_to_every_channel() {
        let (mut processor, mut producer) = processor_with_manual_results();
        processor.prepare(4);

        let wet: Vec<f32> = (1..=8).map(|i| i as f32).collect();
        producer.write(&wet);

        let mut left = [0.0f32; 8];
        let mut right = [0.0f32; 8];
        processor.process_block(&mut [&mut left[..], &mut right[..]]);

        // Block larger than the scratch is read in two pieces.
        assert_eq!(&left[..], &wet[..]);
        assert_eq!(&right[..], &wet[..]);
        assert_eq!(processor.queued_results(), 0);
    }

    #[test]
    fn shorter_channels_receive_only_what_fits() {
        let (mut processor, mut producer) = processor_with_manual_results();
        processor.prepare(3);

        let wet: Vec<f32> = (1..=8).map(|i| i as f32).collect();
        producer.write(&wet);

        let mut left = [0.0f32; 8];
        let mut right = [0.0f32; 4];
        processor.process_block(&mut [&mut left[..], &mut right[..]]);

        assert_eq!(&left[..], &wet[..]);
        assert_eq!(&right[..], &wet[..4]);
    }

    #[test]
    fn gains_apply_before_and_after_the_bridge() {
        let (mut processor, mut producer) = processor_with_manual_results();
        processor.prepare(4);
        processor.params().set_input_gain_db(-6.0);
        processor.params().set_output_gain_db(12.0);

        // Dry path: both gains apply.
        let mut mono = [1.0f32; 4];
        processor.process_block(&mut [&mut mono[..]]);
        let expected = decibels_to_gain(-6.0) * decibels_to_gain(12.0);
        for sample in mono {
            assert_abs_diff_eq!(sample, expected, epsilon = 1e-5);
        }

        // Wet path: only output gain applies to the results.
        producer.write(&[0.5; 4]);
        let mut mono = [1.0f32; 4];
        processor.process_block(&mut [&mut mono[..]]);
        for sample in mono {
            assert_abs_diff_eq!(sample, 0.5 * decibels_to_gain(12.0), epsilon = 1e-5);
        }
    }

    #[test]
    fn unprepared_processor_stays_dry() {
        let (mut processor, mut producer) = processor_with_manual_results();
        producer.write(&[7.0; 16]);

        let mut mono = [0.1f32; 8];
        processor.process_block(&mut [&mut mono[..]]);
        assert_eq!(mono, [0.1; 8]);
    }

    #[test]
    fn reset_discards_queued_results() {
        let (mut processor, mut producer) = processor_with_manual_results();
        producer.write(&[1.0; 100]);
        assert_eq!(processor.queued_results(), 100);

        processor.reset();
        assert_eq!(processor.queued_results(), 0);
    }

    #[test]
    fn empty_channel_list_is_a_no_op() {
        let (mut processor, _producer) = processor_with_manual_results();
        processor.prepare(8);
        let mut none: [&mut [f32]; 0] = [];
        processor.process_block(&mut none);
        assert_eq!(processor.engine().diagnostics().samples_in, 0);
    }
}
