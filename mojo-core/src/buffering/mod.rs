//! Lock-free SPSC ring buffers for audio samples.
//!
//! Two rings bridge the real-time callback and the inference worker:
//! the input ring (callback → worker) and the output ring (worker → callback).
//! Both are plain [`ring::sample_ring`] pairs; only role assignment differs.

pub mod ring;

pub use ring::{sample_ring, FifoScope, SampleConsumer, SampleProducer};

/// Default input ring capacity in samples.
pub const INPUT_RING_CAPACITY: usize = 4096;

/// Default output ring capacity in samples.
pub const OUTPUT_RING_CAPACITY: usize = 512;
