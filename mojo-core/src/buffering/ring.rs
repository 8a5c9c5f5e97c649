//! Fixed-capacity SPSC sample FIFO.
//!
//! ```text
//!   SampleProducer ── write() ──► [ slot | slot | … | slot ] ── read() ──► SampleConsumer
//!   owns write_index               ready-count (atomic)               owns read_index
//! ```
//!
//! Each half owns its own cursor; the only shared mutable state is the
//! ready-count. The producer stores samples and then publishes them with a
//! `Release` add. The consumer observes the count with `Acquire` before it
//! loads samples, and returns slots with a `Release` subtract that the
//! producer observes with `Acquire` before overwriting them.
//!
//! Slots are `AtomicU32` holding `f32` bit patterns accessed with `Relaxed`
//! ordering, so the crate needs no `unsafe`; the ready-count carries all
//! cross-thread ordering. Neither half is `Clone`, so at most one producer and
//! one consumer can exist per ring.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{MojoError, Result};

/// Up to two contiguous slot regions covering `count` slots from `position`.
///
/// The second region is non-empty only when the span wraps past the end of
/// the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FifoScope {
    pub start1: usize,
    pub size1: usize,
    pub start2: usize,
    pub size2: usize,
}

impl FifoScope {
    /// Split `count` slots starting at `position` of a ring of `capacity`.
    ///
    /// Callers guarantee `position < capacity` and `count <= capacity`.
    pub fn new(position: usize, count: usize, capacity: usize) -> Self {
        debug_assert!(position < capacity, "position {position} >= capacity {capacity}");
        debug_assert!(count <= capacity, "count {count} > capacity {capacity}");

        let size1 = count.min(capacity - position);
        Self {
            start1: position,
            size1,
            start2: 0,
            size2: count - size1,
        }
    }

    /// Total slots covered by both regions.
    pub fn len(&self) -> usize {
        self.size1 + self.size2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when the span wraps around the end of the backing store.
    pub fn wraps(&self) -> bool {
        self.size2 > 0
    }
}

struct Shared {
    slots: Box<[AtomicU32]>,
    ready: AtomicUsize,
}

impl Shared {
    fn store_region(&self, start: usize, src: &[f32]) {
        for (slot, sample) in self.slots[start..start + src.len()].iter().zip(src) {
            slot.store(sample.to_bits(), Ordering::Relaxed);
        }
    }

    fn load_region(&self, start: usize, dst: &mut [f32]) {
        let len = dst.len();
        for (out, slot) in dst.iter_mut().zip(&self.slots[start..start + len]) {
            *out = f32::from_bits(slot.load(Ordering::Relaxed));
        }
    }
}

/// Create a matched producer/consumer pair over `capacity` sample slots.
///
/// All slots are usable: a ring of capacity 4096 holds exactly 4096 samples.
///
/// # Errors
/// `MojoError::InvalidCapacity` when `capacity` is zero.
pub fn sample_ring(capacity: usize) -> Result<(SampleProducer, SampleConsumer)> {
    if capacity == 0 {
        return Err(MojoError::InvalidCapacity(capacity));
    }

    let slots = (0..capacity)
        .map(|_| AtomicU32::new(0.0f32.to_bits()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let shared = Arc::new(Shared {
        slots,
        ready: AtomicUsize::new(0),
    });

    Ok((
        SampleProducer {
            shared: Arc::clone(&shared),
            write_index: 0,
        },
        SampleConsumer {
            shared,
            read_index: 0,
        },
    ))
}

/// Write half of a sample ring. Held by exactly one thread at a time.
pub struct SampleProducer {
    shared: Arc<Shared>,
    write_index: usize,
}

impl SampleProducer {
    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    /// Samples written but not yet consumed.
    pub fn ready_samples(&self) -> usize {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Slots currently available for writing.
    pub fn free_space(&self) -> usize {
        self.capacity() - self.ready_samples()
    }

    /// Write as many of `samples` as fit; returns how many were stored.
    ///
    /// Never blocks and never allocates. Samples beyond the free space are
    /// dropped; callers detect that through the short return count.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let count = samples.len().min(self.free_space());
        if count == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let scope = FifoScope::new(self.write_index, count, capacity);
        self.shared.store_region(scope.start1, &samples[..scope.size1]);
        if scope.wraps() {
            self.shared
                .store_region(scope.start2, &samples[scope.size1..count]);
        }

        self.write_index = (self.write_index + count) % capacity;
        self.shared.ready.fetch_add(count, Ordering::Release);
        count
    }
}

impl fmt::Debug for SampleProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleProducer")
            .field("capacity", &self.capacity())
            .field("ready", &self.ready_samples())
            .field("write_index", &self.write_index)
            .finish()
    }
}

/// Read half of a sample ring. Held by exactly one thread at a time.
pub struct SampleConsumer {
    shared: Arc<Shared>,
    read_index: usize,
}

impl SampleConsumer {
    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    /// Samples available to read.
    pub fn ready_samples(&self) -> usize {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Slots the producer could still fill.
    pub fn free_space(&self) -> usize {
        self.capacity() - self.ready_samples()
    }

    /// Read up to `dst.len()` samples in FIFO order; returns how many were read.
    ///
    /// A short count means fewer samples were ready; the tail of `dst` is left
    /// untouched.
    pub fn read(&mut self, dst: &mut [f32]) -> usize {
        let count = dst.len().min(self.ready_samples());
        if count == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let scope = FifoScope::new(self.read_index, count, capacity);
        self.shared
            .load_region(scope.start1, &mut dst[..scope.size1]);
        if scope.wraps() {
            self.shared
                .load_region(scope.start2, &mut dst[scope.size1..count]);
        }

        self.release(count, capacity);
        count
    }

    /// Drop up to `count` ready samples without copying them out.
    pub fn discard(&mut self, count: usize) -> usize {
        let count = count.min(self.ready_samples());
        if count > 0 {
            let capacity = self.capacity();
            self.release(count, capacity);
        }
        count
    }

    fn release(&mut self, count: usize, capacity: usize) {
        self.read_index = (self.read_index + count) % capacity;
        self.shared.ready.fetch_sub(count, Ordering::Release);
    }
}

impl fmt::Debug for SampleConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleConsumer")
            .field("capacity", &self.capacity())
            .field("ready", &self.ready_samples())
            .field("read_index", &self.read_index)
            .finish()
    }
}
