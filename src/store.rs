//! Sample store shared between the acquisition loop and consumers
//!
//! The store keeps two sequences behind one lock:
//!
//! - **History**: every sample ever appended, in ingestion order, never trimmed
//! - **Live window**: a ring of at most `max_time / stride` samples, admitting
//!   only samples whose timer is a multiple of the stride
//!
//! # Access discipline
//!
//! [`SampleStore::open`] hands out exactly one [`StoreWriter`] (not `Clone`) and a
//! cloneable [`StoreReader`]. The writer belongs to the acquisition loop; readers
//! only ever take copies, so the lock is held for the length of one append or
//! one copy and a slow consumer never stalls ingestion. The one control
//! operation on the read side is [`StoreReader::seal`], used once at
//! finalization to stop ingestion and take the final history atomically.
//!
//! # Example
//!
//! ```ignore
//! let (mut writer, reader) = SampleStore::open(&BufferConfig::default())?;
//! writer.append(Sample::new(10.0, 20.0, 0));
//!
//! let window = reader.snapshot_window();
//! if window.crossed(horizon_ms) {
//!     // extend the visible range
//! }
//! ```

use crate::config::BufferConfig;
use crate::error::Result;
use crate::types::Sample;
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The two sequences guarded together
#[derive(Debug)]
struct Buffers {
    history: Vec<Sample>,
    window: VecDeque<Sample>,
    sealed: bool,
}

type SharedBuffers = Arc<RwLock<Buffers>>;

/// Constructor namespace for a store's writer/reader pair
pub struct SampleStore;

impl SampleStore {
    /// Create a store and split it into its single writer and a reader
    ///
    /// Fails if the buffer geometry is invalid (zero or non-divisible stride).
    pub fn open(config: &BufferConfig) -> Result<(StoreWriter, StoreReader)> {
        config.validate()?;
        let capacity = config.capacity();
        let buffers = Arc::new(RwLock::new(Buffers {
            history: Vec::new(),
            window: VecDeque::with_capacity(capacity),
            sealed: false,
        }));

        tracing::debug!(
            "Sample store opened: window capacity {} (stride {} ms)",
            capacity,
            config.sample_stride_ms
        );

        let writer = StoreWriter {
            buffers: buffers.clone(),
            capacity,
            stride_ms: config.sample_stride_ms,
        };
        let reader = StoreReader { buffers, capacity };
        Ok((writer, reader))
    }
}

/// What happened to an appended sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored in history and in the live window
    Admitted,
    /// Stored in history only (off the decimation stride)
    HistoryOnly,
    /// Rejected because the store was sealed for finalization
    Sealed,
}

impl AppendOutcome {
    /// Whether the sample made it into history
    pub fn is_stored(&self) -> bool {
        !matches!(self, AppendOutcome::Sealed)
    }
}

/// Write side of the store; only the acquisition loop holds one
#[derive(Debug)]
pub struct StoreWriter {
    buffers: SharedBuffers,
    capacity: usize,
    stride_ms: u64,
}

impl StoreWriter {
    /// Append a sample to history, and to the live window if it is on the stride
    pub fn append(&mut self, sample: Sample) -> AppendOutcome {
        let mut buffers = write_lock(&self.buffers);
        if buffers.sealed {
            return AppendOutcome::Sealed;
        }

        buffers.history.push(sample);
        if !sample.is_on_stride(self.stride_ms) {
            return AppendOutcome::HistoryOnly;
        }
        if buffers.window.len() >= self.capacity {
            buffers.window.pop_front();
        }
        buffers.window.push_back(sample);
        AppendOutcome::Admitted
    }

    /// Get a reader over the same store
    pub fn reader(&self) -> StoreReader {
        StoreReader {
            buffers: self.buffers.clone(),
            capacity: self.capacity,
        }
    }

    /// Live window capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Read side of the store; clone freely
#[derive(Debug, Clone)]
pub struct StoreReader {
    buffers: SharedBuffers,
    capacity: usize,
}

impl StoreReader {
    /// Copy the live window, along with the newest timer seen so far
    pub fn snapshot_window(&self) -> WindowSnapshot {
        let buffers = read_lock(&self.buffers);
        WindowSnapshot {
            samples: buffers.window.iter().copied().collect(),
            latest_timer: buffers.history.last().map(|s| s.timer),
            capacity: self.capacity,
        }
    }

    /// Copy the full history
    pub fn snapshot_history(&self) -> Vec<Sample> {
        read_lock(&self.buffers).history.clone()
    }

    /// Whether no sample has been appended yet
    pub fn is_empty(&self) -> bool {
        read_lock(&self.buffers).history.is_empty()
    }

    /// Number of samples in history
    pub fn len(&self) -> usize {
        read_lock(&self.buffers).history.len()
    }

    /// Live window capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse all further appends and return the final history
    ///
    /// Sealing and copying happen under one lock, so every sample the writer
    /// managed to store is in the returned copy. Sealing again returns the
    /// same history.
    pub fn seal(&self) -> Vec<Sample> {
        let mut buffers = write_lock(&self.buffers);
        buffers.sealed = true;
        buffers.history.clone()
    }

    /// Whether the store has been sealed
    pub fn is_sealed(&self) -> bool {
        read_lock(&self.buffers).sealed
    }
}

/// Point-in-time copy of the live window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    /// Admitted samples, oldest first
    pub samples: Vec<Sample>,
    /// Timer of the most recently appended sample (admitted or not)
    pub latest_timer: Option<u64>,
    /// Window capacity
    pub capacity: usize,
}

impl WindowSnapshot {
    /// Whether the newest sample lies beyond `horizon_ms`
    pub fn crossed(&self, horizon_ms: u64) -> bool {
        self.latest_timer.is_some_and(|t| t > horizon_ms)
    }

    /// Number of samples in the window
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the window is at capacity
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Timer span covered by the window
    pub fn time_span(&self) -> Option<(u64, u64)> {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => Some((first.timer, last.timer)),
            _ => None,
        }
    }
}

// The guarded sequences are only ever pushed to, so a panic elsewhere while a
// guard was held cannot leave them half-mutated.
fn read_lock(buffers: &RwLock<Buffers>) -> RwLockReadGuard<'_, Buffers> {
    buffers.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock(buffers: &RwLock<Buffers>) -> RwLockWriteGuard<'_, Buffers> {
    buffers.write().unwrap_or_else(PoisonError::into_inner)
}
