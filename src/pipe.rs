//! Pipe stages and their sharded processors.
//!
//! A [`Pipe`] is the compiled, immutable description of one stage. At run
//! time it builds a [`PipeProcessor`] with one shard per worker. Worker
//! `i` always writes through shard `i`, so a shard's mutable state is
//! touched by a single thread and never waits on another worker.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::block::BlockResult;
use crate::error::Result;
use crate::fields_set::FieldsSet;

/// A compiled pipeline stage.
///
/// `Display` renders the canonical text of the stage, which parses back
/// into an equivalent stage.
pub trait Pipe: fmt::Display + fmt::Debug + Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Adjusts the fields upstream stages must provide.
    ///
    /// Called in reverse execution order, starting from `needed = {*}`.
    fn update_needed_fields(&self, needed: &mut FieldsSet, unneeded: &mut FieldsSet);

    /// Builds a processor with `workers` shards that forwards its output
    /// to `next`.
    fn new_processor(
        &self,
        workers: usize,
        stop: StopSignal,
        next: Arc<dyn PipeProcessor>,
    ) -> Arc<dyn PipeProcessor>;
}

/// Run-time instance of a [`Pipe`].
pub trait PipeProcessor: Send + Sync {
    /// Processes `br` on behalf of worker `worker_id`.
    ///
    /// Calls for the same `worker_id` never overlap; calls for different
    /// workers run concurrently.
    fn write_block(&self, worker_id: usize, br: &BlockResult);

    /// Emits buffered state after the last block. Called once, after every
    /// worker has finished.
    fn flush(&self) -> Result<()>;
}

/// Cancellation flag shared by every processor of one run.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Cache line size assumed for shard padding.
///
/// 128 covers the common 64-byte lines as well as platforms that fetch
/// lines in pairs.
pub const CACHE_LINE_SIZE: usize = 128;

/// Aligns `T` to its own cache line so neighbouring shards in an array do
/// not share one.
#[repr(C, align(128))]
#[derive(Debug, Default)]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// Per-worker state of a processor, one padded slot per worker.
///
/// Each slot sits behind a `parking_lot::Mutex`, but the lock is only used
/// as an ownership check: [`Shards::claim`] calls `try_lock` and never
/// blocks, and the slot is only claimed by its own worker, so the lock is
/// always uncontended. No worker ever waits on another.
#[derive(Debug)]
pub struct Shards<T> {
    shards: Box<[CachePadded<Mutex<T>>]>,
}

impl<T> Shards<T> {
    /// Creates `workers` shards, building each with `init`.
    pub fn new(workers: usize, mut init: impl FnMut() -> T) -> Self {
        assert!(workers > 0, "BUG: workers must be positive");
        let shards = (0..workers)
            .map(|_| CachePadded::new(Mutex::new(init())))
            .collect();
        Self { shards }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Exclusive access to the shard of `worker_id`.
    ///
    /// The slot is only ever taken by its own worker, so this never waits.
    /// A slot that is already taken means two threads share a worker id.
    pub fn claim(&self, worker_id: usize) -> MutexGuard<'_, T> {
        let shard = self
            .shards
            .get(worker_id)
            .unwrap_or_else(|| panic!("BUG: worker id {worker_id} out of range 0..{}", self.len()));
        shard
            .try_lock()
            .unwrap_or_else(|| panic!("BUG: shard {worker_id} is used by two workers at once"))
    }

    /// Visits every shard. Only valid once all workers have finished.
    pub fn for_each(&self, mut f: impl FnMut(&mut T)) {
        for worker_id in 0..self.len() {
            f(&mut self.claim(worker_id));
        }
    }
}
