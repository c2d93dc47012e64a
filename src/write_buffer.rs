//! Double-buffered asynchronous write coalescing.
//!
//! A [`WriteBuffer`] sits in front of any [`RecordStore`] and turns many
//! small `add` calls into few large batched appends without ever blocking
//! the producer. Producers enqueue into the active queue under a swap mutex
//! and return immediately; a spawned engine task swaps the queue out, hands
//! the drained batch to the inner bucket on the blocking pool, and then
//! either goes cold (queue empty) or cools down with an adaptive sleep
//! before flushing again. The busier the queue already is, the shorter the
//! sleep — a lone record still hits disk promptly, a burst amortizes into
//! one write.
//!
//! Engine state ({Cold, Flushing, Cooling}) is published on a watch
//! channel; `sync()` simply waits until the engine reports cold, which by
//! construction covers an in-progress flush, the cooldown, and the
//! follow-up flush of any residual items.
//!
//! Reads see a virtual index space: the inner bucket's archived records
//! followed by the active queue. A reader-writer gate (readers shared,
//! flusher exclusive) keeps that space consistent while a batch is in
//! flight.

use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam_utils::atomic::AtomicCell;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{
    bucket::RecordStore,
    error::Result,
    stats::{BufferUsage, BufferUsageSnapshot},
    Error,
};

/// Default ceiling for the adaptive cooldown sleep, in milliseconds.
pub const DEFAULT_MAX_SLEEP_MS: u64 = 1000;

/// Default queue depth above which the cooldown sleep drops to zero.
pub const DEFAULT_ITEMS_THRESHOLD: usize = 32;

/// Engine task state, published on a watch channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// No engine task is running; everything enqueued has been flushed.
    Cold,
    /// The engine is draining the active queue into the inner bucket.
    Flushing,
    /// The engine is sleeping between flush rounds.
    Cooling,
}

/// Tuning for one write buffer.
#[derive(Clone, Copy, Debug)]
pub struct WriteBufferConfig {
    /// Longest cooldown sleep, used when a single item is waiting.
    pub max_sleep_ms: u64,
    /// Queue depth at which the cooldown sleep reaches zero.
    pub items_threshold: usize,
}

impl Default for WriteBufferConfig {
    fn default() -> Self {
        Self {
            max_sleep_ms: DEFAULT_MAX_SLEEP_MS,
            items_threshold: DEFAULT_ITEMS_THRESHOLD,
        }
    }
}

/// Cooldown sleep in milliseconds for the current queue depth.
///
/// Zero above the threshold; otherwise scaled off the ceiling by
/// `log(1 + items) / log(1 + threshold)`, so the wait shrinks as work
/// accumulates.
pub(crate) fn calc_sleep_ms(max_ms: u64, items_threshold: usize, current_items: usize) -> u64 {
    if items_threshold == 0 || current_items > items_threshold {
        return 0;
    }
    let ratio = ((1 + current_items) as f64).ln() / ((1 + items_threshold) as f64).ln();
    (max_ms as f64 * (1.0 - ratio)).round() as u64
}

struct Shared<R, S> {
    inner: Arc<S>,
    /// Active producer queue; swapped wholesale by the engine.
    active: Mutex<Vec<R>>,
    /// Authoritative engine state; guards against duplicate engine starts.
    state: Mutex<EngineState>,
    state_tx: watch::Sender<EngineState>,
    /// Readers shared, flusher exclusive: holds the virtual index space
    /// still while a drained batch moves into the inner bucket.
    flush_gate: tokio::sync::RwLock<()>,
    /// First error from a background flush, surfaced by the next
    /// `sync()` or `add()`.
    flush_error: Mutex<Option<Error>>,
    buffered: AtomicUsize,
    usage: BufferUsage,
    config: WriteBufferConfig,
    runtime: tokio::runtime::Handle,
    last_flush: AtomicCell<Instant>,
}

impl<R, S> Shared<R, S> {
    /// Must be called with either the `active` or `state` lock held by the
    /// code path deciding the transition.
    fn publish_state(&self, state: EngineState) {
        let _ = self.state_tx.send_replace(state);
    }
}

/// Batching front for a record bucket. Cheap to clone; clones share the
/// same queue and inner bucket.
pub struct WriteBuffer<R, S> {
    shared: Arc<Shared<R, S>>,
}

impl<R, S> Clone for WriteBuffer<R, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R, S> WriteBuffer<R, S>
where
    R: Clone + Send + Sync + 'static,
    S: RecordStore<R>,
{
    /// Wraps `inner`. Must be called from within a tokio runtime; the
    /// runtime handle is captured so producers on plain threads can still
    /// start the engine.
    pub fn new(inner: S, config: WriteBufferConfig) -> Self {
        let (state_tx, _) = watch::channel(EngineState::Cold);
        Self {
            shared: Arc::new(Shared {
                inner: Arc::new(inner),
                active: Mutex::new(Vec::new()),
                state: Mutex::new(EngineState::Cold),
                state_tx,
                flush_gate: tokio::sync::RwLock::new(()),
                flush_error: Mutex::new(None),
                buffered: AtomicUsize::new(0),
                usage: BufferUsage::default(),
                config,
                runtime: tokio::runtime::Handle::current(),
                last_flush: AtomicCell::new(Instant::now()),
            }),
        }
    }

    /// The wrapped bucket.
    pub fn inner(&self) -> &S {
        &self.shared.inner
    }

    /// Enqueues `records` and starts the engine if it is cold. Never blocks
    /// on I/O.
    ///
    /// # Errors
    ///
    /// Surfaces a stashed error from an earlier background flush; the
    /// records of this call are not enqueued in that case.
    pub fn add(&self, records: Vec<R>) -> Result<()> {
        if let Some(e) = self.shared.flush_error.lock().take() {
            return Err(e);
        }
        if records.is_empty() {
            return Ok(());
        }

        let start_engine = {
            let mut active = self.shared.active.lock();
            self.shared.usage.record_enqueue(records.len() as u64);
            active.extend(records);
            self.shared.buffered.store(active.len(), Ordering::Release);

            let mut state = self.shared.state.lock();
            if *state == EngineState::Cold {
                *state = EngineState::Flushing;
                self.shared.publish_state(EngineState::Flushing);
                true
            } else {
                false
            }
        };

        if start_engine {
            let shared = Arc::clone(&self.shared);
            self.shared.runtime.spawn(run_engine(shared));
        }

        Ok(())
    }

    /// Number of records enqueued but not yet handed to the inner bucket.
    pub fn buffered_count(&self) -> usize {
        self.shared.buffered.load(Ordering::Acquire)
    }

    /// Whether the engine and cooldown are both finished.
    pub fn is_cold(&self) -> bool {
        *self.shared.state.lock() == EngineState::Cold
    }

    /// Archived records plus the active queue.
    pub fn count(&self) -> usize {
        self.shared.inner.count() + self.buffered_count()
    }

    /// Reads from the virtual index space: the inner bucket first, then the
    /// active queue as a point-in-time snapshot.
    pub async fn read(&self, index: usize) -> Result<R> {
        let _gate = self.shared.flush_gate.read().await;
        let archived = self.shared.inner.count();
        if index < archived {
            return self.shared.inner.read(index);
        }

        let active = self.shared.active.lock();
        active
            .get(index - archived)
            .cloned()
            .ok_or(Error::OutOfRange {
                index,
                archived: archived + active.len(),
            })
    }

    /// Bulk variant of [`read`](Self::read); the range may straddle the
    /// archived/buffered boundary.
    pub async fn read_bulk(&self, index: usize, count: usize) -> Result<Vec<R>> {
        let _gate = self.shared.flush_gate.read().await;
        let archived = self.shared.inner.count();

        let mut out = Vec::with_capacity(count);
        if index < archived {
            let span = count.min(archived - index);
            out.extend(self.shared.inner.read_bulk(index, span)?);
        }
        if out.len() < count {
            let from = (index + out.len()) - archived;
            let active = self.shared.active.lock();
            let until = from + (count - out.len());
            if until > active.len() {
                return Err(Error::OutOfRange {
                    index: index + count - 1,
                    archived: archived + active.len(),
                });
            }
            out.extend(active[from..until].iter().cloned());
        }

        Ok(out)
    }

    /// Reads the entire virtual index space as one consistent snapshot.
    pub async fn read_all(&self) -> Result<Vec<R>> {
        let _gate = self.shared.flush_gate.read().await;
        let archived = self.shared.inner.count();
        let mut out = self.shared.inner.read_bulk(0, archived)?;
        out.extend(self.shared.active.lock().iter().cloned());
        Ok(out)
    }

    /// Completes when every record enqueued before the call is archived in
    /// the inner bucket, then flushes the bucket's files.
    ///
    /// # Errors
    ///
    /// Surfaces a stashed background-flush error, then inner sync errors.
    pub async fn sync(&self) -> Result<()> {
        let mut rx = self.shared.state_tx.subscribe();
        loop {
            if *self.shared.state.lock() == EngineState::Cold {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }

        if let Some(e) = self.shared.flush_error.lock().take() {
            return Err(e);
        }
        let inner = Arc::clone(&self.shared.inner);
        tokio::task::spawn_blocking(move || inner.sync())
            .await
            .map_err(join_failure)?
    }

    /// Syncs and releases the buffer. Call before dropping; `Drop` cannot
    /// wait on the engine.
    pub async fn close(&self) -> Result<()> {
        self.sync().await
    }

    /// Syncs, then removes the inner bucket's files.
    pub async fn delete(&self) -> Result<()> {
        self.sync().await?;
        let inner = Arc::clone(&self.shared.inner);
        tokio::task::spawn_blocking(move || inner.delete())
            .await
            .map_err(join_failure)?
    }

    /// Producer/flusher counters for this buffer.
    pub fn usage(&self) -> BufferUsageSnapshot {
        self.shared.usage.snapshot()
    }

    /// Diagnostic counters for this buffer and the wrapped bucket.
    pub fn output_statistics(&self) -> String {
        let usage = self.shared.usage.snapshot();
        format!(
            "write buffer: state={:?} buffered={} add_calls={} enqueued={} flush_batches={} \
             flushed={} cooldowns={} largest_batch={} since_last_flush={:?}\n{}",
            *self.shared.state.lock(),
            self.buffered_count(),
            usage.add_calls,
            usage.records_enqueued,
            usage.flush_batches,
            usage.records_flushed,
            usage.cooldown_events,
            usage.largest_batch,
            self.shared.last_flush.load().elapsed(),
            self.shared.inner.output_statistics(),
        )
    }
}

fn join_failure(e: tokio::task::JoinError) -> Error {
    Error::Io {
        operation: "join blocking task",
        source: io::Error::other(e.to_string()),
    }
}

/// The engine: drain, flush, then terminate cold or cool down and repeat.
async fn run_engine<R, S>(shared: Arc<Shared<R, S>>)
where
    R: Clone + Send + Sync + 'static,
    S: RecordStore<R>,
{
    trace!("Write buffer engine started.");
    loop {
        // Exclusive gate: readers must not observe the index space while
        // the drained batch is neither buffered nor archived.
        let gate = shared.flush_gate.write().await;
        let drain = {
            let mut active = shared.active.lock();
            let drain = std::mem::take(&mut *active);
            shared.buffered.store(0, Ordering::Release);
            drain
        };

        if !drain.is_empty() {
            let batch = drain.len() as u64;
            let inner = Arc::clone(&shared.inner);
            match tokio::task::spawn_blocking(move || inner.add(drain)).await {
                Ok(Ok(())) => {
                    shared.usage.record_flush(batch);
                    shared.last_flush.store(Instant::now());
                }
                Ok(Err(e)) => {
                    *shared.flush_error.lock() = Some(e);
                }
                Err(join) => {
                    *shared.flush_error.lock() = Some(join_failure(join));
                }
            }
        }
        drop(gate);

        // Terminate or cool down. The cold transition happens under the
        // swap mutex, so a producer that enqueues concurrently either sees
        // Cold and starts a fresh engine, or the engine sees its records.
        let pending = {
            let active = shared.active.lock();
            if active.is_empty() {
                let mut state = shared.state.lock();
                *state = EngineState::Cold;
                shared.publish_state(EngineState::Cold);
                shared.usage.record_cooldown();
                None
            } else {
                Some(active.len())
            }
        };
        let Some(pending) = pending else {
            trace!("Write buffer engine cold.");
            return;
        };

        {
            let mut state = shared.state.lock();
            *state = EngineState::Cooling;
            shared.publish_state(EngineState::Cooling);
        }
        let sleep_ms = calc_sleep_ms(shared.config.max_sleep_ms, shared.config.items_threshold, pending);
        trace!(pending, sleep_ms, "Write buffer cooling down.");
        if sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
        {
            let mut state = shared.state.lock();
            *state = EngineState::Flushing;
            shared.publish_state(EngineState::Flushing);
        }
    }
}
