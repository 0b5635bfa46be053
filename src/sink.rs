//! The public asynchronous sink.
//!
//! [`wrap`] places an [`AsyncSink`] in front of a synchronous
//! [`DownstreamSink`]: producers on any thread hand records to
//! [`AsyncSink::publish`] and a single background consumer drains them in
//! FIFO order into the downstream collaborator. A full buffer either drops
//! the record and counts it or blocks the producer at the wrap point,
//! selected by configuration; shutdown drains the backlog against a
//! deadline.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::AsyncSinkConfig;
use crate::counters::SinkCounters;
use crate::disruptor::{
    BatchEventProcessor, EventHandler, MultiProducerSequencer, ProcessorHandle, Result,
    RingBuffer, Sequence, Sequencer, SinkError, SpinBlockingWaitStrategy, WaitStrategy,
};

/// The synchronous collaborator behind the shim.
///
/// `emit` may be slow and may fail; failures are reported through the
/// self-log and never reach producers. `close` is invoked once at
/// coordinator shutdown.
pub trait DownstreamSink<E>: Send + 'static {
    /// Deliver one record.
    fn emit(&mut self, record: E) -> Result<()>;

    /// Release resources at shutdown.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Bridge from the engine's batch dispatch to the downstream contract.
///
/// Records are moved out of their slots (the slot keeps the default value)
/// and emitted one by one. An [`SinkError::Aggregate`] failure is swallowed
/// because the downstream fan-out already routed it; anything else goes to
/// the self-log. The batch always completes, so one poisoned record never
/// blocks the ones behind it.
struct DownstreamHandler<E, S> {
    downstream: S,
    _marker: PhantomData<fn(E)>,
}

impl<E, S> EventHandler<E> for DownstreamHandler<E, S>
where
    E: Send + Sync + Default + 'static,
    S: DownstreamSink<E>,
{
    fn on_batch(&mut self, events: &mut [E], first_sequence: i64) -> Result<()> {
        for (i, slot) in events.iter_mut().enumerate() {
            let record = std::mem::take(slot);
            match self.downstream.emit(record) {
                Ok(()) => {}
                Err(SinkError::Aggregate) => {}
                Err(err) => {
                    tracing::error!(
                        sequence = first_sequence + i as i64,
                        %err,
                        "downstream sink rejected a record"
                    );
                }
            }
        }
        Ok(())
    }

    fn on_shutdown(&mut self) -> Result<()> {
        if let Err(err) = self.downstream.close() {
            tracing::error!(%err, "downstream sink failed to close");
        }
        Ok(())
    }
}

/// Publishes the claimed sequence when dropped, so a claim is never
/// stranded between the slot write and publication on any exit path.
struct PublishGuard<'a> {
    sequencer: &'a MultiProducerSequencer,
    sequence: i64,
}

impl Drop for PublishGuard<'_> {
    fn drop(&mut self) {
        self.sequencer.publish(self.sequence);
    }
}

/// Asynchronous front for a synchronous downstream sink.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct AsyncSink<E>
where
    E: Send + Sync + Default + 'static,
{
    ring_buffer: Arc<RingBuffer<E>>,
    sequencer: Arc<MultiProducerSequencer>,
    wait_strategy: Arc<dyn WaitStrategy>,
    cursor: Arc<Sequence>,
    consumer_sequence: Arc<Sequence>,
    processor: Mutex<Option<ProcessorHandle<E>>>,
    counters: Arc<SinkCounters>,
    /// Once set, publishes are discarded without counting.
    closing: AtomicBool,
    block_when_full: bool,
    shutdown_timeout: Duration,
}

impl<E> std::fmt::Debug for AsyncSink<E>
where
    E: Send + Sync + Default + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSink")
            .field("closing", &self.closing)
            .field("block_when_full", &self.block_when_full)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

/// Wrap `downstream` behind an asynchronous sink using the process-wide
/// default counters.
///
/// The consumer thread is started before this returns.
///
/// # Errors
/// Returns `SinkError::InvalidConfig` for an undersized buffer and
/// `SinkError::Startup` when the consumer thread cannot be spawned.
pub fn wrap<E, S>(downstream: S, config: AsyncSinkConfig) -> Result<AsyncSink<E>>
where
    E: Send + Sync + Default + 'static,
    S: DownstreamSink<E>,
{
    wrap_with_counters(downstream, config, SinkCounters::global())
}

/// Like [`wrap`], with instance-scoped overload counters.
pub fn wrap_with_counters<E, S>(
    downstream: S,
    config: AsyncSinkConfig,
    counters: Arc<SinkCounters>,
) -> Result<AsyncSink<E>>
where
    E: Send + Sync + Default + 'static,
    S: DownstreamSink<E>,
{
    let resolved = config.resolve()?;

    let wait_strategy: Arc<dyn WaitStrategy> = Arc::new(SpinBlockingWaitStrategy::new(
        resolved.spin_batch_size,
        resolved.wake_batch_size,
        resolved.wakeup_ms,
    ));
    let sequencer = Arc::new(MultiProducerSequencer::new(
        resolved.capacity,
        Arc::clone(&wait_strategy),
        Arc::clone(&counters),
    ));
    let ring_buffer = Arc::new(RingBuffer::new(resolved.capacity)?);

    let processor = BatchEventProcessor::new(
        Arc::clone(&ring_buffer),
        Arc::clone(&sequencer).new_barrier(),
        Box::new(DownstreamHandler {
            downstream,
            _marker: PhantomData,
        }),
    );
    let consumer_sequence = processor.sequence();
    sequencer.add_gating_sequence(Arc::clone(&consumer_sequence));

    let handle = processor.start()?;
    let cursor = sequencer.cursor();

    Ok(AsyncSink {
        ring_buffer,
        sequencer,
        wait_strategy,
        cursor,
        consumer_sequence,
        processor: Mutex::new(Some(handle)),
        counters,
        closing: AtomicBool::new(false),
        block_when_full: resolved.block_when_full,
        shutdown_timeout: Duration::from_millis(resolved.shutdown_timeout_ms),
    })
}

impl<E> AsyncSink<E>
where
    E: Send + Sync + Default + 'static,
{
    /// Hand a record to the consumer.
    ///
    /// Never fails and never blocks except under the block policy with a
    /// full buffer. After `close` has begun, records are discarded
    /// silently: post-close traffic is not part of overload accounting.
    pub fn publish(&self, record: E) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }

        if self.block_when_full {
            let sequence = self.sequencer.next();
            self.write_and_publish(sequence, record);
        } else {
            match self.sequencer.try_next() {
                Ok(sequence) => self.write_and_publish(sequence, record),
                Err(_) => self.counters.events_dropped.increment(),
            }
        }
    }

    fn write_and_publish(&self, sequence: i64, record: E) {
        // The guard publishes on every exit path, so a claimed sequence is
        // published even if writing the slot unwinds.
        let _guard = PublishGuard {
            sequencer: &self.sequencer,
            sequence,
        };
        // SAFETY: the sequence was claimed by this call and not yet
        // published; the slot is exclusively ours.
        unsafe { self.ring_buffer.write(sequence, record) };
    }

    /// Shut down with the configured timeout. See [`close_with_timeout`].
    ///
    /// [`close_with_timeout`]: AsyncSink::close_with_timeout
    pub fn close(&self) -> Result<()> {
        self.close_with_timeout(self.shutdown_timeout)
    }

    /// Drain the backlog, halt the consumer, and close the downstream sink.
    ///
    /// Repeated calls are a no-op. The drain runs against a wall-clock
    /// deadline; when it fires the consumer is halted with events still
    /// queued and the timeout is both logged and returned.
    ///
    /// # Errors
    /// Returns `SinkError::ShutdownTimeout` when the deadline passed before
    /// the backlog drained.
    pub fn close_with_timeout(&self, timeout: Duration) -> Result<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        let mut timed_out = false;
        while self.processor_running() && self.backlog() > 0 {
            if Instant::now() >= deadline {
                timed_out = true;
                tracing::warn!(
                    backlog = self.backlog(),
                    "shutdown deadline passed before the backlog drained"
                );
                break;
            }
            self.wait_strategy.signal_all_when_blocking();
            std::thread::yield_now();
        }

        let backlog = self.backlog();
        if let Some(handle) = self.processor.lock().take() {
            handle.halt();
            // The worker's shutdown hook closes the downstream sink and
            // reports any failure.
            let _ = handle.join();
        }

        if timed_out {
            Err(SinkError::ShutdownTimeout { backlog })
        } else {
            Ok(())
        }
    }

    /// The overload counters of this sink.
    pub fn counters(&self) -> &Arc<SinkCounters> {
        &self.counters
    }

    /// Final ring size after rounding.
    pub fn buffer_size(&self) -> usize {
        self.ring_buffer.buffer_size()
    }

    /// Free slots between the claimed frontier and the consumer.
    pub fn remaining_capacity(&self) -> i64 {
        self.sequencer.remaining_capacity()
    }

    fn processor_running(&self) -> bool {
        self.processor
            .lock()
            .as_ref()
            .map(ProcessorHandle::is_running)
            .unwrap_or(false)
    }

    fn backlog(&self) -> i64 {
        self.cursor.get() - self.consumer_sequence.get()
    }
}

impl<E> Drop for AsyncSink<E>
where
    E: Send + Sync + Default + 'static,
{
    fn drop(&mut self) {
        let _ = self.close_with_timeout(self.shutdown_timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Record {
        value: u64,
    }

    struct VecSink {
        records: Arc<Mutex<Vec<u64>>>,
        closed: Arc<AtomicBool>,
    }

    impl DownstreamSink<Record> for VecSink {
        fn emit(&mut self, record: Record) -> Result<()> {
            self.records.lock().push(record.value);
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::Release);
            Ok(())
        }
    }

    fn vec_sink() -> (VecSink, Arc<Mutex<Vec<u64>>>, Arc<AtomicBool>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        (
            VecSink {
                records: Arc::clone(&records),
                closed: Arc::clone(&closed),
            },
            records,
            closed,
        )
    }

    #[test]
    fn test_publish_reaches_downstream_in_order() {
        let (downstream, records, closed) = vec_sink();
        let sink = wrap_with_counters(
            downstream,
            AsyncSinkConfig::default().buffer_size(1024),
            Arc::new(SinkCounters::new()),
        )
        .unwrap();
        assert_eq!(sink.buffer_size(), 1024);

        for value in 0..1000 {
            sink.publish(Record { value });
        }
        sink.close().unwrap();

        assert_eq!(*records.lock(), (0..1000).collect::<Vec<_>>());
        assert!(closed.load(Ordering::Acquire));
    }

    #[test]
    fn test_repeated_close_is_noop() {
        let (downstream, _records, _closed) = vec_sink();
        let sink = wrap_with_counters(
            downstream,
            AsyncSinkConfig::default().buffer_size(512),
            Arc::new(SinkCounters::new()),
        )
        .unwrap();

        sink.close().unwrap();
        sink.close().unwrap();
        sink.close_with_timeout(Duration::from_millis(1)).unwrap();
    }

    #[test]
    fn test_publish_after_close_is_silently_discarded() {
        let (downstream, records, _closed) = vec_sink();
        let counters = Arc::new(SinkCounters::new());
        let sink = wrap_with_counters(
            downstream,
            AsyncSinkConfig::default().buffer_size(512),
            Arc::clone(&counters),
        )
        .unwrap();

        sink.publish(Record { value: 1 });
        sink.close().unwrap();
        sink.publish(Record { value: 2 });

        assert_eq!(*records.lock(), vec![1]);
        // Post-close discards are not overload accounting.
        assert_eq!(counters.events_dropped.get(), 0);
    }

    #[test]
    fn test_invalid_buffer_size_fails_construction() {
        let (downstream, _records, _closed) = vec_sink();
        let result: Result<AsyncSink<Record>> =
            wrap(downstream, AsyncSinkConfig::default().buffer_size(100));
        assert!(matches!(result.unwrap_err(), SinkError::InvalidConfig(100)));
    }
}
