//! Batch event processor: the consumer-thread driver.
//!
//! One processor drains the ring on a dedicated worker thread: wait on the
//! barrier for a contiguous published range, dispatch it to the handler in
//! non-wrapping slices, advance the consumer sequence, repeat. Handler
//! faults are routed through an exception policy and never stall the
//! pipeline: the processor advances past a failing range.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::disruptor::{ProcessingSequenceBarrier, Result, RingBuffer, Sequence, SinkError};

/// Consumer-side handler for batches of records.
///
/// `on_batch` receives a mutable slice of consecutively published records
/// together with the sequence of the first one. Implementations typically
/// move records out of their slots (the slot keeps the default value) and
/// forward them downstream.
pub trait EventHandler<E>: Send {
    /// Called once on the worker thread before the first batch.
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Process one batch. An error is reported to the exception policy and
    /// the processor advances past the whole batch regardless.
    fn on_batch(&mut self, events: &mut [E], first_sequence: i64) -> Result<()>;

    /// Called once on the worker thread after the loop exits.
    fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Policy for faults raised by the handler or the processor lifecycle.
pub trait ExceptionHandler: Send {
    /// A batch failed; the range has already been skipped.
    fn handle_batch_exception(&mut self, error: &SinkError, first_sequence: i64, last_sequence: i64);

    /// `on_start` (or the run guard) failed; the processor returns to idle.
    fn handle_on_start_exception(&mut self, error: &SinkError);

    /// `on_shutdown` failed; shutdown continues.
    fn handle_on_shutdown_exception(&mut self, error: &SinkError);
}

/// Exception policy that writes every fault to the self-log.
#[derive(Debug, Default)]
pub struct DefaultExceptionHandler;

impl ExceptionHandler for DefaultExceptionHandler {
    fn handle_batch_exception(&mut self, error: &SinkError, first_sequence: i64, last_sequence: i64) {
        tracing::error!(
            first_sequence,
            last_sequence,
            %error,
            "event handler failed; advancing past the range"
        );
    }

    fn handle_on_start_exception(&mut self, error: &SinkError) {
        tracing::error!(%error, "event processor failed to start");
    }

    fn handle_on_shutdown_exception(&mut self, error: &SinkError) {
        tracing::error!(%error, "event processor shutdown hook failed");
    }
}

/// Processor run states.
const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const HALTED: u8 = 2;

/// Latch the spawning thread parks on until the worker has come up (or
/// failed to).
#[derive(Default)]
struct StartLatch {
    opened: Mutex<bool>,
    condvar: Condvar,
}

impl StartLatch {
    fn open(&self) {
        let mut opened = self.opened.lock();
        *opened = true;
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut opened = self.opened.lock();
        while !*opened {
            self.condvar.wait(&mut opened);
        }
    }
}

/// Single-consumer batch processor over a ring buffer.
pub struct BatchEventProcessor<E>
where
    E: Send + Sync + 'static,
{
    ring_buffer: Arc<RingBuffer<E>>,
    barrier: Arc<ProcessingSequenceBarrier>,
    /// Highest sequence handed to the handler; the producers' gating
    /// sequence.
    sequence: Arc<Sequence>,
    state: Arc<AtomicU8>,
    handler: Box<dyn EventHandler<E>>,
    exception_handler: Box<dyn ExceptionHandler>,
}

impl<E> BatchEventProcessor<E>
where
    E: Send + Sync + 'static,
{
    /// Create an idle processor; `start` or `run` brings it to life.
    pub fn new(
        ring_buffer: Arc<RingBuffer<E>>,
        barrier: ProcessingSequenceBarrier,
        handler: Box<dyn EventHandler<E>>,
    ) -> Self {
        Self {
            ring_buffer,
            barrier: Arc::new(barrier),
            sequence: Arc::new(Sequence::default()),
            state: Arc::new(AtomicU8::new(IDLE)),
            handler,
            exception_handler: Box::new(DefaultExceptionHandler),
        }
    }

    /// Replace the exception policy.
    pub fn set_exception_handler(&mut self, handler: Box<dyn ExceptionHandler>) {
        self.exception_handler = handler;
    }

    /// The consumer sequence; register it as the sequencer's gating
    /// sequence before publishing anything.
    pub fn sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }

    /// Spawn the worker thread and wait until it has entered the loop or
    /// failed startup.
    ///
    /// # Errors
    /// Returns `SinkError::AlreadyStarted` when the processor is not idle
    /// and `SinkError::Startup` when the OS refuses the thread.
    pub fn start(mut self) -> Result<ProcessorHandle<E>> {
        if self.state.load(Ordering::Acquire) != IDLE {
            return Err(SinkError::AlreadyStarted);
        }

        let latch = Arc::new(StartLatch::default());
        let sequence = Arc::clone(&self.sequence);
        let state = Arc::clone(&self.state);
        let barrier = Arc::clone(&self.barrier);

        let thread_latch = Arc::clone(&latch);
        let join_handle = std::thread::Builder::new()
            .name("ringlog-consumer".into())
            .spawn(move || {
                self.run_with_latch(Some(&thread_latch));
                self
            })
            .map_err(|err| SinkError::Startup(err.to_string()))?;

        latch.wait();

        Ok(ProcessorHandle {
            sequence,
            state,
            barrier,
            join_handle: Some(join_handle),
        })
    }

    /// Run the processing loop on the calling thread until halted.
    pub fn run(&mut self) {
        self.run_with_latch(None);
    }

    fn run_with_latch(&mut self, latch: Option<&StartLatch>) {
        match self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(observed) => {
                if observed == RUNNING {
                    self.exception_handler
                        .handle_on_start_exception(&SinkError::AlreadyRunning);
                }
                // Halted before the thread came up: exit cleanly.
                if let Some(latch) = latch {
                    latch.open();
                }
                return;
            }
        }

        self.barrier.reset();

        if let Err(err) = self.handler.on_start() {
            self.exception_handler.handle_on_start_exception(&err);
            self.state.store(IDLE, Ordering::Release);
            if let Some(latch) = latch {
                latch.open();
            }
            return;
        }

        if let Some(latch) = latch {
            latch.open();
        }

        self.process_events();

        if let Err(err) = self.handler.on_shutdown() {
            self.exception_handler.handle_on_shutdown_exception(&err);
        }

        // Back to idle so a halted processor can be restarted.
        self.state.store(IDLE, Ordering::Release);
    }

    fn process_events(&mut self) {
        let mut next_sequence = self.sequence.get() + 1;

        loop {
            match self.barrier.wait_for(next_sequence) {
                Ok(available) => {
                    if available >= next_sequence {
                        let mut from = next_sequence;
                        while from <= available {
                            // SAFETY: every sequence in from..=available is
                            // published and this is the only consumer; the
                            // range is exclusively ours until the sequence
                            // advances past it.
                            let batch = unsafe { self.ring_buffer.batch_mut(from, available) };
                            let len = batch.len() as i64;
                            if let Err(err) = self.handler.on_batch(batch, from) {
                                self.exception_handler
                                    .handle_batch_exception(&err, from, from + len - 1);
                            }
                            from += len;
                        }
                        next_sequence = available + 1;
                        self.sequence.set(available);
                    }
                }
                Err(_) => {
                    // Cancelled: exit only when a halt went with it, so a
                    // transient cancel during restart keeps the loop alive.
                    if self.state.load(Ordering::Acquire) != RUNNING {
                        break;
                    }
                }
            }

            if self.state.load(Ordering::Acquire) != RUNNING {
                break;
            }
        }
    }
}

/// Control handle for a started processor.
pub struct ProcessorHandle<E>
where
    E: Send + Sync + 'static,
{
    sequence: Arc<Sequence>,
    state: Arc<AtomicU8>,
    barrier: Arc<ProcessingSequenceBarrier>,
    join_handle: Option<JoinHandle<BatchEventProcessor<E>>>,
}

impl<E> ProcessorHandle<E>
where
    E: Send + Sync + 'static,
{
    /// Halt the processor and break it out of any wait.
    pub fn halt(&self) {
        self.state.store(HALTED, Ordering::Release);
        self.barrier.cancel();
    }

    /// Whether the worker is inside the processing loop.
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// The consumer sequence.
    pub fn sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }

    /// Wait for the worker to exit and recover the processor for a
    /// possible restart. Returns `None` if the worker panicked.
    pub fn join(mut self) -> Option<BatchEventProcessor<E>> {
        self.join_handle.take().and_then(|handle| handle.join().ok())
    }
}

impl<E> Drop for ProcessorHandle<E>
where
    E: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            self.halt();
            let _ = handle.join();
        }
    }
}
