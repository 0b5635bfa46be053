//! The concurrent message-exchange engine behind the async sink.
//!
//! A power-of-two ring buffer is shared between any number of producer
//! threads and a single consumer thread. Producers claim sequence numbers
//! through a multi-producer sequencer, write their record into the slot the
//! sequence maps to, and mark the slot published. The consumer waits on a
//! sequence barrier for a contiguous prefix of published sequences and
//! dispatches it to an [`EventHandler`] in batches.

pub mod event_processor;
pub mod ring_buffer;
pub mod sequence;
pub mod sequence_barrier;
pub mod sequencer;
pub mod wait_strategy;

#[cfg(test)]
mod property_tests;

pub use event_processor::{
    BatchEventProcessor, DefaultExceptionHandler, EventHandler, ExceptionHandler, ProcessorHandle,
};
pub use ring_buffer::RingBuffer;
pub use sequence::Sequence;
pub use sequence_barrier::ProcessingSequenceBarrier;
pub use sequencer::{MultiProducerSequencer, Sequencer};
pub use wait_strategy::{SpinBlockingWaitStrategy, WaitStrategy};

/// The value every sequence starts from; the first claimed sequence is 0.
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// Errors surfaced by the sink and its engine.
///
/// Producer-facing paths never leak these: `publish` absorbs `BufferFull`
/// into the drop counter and everything downstream of the consumer thread
/// is routed through the exception policy.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The ring buffer has no free slot (drop policy only).
    #[error("ring buffer is full")]
    BufferFull,

    /// Requested buffer size is below the supported minimum.
    #[error("buffer size {0} is below the 512-slot minimum")]
    InvalidConfig(usize),

    /// The consumer's barrier was cancelled while waiting.
    #[error("consumer has been cancelled")]
    Cancelled,

    /// A second run was attempted while the processor loop is active.
    #[error("event processor is already running")]
    AlreadyRunning,

    /// The coordinator was started twice.
    #[error("async sink has already been started")]
    AlreadyStarted,

    /// The consumer thread could not be brought up.
    #[error("failed to start consumer thread: {0}")]
    Startup(String),

    /// `close` hit its deadline with events still queued.
    #[error("shutdown timed out with {backlog} events unprocessed")]
    ShutdownTimeout { backlog: i64 },

    /// The downstream sink rejected a record.
    #[error("downstream emit failed: {0}")]
    Emit(String),

    /// A fan-out sink already routed the failure; nothing left to report.
    #[error("aggregate sink failure already routed downstream")]
    Aggregate,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Check whether a number is a power of two.
pub fn is_power_of_two(n: usize) -> bool {
    n != 0 && (n & (n - 1)) == 0
}
