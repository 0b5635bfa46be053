//! `ringlog` - Asynchronous shim for synchronous log sinks
//!
//! A high-throughput hand-off between producer threads and one slow,
//! synchronous log sink. Producers publish records into a pre-allocated
//! power-of-two ring buffer and return immediately; a single background
//! consumer thread drains the buffer in FIFO order and drives the
//! downstream sink, so I/O latency never sits on the producers' critical
//! path.
//!
//! ## Guarantees
//!
//! - **FIFO**: records reach the downstream sink in claim order, and each
//!   producer thread's records arrive in its program order
//! - **Lock-free hot path**: publishing takes no locks; the only mutex in
//!   the system backs the consumer's block-phase parking
//! - **Predictable overload**: a full buffer either drops the record and
//!   counts it (`events-dropped`) or blocks the producer at the wrap point
//!   (`buffer-unavailable`), selected by configuration
//! - **Bounded shutdown**: `close` drains the backlog against a deadline,
//!   then halts the consumer and closes the downstream sink
//!
//! ## Quick Start
//!
//! ```rust
//! use ringlog::{wrap, AsyncSinkConfig, DownstreamSink, Result};
//!
//! // The record type handed through the ring.
//! #[derive(Debug, Default)]
//! struct LogRecord {
//!     line: String,
//! }
//!
//! // A synchronous downstream sink.
//! struct StderrSink;
//!
//! impl DownstreamSink<LogRecord> for StderrSink {
//!     fn emit(&mut self, record: LogRecord) -> Result<()> {
//!         eprintln!("{}", record.line);
//!         Ok(())
//!     }
//! }
//!
//! let sink = wrap(StderrSink, AsyncSinkConfig::default()).unwrap();
//!
//! sink.publish(LogRecord { line: "hello".into() });
//!
//! sink.close().unwrap();
//! ```
//!
//! ## Architecture
//!
//! - **`RingBuffer`**: pre-allocated slot array, indexed by bitmask
//! - **`Sequence`**: cache-padded atomic counters for coordination
//! - **`MultiProducerSequencer`**: claims sequences, enforces the wrap
//!   point, tracks per-slot publication
//! - **`SpinBlockingWaitStrategy`**: hybrid spin-then-park consumer wait
//!   with batched wake-ups
//! - **`ProcessingSequenceBarrier`**: the consumer's view of the published
//!   frontier, carrying its cancellation signal
//! - **`BatchEventProcessor`**: the consumer-thread driver
//! - **`AsyncSink`**: wires the engine to a [`DownstreamSink`] and owns
//!   lifecycle and overload policy

pub mod config;
pub mod counters;
pub mod disruptor;
pub mod sink;

pub use config::{AsyncSinkConfig, DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};
pub use counters::{gauges, CounterGauge, CountersSnapshot, SinkCounters, StripedCounter};
pub use disruptor::{Result, SinkError};
pub use sink::{wrap, wrap_with_counters, AsyncSink, DownstreamSink};
