//! Overload counters and their diagnostic bridge.
//!
//! Two monotonic counters account for overload behaviour: records refused
//! because the buffer was full (`events-dropped`) and producer waits at the
//! wrap point (`buffer-unavailable`). Both are striped across one
//! cache-padded slot per processor so concurrent producers don't contend on
//! a single line. The diagnostic surface is pull-based: readers sum the
//! stripes on demand, and nothing is emitted by this module.

use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam_utils::CachePadded;

/// Monotonic 64-bit counter striped per processor.
///
/// `increment` touches a single stripe chosen by a per-thread hash (the
/// thread-id-modulo-processor-count fallback of the classic per-CPU
/// scheme); `get` sums all stripes with acquire loads, so reads see every
/// increment that happened-before them but are not a consistent snapshot
/// across counters.
#[derive(Debug)]
pub struct StripedCounter {
    stripes: Box<[CachePadded<AtomicU64>]>,
}

impl StripedCounter {
    /// Create a counter with one stripe per available processor.
    pub fn new() -> Self {
        let stripes = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_stripes(stripes)
    }

    /// Create a counter with an explicit stripe count (at least one).
    pub fn with_stripes(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes)
                .map(|_| CachePadded::new(AtomicU64::new(0)))
                .collect(),
        }
    }

    /// Increment this thread's stripe.
    #[inline]
    pub fn increment(&self) {
        let index = thread_stripe_hint() % self.stripes.len();
        self.stripes[index].fetch_add(1, Ordering::Relaxed);
    }

    /// Sum all stripes.
    pub fn get(&self) -> u64 {
        self.stripes
            .iter()
            .map(|stripe| stripe.load(Ordering::Acquire))
            .sum()
    }
}

impl Default for StripedCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable per-thread stripe hint, computed once from the thread id.
fn thread_stripe_hint() -> usize {
    thread_local! {
        static HINT: Cell<usize> = const { Cell::new(usize::MAX) };
    }
    HINT.with(|hint| {
        let mut value = hint.get();
        if value == usize::MAX {
            let mut hasher = DefaultHasher::new();
            std::thread::current().id().hash(&mut hasher);
            value = hasher.finish() as usize;
            hint.set(value);
        }
        value
    })
}

/// The overload counters of one async sink.
///
/// Counters are instance-scoped so hosts can keep one set per sink; the
/// process-wide default behind [`SinkCounters::global`] serves hosts with a
/// single diagnostic namespace.
#[derive(Debug, Default)]
pub struct SinkCounters {
    /// Publishes refused because the buffer was full (drop policy).
    pub events_dropped: StripedCounter,
    /// Producer waits for the consumer at the wrap point (block policy).
    pub buffer_unavailable: StripedCounter,
}

impl SinkCounters {
    /// Create a fresh, zeroed counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default counter set.
    pub fn global() -> Arc<SinkCounters> {
        static GLOBAL: OnceLock<Arc<SinkCounters>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(SinkCounters::new())))
    }

    /// Read both counters.
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            events_dropped: self.events_dropped.get(),
            buffer_unavailable: self.buffer_unavailable.get(),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub events_dropped: u64,
    pub buffer_unavailable: u64,
}

#[derive(Debug, Clone, Copy)]
enum GaugeKind {
    EventsDropped,
    BufferUnavailable,
}

/// A named pull-based counter reader for a host's diagnostic channel.
#[derive(Debug, Clone)]
pub struct CounterGauge {
    kind: GaugeKind,
    counters: Arc<SinkCounters>,
}

impl CounterGauge {
    /// The diagnostic name of this gauge.
    pub fn name(&self) -> &'static str {
        match self.kind {
            GaugeKind::EventsDropped => "events-dropped",
            GaugeKind::BufferUnavailable => "buffer-unavailable",
        }
    }

    /// Read the current value.
    pub fn read(&self) -> u64 {
        match self.kind {
            GaugeKind::EventsDropped => self.counters.events_dropped.get(),
            GaugeKind::BufferUnavailable => self.counters.buffer_unavailable.get(),
        }
    }
}

/// The two read-only gauges exposed to a diagnostic reader.
pub fn gauges(counters: &Arc<SinkCounters>) -> [CounterGauge; 2] {
    [
        CounterGauge {
            kind: GaugeKind::EventsDropped,
            counters: Arc::clone(counters),
        },
        CounterGauge {
            kind: GaugeKind::BufferUnavailable,
            counters: Arc::clone(counters),
        },
    ]
}
