//! Worker metrics
//!
//! The store reports discrete events and capacity gauges through an injected
//! [`MetricsSink`]. Sinks never return errors and must not block, so a
//! misbehaving metrics backend cannot fail a storage operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic event counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    BlocksAccessed,
    BlocksCanceled,
    BlocksDeleted,
    BlocksEvicted,
    BlocksDemoted,
    BlocksPromoted,
    BlocksReadLocal,
    BlocksReadRemote,
    BlocksWritten,
    BytesReadLocal,
    BytesReadRemote,
    BytesReadUfs,
    BytesWritten,
}

impl Counter {
    pub const ALL: [Counter; 13] = [
        Counter::BlocksAccessed,
        Counter::BlocksCanceled,
        Counter::BlocksDeleted,
        Counter::BlocksEvicted,
        Counter::BlocksDemoted,
        Counter::BlocksPromoted,
        Counter::BlocksReadLocal,
        Counter::BlocksReadRemote,
        Counter::BlocksWritten,
        Counter::BytesReadLocal,
        Counter::BytesReadRemote,
        Counter::BytesReadUfs,
        Counter::BytesWritten,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::BlocksAccessed => "BlocksAccessed",
            Counter::BlocksCanceled => "BlocksCanceled",
            Counter::BlocksDeleted => "BlocksDeleted",
            Counter::BlocksEvicted => "BlocksEvicted",
            Counter::BlocksDemoted => "BlocksDemoted",
            Counter::BlocksPromoted => "BlocksPromoted",
            Counter::BlocksReadLocal => "BlocksReadLocal",
            Counter::BlocksReadRemote => "BlocksReadRemote",
            Counter::BlocksWritten => "BlocksWritten",
            Counter::BytesReadLocal => "BytesReadLocal",
            Counter::BytesReadRemote => "BytesReadRemote",
            Counter::BytesReadUfs => "BytesReadUfs",
            Counter::BytesWritten => "BytesWritten",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Point-in-time values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gauge {
    CapacityTotal,
    CapacityUsed,
    CapacityFree,
    BlocksCached,
}

impl Gauge {
    pub const ALL: [Gauge; 4] = [
        Gauge::CapacityTotal,
        Gauge::CapacityUsed,
        Gauge::CapacityFree,
        Gauge::BlocksCached,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Gauge::CapacityTotal => "CapacityTotal",
            Gauge::CapacityUsed => "CapacityUsed",
            Gauge::CapacityFree => "CapacityFree",
            Gauge::BlocksCached => "BlocksCached",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Receiver of metric events
pub trait MetricsSink: Send + Sync {
    fn inc(&self, counter: Counter, n: u64);

    fn set(&self, gauge: Gauge, value: u64);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn inc(&self, _counter: Counter, _n: u64) {}

    fn set(&self, _gauge: Gauge, _value: u64) {}
}

/// In-process registry of worker counters and gauges
pub struct WorkerMetrics {
    instance: String,
    counters: [AtomicU64; Counter::ALL.len()],
    gauges: [AtomicU64; Gauge::ALL.len()],
}

impl WorkerMetrics {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            gauges: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn counter(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    pub fn gauge(&self, gauge: Gauge) -> u64 {
        self.gauges[gauge.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: Counter::ALL.iter().map(|c| (*c, self.counter(*c))).collect(),
            gauges: Gauge::ALL.iter().map(|g| (*g, self.gauge(*g))).collect(),
        }
    }

    /// Log every metric at info level
    pub fn report(&self) {
        let snapshot = self.snapshot();
        for (counter, value) in snapshot.counters {
            tracing::info!(instance = %self.instance, "{} = {}", counter.name(), value);
        }
        for (gauge, value) in snapshot.gauges {
            tracing::info!(instance = %self.instance, "{} = {}", gauge.name(), value);
        }
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new("worker")
    }
}

impl MetricsSink for WorkerMetrics {
    fn inc(&self, counter: Counter, n: u64) {
        self.counters[counter.index()].fetch_add(n, Ordering::Relaxed);
    }

    fn set(&self, gauge: Gauge, value: u64) {
        self.gauges[gauge.index()].store(value, Ordering::Relaxed);
    }
}

impl<T: MetricsSink + ?Sized> MetricsSink for Arc<T> {
    fn inc(&self, counter: Counter, n: u64) {
        (**self).inc(counter, n)
    }

    fn set(&self, gauge: Gauge, value: u64) {
        (**self).set(gauge, value)
    }
}

/// Copy of all metric values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub counters: Vec<(Counter, u64)>,
    pub gauges: Vec<(Gauge, u64)>,
}

impl MetricsSnapshot {
    pub fn counter(&self, counter: Counter) -> u64 {
        self.counters
            .iter()
            .find(|(c, _)| *c == counter)
            .map_or(0, |(_, v)| *v)
    }

    pub fn gauge(&self, gauge: Gauge) -> u64 {
        self.gauges
            .iter()
            .find(|(g, _)| *g == gauge)
            .map_or(0, |(_, v)| *v)
    }
}
