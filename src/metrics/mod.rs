//! Metrics — timers and counters for every timed operation / countable
//! event (spec §6). Three backends: no-op, in-process (atomics, queryable
//! for tests and `status`), and statsd (UDP line protocol). Shape follows
//! the teacher's `MetricsCollector` (atomic counters behind a cheap
//! `Arc`-shared handle) generalized from fixed node-metric fields to an
//! open-ended `name -> value` surface.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;

/// A metrics sink. Every timed operation emits `timer(name, millis)`, every
/// countable event emits `counter(name, delta)`.
pub trait MetricsBackend: Send + Sync {
    fn timer(&self, name: &str, millis: u64);
    fn counter(&self, name: &str, delta: i64);
    fn gauge(&self, name: &str, value: i64);
}

pub struct NoopBackend;

impl MetricsBackend for NoopBackend {
    fn timer(&self, _name: &str, _millis: u64) {}
    fn counter(&self, _name: &str, _delta: i64) {}
    fn gauge(&self, _name: &str, _value: i64) {}
}

/// In-process collector: queryable, used by `status` and by tests that
/// assert a given operation emitted the expected metric.
#[derive(Default)]
pub struct InProcessBackend {
    counters: DashMap<String, AtomicI64>,
    gauges: DashMap<String, AtomicI64>,
    timer_totals_ms: DashMap<String, AtomicU64>,
    timer_counts: DashMap<String, AtomicU64>,
}

impl InProcessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_value(&self, name: &str) -> i64 {
        self.counters.get(name).map(|c| c.load(Ordering::SeqCst)).unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &str) -> i64 {
        self.gauges.get(name).map(|g| g.load(Ordering::SeqCst)).unwrap_or(0)
    }

    pub fn timer_average_ms(&self, name: &str) -> Option<f64> {
        let total = self.timer_totals_ms.get(name)?.load(Ordering::SeqCst);
        let count = self.timer_counts.get(name)?.load(Ordering::SeqCst);
        if count == 0 {
            None
        } else {
            Some(total as f64 / count as f64)
        }
    }
}

impl MetricsBackend for InProcessBackend {
    fn timer(&self, name: &str, millis: u64) {
        self.timer_totals_ms.entry(name.to_string()).or_insert_with(|| AtomicU64::new(0)).fetch_add(millis, Ordering::SeqCst);
        self.timer_counts.entry(name.to_string()).or_insert_with(|| AtomicU64::new(0)).fetch_add(1, Ordering::SeqCst);
    }

    fn counter(&self, name: &str, delta: i64) {
        self.counters.entry(name.to_string()).or_insert_with(|| AtomicI64::new(0)).fetch_add(delta, Ordering::SeqCst);
    }

    fn gauge(&self, name: &str, value: i64) {
        self.gauges.entry(name.to_string()).or_insert_with(|| AtomicI64::new(0)).store(value, Ordering::SeqCst);
    }
}

/// UDP line-protocol statsd client: `name:value|g|c|ms[@rate]`. Send
/// failures are swallowed — metrics must never fail the operation they
/// describe.
pub struct StatsdBackend {
    socket: Mutex<UdpSocket>,
    target: String,
    prefix: String,
}

impl StatsdBackend {
    pub fn new(target: impl Into<String>, prefix: impl Into<String>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self { socket: Mutex::new(socket), target: target.into(), prefix: prefix.into() })
    }

    fn send(&self, line: String) {
        if let Ok(socket) = self.socket.lock() {
            let _ = socket.send_to(line.as_bytes(), &self.target);
        }
    }
}

impl MetricsBackend for StatsdBackend {
    fn timer(&self, name: &str, millis: u64) {
        self.send(format!("{}.{name}:{millis}|ms", self.prefix));
    }

    fn counter(&self, name: &str, delta: i64) {
        self.send(format!("{}.{name}:{delta}|c", self.prefix));
    }

    fn gauge(&self, name: &str, value: i64) {
        self.send(format!("{}.{name}:{value}|g", self.prefix));
    }
}

pub type SharedMetrics = Arc<dyn MetricsBackend>;

pub fn noop() -> SharedMetrics {
    Arc::new(NoopBackend)
}

pub fn in_process() -> Arc<InProcessBackend> {
    Arc::new(InProcessBackend::new())
}

/// Times a closure and reports it under `name`, returning the closure's
/// result. Mirrors the teacher's request-latency tracking but generalized
/// to any named operation instead of only HTTP requests.
pub fn timed<T>(metrics: &dyn MetricsBackend, name: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let result = f();
    metrics.timer(name, start.elapsed().as_millis() as u64);
    result
}

/// Snapshot of counters/gauges suitable for the `status` CLI or a debug
/// endpoint. Only meaningful against `InProcessBackend`.
pub fn snapshot(backend: &InProcessBackend) -> HashMap<String, i64> {
    let mut out = HashMap::new();
    for entry in backend.counters.iter() {
        out.insert(entry.key().clone(), entry.value().load(Ordering::SeqCst));
    }
    for entry in backend.gauges.iter() {
        out.insert(entry.key().clone(), entry.value().load(Ordering::SeqCst));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates() {
        let backend = InProcessBackend::new();
        backend.counter("node.cleaned", 1);
        backend.counter("node.cleaned", 1);
        assert_eq!(backend.counter_value("node.cleaned"), 2);
    }

    #[test]
    fn test_timer_average() {
        let backend = InProcessBackend::new();
        backend.timer("step.execute", 10);
        backend.timer("step.execute", 30);
        assert_eq!(backend.timer_average_ms("step.execute"), Some(20.0));
    }

    #[test]
    fn test_gauge_overwrites() {
        let backend = InProcessBackend::new();
        backend.gauge("workers.in_use", 5);
        backend.gauge("workers.in_use", 7);
        assert_eq!(backend.gauge_value("workers.in_use"), 7);
    }

    #[test]
    fn test_timed_reports_duration() {
        let backend = InProcessBackend::new();
        let result = timed(&backend, "op", || 1 + 1);
        assert_eq!(result, 2);
        assert!(backend.timer_average_ms("op").is_some());
    }
}
