use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const LATENCY_WINDOW: usize = 1024;

/// Sliding window of per-message processing latencies
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: Arc<Mutex<VecDeque<u64>>>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Record one latency sample
    pub fn record(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        let mut samples = self.samples.lock();
        if samples.len() >= self.capacity {
            samples.pop_front();
        }
        samples.push_back(nanos);
    }

    /// Latency at percentile `p` (0.0..=1.0) in microseconds
    pub fn percentile_us(&self, p: f64) -> f64 {
        let mut sorted: Vec<u64> = self.samples.lock().iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_unstable();

        let rank = (sorted.len() as f64 * p.clamp(0.0, 1.0)).ceil() as usize;
        sorted[rank.saturating_sub(1)] as f64 / 1000.0
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counters for one message-driven block
#[derive(Debug, Clone)]
pub struct BlockMetrics {
    received: Arc<AtomicU64>,
    emitted: Arc<AtomicU64>,
    latency: LatencyWindow,
    started: Instant,
}

impl BlockMetrics {
    pub fn new() -> Self {
        Self {
            received: Arc::new(AtomicU64::new(0)),
            emitted: Arc::new(AtomicU64::new(0)),
            latency: LatencyWindow::new(LATENCY_WINDOW),
            started: Instant::now(),
        }
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_emitted(&self, count: usize) {
        self.emitted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_latency(&self, latency: Duration) {
        self.latency.record(latency);
    }

    /// Messages taken off the input queue
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Messages pushed to the output side
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Received messages per second since the block started
    pub fn throughput_mps(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.received() as f64 / elapsed
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received(),
            emitted: self.emitted(),
            throughput_mps: self.throughput_mps(),
            latency_p50_us: self.latency.percentile_us(0.50),
            latency_p95_us: self.latency.percentile_us(0.95),
            latency_p99_us: self.latency.percentile_us(0.99),
            elapsed: self.started.elapsed(),
        }
    }
}

impl Default for BlockMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`BlockMetrics`]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub emitted: u64,
    pub throughput_mps: f64,
    pub latency_p50_us: f64,
    pub latency_p95_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    pub fn format(&self) -> String {
        format!(
            "Received: {}, Emitted: {}, Throughput: {:.2} msg/s, \
             Latency P50: {:.2}µs, P95: {:.2}µs, P99: {:.2}µs, Elapsed: {:.2}s",
            self.received,
            self.emitted,
            self.throughput_mps,
            self.latency_p50_us,
            self.latency_p95_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}
