use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const LATENCY_WINDOW: usize = 1000;

/// Bounded history of async job durations.
///
/// Keeps the most recent `capacity` samples; older ones fall out as new
/// ones arrive. Clones share the same history.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    recent: Arc<Mutex<VecDeque<Duration>>>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let mut recent = self.recent.lock();
        while recent.len() >= self.capacity {
            recent.pop_front();
        }
        recent.push_back(elapsed);
    }

    /// Nearest-rank quantile `q` (clamped to `[0, 1]`) of the retained
    /// samples in microseconds, or zero when nothing was recorded.
    pub fn quantile_us(&self, q: f64) -> f64 {
        let mut ranked: Vec<Duration> = self.recent.lock().iter().copied().collect();
        if ranked.is_empty() {
            return 0.0;
        }
        ranked.sort_unstable();
        let rank = (ranked.len() as f64 * q.clamp(0.0, 1.0)).ceil() as usize;
        let pick = ranked[rank.clamp(1, ranked.len()) - 1];
        pick.as_nanos() as f64 / 1000.0
    }

    pub fn len(&self) -> usize {
        self.recent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.lock().is_empty()
    }
}

/// Per-stage counters, shared by clone
#[derive(Debug, Clone)]
pub struct StageMetrics {
    elements_pushed: Arc<AtomicU64>,
    pulls: Arc<AtomicU64>,
    elements_dropped: Arc<AtomicU64>,
    /// Latency of asynchronous jobs launched by the stage
    job_latency: LatencyWindow,
    created_at: Instant,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self {
            elements_pushed: Arc::new(AtomicU64::new(0)),
            pulls: Arc::new(AtomicU64::new(0)),
            elements_dropped: Arc::new(AtomicU64::new(0)),
            job_latency: LatencyWindow::new(LATENCY_WINDOW),
            created_at: Instant::now(),
        }
    }

    pub fn record_push(&self) {
        self.elements_pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pull(&self) {
        self.pulls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.elements_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_job_latency(&self, elapsed: Duration) {
        self.job_latency.record(elapsed);
    }

    pub fn total_pushed(&self) -> u64 {
        self.elements_pushed.load(Ordering::Relaxed)
    }

    pub fn total_pulls(&self) -> u64 {
        self.pulls.load(Ordering::Relaxed)
    }

    pub fn total_dropped(&self) -> u64 {
        self.elements_dropped.load(Ordering::Relaxed)
    }

    pub fn job_count(&self) -> usize {
        self.job_latency.len()
    }

    /// Elements pushed downstream per second since creation
    pub fn throughput_eps(&self) -> f64 {
        let elapsed = self.created_at.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_pushed() as f64 / elapsed
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_pushed: self.total_pushed(),
            total_pulls: self.total_pulls(),
            total_dropped: self.total_dropped(),
            throughput_eps: self.throughput_eps(),
            job_latency_p50_us: self.job_latency.quantile_us(0.50),
            job_latency_p95_us: self.job_latency.quantile_us(0.95),
            job_latency_p99_us: self.job_latency.quantile_us(0.99),
            elapsed: self.created_at.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of stage metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_pushed: u64,
    pub total_pulls: u64,
    pub total_dropped: u64,
    pub throughput_eps: f64,
    pub job_latency_p50_us: f64,
    pub job_latency_p95_us: f64,
    pub job_latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    pub fn format(&self) -> String {
        format!(
            "Pushed: {}, Pulls: {}, Dropped: {}, Throughput: {:.2} el/s, \
             Job latency P50: {:.2}µs, P95: {:.2}µs, P99: {:.2}µs, Elapsed: {:.2}s",
            self.total_pushed,
            self.total_pulls,
            self.total_dropped,
            self.throughput_eps,
            self.job_latency_p50_us,
            self.job_latency_p95_us,
            self.job_latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_window_quantiles() {
        let window = LatencyWindow::new(10);
        assert_eq!(window.quantile_us(0.5), 0.0);
        for i in (1..=10).rev() {
            window.record(Duration::from_micros(i));
        }
        assert_eq!(window.quantile_us(0.5), 5.0);
        assert_eq!(window.quantile_us(0.0), 1.0);
        assert_eq!(window.quantile_us(1.0), 10.0);
    }

    #[test]
    fn test_latency_window_keeps_latest() {
        let window = LatencyWindow::new(2);
        for micros in [100, 1, 2] {
            window.record(Duration::from_micros(micros));
        }
        assert_eq!(window.len(), 2);
        assert_eq!(window.quantile_us(1.0), 2.0);
    }

    #[test]
    fn test_stage_metrics_shared_by_clone() {
        let metrics = StageMetrics::new();
        let observer = metrics.clone();
        for _ in 0..10 {
            metrics.record_push();
            metrics.record_pull();
        }
        metrics.record_dropped(3);
        assert_eq!(observer.total_pushed(), 10);
        assert_eq!(observer.total_pulls(), 10);
        assert_eq!(observer.snapshot().total_dropped, 3);
    }
}
