//! Service metrics and statistics tracking for the risk assessment service.

use crate::types::assessment::RiskTier;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Processing times kept for percentile estimates
const MAX_SAMPLES: usize = 10_000;

/// Metrics collector for assessment requests
pub struct ServiceMetrics {
    /// Assessments that produced a prediction
    pub assessments_processed: AtomicU64,
    /// Predictions delivered without an explanation
    pub attribution_failures: AtomicU64,
    /// Terminal failures by kind
    failures: RwLock<HashMap<String, u64>>,
    /// Assessments by risk tier
    by_tier: RwLock<HashMap<String, u64>>,
    /// Processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Death probability distribution, 10 percentage-point buckets
    probability_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            assessments_processed: AtomicU64::new(0),
            attribution_failures: AtomicU64::new(0),
            failures: RwLock::new(HashMap::new()),
            by_tier: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            probability_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a successful assessment
    pub fn record_assessment(&self, processing_time: Duration, death_probability: f64, tier: RiskTier) {
        self.assessments_processed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            if times.len() > MAX_SAMPLES {
                times.drain(0..MAX_SAMPLES / 2);
            }
        }

        let bucket = (death_probability / 10.0).clamp(0.0, 9.0) as usize;
        if let Ok(mut buckets) = self.probability_buckets.write() {
            buckets[bucket] += 1;
        }

        if let Ok(mut by_tier) = self.by_tier.write() {
            *by_tier.entry(tier.as_str().to_string()).or_insert(0) += 1;
        }
    }

    /// Record a request that ended without a prediction
    pub fn record_failure(&self, kind: &str) {
        if let Ok(mut failures) = self.failures.write() {
            *failures.entry(kind.to_string()).or_insert(0) += 1;
        }
    }

    /// Record a prediction whose explanation failed
    pub fn record_attribution_failure(&self) {
        self.attribution_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let mut sorted = match self.processing_times.read() {
            Ok(times) if !times.is_empty() => times.clone(),
            _ => return ProcessingStats::default(),
        };
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: sorted[count - 1],
        }
    }

    /// Get current throughput (assessments per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.assessments_processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_probability_distribution(&self) -> [u64; 10] {
        self.probability_buckets
            .read()
            .map(|buckets| *buckets)
            .unwrap_or_default()
    }

    pub fn get_by_tier(&self) -> HashMap<String, u64> {
        self.by_tier.read().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn get_failures(&self) -> HashMap<String, u64> {
        self.failures.read().map(|m| m.clone()).unwrap_or_default()
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            assessments_processed: self.assessments_processed.load(Ordering::Relaxed),
            attribution_failures: self.attribution_failures.load(Ordering::Relaxed),
            throughput: self.get_throughput(),
            by_tier: self.get_by_tier(),
            failures: self.get_failures(),
            processing: self.get_processing_stats(),
            death_probability_distribution: self.get_probability_distribution(),
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let snapshot = self.snapshot();
        let processing = &snapshot.processing;
        let failed: u64 = snapshot.failures.values().sum();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║           SURVIVAL RISK SERVICE - METRICS SUMMARY            ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Assessments: {:>8}  │  Throughput: {:>6.2} req/s           ║",
            snapshot.assessments_processed, snapshot.throughput
        );
        info!(
            "║ Failed:      {:>8}  │  Without attribution: {:>8}      ║",
            failed, snapshot.attribution_failures
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Processing Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Assessments by Risk Tier:                                    ║");
        for tier in [RiskTier::Low, RiskTier::Medium, RiskTier::High] {
            let count = snapshot.by_tier.get(tier.as_str()).copied().unwrap_or(0);
            let pct = if snapshot.assessments_processed > 0 {
                (count as f64 / snapshot.assessments_processed as f64) * 100.0
            } else {
                0.0
            };
            info!("║   {:10}: {:>6} ({:>5.1}%)                                ║", tier.as_str(), count, pct);
        }
        if !snapshot.failures.is_empty() {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!("║ Failures by Kind:                                            ║");
            for (kind, count) in &snapshot.failures {
                info!("║   {:18}: {:>6}                                 ║", kind, count);
            }
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Death Probability Distribution:                              ║");
        let total: u64 = snapshot.death_probability_distribution.iter().sum();
        for (i, &count) in snapshot.death_probability_distribution.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:>3}-{:>3}%: {:>6} ({:>5.1}%) {}",
                i * 10,
                (i + 1) * 10,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Serializable view of the service metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub assessments_processed: u64,
    pub attribution_failures: u64,
    pub throughput: f64,
    pub by_tier: HashMap<String, u64>,
    pub failures: HashMap<String, u64>,
    pub processing: ProcessingStats,
    pub death_probability_distribution: [u64; 10],
}

/// Periodic metrics reporter
pub struct MetricsReporter {
    metrics: Arc<ServiceMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServiceMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
