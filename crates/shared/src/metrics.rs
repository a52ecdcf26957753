//! # Metrics Collection Module
//!
//! Lock-free request counters for the prediction endpoint.
//!
//! All counters are plain atomics updated with relaxed ordering; a
//! snapshot is a best-effort consistent view, which is all the `/metrics`
//! endpoint needs.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Thread-safe metrics collector for prediction traffic
///
/// ## Usage Example
///
/// ```rust
/// use skinlens_shared::MetricsCollector;
/// use std::time::Duration;
///
/// let metrics = MetricsCollector::new();
/// metrics.record_request();
/// metrics.record_prediction(Duration::from_millis(42), false);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.total_requests, 1);
/// assert_eq!(snapshot.successful_predictions, 1);
/// ```
#[derive(Debug)]
pub struct MetricsCollector {
    total_requests: AtomicU64,
    successful_predictions: AtomicU64,
    failed_requests: AtomicU64,
    /// Predictions whose top probability fell below the confidence threshold
    uncertain_predictions: AtomicU64,
    /// Cumulative time spent in successful predictions, in microseconds
    inference_time_us: AtomicU64,
    started_at: Instant,
}

/// Point-in-time view of the collected metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Requests received on the prediction endpoint
    pub total_requests: u64,
    /// Requests answered with a prediction
    pub successful_predictions: u64,
    /// Requests answered with an error body
    pub failed_requests: u64,
    /// Predictions reported with the uncertain label
    pub uncertain_predictions: u64,
    /// Mean latency of successful predictions in milliseconds
    pub avg_inference_time_ms: f64,
    /// Seconds since the collector was created
    pub uptime_seconds: u64,
}

impl MetricsCollector {
    /// Creates a collector with all counters at zero
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_predictions: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            uncertain_predictions: AtomicU64::new(0),
            inference_time_us: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Records an incoming prediction request
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful prediction and its latency
    pub fn record_prediction(&self, duration: Duration, uncertain: bool) {
        self.successful_predictions.fetch_add(1, Ordering::Relaxed);
        if uncertain {
            self.uncertain_predictions.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.inference_time_us.fetch_add(micros, Ordering::Relaxed);
    }

    /// Records a request that was answered with an error
    pub fn record_error(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a serialisable snapshot of the current counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let successful = self.successful_predictions.load(Ordering::Relaxed);
        let total_us = self.inference_time_us.load(Ordering::Relaxed);
        let avg_inference_time_ms = if successful > 0 {
            total_us as f64 / successful as f64 / 1000.0
        } else {
            0.0
        };

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_predictions: successful,
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            uncertain_predictions: self.uncertain_predictions.load(Ordering::Relaxed),
            avg_inference_time_ms,
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSnapshot {
    /// Fraction of requests that produced a prediction
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        self.successful_predictions as f64 / self.total_requests as f64
    }
}
