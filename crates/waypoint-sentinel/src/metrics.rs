//! Pulse Samples and Health Statistics
//!
//! Every pulse probe produces a [`PulseSample`]. Samples are kept in a
//! fixed-length [`PulseHistory`] per dependency (oldest evicted first) and
//! summarised into [`HealthStats`] for dashboards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Classification of a single pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

impl HealthStatus {
    /// Healthy or degraded dependencies still serve requests
    pub fn is_available(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of one pulse probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseSample {
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    pub latency_ms: u64,
    /// HTTP status returned by the probe, if it got that far
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl PulseSample {
    pub fn new(status: HealthStatus, latency_ms: u64, status_code: Option<u16>) -> Self {
        Self {
            timestamp: Utc::now(),
            status,
            latency_ms,
            status_code,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Fixed-capacity rolling history of pulse samples
#[derive(Debug, Clone)]
pub struct PulseHistory {
    samples: VecDeque<PulseSample>,
    capacity: usize,
}

impl PulseHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest once full
    pub fn push(&mut self, sample: PulseSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&PulseSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// The most recent `n` samples, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &PulseSample> {
        self.samples.iter().skip(self.samples.len().saturating_sub(n))
    }

    pub fn to_vec(&self) -> Vec<PulseSample> {
        self.samples.iter().cloned().collect()
    }
}

/// Aggregate view over a window of pulse samples
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStats {
    /// Number of samples the stats were computed from
    pub samples: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub down: usize,
    pub avg_latency_ms: u64,
    /// Share of samples that were healthy or degraded, as a percentage
    pub uptime_pct: f64,
    pub last_check: Option<PulseSample>,
}

impl HealthStats {
    /// Summarise `samples`. Returns `None` when there is nothing to summarise.
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a PulseSample>) -> Option<Self> {
        let mut stats = HealthStats {
            samples: 0,
            healthy: 0,
            degraded: 0,
            down: 0,
            avg_latency_ms: 0,
            uptime_pct: 0.0,
            last_check: None,
        };
        let mut total_latency: u64 = 0;

        for sample in samples {
            stats.samples += 1;
            total_latency += sample.latency_ms;
            match sample.status {
                HealthStatus::Healthy => stats.healthy += 1,
                HealthStatus::Degraded => stats.degraded += 1,
                HealthStatus::Down => stats.down += 1,
            }
            stats.last_check = Some(sample.clone());
        }

        if stats.samples == 0 {
            return None;
        }

        stats.avg_latency_ms = total_latency / stats.samples as u64;
        stats.uptime_pct = (stats.healthy + stats.degraded) as f64 / stats.samples as f64 * 100.0;
        Some(stats)
    }

    /// Share of samples with the given status (0.0 - 1.0)
    pub fn ratio(&self, status: HealthStatus) -> f64 {
        let count = match status {
            HealthStatus::Healthy => self.healthy,
            HealthStatus::Degraded => self.degraded,
            HealthStatus::Down => self.down,
        };
        count as f64 / self.samples as f64
    }

    /// Status of the newest sample in the window
    pub fn current(&self) -> HealthStatus {
        self.last_check
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(HealthStatus::Down)
    }

    /// Format a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Pulse: {} samples | {} healthy | {} degraded | {} down | avg {}ms | uptime {:.1}%",
            self.samples,
            self.healthy,
            self.degraded,
            self.down,
            self.avg_latency_ms,
            self.uptime_pct
        )
    }
}
