//! Per-session resource metrics in fixed-capacity ring buffers.

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use settings::constants::metrics::{
    DEFAULT_UPDATE_RATE_MS, HISTORY_CAPACITY, MAX_UPDATE_RATE_MS, MIN_UPDATE_RATE_MS,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::SessionError;

/// Samples for one metric, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSeries {
    /// Milliseconds since the Unix epoch.
    pub timestamps: Vec<u64>,
    pub values: Vec<f64>,
}

impl MetricSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Ring buffer of `(timestamp, value)` pairs.
#[derive(Debug, Clone)]
pub struct MetricHistory {
    timestamps: Vec<u64>,
    values: Vec<f64>,
    cursor: usize,
    capacity: usize,
}

impl Default for MetricHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl MetricHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            timestamps: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            cursor: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn add(&mut self, timestamp: u64, value: f64) {
        if self.values.len() < self.capacity {
            self.timestamps.push(timestamp);
            self.values.push(value);
        } else {
            self.timestamps[self.cursor] = timestamp;
            self.values[self.cursor] = value;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Samples in insertion order, oldest first.
    pub fn get_data(&self) -> MetricSeries {
        if self.values.len() < self.capacity {
            return MetricSeries {
                timestamps: self.timestamps.clone(),
                values: self.values.clone(),
            };
        }

        let mut series = MetricSeries {
            timestamps: Vec::with_capacity(self.capacity),
            values: Vec::with_capacity(self.capacity),
        };
        series.timestamps.extend_from_slice(&self.timestamps[self.cursor..]);
        series.timestamps.extend_from_slice(&self.timestamps[..self.cursor]);
        series.values.extend_from_slice(&self.values[self.cursor..]);
        series.values.extend_from_slice(&self.values[..self.cursor]);
        series
    }

    pub fn latest(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let index = (self.cursor + self.capacity - 1) % self.capacity;
        self.values.get(index).copied()
    }
}

/// Parse `"45.2%"` (or a bare number) into a percentage.
pub fn parse_percent(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
    parse_finite(number)
}

/// Parse `"405 MB"`, `"1.2 GB"`, `"512KiB"` into megabytes (base 1024).
/// A bare number is taken as megabytes.
pub fn parse_size_mb(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value = parse_finite(number.trim())?;

    let factor = match unit.trim().to_ascii_lowercase().as_str() {
        "b" => 1.0 / (1024.0 * 1024.0),
        "k" | "kb" | "kib" => 1.0 / 1024.0,
        "" | "m" | "mb" | "mib" => 1.0,
        "g" | "gb" | "gib" => 1024.0,
        "t" | "tb" | "tib" => 1024.0 * 1024.0,
        _ => return None,
    };
    Some(value * factor)
}

/// Parse `"3.1 MB/s"` into megabytes per second.
pub fn parse_rate_mb(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let size = trimmed
        .strip_suffix("/s")
        .or_else(|| trimmed.strip_suffix("/S"))
        .or_else(|| trimmed.strip_suffix("ps"))
        .unwrap_or(trimmed);
    parse_size_mb(size)
}

fn parse_finite(number: &str) -> Option<f64> {
    number.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Copy)]
enum SampleKind {
    Percent,
    Size,
    Rate,
}

/// Raw field name -> (metric name, parser).
fn classify_field(field: &str) -> Option<(&'static str, SampleKind)> {
    Some(match field {
        "cpu" => ("cpu", SampleKind::Percent),
        "memory_used" | "memory" => ("memory", SampleKind::Size),
        "disk_read" => ("disk_read", SampleKind::Rate),
        "disk_write" => ("disk_write", SampleKind::Rate),
        "network_rx" | "net_rx" => ("network_rx", SampleKind::Rate),
        "network_tx" | "net_tx" => ("network_tx", SampleKind::Rate),
        _ => return None,
    })
}

/// Parse a heterogeneous batch of raw samples into metric values.
///
/// Malformed or unknown fields are skipped; derived `disk_io` and `network`
/// are the sum of their directional parts, or an alias when only one is present.
pub fn parse_stats<'a>(samples: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<(&'static str, f64)> {
    let mut parsed: Vec<(&'static str, f64)> = Vec::new();
    for (field, raw) in samples {
        let Some((metric, kind)) = classify_field(field) else {
            tracing::trace!("Ignoring unknown metric field {:?}", field);
            continue;
        };
        let value = match kind {
            SampleKind::Percent => parse_percent(raw),
            SampleKind::Size => parse_size_mb(raw),
            SampleKind::Rate => parse_rate_mb(raw),
        };
        match value {
            Some(value) => {
                parsed.retain(|(name, _)| *name != metric);
                parsed.push((metric, value));
            }
            None => tracing::debug!("Skipping malformed {} sample {:?}", field, raw),
        }
    }

    let get = |parsed: &[(&'static str, f64)], name: &str| {
        parsed.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    };
    let derived = [
        ("disk_io", get(&parsed, "disk_read"), get(&parsed, "disk_write")),
        ("network", get(&parsed, "network_rx"), get(&parsed, "network_tx")),
    ];
    for (name, a, b) in derived {
        let value = match (a, b) {
            (Some(a), Some(b)) => Some(a + b),
            (Some(v), None) | (None, Some(v)) => Some(v),
            (None, None) => None,
        };
        if let Some(value) = value {
            parsed.push((name, value));
        }
    }
    parsed
}

struct SessionMetrics {
    histories: Mutex<FxHashMap<&'static str, MetricHistory>>,
    update_rate_ms: AtomicU64,
}

/// All metric histories, keyed by session.
///
/// Each session's histories sit behind their own lock so sampling one
/// session never contends with another or with session I/O.
pub struct MetricsRecorder {
    sessions: RwLock<FxHashMap<String, Arc<SessionMetrics>>>,
    default_rate_ms: u64,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_RATE_MS)
    }
}

impl MetricsRecorder {
    pub fn new(default_rate_ms: u64) -> Self {
        Self {
            sessions: RwLock::new(FxHashMap::default()),
            default_rate_ms: default_rate_ms.clamp(MIN_UPDATE_RATE_MS, MAX_UPDATE_RATE_MS),
        }
    }

    fn session(&self, session_id: &str) -> Arc<SessionMetrics> {
        if let Some(metrics) = self.sessions.read().get(session_id) {
            return metrics.clone();
        }
        self.sessions
            .write()
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(SessionMetrics {
                    histories: Mutex::new(FxHashMap::default()),
                    update_rate_ms: AtomicU64::new(self.default_rate_ms),
                })
            })
            .clone()
    }

    /// Record a batch of raw samples stamped with the current time.
    /// Returns how many metrics were recorded.
    pub fn record_stats<'a>(
        &self,
        session_id: &str,
        samples: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> usize {
        self.record_stats_at(session_id, samples, now_millis())
    }

    pub fn record_stats_at<'a>(
        &self,
        session_id: &str,
        samples: impl IntoIterator<Item = (&'a str, &'a str)>,
        timestamp: u64,
    ) -> usize {
        let parsed = parse_stats(samples);
        if parsed.is_empty() {
            return 0;
        }
        let metrics = self.session(session_id);
        let mut histories = metrics.histories.lock();
        for (name, value) in &parsed {
            histories.entry(*name).or_default().add(timestamp, *value);
        }
        parsed.len()
    }

    pub fn history(&self, session_id: &str, metric: &str) -> MetricSeries {
        let Some(metrics) = self.sessions.read().get(session_id).cloned() else {
            return MetricSeries::default();
        };
        let histories = metrics.histories.lock();
        histories
            .get(metric)
            .map(MetricHistory::get_data)
            .unwrap_or_default()
    }

    pub fn latest(&self, session_id: &str, metric: &str) -> Option<f64> {
        let metrics = self.sessions.read().get(session_id).cloned()?;
        let histories = metrics.histories.lock();
        histories.get(metric).and_then(MetricHistory::latest)
    }

    pub fn metric_names(&self, session_id: &str) -> Vec<&'static str> {
        let Some(metrics) = self.sessions.read().get(session_id).cloned() else {
            return Vec::new();
        };
        let mut names: Vec<_> = metrics.histories.lock().keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn set_update_rate(&self, session_id: &str, rate_ms: u64) -> Result<(), SessionError> {
        if !(MIN_UPDATE_RATE_MS..=MAX_UPDATE_RATE_MS).contains(&rate_ms) {
            return Err(SessionError::InvalidUpdateRate(rate_ms));
        }
        self.session(session_id)
            .update_rate_ms
            .store(rate_ms, Ordering::Relaxed);
        Ok(())
    }

    pub fn update_rate(&self, session_id: &str) -> Duration {
        let rate_ms = self
            .sessions
            .read()
            .get(session_id)
            .map(|m| m.update_rate_ms.load(Ordering::Relaxed))
            .unwrap_or(self.default_rate_ms);
        Duration::from_millis(rate_ms)
    }

    /// Drop every buffer and the update rate for a session.
    pub fn cleanup_session_metrics(&self, session_id: &str) {
        if self.sessions.write().remove(session_id).is_some() {
            tracing::debug!(session_id, "Cleaned up session metrics");
        }
    }

    pub fn tracked_sessions(&self) -> usize {
        self.sessions.read().len()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
