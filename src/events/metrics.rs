//! Lock-free metrics aggregation fed by [`super::EventBus::emit`]. Counters
//! are plain atomics; timing distributions use a bounded ring of the most
//! recent ~1000 samples per category, per spec §4.8.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{Event, EventKind};
use crate::usage::Usage;

const RESERVOIR_CAPACITY: usize = 1000;

/// A fixed-capacity window of the most recent millisecond timings in one
/// category, used to compute average/P95/P99 without unbounded memory.
struct Reservoir {
    samples: Mutex<VecDeque<u64>>,
}

impl Reservoir {
    fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(RESERVOIR_CAPACITY)),
        }
    }

    fn push(&self, value_ms: u64) {
        let mut samples = self.samples.lock();
        if samples.len() == RESERVOIR_CAPACITY {
            samples.pop_front();
        }
        samples.push_back(value_ms);
    }

    /// A consistent-ish snapshot: `(avg, p95, p99)`, all zero if empty.
    fn snapshot(&self) -> (f64, u64, u64) {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return (0.0, 0, 0);
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (avg, percentile(&sorted, 0.95), percentile(&sorted, 0.99))
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
struct Counters {
    total: u64,
    failed: u64,
}

/// Counters + timing reservoir for one category of call (runs, LLM calls,
/// tool calls).
struct CategoryMetrics {
    total: AtomicU64,
    failed: AtomicU64,
    durations: Reservoir,
}

impl CategoryMetrics {
    fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            durations: Reservoir::new(),
        }
    }

    fn record(&self, succeeded: bool, duration_ms: Option<u64>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(ms) = duration_ms {
            self.durations.push(ms);
        }
    }

    fn snapshot(&self) -> CategorySnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let (avg_ms, p95_ms, p99_ms) = self.durations.snapshot();
        CategorySnapshot {
            total,
            failed,
            success_rate: if total == 0 {
                1.0
            } else {
                (total - failed) as f64 / total as f64
            },
            avg_ms,
            p95_ms,
            p99_ms,
        }
    }
}

/// A point-in-time view of one [`CategoryMetrics`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CategorySnapshot {
    /// Total calls observed.
    pub total: u64,
    /// Of those, how many failed.
    pub failed: u64,
    /// `(total - failed) / total`, or `1.0` if no calls yet.
    pub success_rate: f64,
    /// Mean duration across the reservoir window.
    pub avg_ms: f64,
    /// 95th percentile duration across the reservoir window.
    pub p95_ms: u64,
    /// 99th percentile duration across the reservoir window.
    pub p99_ms: u64,
}

/// The shared, process-scoped metrics store. Every update is a single atomic
/// operation or a short-held `parking_lot` lock on one reservoir — there is
/// no global lock, so concurrent runs never serialize on metrics recording.
pub struct MetricsSink {
    runs: CategoryMetrics,
    llm_calls: CategoryMetrics,
    tool_calls: CategoryMetrics,
    dedupe_hits: AtomicU64,
    dedupe_lookups: AtomicU64,
    loop_detected_count: AtomicU64,
    token_usage_per_model: DashMap<String, Usage>,
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink {
    /// A fresh, all-zero metrics store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            runs: CategoryMetrics::new(),
            llm_calls: CategoryMetrics::new(),
            tool_calls: CategoryMetrics::new(),
            dedupe_hits: AtomicU64::new(0),
            dedupe_lookups: AtomicU64::new(0),
            loop_detected_count: AtomicU64::new(0),
            token_usage_per_model: DashMap::new(),
        }
    }

    /// Update counters from one emitted event. Expects the engine's events to
    /// carry the conventional payload keys documented on [`MetricsSnapshot`]'s
    /// fields; events with an unrecognized or missing payload are counted
    /// toward `total` but not toward timing/success breakdowns.
    pub fn record_event(&self, event: &Event) {
        match event.kind {
            EventKind::RunCompleted => {
                let succeeded = event.payload.get("succeeded").and_then(|v| v.as_bool()).unwrap_or(false);
                let duration_ms = event.payload.get("duration_ms").and_then(serde_json::Value::as_u64);
                self.runs.record(succeeded, duration_ms);
            }
            EventKind::LlmCallCompleted => {
                let succeeded = event.payload.get("success").and_then(|v| v.as_bool()).unwrap_or(true);
                let duration_ms = event.payload.get("duration_ms").and_then(serde_json::Value::as_u64);
                self.llm_calls.record(succeeded, duration_ms);
                if let Some(model_id) = event.payload.get("model_id").and_then(|v| v.as_str()) {
                    let usage = Usage {
                        input_tokens: event.payload.get("input_tokens").and_then(serde_json::Value::as_u64).unwrap_or(0) as u32,
                        output_tokens: event.payload.get("output_tokens").and_then(serde_json::Value::as_u64).unwrap_or(0) as u32,
                        total_tokens: 0,
                    };
                    self.token_usage_per_model
                        .entry(model_id.to_owned())
                        .and_modify(|total| *total += usage)
                        .or_insert(usage);
                }
            }
            EventKind::ToolCallCompleted => {
                let succeeded = event.payload.get("success").and_then(|v| v.as_bool()).unwrap_or(true);
                let duration_ms = event.payload.get("duration_ms").and_then(serde_json::Value::as_u64);
                self.tool_calls.record(succeeded, duration_ms);
                self.dedupe_lookups.fetch_add(1, Ordering::Relaxed);
                if event.payload.get("cache_hit").and_then(|v| v.as_bool()).unwrap_or(false) {
                    self.dedupe_hits.fetch_add(1, Ordering::Relaxed);
                }
            }
            EventKind::LoopDetected => {
                self.loop_detected_count.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    /// Take a consistent-ish snapshot of every metric. Individual counters
    /// may keep advancing concurrently during the call; this is acceptable
    /// per spec §4.8.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let lookups = self.dedupe_lookups.load(Ordering::Relaxed);
        let hits = self.dedupe_hits.load(Ordering::Relaxed);
        MetricsSnapshot {
            runs: self.runs.snapshot(),
            llm_calls: self.llm_calls.snapshot(),
            tool_calls: self.tool_calls.snapshot(),
            dedupe_hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
            loop_detected_count: self.loop_detected_count.load(Ordering::Relaxed),
            token_usage_per_model: self
                .token_usage_per_model
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }
}

/// A point-in-time copy of every metric, returned by `Agent::metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Whole-run totals/success-rate/timings, from `RunCompleted` events.
    pub runs: CategorySnapshot,
    /// Model-call totals/success-rate/timings, from `LlmCallCompleted` events.
    pub llm_calls: CategorySnapshot,
    /// Tool-call totals/success-rate/timings, from `ToolCallCompleted` events.
    pub tool_calls: CategorySnapshot,
    /// Fraction of tool calls served from the dedupe cache.
    pub dedupe_hit_rate: f64,
    /// Total number of runs the loop detector terminated.
    pub loop_detected_count: u64,
    /// Cumulative token usage, keyed by model id.
    pub token_usage_per_model: std::collections::HashMap<String, Usage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reservoir_tracks_percentiles_within_capacity() {
        let reservoir = Reservoir::new();
        for ms in 1..=100u64 {
            reservoir.push(ms);
        }
        let (avg, p95, p99) = reservoir.snapshot();
        assert!((avg - 50.5).abs() < 0.001);
        assert_eq!(p95, 95);
        assert_eq!(p99, 99);
    }

    #[test]
    fn run_completed_updates_counters() {
        let sink = MetricsSink::new();
        sink.record_event(&Event::new(
            EventKind::RunCompleted,
            "a",
            None,
            json!({"succeeded": true, "duration_ms": 42}),
        ));
        sink.record_event(&Event::new(
            EventKind::RunCompleted,
            "a",
            None,
            json!({"succeeded": false, "duration_ms": 10}),
        ));
        let snap = sink.snapshot();
        assert_eq!(snap.runs.total, 2);
        assert_eq!(snap.runs.failed, 1);
        assert!((snap.runs.success_rate - 0.5).abs() < 0.001);
    }

    #[test]
    fn dedupe_hit_rate_tracks_cache_hits() {
        let sink = MetricsSink::new();
        sink.record_event(&Event::new(
            EventKind::ToolCallCompleted,
            "a",
            Some(0),
            json!({"success": true, "duration_ms": 5, "cache_hit": true}),
        ));
        sink.record_event(&Event::new(
            EventKind::ToolCallCompleted,
            "a",
            Some(0),
            json!({"success": true, "duration_ms": 5, "cache_hit": false}),
        ));
        let snap = sink.snapshot();
        assert!((snap.dedupe_hit_rate - 0.5).abs() < 0.001);
    }
}
