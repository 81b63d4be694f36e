//! Thread-safe metrics collection
//!
//! Atomic counters for high-frequency events and mutex-protected maps for
//! per-handler statistics, exposed as a serializable snapshot on `/metrics`.

use crate::llm::provider::TokenUsage;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Samples kept per timing series
const MAX_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    turns_received: AtomicU64,
    turns_in_flight: AtomicU64,
    turns_completed: AtomicU64,
    last_turn_at: AtomicU64,
    turn_times: Mutex<Vec<u64>>,

    plans_created: AtomicU64,
    plan_fallbacks: AtomicU64,

    handler_stats: Mutex<HashMap<String, HandlerStats>>,

    relaxations: Mutex<HashMap<String, u64>>,
    collections_swept: AtomicU64,
    sweep_skips: AtomicU64,
    sweeps_completed: AtomicU64,
    last_sweep_at: AtomicU64,
    vector_store_reachable: AtomicBool,

    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,

    uptime_start: AtomicU64,
}

#[derive(Debug, Default)]
struct HandlerStats {
    invocations: u64,
    failures: u64,
    durations: Vec<u64>,
    last_invocation: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            turns_received: AtomicU64::new(0),
            turns_in_flight: AtomicU64::new(0),
            turns_completed: AtomicU64::new(0),
            last_turn_at: AtomicU64::new(0),
            turn_times: Mutex::new(Vec::new()),
            plans_created: AtomicU64::new(0),
            plan_fallbacks: AtomicU64::new(0),
            handler_stats: Mutex::new(HashMap::new()),
            relaxations: Mutex::new(HashMap::new()),
            collections_swept: AtomicU64::new(0),
            sweep_skips: AtomicU64::new(0),
            sweeps_completed: AtomicU64::new(0),
            last_sweep_at: AtomicU64::new(0),
            vector_store_reachable: AtomicBool::new(true),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Turn metrics
    pub fn turn_received(&self) {
        self.turns_received.fetch_add(1, Ordering::Relaxed);
        self.turns_in_flight.fetch_add(1, Ordering::Relaxed);
        self.last_turn_at
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn turn_completed(&self, duration: Duration) {
        self.turns_completed.fetch_add(1, Ordering::Relaxed);
        // Saturating: a completed re-entry was never counted as received
        let _ = self
            .turns_in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
        if let Ok(mut times) = self.turn_times.lock() {
            push_bounded(&mut times, duration.as_millis() as u64);
        }
    }

    // Planning metrics
    pub fn plan_created(&self, fallback: bool) {
        self.plans_created.fetch_add(1, Ordering::Relaxed);
        if fallback {
            self.plan_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Handler metrics
    pub fn handler_finished(&self, handler: &str, duration: Duration, success: bool) {
        if let Ok(mut stats) = self.handler_stats.lock() {
            let entry = stats.entry(handler.to_string()).or_default();
            entry.invocations += 1;
            entry.last_invocation = current_timestamp();
            push_bounded(&mut entry.durations, duration.as_millis() as u64);
            if !success {
                entry.failures += 1;
            }
        }
    }

    // Retrieval and sweep metrics
    pub fn retrieval_relaxed(&self, stage: &str) {
        if let Ok(mut relaxations) = self.relaxations.lock() {
            *relaxations.entry(stage.to_string()).or_insert(0) += 1;
        }
    }

    pub fn sweep_completed(&self, deleted: u64, skipped: u64) {
        self.collections_swept.fetch_add(deleted, Ordering::Relaxed);
        self.sweep_skips.fetch_add(skipped, Ordering::Relaxed);
        self.sweeps_completed.fetch_add(1, Ordering::Relaxed);
        self.last_sweep_at
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn set_vector_store_reachable(&self, reachable: bool) {
        self.vector_store_reachable
            .store(reachable, Ordering::Relaxed);
    }

    pub fn tokens_used(&self, usage: &TokenUsage) {
        self.prompt_tokens
            .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);
    }

    /// Unix seconds of the last sweep pass, 0 if none ran
    pub fn last_sweep_at(&self) -> u64 {
        self.last_sweep_at.load(Ordering::Relaxed)
    }

    /// Unix seconds of the last received turn, 0 if none
    pub fn last_turn_at(&self) -> u64 {
        self.last_turn_at.load(Ordering::Relaxed)
    }

    pub fn vector_store_reachable(&self) -> bool {
        self.vector_store_reachable.load(Ordering::Relaxed)
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.turns_received,
            &self.turns_in_flight,
            &self.turns_completed,
            &self.last_turn_at,
            &self.plans_created,
            &self.plan_fallbacks,
            &self.collections_swept,
            &self.sweep_skips,
            &self.sweeps_completed,
            &self.last_sweep_at,
            &self.prompt_tokens,
            &self.completion_tokens,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.vector_store_reachable.store(true, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut times) = self.turn_times.lock() {
            times.clear();
        }
        if let Ok(mut stats) = self.handler_stats.lock() {
            stats.clear();
        }
        if let Ok(mut relaxations) = self.relaxations.lock() {
            relaxations.clear();
        }
    }

    fn turn_metrics(&self) -> TurnMetrics {
        let (avg, p50, p95) = match self.turn_times.lock() {
            Ok(times) if !times.is_empty() => {
                let mut sorted = times.clone();
                sorted.sort_unstable();
                (
                    sorted.iter().sum::<u64>() as f64 / sorted.len() as f64,
                    percentile(&sorted, 50.0),
                    percentile(&sorted, 95.0),
                )
            }
            _ => (0.0, 0.0, 0.0),
        };

        TurnMetrics {
            turns_received: self.turns_received.load(Ordering::Relaxed),
            turns_in_flight: self.turns_in_flight.load(Ordering::Relaxed),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
            last_turn_at: self.last_turn_at.load(Ordering::Relaxed),
            avg_turn_time_ms: avg,
            turn_time_p50_ms: p50,
            turn_time_p95_ms: p95,
        }
    }

    fn handler_metrics(&self) -> HashMap<String, HandlerStatsSnapshot> {
        let Ok(stats) = self.handler_stats.lock() else {
            return HashMap::new();
        };
        stats
            .iter()
            .map(|(name, s)| {
                let avg = if s.durations.is_empty() {
                    0.0
                } else {
                    s.durations.iter().sum::<u64>() as f64 / s.durations.len() as f64
                };
                let success_rate = if s.invocations == 0 {
                    0.0
                } else {
                    (s.invocations - s.failures) as f64 / s.invocations as f64
                };
                (
                    name.clone(),
                    HandlerStatsSnapshot {
                        invocations: s.invocations,
                        failures: s.failures,
                        avg_duration_ms: avg,
                        success_rate,
                        last_invocation: s.last_invocation,
                    },
                )
            })
            .collect()
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let prompt_tokens = self.prompt_tokens.load(Ordering::Relaxed);
        let completion_tokens = self.completion_tokens.load(Ordering::Relaxed);

        MetricsSnapshot {
            turns: self.turn_metrics(),
            planning: PlanningMetrics {
                plans_created: self.plans_created.load(Ordering::Relaxed),
                plan_fallbacks: self.plan_fallbacks.load(Ordering::Relaxed),
            },
            handlers: self.handler_metrics(),
            retrieval: RetrievalMetrics {
                relaxations: self
                    .relaxations
                    .lock()
                    .map(|r| r.clone())
                    .unwrap_or_default(),
                collections_swept: self.collections_swept.load(Ordering::Relaxed),
                sweep_skips: self.sweep_skips.load(Ordering::Relaxed),
                sweeps_completed: self.sweeps_completed.load(Ordering::Relaxed),
                last_sweep_at: self.last_sweep_at.load(Ordering::Relaxed),
                vector_store_reachable: self.vector_store_reachable(),
            },
            tokens: TokenMetrics {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub turns: TurnMetrics,
    pub planning: PlanningMetrics,
    pub handlers: HashMap<String, HandlerStatsSnapshot>,
    pub retrieval: RetrievalMetrics,
    pub tokens: TokenMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct TurnMetrics {
    pub turns_received: u64,
    pub turns_in_flight: u64,
    pub turns_completed: u64,
    pub last_turn_at: u64,
    pub avg_turn_time_ms: f64,
    pub turn_time_p50_ms: f64,
    pub turn_time_p95_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct PlanningMetrics {
    pub plans_created: u64,
    pub plan_fallbacks: u64,
}

#[derive(Debug, Serialize)]
pub struct HandlerStatsSnapshot {
    pub invocations: u64,
    pub failures: u64,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
    pub last_invocation: u64,
}

#[derive(Debug, Serialize)]
pub struct RetrievalMetrics {
    pub relaxations: HashMap<String, u64>,
    pub collections_swept: u64,
    pub sweep_skips: u64,
    pub sweeps_completed: u64,
    pub last_sweep_at: u64,
    pub vector_store_reachable: bool,
}

#[derive(Debug, Serialize)]
pub struct TokenMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn push_bounded(samples: &mut Vec<u64>, value: u64) {
    samples.push(value);
    if samples.len() > MAX_SAMPLES {
        samples.remove(0);
    }
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}
