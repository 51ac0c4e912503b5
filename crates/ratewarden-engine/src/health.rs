//! Component C4 — rolling success rate / response-time score per model
//! (spec §4.4).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

use ratewarden_core::ModelRef;

/// Number of recent outcomes kept per model for the rolling window.
const WINDOW_SIZE: usize = 50;
/// Latency considered "bad" for scoring purposes — used to normalize the
/// latency component of the health score.
const LATENCY_CEILING_MS: f64 = 15_000.0;

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success { response_time_ms: u64 },
    Failure,
}

struct Entry {
    recent: VecDeque<Outcome>,
}

impl Entry {
    fn new() -> Self {
        Self {
            recent: VecDeque::with_capacity(WINDOW_SIZE),
        }
    }

    fn push(&mut self, outcome: Outcome) {
        if self.recent.len() >= WINDOW_SIZE {
            self.recent.pop_front();
        }
        self.recent.push_back(outcome);
    }

    /// Blended score in roughly [0, 1]: success rate weighted primarily,
    /// average latency secondarily. A model with no history yet gets a
    /// neutral score of 0.5 so it's neither favored nor penalized against
    /// models with actual track record.
    fn score(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.5;
        }
        let total = self.recent.len() as f64;
        let successes = self
            .recent
            .iter()
            .filter(|o| matches!(o, Outcome::Success { .. }))
            .count() as f64;
        let success_rate = successes / total;

        let latencies: Vec<u64> = self
            .recent
            .iter()
            .filter_map(|o| match o {
                Outcome::Success { response_time_ms } => Some(*response_time_ms),
                Outcome::Failure => None,
            })
            .collect();
        let latency_score = if latencies.is_empty() {
            0.5
        } else {
            let avg = latencies.iter().sum::<u64>() as f64 / latencies.len() as f64;
            (1.0 - (avg / LATENCY_CEILING_MS).min(1.0)).max(0.0)
        };

        // success rate dominates; latency is a tiebreaker.
        success_rate * 0.8 + latency_score * 0.2
    }
}

pub struct HealthTracker {
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_success(&self, model: &ModelRef, response_time: Duration) {
        let mut entries = self.entries.lock();
        entries
            .entry(model.key())
            .or_insert_with(Entry::new)
            .push(Outcome::Success {
                response_time_ms: response_time.as_millis() as u64,
            });
    }

    pub fn record_failure(&self, model: &ModelRef) {
        let mut entries = self.entries.lock();
        entries
            .entry(model.key())
            .or_insert_with(Entry::new)
            .push(Outcome::Failure);
    }

    pub fn get_score(&self, model: &ModelRef) -> f64 {
        self.entries
            .lock()
            .get(&model.key())
            .map(|e| e.score())
            .unwrap_or(0.5)
    }

    /// Sort `candidates` by descending health score (stable, so ties keep
    /// the caller's original relative order).
    pub fn get_healthiest_models(&self, candidates: &[ModelRef]) -> Vec<ModelRef> {
        let entries = self.entries.lock();
        let mut scored: Vec<(f64, ModelRef)> = candidates
            .iter()
            .map(|m| {
                let score = entries.get(&m.key()).map(|e| e.score()).unwrap_or(0.5);
                (score, m.clone())
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(_, m)| m).collect()
    }

    /// Drop every tracked model's history (engine teardown).
    pub fn clear_all(&self) {
        self.entries.lock().clear();
    }

    pub fn cleanup_stale_entries(&self, _ttl_ms: u64) {
        // The rolling window is self-bounding (WINDOW_SIZE); nothing to
        // reclaim beyond what natural eviction already does. Kept as a
        // no-op method so the Janitor can call every store uniformly
        // (spec §4.12: "Every store exposes a cleanupStaleEntries method").
    }
}
