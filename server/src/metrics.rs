use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const LATENCY_BUCKET_COUNT: usize = 10;
const LATENCY_BUCKETS_MS: [u64; LATENCY_BUCKET_COUNT] = [1, 2, 5, 10, 25, 50, 100, 250, 500, 1000];

#[derive(Clone, Debug, Serialize)]
pub struct LatencySnapshot {
    pub buckets_ms: Vec<u64>,
    pub counts: Vec<u64>,
    pub overflow: u64,
    pub count: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
}

#[derive(Default)]
struct LatencyMetrics {
    buckets: [AtomicU64; LATENCY_BUCKET_COUNT],
    overflow: AtomicU64,
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyMetrics {
    fn record(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);

        match LATENCY_BUCKETS_MS.iter().position(|bucket| ms <= *bucket) {
            Some(idx) => {
                self.buckets[idx].fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.overflow.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total_ms = self.total_ms.load(Ordering::Relaxed);
        let avg_ms = if count > 0 {
            total_ms as f64 / count as f64
        } else {
            0.0
        };
        LatencySnapshot {
            buckets_ms: LATENCY_BUCKETS_MS.to_vec(),
            counts: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            overflow: self.overflow.load(Ordering::Relaxed),
            count,
            avg_ms,
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct EngineMetricsSnapshot {
    pub flights_launched: u64,
    pub flights_exploded: u64,
    pub forced_explosions: u64,
    pub bets_placed: u64,
    pub cashouts: u64,
    pub cancels: u64,
    pub store_errors: u64,
    pub tick: LatencySnapshot,
}

/// Counters shared by every round engine and the betting surface.
#[derive(Default)]
pub struct EngineMetrics {
    flights_launched: AtomicU64,
    flights_exploded: AtomicU64,
    forced_explosions: AtomicU64,
    bets_placed: AtomicU64,
    cashouts: AtomicU64,
    cancels: AtomicU64,
    store_errors: AtomicU64,
    tick: LatencyMetrics,
}

impl EngineMetrics {
    pub fn inc_flights_launched(&self) {
        self.flights_launched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_flights_exploded(&self) {
        self.flights_exploded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_forced_explosions(&self) {
        self.forced_explosions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_bets_placed(&self) {
        self.bets_placed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cashouts(&self) {
        self.cashouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cancels(&self) {
        self.cancels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_store_errors(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Time spent evaluating and writing one tick.
    pub fn record_tick(&self, duration: Duration) {
        self.tick.record(duration);
    }

    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            flights_launched: self.flights_launched.load(Ordering::Relaxed),
            flights_exploded: self.flights_exploded.load(Ordering::Relaxed),
            forced_explosions: self.forced_explosions.load(Ordering::Relaxed),
            bets_placed: self.bets_placed.load(Ordering::Relaxed),
            cashouts: self.cashouts.load(Ordering::Relaxed),
            cancels: self.cancels.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            tick: self.tick.snapshot(),
        }
    }
}
