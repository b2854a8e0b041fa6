//! Grandaviator execution layer.
//!
//! Pure round mechanics used by the server's per-organization engine: the flight lifecycle
//! schedule, the risk ceiling and budget cascade, multiplier growth, per-tick settlement, the
//! explosion history ring, and the cosmetic leaderboard.
//!
//! ## Determinism requirements
//! - Do not use wall-clock time here; the caller passes timestamps and durations in.
//! - Do not create randomness here; every sampling function takes the caller's RNG, and the
//!   leaderboard derives its own RNG from `(seed, flight id, tick)`.
//! - Never perform I/O. Callers persist the outcomes through their round store and ledger.

pub mod history;
pub mod leaderboard;
pub mod multiplier;
pub mod risk;
pub mod round_scheduler;
pub mod settlement;

pub use history::{HistoryRing, DEFAULT_HISTORY_CAPACITY};
pub use leaderboard::{CosmeticRound, LEADERBOARD_SIZE};
pub use multiplier::grow_multiplier;
pub use risk::{allocate_risk, profit_share, Allocation, BudgetSource};
pub use round_scheduler::{
    Countdown, CountdownStep, ExplosionCounter, PhaseConfig, ResumePoint, RoundScheduler,
};
pub use settlement::{evaluate_tick, SettledBet, TickInput, TickOutcome};

use rand::Rng;

/// Sample uniformly from `[low, high]`, returning `low` when the range is empty or inverted.
pub fn uniform<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> f64 {
    if !low.is_finite() || !high.is_finite() || high <= low {
        return low;
    }
    rng.gen_range(low..=high)
}

/// Derive a per-label seed (an organization or a flight id) from a base seed.
pub fn mix_seed(seed: u64, label: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in label.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    seed ^ hash.rotate_left(17)
}

/// Integer variant of [`uniform`].
pub fn uniform_u64<R: Rng + ?Sized>(rng: &mut R, low: u64, high: u64) -> u64 {
    if high <= low {
        return low;
    }
    rng.gen_range(low..=high)
}
