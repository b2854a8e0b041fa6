//! Cosmetic leaderboard.
//!
//! Synthetic co-players displayed beside real bets. Every draw comes from an RNG derived from
//! `(seed, flight id, tick)`, so a flight's leaderboard replays identically for the same seed
//! and never shares state with settlement.

use crate::{mix_seed, uniform, uniform_u64};
use grandaviator_types::{display_multiplier, LeaderboardEntry};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub const LEADERBOARD_SIZE: usize = 19;
pub const MIN_ENTRY_STAKE: f64 = 1.0;
pub const MAX_ENTRY_STAKE: f64 = 100.0;
pub const MIN_CASHOUT_THRESHOLD: f64 = 1.03;
pub const CASHOUT_THRESHOLD_SPREAD: f64 = 1.10;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Cosmetic state generated when a flight launches.
#[derive(Clone, Debug, PartialEq)]
pub struct CosmeticRound {
    pub leader_board: Vec<LeaderboardEntry>,
    pub total_bets: u64,
}

/// RNG for one flight tick. Tick zero is used for generation.
pub fn cosmetic_rng(seed: u64, flight_id: &str, tick: u64) -> ChaCha8Rng {
    let mixed = mix_seed(seed, flight_id) ^ tick.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    ChaCha8Rng::seed_from_u64(mixed)
}

fn masked_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let first = ALPHABET[rng.gen_range(0..ALPHABET.len())] as char;
    let last = ALPHABET[rng.gen_range(0..ALPHABET.len())] as char;
    format!("{first}***{last}")
}

impl CosmeticRound {
    /// Generate the leaderboard and the displayed bet count for a flight.
    pub fn generate(seed: u64, flight_id: &str, min_total_bets: u64, max_total_bets: u64) -> Self {
        let mut rng = cosmetic_rng(seed, flight_id, 0);
        let mut leader_board: Vec<LeaderboardEntry> = Vec::with_capacity(LEADERBOARD_SIZE);
        while leader_board.len() < LEADERBOARD_SIZE {
            let name = masked_name(&mut rng);
            if leader_board.iter().any(|entry| entry.name == name) {
                continue;
            }
            leader_board.push(LeaderboardEntry {
                name,
                stake: uniform(&mut rng, MIN_ENTRY_STAKE, MAX_ENTRY_STAKE),
                cashed_out: false,
                payout: 0.0,
                multiplier: String::new(),
            });
        }
        let total_bets = uniform_u64(&mut rng, min_total_bets, max_total_bets);
        Self {
            leader_board,
            total_bets,
        }
    }
}

/// Advance the leaderboard by one tick at `multiplier`.
///
/// One entry is picked per tick. If the multiplier clears a threshold drawn from
/// `[1.03, 1.10 × multiplier]` and the entry has not cashed out, its payout is refreshed, and it
/// is marked cashed out only when a second, independent draw picks the same entry.
pub fn advance(
    entries: &mut [LeaderboardEntry],
    seed: u64,
    flight_id: &str,
    tick: u64,
    multiplier: f64,
) {
    if entries.is_empty() {
        return;
    }
    let mut rng = cosmetic_rng(seed, flight_id, tick);
    let target = rng.gen_range(0..entries.len());
    let threshold = uniform(
        &mut rng,
        MIN_CASHOUT_THRESHOLD,
        CASHOUT_THRESHOLD_SPREAD * multiplier,
    );
    let second = rng.gen_range(0..entries.len());
    if multiplier < threshold {
        return;
    }
    let entry = &mut entries[target];
    if entry.cashed_out {
        return;
    }
    entry.multiplier = display_multiplier(multiplier);
    entry.payout = entry.stake * multiplier;
    entry.cashed_out = target == second;
}
