//! Per-tick settlement against a flight's risk ceiling.
//!
//! Every tick re-evaluates the flight's bets in stored order at the current multiplier. Live
//! payouts accumulate into `risk_used`; the first bet whose inclusion meets or exceeds the
//! ceiling halts evaluation, and no bet after it is paid on that tick. A flight explodes once
//! `risk_used` reaches its ceiling.

use crate::uniform;
use grandaviator_types::{BetStatus, PlaneBet};
use rand::Rng;

#[derive(Clone, Copy, Debug)]
pub struct TickInput<'a> {
    /// Bets currently in the flight's live list, in stored order.
    pub bets: &'a [PlaneBet],
    pub multiplier: f64,
    pub risk: f64,
    /// Live stakes at launch; zero marks a synthetic round.
    pub live_stakes: f64,
    pub max_demo_stake: f64,
    /// Consume the whole ceiling on this tick.
    pub forced: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SettledBet {
    /// Position in the input slice.
    pub index: usize,
    pub bet_id: String,
    pub payout: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickOutcome {
    pub risk_used: f64,
    /// Bets closed with a provisional payout this tick.
    pub settled: Vec<SettledBet>,
    /// Index of the bet that reached the ceiling, if any.
    pub halted_at: Option<usize>,
    pub explode: bool,
}

/// Evaluate one tick.
pub fn evaluate_tick<R: Rng + ?Sized>(rng: &mut R, input: TickInput<'_>) -> TickOutcome {
    let mut outcome = TickOutcome::default();
    if input.forced {
        outcome.risk_used = input.risk;
    }

    if outcome.risk_used < input.risk {
        if input.bets.is_empty() || input.live_stakes <= 0.0 {
            let stake = uniform(rng, 0.5 * input.max_demo_stake, input.max_demo_stake);
            outcome.risk_used += stake * input.multiplier;
        }

        for (index, bet) in input.bets.iter().enumerate() {
            if matches!(bet.status, BetStatus::CashedOut | BetStatus::Canceled) {
                continue;
            }
            let payout = bet.stake * input.multiplier;
            if bet.is_live() {
                outcome.risk_used += payout;
            }
            if outcome.risk_used >= input.risk {
                outcome.halted_at = Some(index);
                break;
            }
            outcome.settled.push(SettledBet {
                index,
                bet_id: bet.id.clone(),
                payout,
            });
        }
    }

    outcome.explode = outcome.risk_used >= input.risk;
    if let Some(index) = outcome.halted_at {
        tracing::debug!(
            index,
            risk = input.risk,
            risk_used = outcome.risk_used,
            "settlement halted at ceiling"
        );
    }
    outcome
}
