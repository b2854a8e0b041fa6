//! Risk ceiling and budget cascade.
//!
//! When a flight with live stakes launches, the house puts a random fraction of those stakes at
//! risk on top of the stakes themselves. The extra amount is drawn from the organization's
//! budget in priority order: amount-to-risk, then reserved balance, then both combined. If even
//! the combined budget cannot cover it, nothing extra is risked and the ceiling collapses to the
//! stakes.

use crate::uniform;
use grandaviator_types::{PlaneBet, RiskBudget, TenantRiskSettings};
use rand::Rng;

/// Share of the unspent ceiling returned to the organization after a live flight.
pub const PROFIT_SHARE_RATE: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BudgetSource {
    AmountToRisk,
    ReservedBalance,
    /// Reserved balance zeroed, remainder taken from amount-to-risk.
    Combined,
    Insufficient,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Allocation {
    /// Amount actually reserved (zero when insufficient).
    pub risk_amount: f64,
    pub source: BudgetSource,
    /// Budget after the reservation.
    pub remaining: RiskBudget,
}

/// Reserve `requested` from `budget` following the cascade.
pub fn allocate_risk(budget: RiskBudget, requested: f64) -> Allocation {
    let requested = requested.max(0.0);
    if requested <= budget.amount_to_risk {
        return Allocation {
            risk_amount: requested,
            source: BudgetSource::AmountToRisk,
            remaining: RiskBudget {
                amount_to_risk: budget.amount_to_risk - requested,
                ..budget
            },
        };
    }
    if requested <= budget.reserved_balance {
        return Allocation {
            risk_amount: requested,
            source: BudgetSource::ReservedBalance,
            remaining: RiskBudget {
                reserved_balance: budget.reserved_balance - requested,
                ..budget
            },
        };
    }
    let combined = budget.combined();
    if requested <= combined {
        return Allocation {
            risk_amount: requested,
            source: BudgetSource::Combined,
            remaining: RiskBudget {
                amount_to_risk: combined - requested,
                reserved_balance: 0.0,
            },
        };
    }
    Allocation {
        risk_amount: 0.0,
        source: BudgetSource::Insufficient,
        remaining: budget,
    }
}

/// Sum of live stakes among `bets`.
pub fn total_live_stakes(bets: &[PlaneBet]) -> f64 {
    bets.iter()
        .filter(|bet| bet.is_live())
        .map(|bet| bet.stake)
        .sum()
}

/// Extra amount to put at risk for a flight carrying `total_stakes` of live money.
pub fn requested_risk<R: Rng + ?Sized>(
    rng: &mut R,
    settings: &TenantRiskSettings,
    total_stakes: f64,
) -> f64 {
    let fraction = uniform(
        rng,
        settings.min_risk_percentage,
        settings.max_risk_percentage,
    );
    fraction * total_stakes
}

/// Ceiling for a flight without live stakes.
pub fn demo_risk<R: Rng + ?Sized>(rng: &mut R, settings: &TenantRiskSettings) -> f64 {
    uniform(
        rng,
        settings.min_demo_risk_amount,
        settings.max_demo_risk_amount,
    )
}

/// Organization's share of what a live flight did not pay out.
pub fn profit_share(risk: f64, profit_blown: f64) -> f64 {
    (risk - profit_blown) * PROFIT_SHARE_RATE
}
