use serde::{Deserialize, Serialize};
use thiserror::Error;

const SECONDS_PER_DAY: i64 = 86_400;

/// Per-organization risk configuration and budget.
///
/// `amount_to_risk` and `reserved_balance` form the disposable budget the engine draws on when
/// a flight carries live stakes; the remaining fields shape synthetic rounds and growth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRiskSettings {
    pub org_id: String,
    pub license_expiration: i64,
    pub min_total_bets: u64,
    pub max_total_bets: u64,
    pub min_demo_risk_amount: f64,
    pub max_demo_risk_amount: f64,
    pub min_risk_percentage: f64,
    pub max_risk_percentage: f64,
    pub max_multiplier_shift: f64,
    pub max_demo_stake: f64,
    pub auto_explode_after: u64,
    pub amount_to_risk: f64,
    pub reserved_balance: f64,
}

impl TenantRiskSettings {
    /// Settings created on an organization's first subscription.
    pub fn new(org_id: impl Into<String>, license_expiration: i64) -> Self {
        Self {
            org_id: org_id.into(),
            license_expiration,
            min_total_bets: 100,
            max_total_bets: 1000,
            min_demo_risk_amount: 10.0,
            max_demo_risk_amount: 100.0,
            min_risk_percentage: 0.5,
            max_risk_percentage: 1.5,
            max_multiplier_shift: 1.4,
            max_demo_stake: 1.0,
            auto_explode_after: 0,
            amount_to_risk: 0.0,
            reserved_balance: 0.0,
        }
    }

    pub fn license_active(&self, now: i64) -> bool {
        self.license_expiration > now
    }

    pub fn budget(&self) -> RiskBudget {
        RiskBudget {
            amount_to_risk: self.amount_to_risk,
            reserved_balance: self.reserved_balance,
        }
    }

    /// Apply a patch, rejecting it (and leaving `self` untouched) if the result is inconsistent.
    pub fn apply(&mut self, patch: &SettingsPatch) -> Result<(), SettingsError> {
        let mut next = self.clone();
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(value) = patch.$field { next.$field = value; })*
            };
        }
        set!(
            license_expiration,
            min_total_bets,
            max_total_bets,
            min_demo_risk_amount,
            max_demo_risk_amount,
            min_risk_percentage,
            max_risk_percentage,
            max_multiplier_shift,
            max_demo_stake,
            auto_explode_after,
            amount_to_risk,
            reserved_balance
        );
        next.validate()?;
        *self = next;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.min_total_bets > self.max_total_bets {
            return Err(SettingsError::InvertedRange("totalBets"));
        }
        if self.min_demo_risk_amount > self.max_demo_risk_amount {
            return Err(SettingsError::InvertedRange("demoRiskAmount"));
        }
        if self.min_risk_percentage > self.max_risk_percentage {
            return Err(SettingsError::InvertedRange("riskPercentage"));
        }
        if self.min_risk_percentage < 0.0 {
            return Err(SettingsError::Negative("minRiskPercentage"));
        }
        if self.min_demo_risk_amount < 0.0 {
            return Err(SettingsError::Negative("minDemoRiskAmount"));
        }
        if self.max_demo_stake < 0.0 {
            return Err(SettingsError::Negative("maxDemoStake"));
        }
        if self.max_multiplier_shift < 0.01 {
            return Err(SettingsError::ShiftTooSmall(self.max_multiplier_shift));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("min{0} must not exceed max{0}")]
    InvertedRange(&'static str),
    #[error("{0} must not be negative")]
    Negative(&'static str),
    #[error("maxMultiplierShift must be at least 0.01 (got {0})")]
    ShiftTooSmall(f64),
}

/// Partial update of [`TenantRiskSettings`]; absent fields are left as they are.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub license_expiration: Option<i64>,
    pub min_total_bets: Option<u64>,
    pub max_total_bets: Option<u64>,
    pub min_demo_risk_amount: Option<f64>,
    pub max_demo_risk_amount: Option<f64>,
    pub min_risk_percentage: Option<f64>,
    pub max_risk_percentage: Option<f64>,
    pub max_multiplier_shift: Option<f64>,
    pub max_demo_stake: Option<f64>,
    pub auto_explode_after: Option<u64>,
    pub amount_to_risk: Option<f64>,
    pub reserved_balance: Option<f64>,
}

/// The two budget pools an organization can lose money from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskBudget {
    pub amount_to_risk: f64,
    pub reserved_balance: f64,
}

impl RiskBudget {
    pub fn combined(&self) -> f64 {
        self.amount_to_risk + self.reserved_balance
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPackage {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl SubscriptionPackage {
    pub fn days(&self) -> i64 {
        match self {
            SubscriptionPackage::Daily => 1,
            SubscriptionPackage::Weekly => 7,
            SubscriptionPackage::Monthly => 30,
            SubscriptionPackage::Yearly => 365,
        }
    }

    /// Expiry after buying `duration` units of this package.
    ///
    /// Renewals extend an unexpired license from its current expiry; an expired license restarts
    /// from `now`.
    pub fn extend(&self, current_expiration: i64, now: i64, duration: u32) -> i64 {
        let base = current_expiration.max(now);
        let days = self.days().saturating_mul(i64::from(duration.max(1)));
        base.saturating_add(days.saturating_mul(SECONDS_PER_DAY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_license_active_is_strict() {
        let settings = TenantRiskSettings::new("org", 100);
        assert!(settings.license_active(99));
        assert!(!settings.license_active(100));
        assert!(!settings.license_active(101));
    }

    #[test]
    fn test_extend_from_future_expiry() {
        let expiry = SubscriptionPackage::Weekly.extend(1_000, 500, 2);
        assert_eq!(expiry, 1_000 + 14 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_extend_expired_license_restarts_from_now() {
        let expiry = SubscriptionPackage::Daily.extend(100, 5_000, 1);
        assert_eq!(expiry, 5_000 + SECONDS_PER_DAY);
    }

    #[test]
    fn test_apply_patch_rejects_inverted_range() {
        let mut settings = TenantRiskSettings::new("org", 0);
        let patch = SettingsPatch {
            min_risk_percentage: Some(2.0),
            ..Default::default()
        };
        assert_eq!(
            settings.apply(&patch),
            Err(SettingsError::InvertedRange("riskPercentage"))
        );
        assert_eq!(settings.min_risk_percentage, 0.5);
    }

    #[test]
    fn test_apply_patch_updates_only_present_fields() {
        let mut settings = TenantRiskSettings::new("org", 0);
        let patch = SettingsPatch {
            amount_to_risk: Some(250.0),
            auto_explode_after: Some(10),
            ..Default::default()
        };
        settings.apply(&patch).unwrap();
        assert_eq!(settings.amount_to_risk, 250.0);
        assert_eq!(settings.auto_explode_after, 10);
        assert_eq!(settings.reserved_balance, 0.0);
        assert_eq!(settings.max_multiplier_shift, 1.4);
    }
}
