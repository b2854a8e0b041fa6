use serde::{Deserialize, Serialize};
use std::fmt;

/// Which balance a bet is booked against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    #[default]
    Demo,
    Live,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Demo => "demo",
            AccountKind::Live => "live",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, AccountKind::Live)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "demo" => Some(AccountKind::Demo),
            "live" => Some(AccountKind::Live),
            _ => None,
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    /// Placed while the flight is still pending.
    #[default]
    Waiting,
    /// Placed during the countdown.
    Open,
    /// Evaluated by tick settlement; no longer cancelable.
    Closed,
    #[serde(rename = "cashedout")]
    CashedOut,
    Canceled,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Waiting => "waiting",
            BetStatus::Open => "open",
            BetStatus::Closed => "closed",
            BetStatus::CashedOut => "cashedout",
            BetStatus::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(BetStatus::Waiting),
            "open" => Some(BetStatus::Open),
            "closed" => Some(BetStatus::Closed),
            "cashedout" => Some(BetStatus::CashedOut),
            "canceled" => Some(BetStatus::Canceled),
            _ => None,
        }
    }
}

/// A wager on a single flight.
///
/// Lives in the flight's bet list while the flight is open and is written to the ledger when it
/// is cashed out, canceled, or lost at explosion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaneBet {
    pub id: String,
    pub flight_id: String,
    pub org_id: String,
    pub user_id: String,
    pub account: AccountKind,
    /// Bet slot; a user may hold one bet per side on a flight.
    pub side: String,
    pub stake: f64,
    pub status: BetStatus,
    pub payout: f64,
    pub date_created: i64,
}

impl PlaneBet {
    pub fn is_live(&self) -> bool {
        self.account.is_live()
    }
}

/// A player as reported by the balance service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub org_id: String,
    pub demo_balance: f64,
    pub live_balance: f64,
    pub current_account: AccountKind,
}

impl User {
    /// Balance of the account the user currently plays with.
    pub fn balance(&self) -> f64 {
        match self.current_account {
            AccountKind::Demo => self.demo_balance,
            AccountKind::Live => self.live_balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_balance_follows_current_account() {
        let mut user = User {
            id: "u1".into(),
            org_id: "org".into(),
            demo_balance: 1000.0,
            live_balance: 25.0,
            current_account: AccountKind::Demo,
        };
        assert_eq!(user.balance(), 1000.0);
        user.current_account = AccountKind::Live;
        assert_eq!(user.balance(), 25.0);
    }

    #[test]
    fn test_bet_status_parse_matches_wire_names() {
        for status in [
            BetStatus::Waiting,
            BetStatus::Open,
            BetStatus::Closed,
            BetStatus::CashedOut,
            BetStatus::Canceled,
        ] {
            assert_eq!(BetStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BetStatus::parse("lost"), None);
    }
}
