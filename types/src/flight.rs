use crate::display_multiplier;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Multiplier every flight starts from.
pub const INITIAL_MULTIPLIER: f64 = 1.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightState {
    #[default]
    Pending,
    Loading,
    Flying,
    Exploded,
}

impl FlightState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightState::Pending => "pending",
            FlightState::Loading => "loading",
            FlightState::Flying => "flying",
            FlightState::Exploded => "exploded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(FlightState::Pending),
            "loading" => Some(FlightState::Loading),
            "flying" => Some(FlightState::Flying),
            "exploded" => Some(FlightState::Exploded),
            _ => None,
        }
    }

    /// Bets may be placed and canceled.
    pub fn accepts_bets(&self) -> bool {
        matches!(self, FlightState::Pending | FlightState::Loading)
    }
}

impl fmt::Display for FlightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synthetic co-player shown next to real bets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub name: String,
    pub stake: f64,
    pub cashed_out: bool,
    pub payout: f64,
    #[serde(default)]
    pub multiplier: String,
}

/// One betting round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flight {
    pub id: String,
    pub org_id: String,
    pub state: FlightState,
    pub multiplier: f64,
    /// Payout ceiling, fixed once the flight is flying.
    pub risk: f64,
    /// Live payouts already committed by cashouts.
    pub profit_blown: f64,
    /// Sum of live stakes at launch; zero for synthetic rounds.
    #[serde(default)]
    pub live_stakes: f64,
    pub total_bets: u64,
    pub leader_board: Vec<LeaderboardEntry>,
    pub date_created: i64,
}

impl Flight {
    pub fn new(id: impl Into<String>, org_id: impl Into<String>, date_created: i64) -> Self {
        Self {
            id: id.into(),
            org_id: org_id.into(),
            state: FlightState::Pending,
            multiplier: INITIAL_MULTIPLIER,
            risk: 0.0,
            profit_blown: 0.0,
            live_stakes: 0.0,
            total_bets: 0,
            leader_board: Vec::new(),
            date_created,
        }
    }

    pub fn display_multiplier(&self) -> String {
        display_multiplier(self.multiplier)
    }

    /// Snapshot broadcast to every player watching the organization.
    pub fn state_event(&self) -> FlightStateEvent {
        FlightStateEvent {
            id: self.id.clone(),
            state: self.state,
            total_bets: self.total_bets,
            leader_board: self.leader_board.clone(),
            multiplier: self.display_multiplier(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightStateEvent {
    pub id: String,
    pub state: FlightState,
    pub total_bets: u64,
    pub leader_board: Vec<LeaderboardEntry>,
    pub multiplier: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_flight_is_pending() {
        let flight = Flight::new("f1", "org", 10);
        assert_eq!(flight.state, FlightState::Pending);
        assert_eq!(flight.multiplier, INITIAL_MULTIPLIER);
        assert!(flight.leader_board.is_empty());
    }

    #[test]
    fn test_state_event_formats_multiplier() {
        let mut flight = Flight::new("f1", "org", 10);
        flight.multiplier = 2.456;
        flight.state = FlightState::Flying;
        let event = flight.state_event();
        assert_eq!(event.multiplier, "2.46x");
        assert_eq!(event.state, FlightState::Flying);
        assert_eq!(event.id, "f1");
    }

    #[test]
    fn test_accepts_bets() {
        assert!(FlightState::Pending.accepts_bets());
        assert!(FlightState::Loading.accepts_bets());
        assert!(!FlightState::Flying.accepts_bets());
        assert!(!FlightState::Exploded.accepts_bets());
    }

    #[test]
    fn test_state_parse_matches_as_str() {
        for state in [
            FlightState::Pending,
            FlightState::Loading,
            FlightState::Flying,
            FlightState::Exploded,
        ] {
            assert_eq!(FlightState::parse(state.as_str()), Some(state));
        }
        assert_eq!(FlightState::parse("landed"), None);
    }
}
