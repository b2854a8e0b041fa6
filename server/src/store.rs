//! Round store: the fast store holding live flights, their bet lists and explosion history.
//!
//! Every mutation of a bet list goes through one of the store's atomic primitives (append,
//! per-bet path write, conditional take). Callers never rewrite a whole list.

use anyhow::Result;
use grandaviator_types::{BetStatus, Flight, FlightState, LeaderboardEntry, PlaneBet};
use std::future::Future;

/// Scalar written at a path of a stored flight.
#[derive(Clone, Debug, PartialEq)]
pub enum FlightField {
    State(FlightState),
    Multiplier(f64),
    Risk(f64),
    LiveStakes(f64),
    TotalBets(u64),
    LeaderBoard(Vec<LeaderboardEntry>),
}

impl FlightField {
    pub fn path(&self) -> &'static str {
        match self {
            FlightField::State(_) => "$.state",
            FlightField::Multiplier(_) => "$.multiplier",
            FlightField::Risk(_) => "$.risk",
            FlightField::LiveStakes(_) => "$.liveStakes",
            FlightField::TotalBets(_) => "$.totalBets",
            FlightField::LeaderBoard(_) => "$.leaderBoard",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            FlightField::State(state) => serde_json::to_string(state),
            FlightField::Multiplier(value)
            | FlightField::Risk(value)
            | FlightField::LiveStakes(value) => serde_json::to_string(value),
            FlightField::TotalBets(value) => serde_json::to_string(value),
            FlightField::LeaderBoard(entries) => serde_json::to_string(entries),
        }
    }

    pub fn apply(&self, flight: &mut Flight) {
        match self {
            FlightField::State(state) => flight.state = *state,
            FlightField::Multiplier(value) => flight.multiplier = *value,
            FlightField::Risk(value) => flight.risk = *value,
            FlightField::LiveStakes(value) => flight.live_stakes = *value,
            FlightField::TotalBets(value) => flight.total_bets = *value,
            FlightField::LeaderBoard(entries) => flight.leader_board = entries.clone(),
        }
    }
}

/// Selects bets within one flight's list. Empty fields match everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BetFilter {
    pub bet_id: Option<String>,
    pub user_id: Option<String>,
    pub side: Option<String>,
    pub exclude_status: Option<BetStatus>,
}

impl BetFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn bet(bet_id: &str) -> Self {
        Self {
            bet_id: Some(bet_id.to_string()),
            ..Self::default()
        }
    }

    pub fn user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Self::default()
        }
    }

    pub fn user_side(user_id: &str, side: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            side: Some(side.to_string()),
            ..Self::default()
        }
    }

    pub fn excluding(mut self, status: BetStatus) -> Self {
        self.exclude_status = Some(status);
        self
    }

    pub fn matches(&self, bet: &PlaneBet) -> bool {
        self.bet_id.as_ref().map_or(true, |id| *id == bet.id)
            && self.user_id.as_ref().map_or(true, |id| *id == bet.user_id)
            && self.side.as_ref().map_or(true, |side| *side == bet.side)
            && self.exclude_status.map_or(true, |status| status != bet.status)
    }

    /// JSONPath selecting the matching elements of a bet list.
    pub fn json_path(&self) -> String {
        let mut conditions = Vec::new();
        if let Some(id) = &self.bet_id {
            conditions.push(format!("@.id=={}", quote(id)));
        }
        if let Some(user_id) = &self.user_id {
            conditions.push(format!("@.userId=={}", quote(user_id)));
        }
        if let Some(side) = &self.side {
            conditions.push(format!("@.side=={}", quote(side)));
        }
        if let Some(status) = self.exclude_status {
            conditions.push(format!("@.status!={}", quote(status.as_str())));
        }
        if conditions.is_empty() {
            return "$[*]".to_string();
        }
        format!("$[?({})]", conditions.join(" && "))
    }
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

pub trait RoundStore: Clone + Send + Sync + 'static {
    /// Write a new flight and an empty bet list for it.
    fn create_flight(&self, flight: &Flight) -> impl Future<Output = Result<()>> + Send;

    fn get_flight(
        &self,
        org_id: &str,
        flight_id: &str,
    ) -> impl Future<Output = Result<Option<Flight>>> + Send;

    /// Every stored flight of an organization, in no particular order.
    fn list_flights(&self, org_id: &str) -> impl Future<Output = Result<Vec<Flight>>> + Send;

    fn update_flight(
        &self,
        org_id: &str,
        flight_id: &str,
        fields: &[FlightField],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Atomically add `amount` to the flight's profit-blown.
    fn incr_profit_blown(
        &self,
        org_id: &str,
        flight_id: &str,
        amount: f64,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Append `bet` to its flight's list unless the user already holds a bet on that side.
    ///
    /// Returns false when the side is taken.
    fn append_bet(&self, bet: &PlaneBet) -> impl Future<Output = Result<bool>> + Send;

    fn bets(
        &self,
        org_id: &str,
        flight_id: &str,
        filter: &BetFilter,
    ) -> impl Future<Output = Result<Vec<PlaneBet>>> + Send;

    /// Mark one bet closed with a provisional payout.
    fn settle_bet(
        &self,
        org_id: &str,
        flight_id: &str,
        bet_id: &str,
        payout: f64,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove and return the first bet matching `filter`; `None` if nothing matched.
    ///
    /// Of two concurrent takes of the same bet, exactly one succeeds.
    fn take_bet(
        &self,
        org_id: &str,
        flight_id: &str,
        filter: &BetFilter,
    ) -> impl Future<Output = Result<Option<PlaneBet>>> + Send;

    /// Delete the flight and its bet list.
    fn purge_flight(
        &self,
        org_id: &str,
        flight_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Push onto the explosion history, keeping at most `capacity` newest entries.
    fn push_history(
        &self,
        org_id: &str,
        entry: &str,
        capacity: usize,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Explosion history, newest first.
    fn history(&self, org_id: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn find_flight_by_state(
        &self,
        org_id: &str,
        state: FlightState,
    ) -> impl Future<Output = Result<Option<Flight>>> + Send {
        async move {
            let mut flights = self.list_flights(org_id).await?;
            flights.retain(|flight| flight.state == state);
            flights.sort_by_key(|flight| flight.date_created);
            Ok(flights.into_iter().next())
        }
    }
}

#[cfg(any(test, feature = "mocks"))]
pub use memory::Memory;

#[cfg(any(test, feature = "mocks"))]
mod memory {
    use super::*;
    use anyhow::anyhow;
    use grandaviator_execution::HistoryRing;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard};

    #[derive(Default)]
    struct Inner {
        flights: HashMap<(String, String), Flight>,
        bets: HashMap<(String, String), Vec<PlaneBet>>,
        history: HashMap<String, HistoryRing>,
    }

    /// In-memory round store.
    #[derive(Clone, Default)]
    pub struct Memory {
        inner: Arc<Mutex<Inner>>,
    }

    fn key(org_id: &str, flight_id: &str) -> (String, String) {
        (org_id.to_string(), flight_id.to_string())
    }

    impl Memory {
        fn lock(&self) -> MutexGuard<'_, Inner> {
            match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            }
        }

        /// Insert a flight as-is, bypassing the engine.
        pub fn insert_flight(&self, flight: Flight) {
            let mut inner = self.lock();
            let id = key(&flight.org_id, &flight.id);
            inner.bets.entry(id.clone()).or_default();
            inner.flights.insert(id, flight);
        }

        pub fn flight_count(&self, org_id: &str) -> usize {
            self.lock()
                .flights
                .keys()
                .filter(|(org, _)| org == org_id)
                .count()
        }
    }

    impl RoundStore for Memory {
        async fn create_flight(&self, flight: &Flight) -> Result<()> {
            self.insert_flight(flight.clone());
            Ok(())
        }

        async fn get_flight(&self, org_id: &str, flight_id: &str) -> Result<Option<Flight>> {
            Ok(self.lock().flights.get(&key(org_id, flight_id)).cloned())
        }

        async fn list_flights(&self, org_id: &str) -> Result<Vec<Flight>> {
            Ok(self
                .lock()
                .flights
                .iter()
                .filter(|((org, _), _)| org == org_id)
                .map(|(_, flight)| flight.clone())
                .collect())
        }

        async fn update_flight(
            &self,
            org_id: &str,
            flight_id: &str,
            fields: &[FlightField],
        ) -> Result<()> {
            let mut inner = self.lock();
            let flight = inner
                .flights
                .get_mut(&key(org_id, flight_id))
                .ok_or_else(|| anyhow!("flight {flight_id} not stored"))?;
            for field in fields {
                field.apply(flight);
            }
            Ok(())
        }

        async fn incr_profit_blown(&self, org_id: &str, flight_id: &str, amount: f64) -> Result<()> {
            let mut inner = self.lock();
            let flight = inner
                .flights
                .get_mut(&key(org_id, flight_id))
                .ok_or_else(|| anyhow!("flight {flight_id} not stored"))?;
            flight.profit_blown += amount;
            Ok(())
        }

        async fn append_bet(&self, bet: &PlaneBet) -> Result<bool> {
            let mut inner = self.lock();
            let bets = inner
                .bets
                .get_mut(&key(&bet.org_id, &bet.flight_id))
                .ok_or_else(|| anyhow!("bet list for {} not stored", bet.flight_id))?;
            let side = BetFilter::user_side(&bet.user_id, &bet.side);
            if bets.iter().any(|existing| side.matches(existing)) {
                return Ok(false);
            }
            bets.push(bet.clone());
            Ok(true)
        }

        async fn bets(
            &self,
            org_id: &str,
            flight_id: &str,
            filter: &BetFilter,
        ) -> Result<Vec<PlaneBet>> {
            Ok(self
                .lock()
                .bets
                .get(&key(org_id, flight_id))
                .map(|bets| bets.iter().filter(|bet| filter.matches(bet)).cloned().collect())
                .unwrap_or_default())
        }

        async fn settle_bet(
            &self,
            org_id: &str,
            flight_id: &str,
            bet_id: &str,
            payout: f64,
        ) -> Result<()> {
            let mut inner = self.lock();
            if let Some(bets) = inner.bets.get_mut(&key(org_id, flight_id)) {
                for bet in bets.iter_mut().filter(|bet| bet.id == bet_id) {
                    bet.status = BetStatus::Closed;
                    bet.payout = payout;
                }
            }
            Ok(())
        }

        async fn take_bet(
            &self,
            org_id: &str,
            flight_id: &str,
            filter: &BetFilter,
        ) -> Result<Option<PlaneBet>> {
            let mut inner = self.lock();
            let Some(bets) = inner.bets.get_mut(&key(org_id, flight_id)) else {
                return Ok(None);
            };
            let Some(position) = bets.iter().position(|bet| filter.matches(bet)) else {
                return Ok(None);
            };
            Ok(Some(bets.remove(position)))
        }

        async fn purge_flight(&self, org_id: &str, flight_id: &str) -> Result<()> {
            let mut inner = self.lock();
            let id = key(org_id, flight_id);
            inner.flights.remove(&id);
            inner.bets.remove(&id);
            Ok(())
        }

        async fn push_history(&self, org_id: &str, entry: &str, capacity: usize) -> Result<()> {
            self.lock()
                .history
                .entry(org_id.to_string())
                .or_insert_with(|| HistoryRing::new(capacity))
                .push(entry);
            Ok(())
        }

        async fn history(&self, org_id: &str) -> Result<Vec<String>> {
            Ok(self
                .lock()
                .history
                .get(org_id)
                .map(HistoryRing::entries)
                .unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grandaviator_types::AccountKind;

    fn bet(id: &str, user_id: &str, side: &str) -> PlaneBet {
        PlaneBet {
            id: id.into(),
            flight_id: "f1".into(),
            org_id: "org".into(),
            user_id: user_id.into(),
            account: AccountKind::Live,
            side: side.into(),
            stake: 5.0,
            status: BetStatus::Waiting,
            payout: 0.0,
            date_created: 0,
        }
    }

    #[test]
    fn test_json_path_rendering() {
        assert_eq!(BetFilter::all().json_path(), "$[*]");
        assert_eq!(
            BetFilter::user_side("u1", "left").json_path(),
            r#"$[?(@.userId=="u1" && @.side=="left")]"#
        );
        assert_eq!(
            BetFilter::bet("b1").excluding(BetStatus::Closed).json_path(),
            r#"$[?(@.id=="b1" && @.status!="closed")]"#
        );
    }

    #[test]
    fn test_json_path_escapes_quotes() {
        assert_eq!(
            BetFilter::user(r#"a"b"#).json_path(),
            r#"$[?(@.userId=="a\"b")]"#
        );
    }

    #[test]
    fn test_filter_matches() {
        let mut closed = bet("b1", "u1", "left");
        closed.status = BetStatus::Closed;
        assert!(BetFilter::bet("b1").matches(&closed));
        assert!(!BetFilter::bet("b1").excluding(BetStatus::Closed).matches(&closed));
        assert!(!BetFilter::user_side("u1", "right").matches(&closed));
    }

    #[tokio::test]
    async fn test_memory_append_rejects_taken_side() {
        let store = Memory::default();
        store.create_flight(&Flight::new("f1", "org", 0)).await.unwrap();
        assert!(store.append_bet(&bet("b1", "u1", "left")).await.unwrap());
        assert!(!store.append_bet(&bet("b2", "u1", "left")).await.unwrap());
        assert!(store.append_bet(&bet("b3", "u1", "right")).await.unwrap());
        let bets = store.bets("org", "f1", &BetFilter::all()).await.unwrap();
        assert_eq!(bets.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_take_bet_once() {
        let store = Memory::default();
        store.create_flight(&Flight::new("f1", "org", 0)).await.unwrap();
        store.append_bet(&bet("b1", "u1", "left")).await.unwrap();
        let filter = BetFilter::bet("b1");
        assert!(store.take_bet("org", "f1", &filter).await.unwrap().is_some());
        assert!(store.take_bet("org", "f1", &filter).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_find_flight_by_state() {
        let store = Memory::default();
        let mut flying = Flight::new("f1", "org", 1);
        flying.state = FlightState::Flying;
        store.create_flight(&flying).await.unwrap();
        store.create_flight(&Flight::new("f2", "org", 2)).await.unwrap();
        store.create_flight(&Flight::new("f3", "other", 3)).await.unwrap();

        let found = store
            .find_flight_by_state("org", FlightState::Flying)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "f1");
        let pending = store
            .find_flight_by_state("org", FlightState::Pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.id, "f2");
        assert!(store
            .find_flight_by_state("org", FlightState::Loading)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_memory_history_is_bounded() {
        let store = Memory::default();
        for i in 0..30 {
            store.push_history("org", &format!("{i}.00x"), 20).await.unwrap();
        }
        let history = store.history("org").await.unwrap();
        assert_eq!(history.len(), 20);
        assert_eq!(history[0], "29.00x");
    }
}
