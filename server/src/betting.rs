//! Betting surface: place, cash out and cancel, plus the read-only round views.
//!
//! Every operation re-reads the flight from the round store. The store's atomic append and
//! conditional delete are the only guards against the engine and other requests touching the
//! same bet list.

use crate::balance::{BalanceAdjustment, BalanceService};
use crate::error::{internal, ServiceError};
use crate::fanout::Broadcaster;
use crate::ledger::Ledger;
use crate::store::{BetFilter, RoundStore};
use crate::{Aviator, Backend};
use grandaviator_types::{
    api::{BetRef, BetsPageResponse, PageQuery, PlaceBetRequest},
    now_unix, BetStatus, EventMessage, Flight, FlightState, PlaneBet,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_SIDE_LEN: usize = 32;

fn validate_stake(stake: f64) -> Result<(), ServiceError> {
    if !stake.is_finite() || stake <= 0.0 {
        return Err(ServiceError::forbidden("stake must be a positive amount"));
    }
    Ok(())
}

fn validate_side(side: &str) -> Result<(), ServiceError> {
    let valid = !side.is_empty()
        && side.len() <= MAX_SIDE_LEN
        && side
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ServiceError::forbidden("invalid bet side"));
    }
    Ok(())
}

impl<B: Backend> Aviator<B> {
    /// Place a bet on the organization's open flight for the user's current account.
    pub async fn place_bet(&self, request: PlaceBetRequest) -> Result<PlaneBet, ServiceError> {
        validate_stake(request.stake)?;
        validate_side(&request.side)?;

        let user = self
            .balances()
            .find_user(&request.user_id)
            .await
            .map_err(internal("failed to look up user"))?
            .ok_or_else(|| ServiceError::not_found("user not found"))?;
        let org_id = user.org_id.clone();

        let flight = self
            .open_flight(&org_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("there are no flights ready for betting"))?;

        let taken = self
            .rounds()
            .bets(
                &org_id,
                &flight.id,
                &BetFilter::user_side(&user.id, &request.side),
            )
            .await
            .map_err(internal("failed to read bets"))?;
        if !taken.is_empty() {
            return Err(ServiceError::conflict(
                "you already have a bet on this side for this flight",
            ));
        }
        if user.balance() < request.stake {
            return Err(ServiceError::forbidden("insufficient account balance"));
        }

        let bet = PlaneBet {
            id: Uuid::new_v4().to_string(),
            flight_id: flight.id.clone(),
            org_id: org_id.clone(),
            user_id: user.id.clone(),
            account: user.current_account,
            side: request.side,
            stake: request.stake,
            status: if flight.state == FlightState::Loading {
                BetStatus::Open
            } else {
                BetStatus::Waiting
            },
            payout: 0.0,
            date_created: now_unix(),
        };

        self.balances()
            .adjust_balance(&self.adjustment(&bet, -bet.stake))
            .await
            .map_err(internal("failed to debit balance"))?;

        match self.rounds().append_bet(&bet).await {
            Ok(true) => {}
            Ok(false) => {
                self.refund(&bet).await;
                return Err(ServiceError::conflict(
                    "you already have a bet on this side for this flight",
                ));
            }
            Err(err) => {
                self.refund(&bet).await;
                return Err(ServiceError::internal("failed to place bet").with_cause(err));
            }
        }

        info!(
            org_id = %org_id,
            flight_id = %bet.flight_id,
            bet_id = %bet.id,
            account = bet.account.as_str(),
            stake = bet.stake,
            "bet placed"
        );
        self.metrics().inc_bets_placed();
        self.events().publish(EventMessage::bet_update(&bet)).await;
        Ok(bet)
    }

    /// Cash a bet out at the flight's current multiplier.
    ///
    /// A bet already closed by tick settlement belongs to the engine and is not found here.
    pub async fn cashout(&self, target: BetRef) -> Result<PlaneBet, ServiceError> {
        let flight = self.flight(&target.org_id, &target.flight_id).await?;
        let found = self
            .rounds()
            .bets(
                &target.org_id,
                &target.flight_id,
                &BetFilter::bet(&target.bet_id).excluding(BetStatus::Closed),
            )
            .await
            .map_err(internal("failed to read bets"))?;
        if !found.iter().any(|bet| bet.user_id == target.user_id) {
            return Err(ServiceError::not_found("bet not found"));
        }
        if flight.state != FlightState::Flying {
            return Err(ServiceError::forbidden("bets can only be cashed out in flight"));
        }

        let filter = BetFilter {
            user_id: Some(target.user_id.clone()),
            ..BetFilter::bet(&target.bet_id)
        }
        .excluding(BetStatus::Closed);
        let mut bet = self
            .rounds()
            .take_bet(&target.org_id, &target.flight_id, &filter)
            .await
            .map_err(internal("failed to cash out bet"))?
            .ok_or_else(|| ServiceError::not_found("bet not found"))?;

        let payout = flight.multiplier * bet.stake;
        if let Err(err) = self
            .balances()
            .adjust_balance(&self.adjustment(&bet, payout))
            .await
        {
            error!(
                org_id = %target.org_id,
                bet_id = %bet.id,
                payout,
                "cashout credit failed: {err:#}"
            );
            self.restore(&bet).await;
            return Err(ServiceError::internal("failed to credit cashout").with_cause(err));
        }
        if bet.is_live() {
            if let Err(err) = self
                .rounds()
                .incr_profit_blown(&target.org_id, &target.flight_id, payout)
                .await
            {
                self.metrics().inc_store_errors();
                warn!(org_id = %target.org_id, flight_id = %target.flight_id, "profit-blown increment failed: {err:#}");
            }
        }

        bet.status = BetStatus::CashedOut;
        bet.payout = payout;
        self.persist_in_background(bet.clone());
        info!(
            org_id = %target.org_id,
            flight_id = %target.flight_id,
            bet_id = %bet.id,
            multiplier = flight.multiplier,
            payout,
            "bet cashed out"
        );
        self.metrics().inc_cashouts();
        self.events().publish(EventMessage::bet_update(&bet)).await;
        Ok(bet)
    }

    /// Cancel a bet that tick settlement has not closed yet and refund its stake.
    pub async fn cancel(&self, target: BetRef) -> Result<PlaneBet, ServiceError> {
        let flight = self.flight(&target.org_id, &target.flight_id).await?;
        if !flight.state.accepts_bets() {
            return Err(ServiceError::forbidden(
                "bets can only be canceled before the flight takes off",
            ));
        }

        let filter = BetFilter {
            user_id: Some(target.user_id.clone()),
            ..BetFilter::bet(&target.bet_id)
        }
        .excluding(BetStatus::Closed);
        let mut bet = self
            .rounds()
            .take_bet(&target.org_id, &target.flight_id, &filter)
            .await
            .map_err(internal("failed to cancel bet"))?
            .ok_or_else(|| ServiceError::not_found("bet not found"))?;

        if let Err(err) = self
            .balances()
            .adjust_balance(&self.adjustment(&bet, bet.stake))
            .await
        {
            error!(org_id = %target.org_id, bet_id = %bet.id, "cancel refund failed: {err:#}");
            self.restore(&bet).await;
            return Err(ServiceError::internal("failed to refund bet").with_cause(err));
        }

        bet.status = BetStatus::Canceled;
        self.persist_in_background(bet.clone());
        info!(org_id = %target.org_id, flight_id = %target.flight_id, bet_id = %bet.id, "bet canceled");
        self.metrics().inc_cancels();
        self.events().publish(EventMessage::bet_update(&bet)).await;
        Ok(bet)
    }

    /// The flight players should be watching: flying, else loading, else pending.
    pub async fn current_flight(&self, org_id: &str) -> Result<Flight, ServiceError> {
        for state in [FlightState::Flying, FlightState::Loading, FlightState::Pending] {
            if let Some(flight) = self
                .rounds()
                .find_flight_by_state(org_id, state)
                .await
                .map_err(internal("failed to read flights"))?
            {
                return Ok(flight);
            }
        }
        Err(ServiceError::not_found("no flight is running"))
    }

    /// Recent explosion multipliers, newest first.
    pub async fn history(&self, org_id: &str) -> Result<Vec<String>, ServiceError> {
        self.rounds()
            .history(org_id)
            .await
            .map_err(internal("failed to read history"))
    }

    /// The user's bets across the organization's live flights.
    ///
    /// Bets on a flying flight are reported closed: their outcome is up to the engine.
    pub async fn active_bets(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> Result<Vec<PlaneBet>, ServiceError> {
        let mut flights = self
            .rounds()
            .list_flights(org_id)
            .await
            .map_err(internal("failed to read flights"))?;
        flights.retain(|flight| flight.state != FlightState::Exploded);
        flights.sort_by_key(|flight| flight.date_created);

        let mut active = Vec::new();
        for flight in flights {
            let bets = self
                .rounds()
                .bets(org_id, &flight.id, &BetFilter::user(user_id))
                .await
                .map_err(internal("failed to read bets"))?;
            active.extend(bets.into_iter().map(|mut bet| {
                if flight.state == FlightState::Flying {
                    bet.status = BetStatus::Closed;
                }
                bet
            }));
        }
        Ok(active)
    }

    /// A page of the user's finished bets, newest first.
    pub async fn bets_page(
        &self,
        user_id: &str,
        query: PageQuery,
    ) -> Result<BetsPageResponse, ServiceError> {
        let query = query.normalized();
        let bets = self
            .ledger()
            .bets_page(user_id, query)
            .await
            .map_err(internal("failed to read bet history"))?;
        Ok(BetsPageResponse {
            page: query.page,
            limit: query.limit,
            bets,
        })
    }

    async fn flight(&self, org_id: &str, flight_id: &str) -> Result<Flight, ServiceError> {
        self.rounds()
            .get_flight(org_id, flight_id)
            .await
            .map_err(internal("failed to read flight"))?
            .ok_or_else(|| ServiceError::not_found("flight not found"))
    }

    /// Pending flight if there is one, else the loading flight.
    async fn open_flight(&self, org_id: &str) -> Result<Option<Flight>, ServiceError> {
        for state in [FlightState::Pending, FlightState::Loading] {
            let flight = self
                .rounds()
                .find_flight_by_state(org_id, state)
                .await
                .map_err(internal("failed to read flights"))?;
            if flight.is_some() {
                return Ok(flight);
            }
        }
        Ok(None)
    }

    fn adjustment(&self, bet: &PlaneBet, amount: f64) -> BalanceAdjustment {
        BalanceAdjustment {
            user_id: bet.user_id.clone(),
            org_id: bet.org_id.clone(),
            account: bet.account,
            amount,
            source: self.config().service_name.clone(),
        }
    }

    async fn refund(&self, bet: &PlaneBet) {
        if let Err(err) = self
            .balances()
            .adjust_balance(&self.adjustment(bet, bet.stake))
            .await
        {
            error!(org_id = %bet.org_id, bet_id = %bet.id, stake = bet.stake, "refund failed: {err:#}");
        }
    }

    /// Put a taken bet back after its balance update failed so the request can be retried.
    ///
    /// If the live list won't take it back, the bet is written to the ledger unchanged for
    /// reconciliation.
    async fn restore(&self, bet: &PlaneBet) {
        let reason = match self.rounds().append_bet(bet).await {
            Ok(true) => {
                warn!(
                    org_id = %bet.org_id,
                    flight_id = %bet.flight_id,
                    bet_id = %bet.id,
                    "bet restored after failed balance update"
                );
                return;
            }
            Ok(false) => "side taken".to_string(),
            Err(err) => {
                self.metrics().inc_store_errors();
                format!("{err:#}")
            }
        };
        match self.ledger().insert_bets(std::slice::from_ref(bet)).await {
            Ok(()) => error!(
                org_id = %bet.org_id,
                bet_id = %bet.id,
                status = bet.status.as_str(),
                "bet could not be restored ({reason}); kept in the ledger"
            ),
            Err(err) => error!(
                org_id = %bet.org_id,
                bet_id = %bet.id,
                stake = bet.stake,
                "bet lost: restore failed ({reason}) and ledger write failed: {err:#}"
            ),
        }
    }

    /// Write a finished bet to the ledger without holding up the caller.
    fn persist_in_background(&self, bet: PlaneBet) {
        let ledger = self.ledger().clone();
        tokio::spawn(async move {
            match ledger.insert_bets(std::slice::from_ref(&bet)).await {
                Ok(()) => debug!(bet_id = %bet.id, status = bet.status.as_str(), "bet persisted"),
                Err(err) => warn!(bet_id = %bet.id, "bet persistence failed: {err:#}"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use grandaviator_types::AccountKind;
    use crate::store::FlightField;
    use crate::test_support::{eventually, fast_config, flight_in, licensed, mocked, user, ORG};

    fn request(user_id: &str, side: &str, stake: f64) -> PlaceBetRequest {
        PlaceBetRequest {
            user_id: user_id.into(),
            side: side.into(),
            stake,
        }
    }

    fn bet_ref(bet: &PlaneBet) -> BetRef {
        BetRef {
            org_id: bet.org_id.clone(),
            flight_id: bet.flight_id.clone(),
            bet_id: bet.id.clone(),
            user_id: bet.user_id.clone(),
        }
    }

    async fn set_state(aviator: &Aviator<crate::Mocked>, flight_id: &str, state: FlightState) {
        aviator
            .rounds()
            .update_flight(ORG, flight_id, &[FlightField::State(state)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_place_bet_debits_and_appends() {
        let aviator = mocked(fast_config());
        licensed(&aviator).await;
        aviator.balances().insert_user(user("u1", AccountKind::Live, 50.0));
        let flight = flight_in(&aviator, "f1", FlightState::Pending);

        let bet = aviator.place_bet(request("u1", "left", 10.0)).await.unwrap();
        assert_eq!(bet.flight_id, flight.id);
        assert_eq!(bet.status, BetStatus::Waiting);
        assert_eq!(bet.account, AccountKind::Live);
        assert_eq!(aviator.balances().user("u1").unwrap().live_balance, 40.0);
        let stored = aviator
            .rounds()
            .bets(ORG, "f1", &BetFilter::all())
            .await
            .unwrap();
        assert_eq!(stored, vec![bet.clone()]);
        assert_eq!(aviator.events().named(grandaviator_types::EVENT_BET_UPDATE).len(), 1);
        assert_eq!(aviator.metrics().snapshot().bets_placed, 1);
    }

    #[tokio::test]
    async fn test_place_bet_on_loading_flight_is_open() {
        let aviator = mocked(fast_config());
        aviator.balances().insert_user(user("u1", AccountKind::Demo, 50.0));
        flight_in(&aviator, "f1", FlightState::Loading);
        let bet = aviator.place_bet(request("u1", "left", 1.0)).await.unwrap();
        assert_eq!(bet.status, BetStatus::Open);
        assert_eq!(bet.account, AccountKind::Demo);
        assert_eq!(aviator.balances().user("u1").unwrap().demo_balance, 49.0);
    }

    #[tokio::test]
    async fn test_same_side_conflicts_other_side_succeeds() {
        let aviator = mocked(fast_config());
        aviator.balances().insert_user(user("u1", AccountKind::Live, 50.0));
        flight_in(&aviator, "f1", FlightState::Pending);

        aviator.place_bet(request("u1", "left", 5.0)).await.unwrap();
        let err = aviator
            .place_bet(request("u1", "left", 5.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        aviator.place_bet(request("u1", "right", 5.0)).await.unwrap();
        // The rejected bet was never debited.
        assert_eq!(aviator.balances().user("u1").unwrap().live_balance, 40.0);
    }

    #[tokio::test]
    async fn test_place_bet_rejections() {
        let aviator = mocked(fast_config());
        aviator.balances().insert_user(user("u1", AccountKind::Live, 5.0));

        let err = aviator
            .place_bet(request("u1", "left", 1.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.message(), "there are no flights ready for betting");

        flight_in(&aviator, "f1", FlightState::Pending);
        let err = aviator
            .place_bet(request("u1", "left", 6.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.message(), "insufficient account balance");

        for stake in [0.0, -1.0, f64::NAN] {
            let err = aviator
                .place_bet(request("u1", "left", stake))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Forbidden);
        }
        let err = aviator
            .place_bet(request("u1", "", 1.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = aviator
            .place_bet(request("ghost", "left", 1.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(aviator.balances().adjustments().is_empty());
    }

    #[tokio::test]
    async fn test_place_bet_debit_failure_is_internal() {
        let aviator = mocked(fast_config());
        aviator.balances().insert_user(user("u1", AccountKind::Live, 5.0));
        flight_in(&aviator, "f1", FlightState::Pending);
        aviator.balances().set_failing(true);
        let err = aviator
            .place_bet(request("u1", "left", 1.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(std::error::Error::source(&err).is_some());
        assert!(aviator
            .rounds()
            .bets(ORG, "f1", &BetFilter::all())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_cashout_pays_multiplier_once() {
        let aviator = mocked(fast_config());
        aviator.balances().insert_user(user("u1", AccountKind::Live, 50.0));
        flight_in(&aviator, "f1", FlightState::Pending);
        let bet = aviator.place_bet(request("u1", "left", 10.0)).await.unwrap();

        let err = aviator.cashout(bet_ref(&bet)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        set_state(&aviator, "f1", FlightState::Flying).await;
        aviator
            .rounds()
            .update_flight(ORG, "f1", &[FlightField::Multiplier(2.5)])
            .await
            .unwrap();
        let cashed = aviator.cashout(bet_ref(&bet)).await.unwrap();
        assert_eq!(cashed.status, BetStatus::CashedOut);
        assert_eq!(cashed.payout, 25.0);
        assert_eq!(aviator.balances().user("u1").unwrap().live_balance, 65.0);
        let flight = aviator.rounds().get_flight(ORG, "f1").await.unwrap().unwrap();
        assert_eq!(flight.profit_blown, 25.0);

        let err = aviator.cashout(bet_ref(&bet)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert!(eventually(|| async { aviator.ledger().bets().len() == 1 }).await);
        assert_eq!(aviator.ledger().bets()[0].status, BetStatus::CashedOut);
    }

    #[tokio::test]
    async fn test_cashout_after_settlement_is_not_found() {
        let aviator = mocked(fast_config());
        aviator.balances().insert_user(user("u1", AccountKind::Live, 50.0));
        flight_in(&aviator, "f1", FlightState::Pending);
        let bet = aviator.place_bet(request("u1", "left", 10.0)).await.unwrap();
        set_state(&aviator, "f1", FlightState::Flying).await;
        aviator
            .rounds()
            .update_flight(ORG, "f1", &[FlightField::Multiplier(2.0)])
            .await
            .unwrap();
        aviator.rounds().settle_bet(ORG, "f1", &bet.id, 20.0).await.unwrap();

        let err = aviator.cashout(bet_ref(&bet)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(aviator.balances().user("u1").unwrap().live_balance, 40.0);
        let stored = aviator
            .rounds()
            .bets(ORG, "f1", &BetFilter::bet(&bet.id))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, BetStatus::Closed);
        assert_eq!(aviator.metrics().snapshot().cashouts, 0);
    }

    #[tokio::test]
    async fn test_cashout_credit_failure_keeps_bet() {
        let aviator = mocked(fast_config());
        aviator.balances().insert_user(user("u1", AccountKind::Live, 50.0));
        flight_in(&aviator, "f1", FlightState::Pending);
        let bet = aviator.place_bet(request("u1", "left", 10.0)).await.unwrap();
        set_state(&aviator, "f1", FlightState::Flying).await;
        aviator
            .rounds()
            .update_flight(ORG, "f1", &[FlightField::Multiplier(2.0)])
            .await
            .unwrap();

        aviator.balances().set_failing(true);
        let err = aviator.cashout(bet_ref(&bet)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        let stored = aviator
            .rounds()
            .bets(ORG, "f1", &BetFilter::bet(&bet.id))
            .await
            .unwrap();
        assert_eq!(stored, vec![bet.clone()]);
        let flight = aviator.rounds().get_flight(ORG, "f1").await.unwrap().unwrap();
        assert_eq!(flight.profit_blown, 0.0);

        aviator.balances().set_failing(false);
        let cashed = aviator.cashout(bet_ref(&bet)).await.unwrap();
        assert_eq!(cashed.payout, 20.0);
        assert_eq!(aviator.balances().user("u1").unwrap().live_balance, 60.0);
    }

    #[tokio::test]
    async fn test_cancel_refund_failure_keeps_bet() {
        let aviator = mocked(fast_config());
        aviator.balances().insert_user(user("u1", AccountKind::Live, 50.0));
        flight_in(&aviator, "f1", FlightState::Pending);
        let bet = aviator.place_bet(request("u1", "left", 10.0)).await.unwrap();

        aviator.balances().set_failing(true);
        let err = aviator.cancel(bet_ref(&bet)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        let stored = aviator
            .rounds()
            .bets(ORG, "f1", &BetFilter::all())
            .await
            .unwrap();
        assert_eq!(stored, vec![bet.clone()]);

        aviator.balances().set_failing(false);
        let canceled = aviator.cancel(bet_ref(&bet)).await.unwrap();
        assert_eq!(canceled.status, BetStatus::Canceled);
        assert_eq!(aviator.balances().user("u1").unwrap().live_balance, 50.0);
    }

    #[tokio::test]
    async fn test_cashout_demo_bet_leaves_profit_blown() {
        let aviator = mocked(fast_config());
        aviator.balances().insert_user(user("u1", AccountKind::Demo, 50.0));
        flight_in(&aviator, "f1", FlightState::Pending);
        let bet = aviator.place_bet(request("u1", "left", 10.0)).await.unwrap();
        set_state(&aviator, "f1", FlightState::Flying).await;
        aviator.cashout(bet_ref(&bet)).await.unwrap();
        let flight = aviator.rounds().get_flight(ORG, "f1").await.unwrap().unwrap();
        assert_eq!(flight.profit_blown, 0.0);
    }

    #[tokio::test]
    async fn test_cashout_of_someone_elses_bet_is_not_found() {
        let aviator = mocked(fast_config());
        aviator.balances().insert_user(user("u1", AccountKind::Live, 50.0));
        flight_in(&aviator, "f1", FlightState::Pending);
        let bet = aviator.place_bet(request("u1", "left", 10.0)).await.unwrap();
        set_state(&aviator, "f1", FlightState::Flying).await;
        let mut target = bet_ref(&bet);
        target.user_id = "u2".into();
        let err = aviator.cashout(target).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let mut target = bet_ref(&bet);
        target.flight_id = "missing".into();
        let err = aviator.cashout(target).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_cancel_refunds_until_closed() {
        let aviator = mocked(fast_config());
        aviator.balances().insert_user(user("u1", AccountKind::Live, 50.0));
        flight_in(&aviator, "f1", FlightState::Pending);
        let first = aviator.place_bet(request("u1", "left", 10.0)).await.unwrap();
        let second = aviator.place_bet(request("u1", "right", 10.0)).await.unwrap();

        let canceled = aviator.cancel(bet_ref(&first)).await.unwrap();
        assert_eq!(canceled.status, BetStatus::Canceled);
        assert_eq!(aviator.balances().user("u1").unwrap().live_balance, 40.0);
        let err = aviator.cancel(bet_ref(&first)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        aviator.rounds().settle_bet(ORG, "f1", &second.id, 10.0).await.unwrap();
        let err = aviator.cancel(bet_ref(&second)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        set_state(&aviator, "f1", FlightState::Flying).await;
        let err = aviator.cancel(bet_ref(&second)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(aviator.metrics().snapshot().cancels, 1);
    }

    #[tokio::test]
    async fn test_current_flight_prefers_flying() {
        let aviator = mocked(fast_config());
        let err = aviator.current_flight(ORG).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        flight_in(&aviator, "pending", FlightState::Pending);
        assert_eq!(aviator.current_flight(ORG).await.unwrap().id, "pending");
        flight_in(&aviator, "flying", FlightState::Flying);
        assert_eq!(aviator.current_flight(ORG).await.unwrap().id, "flying");
    }

    #[tokio::test]
    async fn test_active_bets_closed_once_flying() {
        let aviator = mocked(fast_config());
        aviator.balances().insert_user(user("u1", AccountKind::Live, 50.0));
        aviator.balances().insert_user(user("u2", AccountKind::Live, 50.0));
        flight_in(&aviator, "f1", FlightState::Pending);
        aviator.place_bet(request("u1", "left", 1.0)).await.unwrap();
        aviator.place_bet(request("u2", "left", 1.0)).await.unwrap();
        set_state(&aviator, "f1", FlightState::Flying).await;
        flight_in(&aviator, "f2", FlightState::Pending);
        aviator.place_bet(request("u1", "left", 1.0)).await.unwrap();

        let active = aviator.active_bets(ORG, "u1").await.unwrap();
        assert_eq!(active.len(), 2);
        let statuses: Vec<BetStatus> = active.iter().map(|bet| bet.status).collect();
        assert!(statuses.contains(&BetStatus::Closed));
        assert!(statuses.contains(&BetStatus::Waiting));
        assert!(active.iter().all(|bet| bet.user_id == "u1"));
    }

    #[tokio::test]
    async fn test_bets_page_is_normalized() {
        let aviator = mocked(fast_config());
        let page = aviator
            .bets_page("u1", PageQuery { page: 0, limit: 500 })
            .await
            .unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, grandaviator_types::api::MAX_PAGE_LIMIT);
        assert!(page.bets.is_empty());
    }
}
