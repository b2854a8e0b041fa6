//! Per-organization round engine.
//!
//! Each iteration checks the license, picks up (or creates) the organization's current flight,
//! runs the countdown, launches, ticks until the flight explodes, closes it out and cools down.
//! Store failures inside an iteration are logged and counted; the loop keeps going. Only
//! cancellation, license expiry or missing settings end the task.

use crate::store::{BetFilter, FlightField, RoundStore};
use crate::{fanout::Broadcaster, ledger::Ledger, Aviator, Backend};
use anyhow::Result;
use grandaviator_execution::{
    evaluate_tick, grow_multiplier, leaderboard,
    risk::{demo_risk, requested_risk, total_live_stakes},
    profit_share, BudgetSource, CosmeticRound, CountdownStep, ExplosionCounter, ResumePoint,
    RoundScheduler, TickInput,
};
use grandaviator_types::{
    now_unix, BetStatus, EventMessage, Flight, FlightState, PlaneBet, TenantRiskSettings,
};
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

enum Flow {
    Continue,
    /// Cancelled through the registry.
    Stopped,
    /// Ended on its own (license expired or settings missing).
    Finished,
}

pub(crate) async fn run<B: Backend>(
    aviator: Arc<Aviator<B>>,
    org_id: String,
    cancel: CancellationToken,
) {
    let mut engine = Engine {
        rng: aviator.engine_rng(&org_id),
        aviator,
        org_id,
        cancel,
        counter: ExplosionCounter::default(),
    };
    info!(org_id = %engine.org_id, "round engine running");
    engine.sweep_exploded().await;
    loop {
        if engine.cancel.is_cancelled() {
            break;
        }
        match engine.fly_once().await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stopped) => {
                info!(org_id = %engine.org_id, "round engine cancelled");
                break;
            }
            Ok(Flow::Finished) => break,
            Err(err) => {
                engine.aviator.metrics().inc_store_errors();
                warn!(org_id = %engine.org_id, "flight iteration failed: {err:#}");
                if !engine.pause(engine.aviator.config().cooldown()).await {
                    break;
                }
            }
        }
    }
    info!(org_id = %engine.org_id, "round engine exited");
}

struct Engine<B: Backend> {
    aviator: Arc<Aviator<B>>,
    org_id: String,
    cancel: CancellationToken,
    rng: StdRng,
    counter: ExplosionCounter,
}

impl<B: Backend> Engine<B> {
    async fn fly_once(&mut self) -> Result<Flow> {
        let Some(settings) = self.aviator.ledger().find_settings(&self.org_id).await? else {
            warn!(org_id = %self.org_id, "no risk settings; round engine stopping");
            return Ok(Flow::Finished);
        };
        if !settings.license_active(now_unix()) {
            warn!(org_id = %self.org_id, "license expired; round engine stopping");
            self.aviator
                .events()
                .publish(EventMessage::license_expired(&self.org_id))
                .await;
            return Ok(Flow::Finished);
        }

        let mut flight = self.current_flight().await?;
        let forced = match RoundScheduler::resume_point(flight.state) {
            ResumePoint::Countdown => {
                if !self.countdown(&mut flight).await {
                    return Ok(Flow::Stopped);
                }
                self.launch(&settings, &mut flight).await?
            }
            ResumePoint::Ticks => {
                info!(org_id = %self.org_id, flight_id = %flight.id, "resuming flight");
                if flight.leader_board.is_empty() {
                    let cosmetic = self.cosmetic_round(&settings, &flight.id);
                    flight.total_bets = cosmetic.total_bets;
                    flight.leader_board = cosmetic.leader_board;
                }
                false
            }
            ResumePoint::Replace => return Ok(Flow::Continue),
        };

        if !self.fly(&settings, &mut flight, forced).await {
            return Ok(Flow::Stopped);
        }
        self.explode(&mut flight).await;
        if !self.pause(self.aviator.config().cooldown()).await {
            return Ok(Flow::Stopped);
        }
        Ok(Flow::Continue)
    }

    /// The flight to drive next: flying first, then loading, then pending, else a new one.
    async fn current_flight(&self) -> Result<Flight> {
        let flights = self.aviator.rounds().list_flights(&self.org_id).await?;
        for state in RoundScheduler::recovery_order() {
            let found = flights
                .iter()
                .filter(|flight| flight.state == state)
                .min_by_key(|flight| flight.date_created);
            if let Some(flight) = found {
                return Ok(flight.clone());
            }
        }
        self.create_pending_flight().await
    }

    /// Create a pending flight unless a pending or loading one already exists.
    async fn create_pending_flight(&self) -> Result<Flight> {
        let rounds = self.aviator.rounds();
        for state in [FlightState::Pending, FlightState::Loading] {
            if let Some(existing) = rounds.find_flight_by_state(&self.org_id, state).await? {
                return Ok(existing);
            }
        }
        let flight = Flight::new(Uuid::new_v4().to_string(), &self.org_id, now_unix());
        rounds.create_flight(&flight).await?;
        debug!(org_id = %self.org_id, flight_id = %flight.id, "flight created");
        self.publish_state(&flight).await;
        Ok(flight)
    }

    /// Returns false if cancelled.
    async fn countdown(&self, flight: &mut Flight) -> bool {
        for step in self.aviator.config().phases.countdown() {
            let CountdownStep::Loading {
                remaining_ms,
                wait_ms,
            } = step
            else {
                break;
            };
            if flight.state != FlightState::Loading {
                flight.state = FlightState::Loading;
                self.write(&flight.id, &[FlightField::State(FlightState::Loading)])
                    .await;
            }
            debug!(org_id = %self.org_id, flight_id = %flight.id, remaining_ms, "countdown");
            self.publish_state(flight).await;
            if !self.pause(Duration::from_millis(wait_ms)).await {
                return false;
            }
        }
        true
    }

    /// Enter FLYING: fix the risk ceiling and the cosmetic round, then queue the next flight.
    ///
    /// Returns whether this flight is forced to explode on its first tick.
    async fn launch(&mut self, settings: &TenantRiskSettings, flight: &mut Flight) -> Result<bool> {
        let bets = self
            .aviator
            .rounds()
            .bets(&self.org_id, &flight.id, &BetFilter::all())
            .await?;
        let forced = self.counter.launch(settings.auto_explode_after);

        let live_stakes = total_live_stakes(&bets);
        let risk = if live_stakes > 0.0 {
            let requested = requested_risk(&mut self.rng, settings, live_stakes);
            let reserved = match self
                .aviator
                .ledger()
                .reserve_risk(&self.org_id, requested)
                .await
            {
                Ok(allocation) => {
                    if allocation.source == BudgetSource::Insufficient {
                        info!(
                            org_id = %self.org_id,
                            flight_id = %flight.id,
                            requested,
                            "risk budget insufficient; ceiling limited to stakes"
                        );
                    }
                    allocation.risk_amount
                }
                Err(err) => {
                    self.aviator.metrics().inc_store_errors();
                    warn!(org_id = %self.org_id, "risk reservation failed: {err:#}");
                    0.0
                }
            };
            live_stakes + reserved
        } else {
            demo_risk(&mut self.rng, settings)
        };

        let cosmetic = self.cosmetic_round(settings, &flight.id);
        flight.state = FlightState::Flying;
        flight.risk = risk;
        flight.live_stakes = live_stakes;
        flight.total_bets = cosmetic.total_bets;
        flight.leader_board = cosmetic.leader_board;
        self.write(
            &flight.id,
            &[
                FlightField::State(FlightState::Flying),
                FlightField::Risk(risk),
                FlightField::LiveStakes(live_stakes),
                FlightField::TotalBets(flight.total_bets),
                FlightField::LeaderBoard(flight.leader_board.clone()),
            ],
        )
        .await;

        self.aviator.metrics().inc_flights_launched();
        if forced {
            self.aviator.metrics().inc_forced_explosions();
        }
        info!(
            org_id = %self.org_id,
            flight_id = %flight.id,
            risk,
            live_stakes,
            bets = bets.len(),
            forced,
            "flight launched"
        );
        self.publish_state(flight).await;

        if let Err(err) = self.create_pending_flight().await {
            self.aviator.metrics().inc_store_errors();
            warn!(org_id = %self.org_id, "next flight creation failed: {err:#}");
        }
        Ok(forced)
    }

    fn cosmetic_round(&self, settings: &TenantRiskSettings, flight_id: &str) -> CosmeticRound {
        CosmeticRound::generate(
            self.aviator.cosmetic_seed(),
            flight_id,
            settings.min_total_bets,
            settings.max_total_bets,
        )
    }

    /// Tick until the flight explodes. Returns false if cancelled.
    async fn fly(&mut self, settings: &TenantRiskSettings, flight: &mut Flight, forced: bool) -> bool {
        let mut forced = forced;
        let mut tick: u64 = 0;
        let mut interval = tokio::time::interval(self.aviator.config().tick());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.reset();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = interval.tick() => {}
            }
            let started = Instant::now();
            let bets = match self
                .aviator
                .rounds()
                .bets(&self.org_id, &flight.id, &BetFilter::all())
                .await
            {
                Ok(bets) => bets,
                Err(err) => {
                    self.aviator.metrics().inc_store_errors();
                    warn!(org_id = %self.org_id, flight_id = %flight.id, "bet read failed: {err:#}");
                    continue;
                }
            };

            tick += 1;
            flight.multiplier =
                grow_multiplier(&mut self.rng, flight.multiplier, settings.max_multiplier_shift);
            let outcome = evaluate_tick(
                &mut self.rng,
                TickInput {
                    bets: &bets,
                    multiplier: flight.multiplier,
                    risk: flight.risk,
                    live_stakes: flight.live_stakes,
                    max_demo_stake: settings.max_demo_stake,
                    forced,
                },
            );
            forced = false;

            for settled in &outcome.settled {
                let mut bet = bets[settled.index].clone();
                bet.status = BetStatus::Closed;
                bet.payout = settled.payout;
                if let Err(err) = self
                    .aviator
                    .rounds()
                    .settle_bet(&self.org_id, &flight.id, &bet.id, bet.payout)
                    .await
                {
                    self.aviator.metrics().inc_store_errors();
                    warn!(org_id = %self.org_id, bet_id = %bet.id, "bet settlement failed: {err:#}");
                    continue;
                }
                self.aviator
                    .events()
                    .publish(EventMessage::bet_update(&bet))
                    .await;
            }

            leaderboard::advance(
                &mut flight.leader_board,
                self.aviator.cosmetic_seed(),
                &flight.id,
                tick,
                flight.multiplier,
            );
            self.write(
                &flight.id,
                &[
                    FlightField::Multiplier(flight.multiplier),
                    FlightField::LeaderBoard(flight.leader_board.clone()),
                ],
            )
            .await;
            self.aviator.metrics().record_tick(started.elapsed());

            if outcome.explode {
                debug!(
                    org_id = %self.org_id,
                    flight_id = %flight.id,
                    tick,
                    risk_used = outcome.risk_used,
                    "ceiling reached"
                );
                return true;
            }
            self.publish_state(flight).await;
        }
    }

    async fn explode(&self, flight: &mut Flight) {
        flight.state = FlightState::Exploded;
        self.write(&flight.id, &[FlightField::State(FlightState::Exploded)])
            .await;
        self.publish_state(flight).await;
        self.aviator.metrics().inc_flights_exploded();
        info!(
            org_id = %self.org_id,
            flight_id = %flight.id,
            multiplier = flight.multiplier,
            risk = flight.risk,
            "flight exploded"
        );

        let rounds = self.aviator.rounds();
        if let Err(err) = rounds
            .push_history(
                &self.org_id,
                &flight.display_multiplier(),
                self.aviator.config().history_capacity,
            )
            .await
        {
            self.aviator.metrics().inc_store_errors();
            warn!(org_id = %self.org_id, "history push failed: {err:#}");
        }

        // Cashouts increment profit-blown in the store, not in this copy.
        match rounds.get_flight(&self.org_id, &flight.id).await {
            Ok(Some(stored)) => flight.profit_blown = stored.profit_blown,
            Ok(None) => {}
            Err(err) => {
                self.aviator.metrics().inc_store_errors();
                warn!(org_id = %self.org_id, flight_id = %flight.id, "flight re-read failed: {err:#}");
            }
        }

        if flight.live_stakes > 0.0 {
            let profit = profit_share(flight.risk, flight.profit_blown);
            match self
                .aviator
                .ledger()
                .adjust_budget(&self.org_id, profit, profit)
                .await
            {
                Ok(()) => info!(org_id = %self.org_id, flight_id = %flight.id, profit, "profit share credited"),
                Err(err) => {
                    self.aviator.metrics().inc_store_errors();
                    warn!(org_id = %self.org_id, "profit share failed: {err:#}");
                }
            }
        }

        self.close_out(flight).await;
    }

    /// Persist a finished flight with the bets still in its list, then purge it.
    ///
    /// Bets still listed at explosion are lost and persist as closed with no payout. The flight
    /// stays in the round store if persistence fails so that a later sweep can retry.
    async fn close_out(&self, flight: &Flight) {
        let rounds = self.aviator.rounds();
        let ledger = self.aviator.ledger();
        let bets = match rounds.bets(&self.org_id, &flight.id, &BetFilter::all()).await {
            Ok(bets) => bets,
            Err(err) => {
                self.aviator.metrics().inc_store_errors();
                warn!(org_id = %self.org_id, flight_id = %flight.id, "final bet read failed: {err:#}");
                return;
            }
        };
        if !bets.is_empty() {
            let lost: Vec<PlaneBet> = bets
                .into_iter()
                .map(|mut bet| {
                    bet.status = BetStatus::Closed;
                    bet.payout = 0.0;
                    bet
                })
                .collect();
            let persisted = match ledger.insert_flight(flight).await {
                Ok(()) => ledger.insert_bets(&lost).await,
                Err(err) => Err(err),
            };
            if let Err(err) = persisted {
                self.aviator.metrics().inc_store_errors();
                warn!(org_id = %self.org_id, flight_id = %flight.id, "flight persistence failed: {err:#}");
                return;
            }
        }
        if let Err(err) = rounds.purge_flight(&self.org_id, &flight.id).await {
            self.aviator.metrics().inc_store_errors();
            warn!(org_id = %self.org_id, flight_id = %flight.id, "flight purge failed: {err:#}");
        }
    }

    /// Close out flights a previous run left in the exploded state.
    async fn sweep_exploded(&self) {
        let flights = match self.aviator.rounds().list_flights(&self.org_id).await {
            Ok(flights) => flights,
            Err(err) => {
                self.aviator.metrics().inc_store_errors();
                warn!(org_id = %self.org_id, "flight sweep failed: {err:#}");
                return;
            }
        };
        for flight in flights
            .iter()
            .filter(|flight| flight.state == FlightState::Exploded)
        {
            warn!(org_id = %self.org_id, flight_id = %flight.id, "closing out stale exploded flight");
            self.close_out(flight).await;
        }
    }

    async fn write(&self, flight_id: &str, fields: &[FlightField]) {
        if let Err(err) = self
            .aviator
            .rounds()
            .update_flight(&self.org_id, flight_id, fields)
            .await
        {
            self.aviator.metrics().inc_store_errors();
            warn!(org_id = %self.org_id, flight_id, "flight write failed: {err:#}");
        }
    }

    async fn publish_state(&self, flight: &Flight) {
        self.aviator
            .events()
            .publish(EventMessage::flight_state(flight))
            .await;
    }

    /// Sleep unless cancelled first. Returns false if cancelled.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{eventually, fast_config, flight_in, mocked, ORG};
    use crate::Mocked;
    use grandaviator_types::{AccountKind, EVENT_BET_UPDATE, EVENT_LICENSE_UPDATE};

    fn quick_settings() -> TenantRiskSettings {
        let mut settings = TenantRiskSettings::new(ORG, now_unix() + 3_600);
        settings.min_demo_risk_amount = 0.5;
        settings.max_demo_risk_amount = 0.6;
        settings
    }

    fn spawn(aviator: &Arc<Aviator<Mocked>>) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(aviator.clone(), ORG.to_string(), cancel.clone()));
        (cancel, task)
    }

    #[tokio::test]
    async fn test_synthetic_rounds_explode_and_record_history() {
        let aviator = mocked(fast_config());
        aviator.ledger().insert_settings(&quick_settings()).await.unwrap();
        let (cancel, task) = spawn(&aviator);

        assert!(
            eventually(|| async { aviator.rounds().history(ORG).await.unwrap().len() >= 2 }).await
        );
        cancel.cancel();
        task.await.unwrap();

        let history = aviator.rounds().history(ORG).await.unwrap();
        assert!(history.iter().all(|entry| entry.ends_with('x')));
        let metrics = aviator.metrics().snapshot();
        assert!(metrics.flights_exploded >= 2);
        assert!(metrics.flights_launched >= metrics.flights_exploded);
        // Synthetic rounds never touch the budget or the ledger.
        let settings = aviator.ledger().find_settings(ORG).await.unwrap().unwrap();
        assert_eq!(settings.amount_to_risk, 0.0);
        assert!(aviator.ledger().flights().is_empty());

        let states: Vec<FlightState> = aviator
            .events()
            .events()
            .iter()
            .filter_map(|event| event.message.get("state").cloned())
            .filter_map(|state| serde_json::from_value(state).ok())
            .collect();
        assert!(states.contains(&FlightState::Loading));
        assert!(states.contains(&FlightState::Flying));
        assert!(states.contains(&FlightState::Exploded));
    }

    #[tokio::test]
    async fn test_at_most_one_pending_and_one_flying() {
        let aviator = mocked(fast_config());
        aviator.ledger().insert_settings(&quick_settings()).await.unwrap();
        let (cancel, task) = spawn(&aviator);
        for _ in 0..100 {
            let flights = aviator.rounds().list_flights(ORG).await.unwrap();
            for state in [FlightState::Pending, FlightState::Flying] {
                assert!(flights.iter().filter(|f| f.state == state).count() <= 1);
            }
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_license_stops_engine() {
        let aviator = mocked(fast_config());
        let settings = TenantRiskSettings::new(ORG, now_unix() - 1);
        aviator.ledger().insert_settings(&settings).await.unwrap();
        let (_cancel, task) = spawn(&aviator);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("engine should end on its own")
            .unwrap();
        assert_eq!(aviator.events().named(EVENT_LICENSE_UPDATE).len(), 1);
        assert_eq!(aviator.rounds().flight_count(ORG), 0);
    }

    #[tokio::test]
    async fn test_missing_settings_stops_engine() {
        let aviator = mocked(fast_config());
        let (_cancel, task) = spawn(&aviator);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("engine should end on its own")
            .unwrap();
        assert!(aviator.events().events().is_empty());
    }

    #[tokio::test]
    async fn test_forced_explosion_on_first_tick() {
        let aviator = mocked(fast_config());
        let mut settings = quick_settings();
        settings.min_demo_risk_amount = 1_000.0;
        settings.max_demo_risk_amount = 1_000.0;
        settings.auto_explode_after = 1;
        aviator.ledger().insert_settings(&settings).await.unwrap();
        let (cancel, task) = spawn(&aviator);

        assert!(
            eventually(|| async { aviator.rounds().history(ORG).await.unwrap().len() >= 2 }).await
        );
        cancel.cancel();
        task.await.unwrap();
        let history = aviator.rounds().history(ORG).await.unwrap();
        assert!(history.iter().all(|entry| entry == "1.01x"));
        assert!(aviator.metrics().snapshot().forced_explosions >= 2);
    }

    #[tokio::test]
    async fn test_resumes_flying_flight() {
        let aviator = mocked(fast_config());
        aviator.ledger().insert_settings(&quick_settings()).await.unwrap();
        let mut flying = flight_in(&aviator, "stale", FlightState::Flying);
        flying.risk = 0.1;
        aviator.rounds().insert_flight(flying);
        let (cancel, task) = spawn(&aviator);

        assert!(
            eventually(|| async { aviator.rounds().get_flight(ORG, "stale").await.unwrap().is_none() })
                .await
        );
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(aviator.rounds().history(ORG).await.unwrap().last().unwrap(), "1.01x");
    }

    #[tokio::test]
    async fn test_sweeps_stale_exploded_flight() {
        let aviator = mocked(fast_config());
        aviator.ledger().insert_settings(&quick_settings()).await.unwrap();
        let stale = flight_in(&aviator, "stale", FlightState::Exploded);
        aviator
            .rounds()
            .append_bet(&PlaneBet {
                id: "b1".into(),
                flight_id: stale.id.clone(),
                org_id: ORG.into(),
                user_id: "u1".into(),
                account: AccountKind::Demo,
                side: "left".into(),
                stake: 1.0,
                status: BetStatus::Open,
                payout: 0.0,
                date_created: 0,
            })
            .await
            .unwrap();
        let (cancel, task) = spawn(&aviator);
        assert!(eventually(|| async { !aviator.ledger().bets().is_empty() }).await);
        cancel.cancel();
        task.await.unwrap();
        assert!(aviator.rounds().get_flight(ORG, "stale").await.unwrap().is_none());
        let bets = aviator.ledger().bets();
        assert_eq!(bets[0].status, BetStatus::Closed);
        assert_eq!(bets[0].payout, 0.0);
    }

    #[tokio::test]
    async fn test_live_flight_reserves_risk_and_persists_lost_bets() {
        let aviator = mocked(fast_config());
        let mut settings = quick_settings();
        settings.amount_to_risk = 100.0;
        aviator.ledger().insert_settings(&settings).await.unwrap();
        let pending = flight_in(&aviator, "live", FlightState::Pending);
        aviator
            .rounds()
            .append_bet(&PlaneBet {
                id: "b1".into(),
                flight_id: pending.id.clone(),
                org_id: ORG.into(),
                user_id: "u1".into(),
                account: AccountKind::Live,
                side: "left".into(),
                stake: 10.0,
                status: BetStatus::Waiting,
                payout: 0.0,
                date_created: 0,
            })
            .await
            .unwrap();
        let (cancel, task) = spawn(&aviator);

        assert!(eventually(|| async { !aviator.ledger().flights().is_empty() }).await);
        cancel.cancel();
        task.await.unwrap();

        let persisted = aviator.ledger().flights();
        let flight = &persisted[0];
        assert_eq!(flight.id, "live");
        assert_eq!(flight.live_stakes, 10.0);
        // Ceiling is stakes plus 50%..150% of stakes.
        assert!((15.0..=25.0).contains(&flight.risk));
        assert!(flight.multiplier * 10.0 >= flight.risk);
        assert_eq!(flight.leader_board.len(), grandaviator_execution::LEADERBOARD_SIZE);

        let bets = aviator.ledger().bets();
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].status, BetStatus::Closed);
        assert_eq!(bets[0].payout, 0.0);

        // Settled ticks published provisional payouts for the bet.
        let updates = aviator.events().named(EVENT_BET_UPDATE);
        assert!(!updates.is_empty());
        assert_eq!(updates[0].room, "u1");

        // Reserved risk left amount-to-risk, then half the unpaid ceiling came back to each budget.
        let reserved = flight.risk - 10.0;
        let profit = flight.risk * 0.5;
        let stored = aviator.ledger().find_settings(ORG).await.unwrap().unwrap();
        assert!((stored.amount_to_risk - (100.0 - reserved + profit)).abs() < 1e-9);
        assert!((stored.reserved_balance - profit).abs() < 1e-9);
    }
}
