//! Grandaviator service.
//!
//! Runs one round engine per subscribed organization and exposes the betting surface over HTTP.
//! Live rounds are kept in the round store, finished rounds and tenant settings in the ledger,
//! balances in the external balance service, and real-time updates go out through the
//! broadcaster.

use grandaviator_execution::mix_seed;
use rand::rngs::StdRng;
use rand::SeedableRng;

mod api;
pub use api::Api;

pub mod balance;
mod betting;
pub mod cache;
pub mod config;
mod engine;
pub mod error;
pub mod fanout;
pub mod ledger;
pub mod ledger_persistence;
pub mod metrics;
mod registry;
pub mod store;
mod subscription;

pub use config::{EngineConfig, ServerConfig};
pub use error::{ErrorKind, ServiceError};
pub use metrics::{EngineMetrics, EngineMetricsSnapshot};
pub use registry::EngineRegistry;

use balance::{BalanceService, HttpBalanceClient};
use cache::RedisRoundStore;
use fanout::{Broadcaster, RedisFanout};
use ledger::Ledger;
use ledger_persistence::SqliteLedger;
use store::RoundStore;

/// The collaborators a service instance runs against.
pub trait Backend: Send + Sync + 'static {
    type Rounds: RoundStore;
    type Ledger: Ledger;
    type Balances: BalanceService;
    type Events: Broadcaster;
}

/// Redis round store, SQLite ledger, HTTP balance service, Redis pub/sub events.
pub struct Production;

impl Backend for Production {
    type Rounds = RedisRoundStore;
    type Ledger = SqliteLedger;
    type Balances = HttpBalanceClient;
    type Events = RedisFanout;
}

/// In-memory collaborators.
#[cfg(any(test, feature = "mocks"))]
pub struct Mocked;

#[cfg(any(test, feature = "mocks"))]
impl Backend for Mocked {
    type Rounds = store::Memory;
    type Ledger = ledger::Memory;
    type Balances = balance::Memory;
    type Events = fanout::Recorder;
}

pub struct Aviator<B: Backend> {
    config: EngineConfig,
    rounds: B::Rounds,
    ledger: B::Ledger,
    balances: B::Balances,
    events: B::Events,
    registry: EngineRegistry,
    metrics: EngineMetrics,
    cosmetic_seed: u64,
}

impl<B: Backend> Aviator<B> {
    pub fn new(
        config: EngineConfig,
        rounds: B::Rounds,
        ledger: B::Ledger,
        balances: B::Balances,
        events: B::Events,
    ) -> Self {
        let cosmetic_seed = config.seed.unwrap_or_else(rand::random);
        Self {
            config,
            rounds,
            ledger,
            balances,
            events,
            registry: EngineRegistry::default(),
            metrics: EngineMetrics::default(),
            cosmetic_seed,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rounds(&self) -> &B::Rounds {
        &self.rounds
    }

    pub fn ledger(&self) -> &B::Ledger {
        &self.ledger
    }

    pub fn balances(&self) -> &B::Balances {
        &self.balances
    }

    pub fn events(&self) -> &B::Events {
        &self.events
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Seed of the cosmetic leaderboard RNG.
    pub fn cosmetic_seed(&self) -> u64 {
        self.cosmetic_seed
    }

    /// RNG driving risk draws, multiplier growth and settlement for one organization.
    fn engine_rng(&self, org_id: &str) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(mix_seed(seed, org_id)),
            None => StdRng::from_entropy(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use grandaviator_execution::PhaseConfig;
    use grandaviator_types::{AccountKind, Flight, FlightState, TenantRiskSettings, User};
    use std::sync::Arc;
    use std::time::Duration;

    pub const ORG: &str = "org";

    pub fn fast_config() -> EngineConfig {
        EngineConfig {
            phases: PhaseConfig {
                countdown_ms: 20,
                countdown_step_ms: 10,
                tick_ms: 2,
                cooldown_ms: 10,
            },
            seed: Some(7),
            ..EngineConfig::default()
        }
    }

    pub fn mocked(config: EngineConfig) -> Arc<Aviator<Mocked>> {
        Arc::new(Aviator::new(
            config,
            store::Memory::default(),
            ledger::Memory::default(),
            balance::Memory::default(),
            fanout::Recorder::default(),
        ))
    }

    pub fn user(id: &str, account: AccountKind, balance: f64) -> User {
        User {
            id: id.into(),
            org_id: ORG.into(),
            demo_balance: balance,
            live_balance: balance,
            current_account: account,
        }
    }

    pub async fn licensed(aviator: &Aviator<Mocked>) -> TenantRiskSettings {
        let settings = TenantRiskSettings::new(ORG, grandaviator_types::now_unix() + 3_600);
        aviator.ledger().insert_settings(&settings).await.unwrap();
        settings
    }

    pub fn flight_in(aviator: &Aviator<Mocked>, id: &str, state: FlightState) -> Flight {
        let mut flight = Flight::new(id, ORG, grandaviator_types::now_unix());
        flight.state = state;
        aviator.rounds().insert_flight(flight.clone());
        flight
    }

    /// Poll `check` until it holds or two seconds pass.
    pub async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..400 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}
