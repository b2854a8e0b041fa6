use grandaviator_execution::{PhaseConfig, DEFAULT_HISTORY_CAPACITY};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_REDIS_PREFIX: &str = "";
pub const DEFAULT_EVENTS_CHANNEL: &str = "aviator:events";
pub const DEFAULT_LEDGER_PATH: &str = "aviator.db";
pub const DEFAULT_BALANCE_URL: &str = "http://127.0.0.1:8081";
pub const DEFAULT_SERVICE_NAME: &str = "aviator";

/// Settings of the per-organization round engines.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub phases: PhaseConfig,
    pub history_capacity: usize,
    /// Fixes every engine RNG and the cosmetic seed when set.
    pub seed: Option<u64>,
    /// Source label attached to balance adjustments.
    pub service_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            phases: PhaseConfig::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            seed: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.phases.tick_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.phases.cooldown_ms)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub redis_url: String,
    pub redis_prefix: String,
    pub events_channel: String,
    pub ledger_path: PathBuf,
    pub balance_url: String,
    #[serde(skip)]
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            redis_prefix: DEFAULT_REDIS_PREFIX.to_string(),
            events_channel: DEFAULT_EVENTS_CHANNEL.to_string(),
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            balance_url: DEFAULT_BALANCE_URL.to_string(),
            engine: EngineConfig::default(),
        }
    }
}
