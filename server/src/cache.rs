//! Redis-backed round store (requires the RedisJSON module).

use crate::store::{BetFilter, FlightField, RoundStore};
use anyhow::{anyhow, Context, Result};
use grandaviator_types::{Flight, PlaneBet};
use redis::aio::ConnectionManager;
use redis::FromRedisValue;
use std::sync::Arc;
use tokio::sync::Mutex;

const SCAN_BATCH: usize = 100;

/// Appends ARGV[2] unless the JSONPath in ARGV[1] already matches a bet.
const APPEND_BET_SCRIPT: &str = r#"
local existing = redis.call('JSON.GET', KEYS[1], ARGV[1])
if existing and existing ~= '[]' then
  return 0
end
redis.call('JSON.ARRAPPEND', KEYS[1], '$', ARGV[2])
return 1
"#;

/// Deletes the bets matching ARGV[1] and returns them, or nil when nothing matched.
const TAKE_BET_SCRIPT: &str = r#"
local found = redis.call('JSON.GET', KEYS[1], ARGV[1])
if not found or found == '[]' then
  return false
end
if redis.call('JSON.DEL', KEYS[1], ARGV[1]) == 0 then
  return false
end
return found
"#;

pub fn flight_key(prefix: &str, org_id: &str, flight_id: &str) -> String {
    format!("{prefix}{org_id}-plane:flight-{flight_id}")
}

pub fn bets_key(prefix: &str, org_id: &str, flight_id: &str) -> String {
    format!("{prefix}{org_id}-flight:bets-{flight_id}")
}

pub fn history_key(prefix: &str, org_id: &str) -> String {
    format!("{prefix}{org_id}-plane-history")
}

#[derive(Clone)]
pub struct RedisRoundStore {
    client: redis::Client,
    connection: Arc<Mutex<Option<ConnectionManager>>>,
    prefix: String,
}

impl RedisRoundStore {
    pub fn new(url: &str, prefix: String) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(None)),
            prefix,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(
                self.client
                    .get_connection_manager()
                    .await
                    .context("connect to redis")?,
            );
        }
        guard
            .clone()
            .ok_or_else(|| anyhow!("redis connection unavailable"))
    }

    async fn handle_error(&self, err: &redis::RedisError) {
        tracing::warn!("Redis round store command failed: {err}");
        if err.is_io_error() || err.is_connection_dropped() {
            *self.connection.lock().await = None;
        }
    }

    async fn query<T: FromRedisValue + Send>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.connection().await?;
        match cmd.query_async(&mut conn).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.handle_error(&err).await;
                Err(err.into())
            }
        }
    }

    async fn query_pipe(&self, pipe: &redis::Pipeline) -> Result<()> {
        let mut conn = self.connection().await?;
        match pipe.query_async::<()>(&mut conn).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.handle_error(&err).await;
                Err(err.into())
            }
        }
    }

    async fn read_flight(&self, key: &str) -> Result<Option<Flight>> {
        let raw: Option<String> = self
            .query(redis::cmd("JSON.GET").arg(key).arg("$"))
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let flights: Vec<Flight> =
            serde_json::from_str(&raw).with_context(|| format!("decode flight at {key}"))?;
        Ok(flights.into_iter().next())
    }
}

impl RoundStore for RedisRoundStore {
    async fn create_flight(&self, flight: &Flight) -> Result<()> {
        let doc = serde_json::to_string(flight).context("encode flight")?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("JSON.SET")
            .arg(flight_key(&self.prefix, &flight.org_id, &flight.id))
            .arg("$")
            .arg(doc)
            .ignore()
            .cmd("JSON.SET")
            .arg(bets_key(&self.prefix, &flight.org_id, &flight.id))
            .arg("$")
            .arg("[]")
            .arg("NX")
            .ignore();
        self.query_pipe(&pipe).await
    }

    async fn get_flight(&self, org_id: &str, flight_id: &str) -> Result<Option<Flight>> {
        self.read_flight(&flight_key(&self.prefix, org_id, flight_id))
            .await
    }

    async fn list_flights(&self, org_id: &str) -> Result<Vec<Flight>> {
        let pattern = flight_key(&self.prefix, org_id, "*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .query(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();

        let mut flights = Vec::with_capacity(keys.len());
        for key in keys {
            // A flight purged between SCAN and GET reads as None.
            if let Some(flight) = self.read_flight(&key).await? {
                flights.push(flight);
            }
        }
        Ok(flights)
    }

    async fn update_flight(
        &self,
        org_id: &str,
        flight_id: &str,
        fields: &[FlightField],
    ) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let key = flight_key(&self.prefix, org_id, flight_id);
        let mut pipe = redis::pipe();
        pipe.atomic();
        for field in fields {
            let value = field.to_json().context("encode flight field")?;
            pipe.cmd("JSON.SET")
                .arg(&key)
                .arg(field.path())
                .arg(value)
                .ignore();
        }
        self.query_pipe(&pipe).await
    }

    async fn incr_profit_blown(&self, org_id: &str, flight_id: &str, amount: f64) -> Result<()> {
        self.query::<()>(
            redis::cmd("JSON.NUMINCRBY")
                .arg(flight_key(&self.prefix, org_id, flight_id))
                .arg("$.profitBlown")
                .arg(amount),
        )
        .await
    }

    async fn append_bet(&self, bet: &PlaneBet) -> Result<bool> {
        let doc = serde_json::to_string(bet).context("encode bet")?;
        let side = BetFilter::user_side(&bet.user_id, &bet.side);
        let appended: i64 = self
            .query(
                redis::cmd("EVAL")
                    .arg(APPEND_BET_SCRIPT)
                    .arg(1)
                    .arg(bets_key(&self.prefix, &bet.org_id, &bet.flight_id))
                    .arg(side.json_path())
                    .arg(doc),
            )
            .await?;
        Ok(appended == 1)
    }

    async fn bets(
        &self,
        org_id: &str,
        flight_id: &str,
        filter: &BetFilter,
    ) -> Result<Vec<PlaneBet>> {
        let key = bets_key(&self.prefix, org_id, flight_id);
        let raw: Option<String> = self
            .query(redis::cmd("JSON.GET").arg(&key).arg(filter.json_path()))
            .await?;
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).with_context(|| format!("decode bets at {key}"))
    }

    async fn settle_bet(
        &self,
        org_id: &str,
        flight_id: &str,
        bet_id: &str,
        payout: f64,
    ) -> Result<()> {
        let key = bets_key(&self.prefix, org_id, flight_id);
        let path = BetFilter::bet(bet_id).json_path();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("JSON.SET")
            .arg(&key)
            .arg(format!("{path}.status"))
            .arg("\"closed\"")
            .ignore()
            .cmd("JSON.SET")
            .arg(&key)
            .arg(format!("{path}.payout"))
            .arg(payout)
            .ignore();
        self.query_pipe(&pipe).await
    }

    async fn take_bet(
        &self,
        org_id: &str,
        flight_id: &str,
        filter: &BetFilter,
    ) -> Result<Option<PlaneBet>> {
        let key = bets_key(&self.prefix, org_id, flight_id);
        let raw: Option<String> = self
            .query(
                redis::cmd("EVAL")
                    .arg(TAKE_BET_SCRIPT)
                    .arg(1)
                    .arg(&key)
                    .arg(filter.json_path()),
            )
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let bets: Vec<PlaneBet> =
            serde_json::from_str(&raw).with_context(|| format!("decode taken bet at {key}"))?;
        Ok(bets.into_iter().next())
    }

    async fn purge_flight(&self, org_id: &str, flight_id: &str) -> Result<()> {
        self.query::<()>(
            redis::cmd("DEL")
                .arg(flight_key(&self.prefix, org_id, flight_id))
                .arg(bets_key(&self.prefix, org_id, flight_id)),
        )
        .await
    }

    async fn push_history(&self, org_id: &str, entry: &str, capacity: usize) -> Result<()> {
        let key = history_key(&self.prefix, org_id);
        let last = capacity.max(1) as i64 - 1;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("LPUSH")
            .arg(&key)
            .arg(entry)
            .ignore()
            .cmd("LTRIM")
            .arg(&key)
            .arg(0)
            .arg(last)
            .ignore();
        self.query_pipe(&pipe).await
    }

    async fn history(&self, org_id: &str) -> Result<Vec<String>> {
        self.query(
            redis::cmd("LRANGE")
                .arg(history_key(&self.prefix, org_id))
                .arg(0)
                .arg(-1),
        )
        .await
    }
}
