//! SQLite ledger.

use crate::ledger::{Ledger, SettingsUpdate};
use anyhow::{bail, Context, Result};
use grandaviator_execution::{allocate_risk, Allocation};
use grandaviator_types::{
    api::PageQuery, AccountKind, BetStatus, Flight, FlightState, PlaneBet, SettingsPatch,
    TenantRiskSettings,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SETTINGS_COLUMNS: &str = "org_id, license_expiration, min_total_bets, max_total_bets, \
     min_demo_risk_amount, max_demo_risk_amount, min_risk_percentage, max_risk_percentage, \
     max_multiplier_shift, max_demo_stake, auto_explode_after, amount_to_risk, reserved_balance";

const BET_COLUMNS: &str =
    "id, flight_id, org_id, user_id, account, side, stake, status, payout, date_created";

#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("open ledger db")?;
        init_schema_sqlite(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = match conn.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            op(&mut guard)
        })
        .await
        .context("ledger task failed")?
    }
}

fn init_schema_sqlite(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS settings (
             org_id TEXT PRIMARY KEY,
             license_expiration INTEGER NOT NULL,
             min_total_bets INTEGER NOT NULL,
             max_total_bets INTEGER NOT NULL,
             min_demo_risk_amount REAL NOT NULL,
             max_demo_risk_amount REAL NOT NULL,
             min_risk_percentage REAL NOT NULL,
             max_risk_percentage REAL NOT NULL,
             max_multiplier_shift REAL NOT NULL,
             max_demo_stake REAL NOT NULL,
             auto_explode_after INTEGER NOT NULL,
             amount_to_risk REAL NOT NULL,
             reserved_balance REAL NOT NULL
         );
         CREATE TABLE IF NOT EXISTS flights (
             id TEXT PRIMARY KEY,
             org_id TEXT NOT NULL,
             state TEXT NOT NULL,
             multiplier REAL NOT NULL,
             risk REAL NOT NULL,
             profit_blown REAL NOT NULL,
             live_stakes REAL NOT NULL,
             total_bets INTEGER NOT NULL,
             leader_board TEXT NOT NULL,
             date_created INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS bets (
             id TEXT PRIMARY KEY,
             flight_id TEXT NOT NULL,
             org_id TEXT NOT NULL,
             user_id TEXT NOT NULL,
             account TEXT NOT NULL,
             side TEXT NOT NULL,
             stake REAL NOT NULL,
             status TEXT NOT NULL,
             payout REAL NOT NULL,
             date_created INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS bets_user_created ON bets (user_id, date_created DESC);",
    )
    .context("init ledger schema")?;
    Ok(())
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn settings_from_row(row: &Row<'_>) -> rusqlite::Result<TenantRiskSettings> {
    Ok(TenantRiskSettings {
        org_id: row.get(0)?,
        license_expiration: row.get(1)?,
        min_total_bets: row.get::<_, i64>(2)? as u64,
        max_total_bets: row.get::<_, i64>(3)? as u64,
        min_demo_risk_amount: row.get(4)?,
        max_demo_risk_amount: row.get(5)?,
        min_risk_percentage: row.get(6)?,
        max_risk_percentage: row.get(7)?,
        max_multiplier_shift: row.get(8)?,
        max_demo_stake: row.get(9)?,
        auto_explode_after: row.get::<_, i64>(10)? as u64,
        amount_to_risk: row.get(11)?,
        reserved_balance: row.get(12)?,
    })
}

fn bet_from_row(row: &Row<'_>) -> rusqlite::Result<PlaneBet> {
    let account: String = row.get(4)?;
    let status: String = row.get(7)?;
    Ok(PlaneBet {
        id: row.get(0)?,
        flight_id: row.get(1)?,
        org_id: row.get(2)?,
        user_id: row.get(3)?,
        account: AccountKind::parse(&account)
            .ok_or_else(|| conversion_error(4, format!("unknown account {account}")))?,
        side: row.get(5)?,
        stake: row.get(6)?,
        status: BetStatus::parse(&status)
            .ok_or_else(|| conversion_error(7, format!("unknown bet status {status}")))?,
        payout: row.get(8)?,
        date_created: row.get(9)?,
    })
}

fn load_settings(conn: &Connection, org_id: &str) -> Result<Option<TenantRiskSettings>> {
    conn.query_row(
        &format!("SELECT {SETTINGS_COLUMNS} FROM settings WHERE org_id = ?1"),
        params![org_id],
        settings_from_row,
    )
    .optional()
    .context("load settings")
}

fn write_settings(conn: &Connection, settings: &TenantRiskSettings) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO settings ({SETTINGS_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            settings.org_id,
            settings.license_expiration,
            settings.min_total_bets as i64,
            settings.max_total_bets as i64,
            settings.min_demo_risk_amount,
            settings.max_demo_risk_amount,
            settings.min_risk_percentage,
            settings.max_risk_percentage,
            settings.max_multiplier_shift,
            settings.max_demo_stake,
            settings.auto_explode_after as i64,
            settings.amount_to_risk,
            settings.reserved_balance,
        ],
    )
    .context("write settings")?;
    Ok(())
}

impl Ledger for SqliteLedger {
    async fn find_settings(&self, org_id: &str) -> Result<Option<TenantRiskSettings>> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| load_settings(conn, &org_id))
            .await
    }

    async fn all_settings(&self) -> Result<Vec<TenantRiskSettings>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SETTINGS_COLUMNS} FROM settings ORDER BY org_id"
            ))?;
            let rows = stmt.query_map([], settings_from_row)?;
            let mut settings = Vec::new();
            for row in rows {
                settings.push(row.context("decode settings row")?);
            }
            Ok(settings)
        })
        .await
    }

    async fn insert_settings(&self, settings: &TenantRiskSettings) -> Result<()> {
        let settings = settings.clone();
        self.with_conn(move |conn| write_settings(conn, &settings))
            .await
    }

    async fn update_settings(&self, org_id: &str, patch: &SettingsPatch) -> Result<SettingsUpdate> {
        let org_id = org_id.to_string();
        let patch = patch.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(mut settings) = load_settings(&tx, &org_id)? else {
                return Ok(SettingsUpdate::NotFound);
            };
            if let Err(err) = settings.apply(&patch) {
                return Ok(SettingsUpdate::Rejected(err));
            }
            write_settings(&tx, &settings)?;
            tx.commit().context("commit settings update")?;
            Ok(SettingsUpdate::Updated(settings))
        })
        .await
    }

    async fn set_license_expiration(&self, org_id: &str, expiration: i64) -> Result<bool> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE settings SET license_expiration = ?1 WHERE org_id = ?2",
                    params![expiration, org_id],
                )
                .context("update license expiration")?;
            Ok(changed > 0)
        })
        .await
    }

    async fn adjust_budget(
        &self,
        org_id: &str,
        amount_to_risk: f64,
        reserved_balance: f64,
    ) -> Result<()> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE settings
                     SET amount_to_risk = amount_to_risk + ?1,
                         reserved_balance = reserved_balance + ?2
                     WHERE org_id = ?3",
                    params![amount_to_risk, reserved_balance, org_id],
                )
                .context("adjust budget")?;
            if changed == 0 {
                bail!("no settings for {org_id}");
            }
            Ok(())
        })
        .await
    }

    async fn reserve_risk(&self, org_id: &str, requested: f64) -> Result<Allocation> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(settings) = load_settings(&tx, &org_id)? else {
                bail!("no settings for {org_id}");
            };
            let allocation = allocate_risk(settings.budget(), requested);
            tx.execute(
                "UPDATE settings SET amount_to_risk = ?1, reserved_balance = ?2 WHERE org_id = ?3",
                params![
                    allocation.remaining.amount_to_risk,
                    allocation.remaining.reserved_balance,
                    org_id
                ],
            )
            .context("persist remaining budget")?;
            tx.commit().context("commit risk reservation")?;
            Ok(allocation)
        })
        .await
    }

    async fn insert_flight(&self, flight: &Flight) -> Result<()> {
        let flight = flight.clone();
        self.with_conn(move |conn| {
            let leader_board =
                serde_json::to_string(&flight.leader_board).context("encode leaderboard")?;
            conn.execute(
                "INSERT OR REPLACE INTO flights
                 (id, org_id, state, multiplier, risk, profit_blown, live_stakes, total_bets,
                  leader_board, date_created)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    flight.id,
                    flight.org_id,
                    flight.state.as_str(),
                    flight.multiplier,
                    flight.risk,
                    flight.profit_blown,
                    flight.live_stakes,
                    flight.total_bets as i64,
                    leader_board,
                    flight.date_created,
                ],
            )
            .context("insert flight")?;
            Ok(())
        })
        .await
    }

    async fn insert_bets(&self, bets: &[PlaneBet]) -> Result<()> {
        if bets.is_empty() {
            return Ok(());
        }
        let bets = bets.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO bets ({BET_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(id) DO UPDATE SET
                         status = excluded.status,
                         payout = excluded.payout"
                ))?;
                for bet in &bets {
                    stmt.execute(params![
                        bet.id,
                        bet.flight_id,
                        bet.org_id,
                        bet.user_id,
                        bet.account.as_str(),
                        bet.side,
                        bet.stake,
                        bet.status.as_str(),
                        bet.payout,
                        bet.date_created,
                    ])
                    .with_context(|| format!("insert bet {}", bet.id))?;
                }
            }
            tx.commit().context("commit bets")?;
            Ok(())
        })
        .await
    }

    async fn bets_page(&self, user_id: &str, page: PageQuery) -> Result<Vec<PlaneBet>> {
        let user_id = user_id.to_string();
        let page = page.normalized();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BET_COLUMNS} FROM bets WHERE user_id = ?1
                 ORDER BY date_created DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(
                params![user_id, i64::from(page.limit), page.offset() as i64],
                bet_from_row,
            )?;
            let mut bets = Vec::new();
            for row in rows {
                bets.push(row.context("decode bet row")?);
            }
            Ok(bets)
        })
        .await
    }
}

impl SqliteLedger {
    /// Flights persisted for an organization, newest first.
    pub async fn flights(&self, org_id: &str) -> Result<Vec<Flight>> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, org_id, state, multiplier, risk, profit_blown, live_stakes,
                        total_bets, leader_board, date_created
                 FROM flights WHERE org_id = ?1 ORDER BY date_created DESC, rowid DESC",
            )?;
            let rows = stmt.query_map(params![org_id], |row| {
                let state: String = row.get(2)?;
                let leader_board: String = row.get(8)?;
                Ok(Flight {
                    id: row.get(0)?,
                    org_id: row.get(1)?,
                    state: FlightState::parse(&state)
                        .ok_or_else(|| conversion_error(2, format!("unknown state {state}")))?,
                    multiplier: row.get(3)?,
                    risk: row.get(4)?,
                    profit_blown: row.get(5)?,
                    live_stakes: row.get(6)?,
                    total_bets: row.get::<_, i64>(7)? as u64,
                    leader_board: serde_json::from_str(&leader_board)
                        .map_err(|err| conversion_error(8, err.to_string()))?,
                    date_created: row.get(9)?,
                })
            })?;
            let mut flights = Vec::new();
            for row in rows {
                flights.push(row.context("decode flight row")?);
            }
            Ok(flights)
        })
        .await
    }
}
