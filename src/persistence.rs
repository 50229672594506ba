// =============================================================================
// Persistence — pools / trades / positions tables
// =============================================================================
//
// The teacher carries no database crate at all (app_state.rs and
// position_engine.rs are entirely in-memory behind parking_lot locks); this
// module is grounded instead on cooprefr-bettersys's use of
// `rusqlite = { features = ["bundled"] }`. A single `Connection` behind a
// `parking_lot::Mutex` matches the single-writer, single-threaded-scheduler
// model spec §5 mandates — there is no connection pool because there is only
// ever one writer.
// =============================================================================

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::domain::identity::{PoolAddress, PoolIdentity, ResolutionSource};
use crate::domain::position::Position;
use crate::domain::trade::{ExecutionCosts, ExitFields, Trade, TradeMode, TradeStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pools (
    pool_address TEXT PRIMARY KEY,
    base_mint TEXT NOT NULL,
    quote_mint TEXT NOT NULL,
    base_decimals INTEGER NOT NULL,
    quote_decimals INTEGER NOT NULL,
    base_symbol TEXT,
    quote_symbol TEXT,
    resolution_source TEXT NOT NULL,
    resolved_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pool_address TEXT NOT NULL,
    mode TEXT NOT NULL,
    size_usd REAL NOT NULL,
    entry_price REAL NOT NULL,
    entry_bin INTEGER NOT NULL,
    entry_score REAL NOT NULL,
    tier TEXT NOT NULL,
    regime_at_entry TEXT NOT NULL,
    entry_timestamp TEXT NOT NULL,
    entry_fees_usd REAL NOT NULL,
    entry_slippage_usd REAL NOT NULL,
    entry_asset_value_usd REAL NOT NULL,
    status TEXT NOT NULL,
    exit_price REAL,
    exit_timestamp TEXT,
    exit_fees_usd REAL,
    exit_slippage_usd REAL,
    realized_pnl_usd REAL,
    realized_pnl_pct REAL,
    exit_reason TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS positions (
    trade_id INTEGER PRIMARY KEY,
    pool_address TEXT NOT NULL,
    entry_price REAL NOT NULL,
    size_usd REAL NOT NULL,
    entry_timestamp TEXT NOT NULL,
    current_bin INTEGER NOT NULL,
    health_score REAL NOT NULL,
    risk_tier TEXT NOT NULL,
    run_id TEXT NOT NULL,
    closed_at TEXT,
    exit_reason TEXT,
    realized_pnl_usd REAL
);
"#;

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn load_pool_identity(&self, pool: &PoolAddress) -> anyhow::Result<Option<PoolIdentity>>;
    async fn save_pool_identity(&self, identity: &PoolIdentity) -> anyhow::Result<()>;

    /// Inserts a new trade row and returns the DB-assigned id. Never called
    /// with a pre-populated `trade.id`.
    async fn insert_trade(&self, trade: &Trade) -> anyhow::Result<i64>;
    async fn close_trade(&self, trade_id: i64, exit: &ExitFields) -> anyhow::Result<()>;

    async fn insert_position(&self, position: &Position) -> anyhow::Result<()>;
    async fn close_position(
        &self,
        trade_id: i64,
        closed_at: chrono::DateTime<chrono::Utc>,
        exit_reason: &str,
        realized_pnl_usd: f64,
    ) -> anyhow::Result<()>;

    /// All positions where `closed_at IS NULL`, used by the reconciliation
    /// phase to compute the authoritative hydration set.
    async fn load_open_positions(&self) -> anyhow::Result<Vec<Position>>;

    async fn load_closed_trades_for_run(&self, run_id: &str) -> anyhow::Result<Vec<Trade>>;
}

pub struct SqlitePersistence {
    conn: Mutex<Connection>,
}

impl SqlitePersistence {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!(path, "persistence schema ready");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn resolution_source_str(s: ResolutionSource) -> &'static str {
    match s {
        ResolutionSource::Cache => "cache",
        ResolutionSource::Persistence => "persistence",
        ResolutionSource::Hints => "hints",
        ResolutionSource::OnChainDecode => "on_chain_decode",
    }
}

fn parse_resolution_source(s: &str) -> ResolutionSource {
    match s {
        "cache" => ResolutionSource::Cache,
        "hints" => ResolutionSource::Hints,
        "on_chain_decode" => ResolutionSource::OnChainDecode,
        _ => ResolutionSource::Persistence,
    }
}

#[async_trait]
impl PersistenceStore for SqlitePersistence {
    async fn load_pool_identity(&self, pool: &PoolAddress) -> anyhow::Result<Option<PoolIdentity>> {
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                "SELECT pool_address, base_mint, quote_mint, base_decimals, quote_decimals, \
                 base_symbol, quote_symbol, resolution_source, resolved_at FROM pools WHERE pool_address = ?1",
                params![pool.0],
                |row| {
                    Ok(PoolIdentity {
                        pool_address: PoolAddress(row.get(0)?),
                        base_mint: row.get(1)?,
                        quote_mint: row.get(2)?,
                        base_decimals: row.get(3)?,
                        quote_decimals: row.get(4)?,
                        base_symbol: row.get(5)?,
                        quote_symbol: row.get(6)?,
                        resolution_source: parse_resolution_source(&row.get::<_, String>(7)?),
                        resolved_at: row
                            .get::<_, String>(8)?
                            .parse()
                            .unwrap_or_else(|_| chrono::Utc::now()),
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    async fn save_pool_identity(&self, identity: &PoolIdentity) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pools (pool_address, base_mint, quote_mint, base_decimals, quote_decimals, \
             base_symbol, quote_symbol, resolution_source, resolved_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(pool_address) DO NOTHING",
            params![
                identity.pool_address.0,
                identity.base_mint,
                identity.quote_mint,
                identity.base_decimals,
                identity.quote_decimals,
                identity.base_symbol,
                identity.quote_symbol,
                resolution_source_str(identity.resolution_source),
                identity.resolved_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn insert_trade(&self, trade: &Trade) -> anyhow::Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trades (pool_address, mode, size_usd, entry_price, entry_bin, entry_score, \
             tier, regime_at_entry, entry_timestamp, entry_fees_usd, entry_slippage_usd, \
             entry_asset_value_usd, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                trade.pool_address.0,
                trade.mode.to_string(),
                trade.size_usd,
                trade.entry_price,
                trade.entry_bin,
                trade.entry_score,
                trade.tier,
                trade.regime_at_entry,
                trade.entry_timestamp.to_rfc3339(),
                trade.costs.entry_fees_usd,
                trade.costs.entry_slippage_usd,
                trade.costs.entry_asset_value_usd,
                "open",
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn close_trade(&self, trade_id: i64, exit: &ExitFields) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE trades SET status = 'closed', exit_price = ?1, exit_timestamp = ?2, \
             exit_fees_usd = ?3, exit_slippage_usd = ?4, realized_pnl_usd = ?5, \
             realized_pnl_pct = ?6, exit_reason = ?7 WHERE id = ?8",
            params![
                exit.exit_price,
                exit.exit_timestamp.to_rfc3339(),
                exit.exit_fees_usd,
                exit.exit_slippage_usd,
                exit.realized_pnl_usd,
                exit.realized_pnl_pct,
                exit.exit_reason,
                trade_id,
            ],
        )?;
        Ok(())
    }

    async fn insert_position(&self, position: &Position) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO positions (trade_id, pool_address, entry_price, size_usd, entry_timestamp, \
             current_bin, health_score, risk_tier, run_id, closed_at, exit_reason, realized_pnl_usd) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, NULL, NULL)",
            params![
                position.trade_id,
                position.pool_address.0,
                position.entry_price,
                position.size_usd,
                position.entry_timestamp.to_rfc3339(),
                position.current_bin,
                position.health_score,
                position.risk_tier,
                position.run_id,
            ],
        )?;
        Ok(())
    }

    async fn close_position(
        &self,
        trade_id: i64,
        closed_at: chrono::DateTime<chrono::Utc>,
        exit_reason: &str,
        realized_pnl_usd: f64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE positions SET closed_at = ?1, exit_reason = ?2, realized_pnl_usd = ?3 WHERE trade_id = ?4",
            params![closed_at.to_rfc3339(), exit_reason, realized_pnl_usd, trade_id],
        )?;
        Ok(())
    }

    async fn load_open_positions(&self) -> anyhow::Result<Vec<Position>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT trade_id, pool_address, entry_price, size_usd, entry_timestamp, current_bin, \
             health_score, risk_tier, run_id, closed_at, exit_reason, realized_pnl_usd \
             FROM positions WHERE closed_at IS NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Position {
                trade_id: row.get(0)?,
                pool_address: PoolAddress(row.get(1)?),
                entry_price: row.get(2)?,
                size_usd: row.get(3)?,
                entry_timestamp: row
                    .get::<_, String>(4)?
                    .parse()
                    .unwrap_or_else(|_| chrono::Utc::now()),
                current_bin: row.get(5)?,
                health_score: row.get(6)?,
                risk_tier: row.get(7)?,
                run_id: row.get(8)?,
                closed_at: None,
                exit_reason: row.get(10)?,
                realized_pnl_usd: row.get(11)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn load_closed_trades_for_run(&self, run_id: &str) -> anyhow::Result<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.pool_address, t.mode, t.size_usd, t.entry_price, t.entry_bin, t.entry_score, \
             t.tier, t.regime_at_entry, t.entry_timestamp, t.entry_fees_usd, t.entry_slippage_usd, \
             t.entry_asset_value_usd, t.exit_price, t.exit_timestamp, t.exit_fees_usd, \
             t.exit_slippage_usd, t.realized_pnl_usd, t.realized_pnl_pct, t.exit_reason \
             FROM trades t JOIN positions p ON p.trade_id = t.id \
             WHERE t.status = 'closed' AND p.run_id = ?1",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            let mode_str: String = row.get(2)?;
            Ok(Trade {
                id: Some(row.get(0)?),
                pool_address: PoolAddress(row.get(1)?),
                mode: if mode_str == "live" { TradeMode::Live } else { TradeMode::Paper },
                size_usd: row.get(3)?,
                entry_price: row.get(4)?,
                entry_bin: row.get(5)?,
                entry_score: row.get(6)?,
                tier: row.get(7)?,
                regime_at_entry: row.get(8)?,
                entry_timestamp: row
                    .get::<_, String>(9)?
                    .parse()
                    .unwrap_or_else(|_| chrono::Utc::now()),
                costs: ExecutionCosts {
                    entry_fees_usd: row.get(10)?,
                    entry_slippage_usd: row.get(11)?,
                    entry_asset_value_usd: row.get(12)?,
                },
                status: TradeStatus::Closed,
                exit: Some(ExitFields {
                    exit_price: row.get(13)?,
                    exit_timestamp: row
                        .get::<_, String>(14)?
                        .parse()
                        .unwrap_or_else(|_| chrono::Utc::now()),
                    exit_fees_usd: row.get(15)?,
                    exit_slippage_usd: row.get(16)?,
                    realized_pnl_usd: row.get(17)?,
                    realized_pnl_pct: row.get(18)?,
                    exit_reason: row.get(19)?,
                }),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_trade_assigns_id_never_fabricated_by_caller() {
        let store = SqlitePersistence::open_in_memory().unwrap();
        let trade = Trade {
            id: None,
            pool_address: PoolAddress::from("pool1"),
            mode: TradeMode::Paper,
            size_usd: 500.0,
            entry_price: 1.0,
            entry_bin: 100,
            entry_score: 75.0,
            tier: "standard".into(),
            regime_at_entry: "NEUTRAL".into(),
            entry_timestamp: chrono::Utc::now(),
            costs: ExecutionCosts { entry_fees_usd: 1.5, entry_slippage_usd: 1.0, entry_asset_value_usd: 500.0 },
            status: TradeStatus::Open,
            exit: None,
        };
        let id = store.insert_trade(&trade).await.unwrap();
        assert!(id > 0);
    }

    #[tokio::test]
    async fn load_open_positions_excludes_closed() {
        let store = SqlitePersistence::open_in_memory().unwrap();
        let trade = Trade {
            id: None,
            pool_address: PoolAddress::from("pool1"),
            mode: TradeMode::Paper,
            size_usd: 500.0,
            entry_price: 1.0,
            entry_bin: 100,
            entry_score: 75.0,
            tier: "standard".into(),
            regime_at_entry: "NEUTRAL".into(),
            entry_timestamp: chrono::Utc::now(),
            costs: ExecutionCosts { entry_fees_usd: 1.5, entry_slippage_usd: 1.0, entry_asset_value_usd: 500.0 },
            status: TradeStatus::Open,
            exit: None,
        };
        let id = store.insert_trade(&trade).await.unwrap();
        let position = Position {
            trade_id: id,
            pool_address: PoolAddress::from("pool1"),
            entry_price: 1.0,
            size_usd: 500.0,
            entry_timestamp: chrono::Utc::now(),
            current_bin: 100,
            health_score: 1.0,
            risk_tier: "standard".into(),
            run_id: "run-1".into(),
            closed_at: None,
            exit_reason: None,
            realized_pnl_usd: None,
        };
        store.insert_position(&position).await.unwrap();
        assert_eq!(store.load_open_positions().await.unwrap().len(), 1);

        store
            .close_position(id, chrono::Utc::now(), "TEST", 5.0)
            .await
            .unwrap();
        assert_eq!(store.load_open_positions().await.unwrap().len(), 0);
    }
}
