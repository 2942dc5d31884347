//! Trade ledger: durable trade records and position snapshots for one wallet.
//!
//! All writes are single-row updates inside per-tick transactions; the ledger
//! is the sole synchronization point between the monitor and executor loops.

use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::sync::Mutex;

use super::schema::{address_slug, create_tables};
use crate::types::{ExecutionStatus, PositionSnapshot, Side, TradeRecord};

pub struct Ledger {
    conn: Mutex<Connection>,
    trades_table: String,
    positions_table: String,
}

impl Ledger {
    pub fn open(db_path: &str, wallet: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn, wallet)
    }

    /// In-memory ledger for tests.
    pub fn open_in_memory(wallet: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, wallet)
    }

    fn with_connection(conn: Connection, wallet: &str) -> Result<Self> {
        let slug = address_slug(wallet);
        create_tables(&conn, &slug)?;
        Ok(Self {
            conn: Mutex::new(conn),
            trades_table: format!("trades_{slug}"),
            positions_table: format!("positions_{slug}"),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("ledger lock poisoned"))
    }

    /// Write one monitor tick atomically: new trade records (duplicates by
    /// tx hash are ignored) and position upserts, in a single transaction.
    /// Returns the number of trades actually inserted.
    pub fn commit_tick(
        &self,
        trades: &[TradeRecord],
        positions: &[PositionSnapshot],
    ) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now().timestamp();

        let mut inserted = 0;
        for trade in trades {
            let rows = tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (tx_hash, condition_id, asset, side, size, price,
                        usdc_size, title, outcome, outcome_index, timestamp, processed,
                        attempt_count, execution_status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                    self.trades_table
                ),
                params![
                    trade.tx_hash,
                    trade.condition_id,
                    trade.asset,
                    trade.side.as_str(),
                    trade.size,
                    trade.price,
                    trade.usdc_size,
                    trade.title,
                    trade.outcome,
                    trade.outcome_index,
                    trade.timestamp,
                    trade.processed as i64,
                    trade.attempt_count,
                    trade.execution_status.map(|s| s.as_str()),
                    now,
                ],
            )?;
            inserted += rows;
        }

        for position in positions {
            tx.execute(
                &format!(
                    "INSERT INTO {} (condition_id, asset, size, outcome, outcome_index,
                        redeemable, title, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(condition_id) DO UPDATE SET
                        asset = excluded.asset,
                        size = excluded.size,
                        outcome = excluded.outcome,
                        outcome_index = excluded.outcome_index,
                        redeemable = excluded.redeemable,
                        title = excluded.title,
                        updated_at = excluded.updated_at",
                    self.positions_table
                ),
                params![
                    position.condition_id,
                    position.asset,
                    position.size,
                    position.outcome,
                    position.outcome_index,
                    position.redeemable as i64,
                    position.title,
                    now,
                ],
            )?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Every trade ever observed, for rebuilding the monitor's dedup index.
    pub fn all_trades(&self) -> Result<Vec<TradeRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT tx_hash, condition_id, asset, side, size, price, usdc_size, title,
                    outcome, outcome_index, timestamp, processed, attempt_count, execution_status
             FROM {}",
            self.trades_table
        ))?;
        let rows = stmt.query_map([], row_to_trade)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Unprocessed trades with retry budget left, oldest first.
    pub fn pending_trades(&self, retry_limit: u32, limit: usize) -> Result<Vec<TradeRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT tx_hash, condition_id, asset, side, size, price, usdc_size, title,
                    outcome, outcome_index, timestamp, processed, attempt_count, execution_status
             FROM {}
             WHERE processed = 0 AND attempt_count < ?1
             ORDER BY timestamp ASC
             LIMIT ?2",
            self.trades_table
        ))?;
        let rows = stmt.query_map(params![retry_limit, limit as i64], row_to_trade)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn trade(&self, tx_hash: &str) -> Result<Option<TradeRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT tx_hash, condition_id, asset, side, size, price, usdc_size, title,
                    outcome, outcome_index, timestamp, processed, attempt_count, execution_status
             FROM {} WHERE tx_hash = ?1",
            self.trades_table
        ))?;
        let mut rows = stmt.query_map(params![tx_hash], row_to_trade)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Terminal state: the executor is done with this record.
    pub fn mark_terminal(&self, tx_hash: &str, status: ExecutionStatus) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "UPDATE {} SET processed = 1, execution_status = ?2 WHERE tx_hash = ?1",
                self.trades_table
            ),
            params![tx_hash, status.as_str()],
        )?;
        Ok(())
    }

    /// A retryable failure: spend one unit of retry budget, stay unprocessed.
    pub fn record_attempt_failure(&self, tx_hash: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "UPDATE {} SET attempt_count = attempt_count + 1 WHERE tx_hash = ?1",
                self.trades_table
            ),
            params![tx_hash],
        )?;
        Ok(())
    }

    /// Administrative reset: force one record back through the executor.
    pub fn reset_trade(&self, tx_hash: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "UPDATE {} SET processed = 0, attempt_count = 0, execution_status = NULL
                 WHERE tx_hash = ?1",
                self.trades_table
            ),
            params![tx_hash],
        )?;
        Ok(())
    }

    /// Retire every still-pending record observed before `cutoff` without
    /// executing it (the skip-past-trades startup mode). Returns the number
    /// of records retired.
    pub fn retire_pending_before(&self, cutoff: i64) -> Result<usize> {
        let conn = self.lock()?;
        let rows = conn.execute(
            &format!(
                "UPDATE {} SET processed = 1, execution_status = ?2
                 WHERE processed = 0 AND timestamp < ?1",
                self.trades_table
            ),
            params![cutoff, ExecutionStatus::PreExisting.as_str()],
        )?;
        Ok(rows)
    }

    /// Give possibly-transient failures a fresh retry budget: terminal
    /// records with a transient status tag, and records that ran out of
    /// attempts without reaching a terminal status. Returns how many were
    /// reset.
    pub fn reset_transient_failures(&self, retry_limit: u32) -> Result<usize> {
        let transient: Vec<String> = ExecutionStatus::ALL
            .iter()
            .filter(|s| s.is_transient())
            .map(|s| format!("'{}'", s.as_str()))
            .collect();

        let conn = self.lock()?;
        let rows = conn.execute(
            &format!(
                "UPDATE {} SET processed = 0, attempt_count = 0, execution_status = NULL
                 WHERE (processed = 1 AND execution_status IN ({}))
                    OR (processed = 0 AND attempt_count >= ?1)",
                self.trades_table,
                transient.join(", ")
            ),
            params![retry_limit],
        )?;
        Ok(rows)
    }

    pub fn positions(&self) -> Result<Vec<PositionSnapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT asset, condition_id, size, outcome, outcome_index, redeemable, title
             FROM {}",
            self.positions_table
        ))?;
        let rows = stmt.query_map([], row_to_position)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn position(&self, condition_id: &str) -> Result<Option<PositionSnapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT asset, condition_id, size, outcome, outcome_index, redeemable, title
             FROM {} WHERE condition_id = ?1",
            self.positions_table
        ))?;
        let mut rows = stmt.query_map(params![condition_id], row_to_position)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

fn row_to_trade(row: &rusqlite::Row<'_>) -> rusqlite::Result<TradeRecord> {
    let side_str: String = row.get(3)?;
    let side = Side::parse(&side_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown side {side_str}").into(),
        )
    })?;
    let status: Option<String> = row.get(13)?;
    Ok(TradeRecord {
        tx_hash: row.get(0)?,
        condition_id: row.get(1)?,
        asset: row.get(2)?,
        side,
        size: row.get(4)?,
        price: row.get(5)?,
        usdc_size: row.get(6)?,
        title: row.get(7)?,
        outcome: row.get(8)?,
        outcome_index: row.get(9)?,
        timestamp: row.get(10)?,
        processed: row.get::<_, i64>(11)? != 0,
        attempt_count: row.get(12)?,
        execution_status: status.as_deref().and_then(ExecutionStatus::parse),
    })
}

fn row_to_position(row: &rusqlite::Row<'_>) -> rusqlite::Result<PositionSnapshot> {
    Ok(PositionSnapshot {
        asset: row.get(0)?,
        condition_id: row.get(1)?,
        size: row.get(2)?,
        outcome: row.get(3)?,
        outcome_index: row.get(4)?,
        redeemable: row.get::<_, i64>(5)? != 0,
        title: row.get(6)?,
    })
}
