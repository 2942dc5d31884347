//! Trade monitor: polls the activity feed for the tracked wallet and appends
//! new trade records to the ledger.
//!
//! Dedup happens here against the full in-memory index of previously seen
//! records: by transaction hash first, then by the field-epsilon rule for
//! feeds that resubmit without stable IDs. Positions are upserted every tick
//! regardless of trade dedup. A tick either commits its whole diffed batch or
//! nothing.

use anyhow::Result;
use chrono::Utc;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::feed::ActivityFeed;
use crate::storage::Ledger;
use crate::types::{ExecutionStatus, TradeRecord};

/// How many activity events to request per poll
const ACTIVITY_FETCH_LIMIT: usize = 400;

/// Result of one monitor tick.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickSummary {
    pub fetched: usize,
    pub new_trades: usize,
    pub positions: usize,
}

pub struct TradeMonitor {
    feed: Arc<dyn ActivityFeed>,
    ledger: Arc<Ledger>,
    tracked_wallet: String,
    max_age_hours: i64,
    /// Process start time; earlier trades get the PRE_EXISTING tag
    started_at: i64,
    /// When set, pre-existing trades are recorded already processed so the
    /// executor never sees them
    skip_pre_start: bool,
    seen_hashes: FxHashSet<String>,
    seen_records: Vec<TradeRecord>,
}

impl TradeMonitor {
    /// Build a monitor, rebuilding the dedup index from the ledger so a
    /// restart does not re-copy old trades.
    pub fn new(
        feed: Arc<dyn ActivityFeed>,
        ledger: Arc<Ledger>,
        tracked_wallet: String,
        max_age_hours: i64,
        skip_pre_start: bool,
    ) -> Result<Self> {
        let seen_records = ledger.all_trades()?;
        let seen_hashes = seen_records.iter().map(|t| t.tx_hash.clone()).collect();
        info!(
            "[MONITOR] Loaded {} known trades for {}",
            seen_records.len(),
            tracked_wallet
        );
        Ok(Self {
            feed,
            ledger,
            tracked_wallet,
            max_age_hours,
            started_at: Utc::now().timestamp(),
            skip_pre_start,
            seen_hashes,
            seen_records,
        })
    }

    fn is_duplicate(&self, candidate: &TradeRecord, batch: &[TradeRecord]) -> bool {
        if self.seen_hashes.contains(&candidate.tx_hash) {
            return true;
        }
        if batch.iter().any(|t| t.tx_hash == candidate.tx_hash) {
            return true;
        }
        self.seen_records
            .iter()
            .chain(batch.iter())
            .any(|t| t.is_field_duplicate_of(candidate))
    }

    /// One deterministic poll cycle: fetch, diff, commit.
    pub async fn run_once(&mut self) -> Result<TickSummary> {
        let activities = self.feed.activity(&self.tracked_wallet, ACTIVITY_FETCH_LIMIT).await?;
        let positions = self.feed.positions(&self.tracked_wallet).await?;

        let fetched = activities.len();
        let oldest_allowed = Utc::now().timestamp() - self.max_age_hours * 3600;

        let mut new_trades: Vec<TradeRecord> = Vec::new();
        for activity in activities {
            if !activity.is_trade() || activity.timestamp <= oldest_allowed {
                continue;
            }
            let Some(mut trade) = activity.into_trade_record() else {
                continue;
            };
            if self.is_duplicate(&trade, &new_trades) {
                continue;
            }

            // Observed but predating this process: tag it so the skip mode can
            // retire it without executing.
            if trade.timestamp < self.started_at {
                trade.execution_status = Some(ExecutionStatus::PreExisting);
                trade.processed = self.skip_pre_start;
            }

            info!(
                "[MONITOR] New trade: {} {} {:.4} '{}' ({}) @ {:.4}",
                trade.side, trade.outcome, trade.size, trade.title, trade.tx_hash, trade.price
            );
            new_trades.push(trade);
        }

        let snapshots: Vec<_> = positions.into_iter().map(|p| p.into_snapshot()).collect();
        let position_count = snapshots.len();

        let inserted = self.ledger.commit_tick(&new_trades, &snapshots)?;

        // Only a committed batch enters the dedup index
        for trade in new_trades {
            self.seen_hashes.insert(trade.tx_hash.clone());
            self.seen_records.push(trade);
        }

        Ok(TickSummary {
            fetched,
            new_trades: inserted,
            positions: position_count,
        })
    }

    /// Polling loop. Fetch or commit errors are logged and the loop continues
    /// on the next interval; only a shutdown signal stops it.
    pub async fn run(mut self, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[MONITOR] Watching {} every {}s",
            self.tracked_wallet, interval_secs
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(summary) if summary.new_trades > 0 => {
                            info!(
                                "[MONITOR] Tick: {} fetched, {} new, {} positions",
                                summary.fetched, summary.new_trades, summary.positions
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!("[MONITOR] Tick failed: {:#}", e),
                    }
                }
                _ = shutdown.changed() => {
                    info!("[MONITOR] Shutdown requested");
                    break;
                }
            }
        }
    }
}
