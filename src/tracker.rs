//! Fixed-market watchlist mode: probability-threshold betting on a
//! configured set of markets instead of copy-trading.
//!
//! The watchlist is an explicit store seeded from config; membership changes
//! go through [`Watchlist::add`]/[`Watchlist::remove`]. Each tick fetches
//! every watched market, looks for an outcome priced at or above the
//! threshold, and stakes a fixed fraction of the wallet on it unless a
//! position on that outcome is already held.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::chain::BalanceOracle;
use crate::clob::OrderGateway;
use crate::feed::ActivityFeed;
use crate::sizing::{self, SizingConfig, SizingOutcome, SizingRequest};
use crate::types::Side;

/// Explicit store of tracked market condition IDs.
#[derive(Debug, Clone, Default)]
pub struct Watchlist {
    ids: Vec<String>,
}

impl Watchlist {
    pub fn new(ids: Vec<String>) -> Self {
        let mut list = Self::default();
        for id in ids {
            list.add(id);
        }
        list
    }

    /// Add a market; duplicates are ignored. Returns whether it was added.
    pub fn add(&mut self, id: String) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Remove a market. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|m| m != id);
        self.ids.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|m| m == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub own_wallet: String,
    /// Minimum outcome price (probability) to bet on
    pub probability_threshold: f64,
    /// Fraction of the wallet balance staked per bet
    pub wallet_fraction: f64,
    pub min_order_value: f64,
    pub sizing: SizingConfig,
}

pub struct MarketTracker {
    watchlist: Watchlist,
    feed: Arc<dyn ActivityFeed>,
    oracle: Arc<dyn BalanceOracle>,
    gateway: Arc<dyn OrderGateway>,
    settings: TrackerSettings,
}

impl MarketTracker {
    pub fn new(
        watchlist: Watchlist,
        feed: Arc<dyn ActivityFeed>,
        oracle: Arc<dyn BalanceOracle>,
        gateway: Arc<dyn OrderGateway>,
        settings: TrackerSettings,
    ) -> Self {
        Self { watchlist, feed, oracle, gateway, settings }
    }

    /// One tick over the whole watchlist. Returns how many bets were placed.
    pub async fn run_once(&self) -> Result<usize> {
        if self.watchlist.is_empty() {
            return Ok(0);
        }

        let balance = self
            .oracle
            .balance_of(&self.settings.own_wallet)
            .await
            .map_err(|e| anyhow!("balance read failed: {e}"))?;
        let stake = balance * self.settings.wallet_fraction;
        if stake < self.settings.min_order_value {
            info!("[TRACKER] Stake ${:.2} below minimum order value, nothing to do", stake);
            return Ok(0);
        }

        let held: Vec<String> = self
            .feed
            .positions(&self.settings.own_wallet)
            .await?
            .into_iter()
            .map(|p| p.asset)
            .collect();

        let mut placed = 0;
        for condition_id in self.watchlist.iter() {
            let market = match self.gateway.market(condition_id).await {
                Ok(m) => m,
                Err(e) => {
                    warn!("[TRACKER] Could not fetch market {}: {}", condition_id, e);
                    continue;
                }
            };

            let Some(candidate) = market
                .tokens
                .iter()
                .filter(|t| t.price >= self.settings.probability_threshold && t.price < 1.0)
                .max_by(|a, b| a.price.total_cmp(&b.price))
            else {
                continue;
            };

            if held.iter().any(|asset| asset == &candidate.token_id) {
                info!(
                    "[TRACKER] Already holding '{}' on {}, skipping",
                    candidate.outcome, market.question
                );
                continue;
            }

            info!(
                "[TRACKER] Betting ${:.2} on '{}' ({:.0}%) in '{}'",
                stake,
                candidate.outcome,
                candidate.price * 100.0,
                market.question
            );
            let request = SizingRequest {
                asset: candidate.token_id.clone(),
                side: Side::Buy,
                target: stake,
                reference_price: candidate.price,
            };
            let outcome =
                sizing::execute(self.gateway.as_ref(), &request, &self.settings.sizing).await;
            match outcome {
                SizingOutcome::Filled { notional } => {
                    placed += 1;
                    info!("[TRACKER] Bet placed for ${:.4}", notional);
                }
                other => warn!("[TRACKER] Bet on {} not placed: {:?}", condition_id, other),
            }
        }
        Ok(placed)
    }

    /// Polling loop for watchlist mode.
    pub async fn run(self, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[TRACKER] Watching {} markets every {}s (threshold {:.0}%)",
            self.watchlist.len(),
            interval_secs,
            self.settings.probability_threshold * 100.0
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("[TRACKER] Tick failed: {:#}", e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("[TRACKER] Shutdown requested");
                    break;
                }
            }
        }
    }
}
