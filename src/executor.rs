//! Trade executor: replays unprocessed ledger records onto the controlled
//! wallet.
//!
//! Strictly sequential per wallet: trade N reaches a terminal or
//! retry-deferred state before trade N+1 starts, so the balance-ratio sizing
//! is never racy. Wallet state (balances, allowance, positions) is re-read
//! fresh for every trade.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::chain::BalanceOracle;
use crate::clob::OrderGateway;
use crate::config::{Config, CTF_EXCHANGE_ADDRESS};
use crate::feed::ActivityFeed;
use crate::sizing::{self, SizingConfig, SizingOutcome, SizingRequest};
use crate::storage::Ledger;
use crate::types::{ExecutionStatus, PositionSnapshot, Side, TradeRecord};

/// Records pulled per tick
const BATCH_SIZE: usize = 10;

/// Backoff after an unexpected error in the outer loop
const ERROR_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub own_wallet: String,
    pub tracked_wallet: String,
    /// USDC spender whose approval gates order execution
    pub spender: String,
    pub retry_limit: u32,
    pub copy_ratio: f64,
    pub sell_ratio: f64,
    pub balance_cap_pct: f64,
    pub dust_threshold: f64,
    pub inter_trade_delay: Duration,
    pub empty_ticks_before_reset: u32,
    pub sizing: SizingConfig,
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            own_wallet: config.own_wallet.clone(),
            tracked_wallet: config.tracked_wallet.clone(),
            spender: CTF_EXCHANGE_ADDRESS.to_string(),
            retry_limit: config.retry_limit,
            copy_ratio: config.copy_ratio,
            sell_ratio: config.sell_ratio,
            balance_cap_pct: config.balance_cap_pct,
            dust_threshold: config.dust_threshold,
            inter_trade_delay: Duration::from_millis(config.inter_trade_delay_ms),
            empty_ticks_before_reset: config.empty_ticks_before_reset,
            sizing: SizingConfig {
                retry_limit: config.retry_limit,
                slippage_tolerance: config.slippage_tolerance,
                min_order_value: config.min_order_value,
            },
        }
    }
}

/// Buy-side copy sizing: apply the configured copy ratio, scale down by the
/// balance ratio when we hold less than the tracked wallet, then cap at the
/// spendable share of our balance. Scale-then-cap, in that order.
pub fn scaled_buy_notional(
    source_usdc: f64,
    copy_ratio: f64,
    own_balance: f64,
    tracked_balance: f64,
    balance_cap_pct: f64,
) -> f64 {
    let mut notional = source_usdc * copy_ratio;
    if own_balance < tracked_balance && tracked_balance > 0.0 {
        notional *= own_balance / tracked_balance;
    }
    notional.min(own_balance * balance_cap_pct)
}

pub struct TradeExecutor {
    ledger: Arc<Ledger>,
    feed: Arc<dyn ActivityFeed>,
    oracle: Arc<dyn BalanceOracle>,
    gateway: Arc<dyn OrderGateway>,
    settings: ExecutorSettings,
    empty_ticks: u32,
}

impl TradeExecutor {
    pub fn new(
        ledger: Arc<Ledger>,
        feed: Arc<dyn ActivityFeed>,
        oracle: Arc<dyn BalanceOracle>,
        gateway: Arc<dyn OrderGateway>,
        settings: ExecutorSettings,
    ) -> Self {
        // A stale cached allowance from a previous run must not mask a revoked
        // approval.
        oracle.invalidate_allowance_cache();
        Self {
            ledger,
            feed,
            oracle,
            gateway,
            settings,
            empty_ticks: 0,
        }
    }

    /// One executor tick: pull the oldest pending records and drive each to a
    /// terminal or retry-deferred state, in timestamp order.
    pub async fn run_once(&mut self) -> Result<usize> {
        let pending = self
            .ledger
            .pending_trades(self.settings.retry_limit, BATCH_SIZE)?;

        if pending.is_empty() {
            self.empty_ticks += 1;
            if self.empty_ticks >= self.settings.empty_ticks_before_reset {
                self.empty_ticks = 0;
                let reset = self.ledger.reset_transient_failures(self.settings.retry_limit)?;
                if reset > 0 {
                    info!(
                        "[EXECUTOR] Retrying {} previously-failed trades with a fresh budget",
                        reset
                    );
                }
            }
            return Ok(0);
        }
        self.empty_ticks = 0;

        info!("[EXECUTOR] Found {} trades to process", pending.len());
        for (i, trade) in pending.iter().enumerate() {
            if i > 0 {
                // Rate-limit courtesy between consecutive orders
                tokio::time::sleep(self.settings.inter_trade_delay).await;
            }
            if let Err(e) = self.process_trade(trade).await {
                error!("[EXECUTOR] Trade {} failed: {:#}", trade.tx_hash, e);
                self.ledger.record_attempt_failure(&trade.tx_hash)?;
                if trade.attempt_count + 1 >= self.settings.retry_limit {
                    warn!(
                        "[EXECUTOR] Trade {} out of attempts, marking {}",
                        trade.tx_hash,
                        ExecutionStatus::OrderError
                    );
                    self.ledger.mark_terminal(&trade.tx_hash, ExecutionStatus::OrderError)?;
                }
            }
        }
        Ok(pending.len())
    }

    async fn process_trade(&self, trade: &TradeRecord) -> Result<()> {
        info!(
            "[EXECUTOR] Copying {} {} '{}' size {:.4} @ {:.4} (${:.2})",
            trade.side, trade.outcome, trade.title, trade.size, trade.price, trade.usdc_size
        );

        let own_balance = self
            .oracle
            .balance_of(&self.settings.own_wallet)
            .await
            .map_err(|e| anyhow!("own balance read failed: {e}"))?;
        let tracked_balance = self
            .oracle
            .balance_of(&self.settings.tracked_wallet)
            .await
            .map_err(|e| anyhow!("tracked balance read failed: {e}"))?;

        let own_positions = self.feed.positions(&self.settings.own_wallet).await?;
        let own_position = own_positions
            .into_iter()
            .find(|p| p.condition_id == trade.condition_id)
            .map(|p| p.into_snapshot());
        // Fetched fresh alongside our own; the tracked side informs operators
        // reconstructing a decision from logs.
        let tracked_positions = self.feed.positions(&self.settings.tracked_wallet).await?;
        let tracked_position = tracked_positions
            .into_iter()
            .find(|p| p.condition_id == trade.condition_id);
        info!(
            "[EXECUTOR] Balances: own ${:.2}, tracked ${:.2}; tracked position {:.4}",
            own_balance,
            tracked_balance,
            tracked_position.map(|p| p.size).unwrap_or(0.0)
        );

        // Fatal precondition: an allowance below our balance can only be fixed
        // by an external approval transaction. Burn no retry budget on it.
        let allowance = self
            .oracle
            .allowance(&self.settings.own_wallet, &self.settings.spender)
            .await
            .map_err(|e| anyhow!("allowance read failed: {e}"))?;
        if allowance < own_balance {
            warn!(
                "[EXECUTOR] Allowance ${:.2} below balance ${:.2}; approve the exchange and the record will be retried",
                allowance, own_balance
            );
            self.ledger
                .mark_terminal(&trade.tx_hash, ExecutionStatus::AllowanceTooLow)?;
            return Ok(());
        }

        match trade.side {
            Side::Buy => self.execute_buy(trade, own_balance, tracked_balance).await,
            Side::Sell => self.execute_sell(trade, own_position).await,
        }
    }

    async fn execute_buy(
        &self,
        trade: &TradeRecord,
        own_balance: f64,
        tracked_balance: f64,
    ) -> Result<()> {
        let notional = scaled_buy_notional(
            trade.usdc_size,
            self.settings.copy_ratio,
            own_balance,
            tracked_balance,
            self.settings.balance_cap_pct,
        );

        if notional < self.settings.dust_threshold {
            info!(
                "[EXECUTOR] Copy notional ${:.6} below dust threshold, skipping {}",
                notional, trade.tx_hash
            );
            self.ledger
                .mark_terminal(&trade.tx_hash, ExecutionStatus::OrderTooSmall)?;
            return Ok(());
        }

        info!("[EXECUTOR] Placing BUY for ${:.4} on {}", notional, trade.outcome);
        let request = SizingRequest {
            asset: trade.asset.clone(),
            side: Side::Buy,
            target: notional,
            reference_price: trade.price,
        };
        let outcome = sizing::execute(self.gateway.as_ref(), &request, &self.settings.sizing).await;
        self.apply_outcome(trade, outcome)
    }

    async fn execute_sell(
        &self,
        trade: &TradeRecord,
        own_position: Option<PositionSnapshot>,
    ) -> Result<()> {
        let Some(position) = own_position else {
            info!("[EXECUTOR] No position to sell for {}, skipping", trade.condition_id);
            self.ledger
                .mark_terminal(&trade.tx_hash, ExecutionStatus::InsufficientTokens)?;
            return Ok(());
        };

        let amount = (position.size * self.settings.sell_ratio).min(position.size);
        if amount * trade.price < self.settings.dust_threshold {
            info!(
                "[EXECUTOR] Sell of {:.6} tokens below dust threshold, skipping {}",
                amount, trade.tx_hash
            );
            self.ledger
                .mark_terminal(&trade.tx_hash, ExecutionStatus::OrderTooSmall)?;
            return Ok(());
        }

        info!("[EXECUTOR] Placing SELL for {:.4} tokens of {}", amount, trade.outcome);
        let request = SizingRequest {
            asset: trade.asset.clone(),
            side: Side::Sell,
            target: amount,
            reference_price: trade.price,
        };
        let outcome = sizing::execute(self.gateway.as_ref(), &request, &self.settings.sizing).await;
        self.apply_outcome(trade, outcome)
    }

    /// Reduce a sizing outcome to ledger state.
    fn apply_outcome(&self, trade: &TradeRecord, outcome: SizingOutcome) -> Result<()> {
        let status = match outcome {
            SizingOutcome::Filled { notional } => {
                info!("[EXECUTOR] Copied {} for ${:.4}", trade.tx_hash, notional);
                ExecutionStatus::Success
            }
            SizingOutcome::NoLiquidity => ExecutionStatus::NoLiquidity,
            SizingOutcome::PriceMoved { best_ask } => {
                info!(
                    "[EXECUTOR] Not copying {}: ask {:.4} too far above reference {:.4}",
                    trade.tx_hash, best_ask, trade.price
                );
                ExecutionStatus::PriceMoved
            }
            SizingOutcome::BelowMinimum { .. } => ExecutionStatus::OrderTooSmall,
            SizingOutcome::InsufficientFunds { message } => {
                if message.to_ascii_lowercase().contains("allowance") {
                    // The cached allowance lied; next read must hit the chain
                    self.oracle.invalidate_allowance_cache();
                    ExecutionStatus::AllowanceIssue
                } else if trade.side == Side::Buy {
                    ExecutionStatus::InsufficientBalance
                } else {
                    ExecutionStatus::InsufficientTokens
                }
            }
            SizingOutcome::RetryExhausted => ExecutionStatus::RetryExhausted,
        };

        if status != ExecutionStatus::Success {
            warn!("[EXECUTOR] Trade {} terminal: {}", trade.tx_hash, status);
        }
        self.ledger.mark_terminal(&trade.tx_hash, status)?;
        Ok(())
    }

    /// Liquidate every open position instead of copy-trading (the `sell_all`
    /// flag). One-shot pass.
    pub async fn sell_all(&self) -> Result<()> {
        let positions = self.feed.positions(&self.settings.own_wallet).await?;
        info!("[EXECUTOR] Liquidating {} positions", positions.len());

        for (i, position) in positions.into_iter().map(|p| p.into_snapshot()).enumerate() {
            if position.size <= 0.0 || position.redeemable {
                continue;
            }
            if i > 0 {
                tokio::time::sleep(self.settings.inter_trade_delay).await;
            }
            info!(
                "[EXECUTOR] Selling {:.4} tokens of '{}' ({})",
                position.size, position.title, position.outcome
            );
            let request = SizingRequest {
                asset: position.asset.clone(),
                side: Side::Sell,
                target: position.size,
                reference_price: 0.0,
            };
            let outcome =
                sizing::execute(self.gateway.as_ref(), &request, &self.settings.sizing).await;
            match outcome {
                SizingOutcome::Filled { notional } => {
                    info!("[EXECUTOR] Liquidated '{}' for ${:.4}", position.title, notional);
                }
                other => warn!("[EXECUTOR] Could not liquidate '{}': {:?}", position.title, other),
            }
        }
        Ok(())
    }

    /// Polling loop. Never terminates on its own: unexpected errors are
    /// logged and followed by a longer backoff before polling resumes.
    pub async fn run(mut self, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[EXECUTOR] Copying {} -> {} every {}s",
            self.settings.tracked_wallet, self.settings.own_wallet, interval_secs
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("[EXECUTOR] Tick failed: {:#}; backing off", e);
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
                _ = shutdown.changed() => {
                    info!("[EXECUTOR] Shutdown requested");
                    break;
                }
            }
        }
    }
}
