//! Copy-trading bot entry point.
//!
//! Default mode runs two polling loops against one tracked wallet: the
//! monitor appends observed trades to the ledger, the executor replays them
//! on the controlled wallet. Flags switch to one-shot or auxiliary modes:
//!
//! - `sell_all`: liquidate all open positions instead of copy-trading
//! - `claim_all`: run one redemption pass over resolved markets
//! - `skip_past_trades`: retire pre-existing ledger entries on startup
//! - `track_specific_markets`: probability-threshold betting on a watchlist

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use copy_bot::chain::{BalanceOracle, ChainClient, SettlementChain};
use copy_bot::clob::{ClobGateway, OrderGateway};
use copy_bot::config::Config;
use copy_bot::executor::{ExecutorSettings, TradeExecutor};
use copy_bot::feed::{ActivityFeed, DataApiClient};
use copy_bot::monitor::TradeMonitor;
use copy_bot::redeem::RedemptionEngine;
use copy_bot::sizing::SizingConfig;
use copy_bot::storage::Ledger;
use copy_bot::tracker::{MarketTracker, TrackerSettings, Watchlist};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging to stdout and a file
    let file_appender = tracing_appender::rolling::never(".", "copybot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("copy_bot=info".parse().unwrap());

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let sell_all = args.iter().any(|a| a == "sell_all");
    let claim_all = args.iter().any(|a| a == "claim_all");
    let skip_past_trades = args.iter().any(|a| a == "skip_past_trades");
    let track_specific_markets = args.iter().any(|a| a == "track_specific_markets");

    let config = Config::from_env()?;
    info!("🚀 Polymarket Copy-Trading Bot");
    info!("   Tracked wallet: {}", config.tracked_wallet);
    info!("   Own wallet: {}", config.own_wallet);
    info!("   Copy ratio: {:.3}, retry limit: {}", config.copy_ratio, config.retry_limit);

    let feed: Arc<dyn ActivityFeed> = Arc::new(DataApiClient::new());
    let gateway: Arc<dyn OrderGateway> = Arc::new(ClobGateway::new(config.clob_api_key.clone()));
    let chain = Arc::new(ChainClient::new(
        config.rpc_endpoints(),
        config.private_key.clone(),
    )?);
    let oracle: Arc<dyn BalanceOracle> = chain.clone();

    if claim_all {
        info!("Mode: claim_all (one redemption pass)");
        let settlement: Arc<dyn SettlementChain> = chain;
        let engine = RedemptionEngine::new(feed, settlement, config.own_wallet.clone());
        let results = engine.run_pass().await?;
        info!("Redemption pass finished: {} positions handled", results.len());
        return Ok(());
    }

    if track_specific_markets {
        info!("Mode: track_specific_markets ({} markets)", config.watched_markets.len());
        let tracker = MarketTracker::new(
            Watchlist::new(config.watched_markets.clone()),
            feed,
            oracle,
            gateway,
            TrackerSettings {
                own_wallet: config.own_wallet.clone(),
                probability_threshold: config.probability_threshold,
                wallet_fraction: config.watch_fraction,
                min_order_value: config.min_order_value,
                sizing: SizingConfig {
                    retry_limit: config.retry_limit,
                    slippage_tolerance: config.slippage_tolerance,
                    min_order_value: config.min_order_value,
                },
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(tracker.run(config.executor_interval_secs, shutdown_rx));
        tokio::signal::ctrl_c().await?;
        let _ = shutdown_tx.send(true);
        let _ = handle.await;
        return Ok(());
    }

    let ledger = Arc::new(Ledger::open(&config.db_path, &config.tracked_wallet)?);
    let settings = ExecutorSettings::from_config(&config);

    if sell_all {
        info!("Mode: sell_all (liquidate every open position)");
        let executor = TradeExecutor::new(ledger, feed, oracle, gateway, settings);
        executor.sell_all().await?;
        return Ok(());
    }

    if skip_past_trades {
        let retired = ledger.retire_pending_before(Utc::now().timestamp())?;
        info!("skip_past_trades: retired {} pre-existing ledger entries", retired);
    }

    let monitor = TradeMonitor::new(
        feed.clone(),
        ledger.clone(),
        config.tracked_wallet.clone(),
        config.max_age_hours,
        skip_past_trades,
    )?;
    let executor = TradeExecutor::new(ledger, feed, oracle, gateway, settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_handle = tokio::spawn(monitor.run(config.fetch_interval_secs, shutdown_rx.clone()));
    let executor_handle = tokio::spawn(executor.run(config.executor_interval_secs, shutdown_rx));

    info!("✅ Monitor and executor loops running");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(monitor_handle, executor_handle);

    Ok(())
}
