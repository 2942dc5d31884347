//! System configuration and contract address definitions.
//!
//! All configuration comes from environment variables parsed once at startup
//! into a [`Config`]; chain and API constants live here as well.

use anyhow::{Context, Result};

/// Polymarket data API base URL (activity and position feeds)
pub const DATA_API_BASE: &str = "https://data-api.polymarket.com";

/// Polymarket CLOB API base URL (order books, markets, order posting)
pub const CLOB_API_BASE: &str = "https://clob.polymarket.com";

/// USDC collateral token on Polygon
pub const USDC_ADDRESS: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";

/// Conditional Tokens Framework contract on Polygon
pub const CTF_ADDRESS: &str = "0x4D97DCd97eC945f40cF65F87097ACe5EA0476045";

/// CTF Exchange contract on Polygon (USDC spender for order execution)
pub const CTF_EXCHANGE_ADDRESS: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

/// Polygon chain ID
pub const POLYGON_CHAIN_ID: u64 = 137;

/// Fallback RPC endpoints for Polygon, tried in order after the configured one
pub const FALLBACK_RPC_URLS: &[&str] = &[
    "https://polygon-rpc.com",
    "https://rpc-mainnet.matic.network",
    "https://polygon.llamarpc.com",
];

/// Runtime configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Wallet whose trades are mirrored
    pub tracked_wallet: String,
    /// Wallet the bot trades with
    pub own_wallet: String,
    /// Private key for settlement transactions
    pub private_key: String,
    /// Primary JSON-RPC endpoint (fallbacks appended from `FALLBACK_RPC_URLS`)
    pub rpc_url: String,
    /// SQLite database path
    pub db_path: String,
    /// CLOB API key for order posting
    pub clob_api_key: Option<String>,

    /// Monitor poll interval in seconds
    pub fetch_interval_secs: u64,
    /// Executor poll interval in seconds
    pub executor_interval_secs: u64,
    /// Ignore tracked trades older than this many hours
    pub max_age_hours: i64,
    /// Per-trade retry budget (executor attempts and in-loop sizing retries)
    pub retry_limit: u32,

    /// Fraction of the source trade's notional to copy on buys
    pub copy_ratio: f64,
    /// Fraction of the held position to liquidate on mirrored sells
    pub sell_ratio: f64,
    /// Cap on spendable balance per trade (held back as slippage/fee buffer)
    pub balance_cap_pct: f64,
    /// Trades with a final notional below this are skipped outright
    pub dust_threshold: f64,
    /// Abort buys when the best ask exceeds the reference price by more than this
    pub slippage_tolerance: f64,
    /// Exchange minimum order value in USDC
    pub min_order_value: f64,
    /// Delay between trades processed in the same tick (milliseconds)
    pub inter_trade_delay_ms: u64,
    /// Consecutive empty executor ticks before failed trades get a fresh retry budget
    pub empty_ticks_before_reset: u32,

    /// Watchlist mode: minimum outcome probability to bet on
    pub probability_threshold: f64,
    /// Watchlist mode: fraction of the wallet to stake per bet
    pub watch_fraction: f64,
    /// Watchlist mode: condition IDs to track (comma-separated in env)
    pub watched_markets: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let tracked_wallet = std::env::var("USER_ADDRESS").context("USER_ADDRESS not set")?;
        let own_wallet = std::env::var("PROXY_WALLET").context("PROXY_WALLET not set")?;
        let private_key = std::env::var("PRIVATE_KEY").context("PRIVATE_KEY not set")?;
        let rpc_url = std::env::var("RPC_URL").context("RPC_URL not set")?;

        Ok(Self {
            tracked_wallet,
            own_wallet,
            private_key,
            rpc_url,
            db_path: env_or("DB_PATH", "copybot.db".to_string()),
            clob_api_key: std::env::var("CLOB_API_KEY").ok(),
            fetch_interval_secs: env_parse("FETCH_INTERVAL", 1),
            executor_interval_secs: env_parse("EXECUTOR_INTERVAL", 10),
            max_age_hours: env_parse("TOO_OLD_TIMESTAMP", 24),
            retry_limit: env_parse("RETRY_LIMIT", 3),
            copy_ratio: env_parse("COPY_RATIO", 0.05),
            sell_ratio: env_parse("SELL_RATIO", 0.5),
            balance_cap_pct: env_parse("BALANCE_CAP_PCT", 0.9),
            dust_threshold: env_parse("DUST_THRESHOLD", 0.01),
            slippage_tolerance: env_parse("SLIPPAGE_TOLERANCE", 0.20),
            min_order_value: env_parse("MIN_ORDER_VALUE", 1.0),
            inter_trade_delay_ms: env_parse("INTER_TRADE_DELAY_MS", 2000),
            empty_ticks_before_reset: env_parse("EMPTY_TICKS_BEFORE_RESET", 30),
            probability_threshold: env_parse("PROBABILITY_THRESHOLD", 0.91),
            watch_fraction: env_parse("WATCH_FRACTION", 0.10),
            watched_markets: std::env::var("TRACKED_MARKET_IDS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// All RPC endpoints in priority order: the configured one first, then the
    /// public fallbacks (minus duplicates).
    pub fn rpc_endpoints(&self) -> Vec<String> {
        let mut endpoints = vec![self.rpc_url.clone()];
        for url in FALLBACK_RPC_URLS {
            if *url != self.rpc_url {
                endpoints.push(url.to_string());
            }
        }
        endpoints
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
