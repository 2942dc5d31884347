// tests/integration_tests.rs
// Holistic integration tests for the copy-trading bot
//
// These tests verify the full flow:
// 1. Monitor dedup and ledger writes
// 2. Executor preconditions and sizing dispatch
// 3. At-most-once execution per source trade
// 4. Redemption pass preconditions

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use copy_bot::chain::{BalanceOracle, ChainError, SettlementChain};
use copy_bot::clob::{
    BookLevel, GatewayError, MarketInfo, OrderAck, OrderArgs, OrderBook, OrderGateway,
};
use copy_bot::executor::{ExecutorSettings, TradeExecutor};
use copy_bot::feed::{ActivityFeed, ActivityRecord, PositionRecord};
use copy_bot::monitor::TradeMonitor;
use copy_bot::redeem::{ClaimState, RedemptionEngine};
use copy_bot::sizing::SizingConfig;
use copy_bot::storage::Ledger;
use copy_bot::types::{ExecutionStatus, Side};

const OWN: &str = "0x0000000000000000000000000000000000000001";
const TRACKED: &str = "0x0000000000000000000000000000000000000002";
const SPENDER: &str = "0x0000000000000000000000000000000000000003";

// ============================================================================
// Shared mocks
// ============================================================================

struct MockFeed {
    tracked_activity: Mutex<Vec<Vec<ActivityRecord>>>,
    own_positions: Mutex<Vec<PositionRecord>>,
}

impl MockFeed {
    fn new(ticks: Vec<Vec<ActivityRecord>>) -> Self {
        Self {
            tracked_activity: Mutex::new(ticks),
            own_positions: Mutex::new(Vec::new()),
        }
    }

    fn with_own_positions(self, positions: Vec<PositionRecord>) -> Self {
        *self.own_positions.lock().unwrap() = positions;
        self
    }
}

#[async_trait]
impl ActivityFeed for MockFeed {
    async fn activity(&self, _user: &str, _limit: usize) -> Result<Vec<ActivityRecord>> {
        let mut ticks = self.tracked_activity.lock().unwrap();
        if ticks.is_empty() {
            return Ok(Vec::new());
        }
        Ok(ticks.remove(0))
    }

    async fn positions(&self, user: &str) -> Result<Vec<PositionRecord>> {
        if user == OWN {
            Ok(self.own_positions.lock().unwrap().clone())
        } else {
            Ok(Vec::new())
        }
    }
}

struct MockOracle {
    own_balance: f64,
    tracked_balance: f64,
    allowance: f64,
}

#[async_trait]
impl BalanceOracle for MockOracle {
    async fn balance_of(&self, address: &str) -> Result<f64, ChainError> {
        Ok(if address == OWN { self.own_balance } else { self.tracked_balance })
    }

    async fn allowance(&self, _owner: &str, _spender: &str) -> Result<f64, ChainError> {
        Ok(self.allowance)
    }

    fn invalidate_allowance_cache(&self) {}
}

struct MockGateway {
    asks: Mutex<Vec<BookLevel>>,
    book_fetches: AtomicUsize,
    posted: Mutex<Vec<OrderArgs>>,
}

impl MockGateway {
    fn with_ask(price: &str, size: &str) -> Self {
        Self {
            asks: Mutex::new(vec![BookLevel {
                price: price.to_string(),
                size: size.to_string(),
            }]),
            book_fetches: AtomicUsize::new(0),
            posted: Mutex::new(Vec::new()),
        }
    }

    fn posted(&self) -> Vec<OrderArgs> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderGateway for MockGateway {
    async fn order_book(&self, _asset_id: &str) -> Result<OrderBook, GatewayError> {
        self.book_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(OrderBook {
            bids: Vec::new(),
            asks: self.asks.lock().unwrap().clone(),
        })
    }

    async fn post_fok(&self, order: &OrderArgs) -> Result<OrderAck, GatewayError> {
        self.posted.lock().unwrap().push(order.clone());
        Ok(OrderAck {
            success: true,
            order_id: Some("order-1".to_string()),
            error_message: None,
        })
    }

    async fn market(&self, _condition_id: &str) -> Result<MarketInfo, GatewayError> {
        Err(GatewayError::Http("not scripted".to_string()))
    }
}

fn trade_activity(tx_hash: &str, timestamp: i64, side: &str, usdc_size: f64) -> ActivityRecord {
    ActivityRecord {
        transaction_hash: tx_hash.to_string(),
        activity_type: "TRADE".to_string(),
        condition_id: "0xcond".to_string(),
        asset: "42".to_string(),
        side: Some(side.to_string()),
        size: usdc_size / 0.5,
        price: 0.5,
        usdc_size,
        title: "Integration market".to_string(),
        outcome: "Yes".to_string(),
        outcome_index: 0,
        timestamp,
    }
}

fn settings() -> ExecutorSettings {
    ExecutorSettings {
        own_wallet: OWN.to_string(),
        tracked_wallet: TRACKED.to_string(),
        spender: SPENDER.to_string(),
        retry_limit: 3,
        copy_ratio: 1.0,
        sell_ratio: 0.5,
        balance_cap_pct: 0.9,
        dust_threshold: 0.01,
        inter_trade_delay: Duration::from_millis(0),
        empty_ticks_before_reset: 30,
        sizing: SizingConfig {
            retry_limit: 3,
            slippage_tolerance: 0.20,
            min_order_value: 1.0,
        },
    }
}

// ============================================================================
// MONITOR -> LEDGER -> EXECUTOR PIPELINE
// ============================================================================

mod pipeline_tests {
    use super::*;

    /// A trade observed by the monitor flows through the ledger and gets
    /// copied by the executor in one pass.
    #[tokio::test]
    async fn test_observed_trade_is_copied() {
        let now = Utc::now().timestamp();
        let feed = Arc::new(MockFeed::new(vec![vec![trade_activity("0xaaa", now, "BUY", 10.0)]]));
        let ledger = Arc::new(Ledger::open_in_memory(TRACKED).unwrap());

        let mut monitor = TradeMonitor::new(
            feed.clone(),
            ledger.clone(),
            TRACKED.to_string(),
            24,
            false,
        )
        .unwrap();
        let summary = monitor.run_once().await.unwrap();
        assert_eq!(summary.new_trades, 1);

        let gateway = Arc::new(MockGateway::with_ask("0.50", "100"));
        let oracle = Arc::new(MockOracle {
            own_balance: 100.0,
            tracked_balance: 100.0,
            allowance: 1000.0,
        });
        let mut executor = TradeExecutor::new(
            ledger.clone(),
            feed,
            oracle,
            gateway.clone(),
            settings(),
        );
        executor.run_once().await.unwrap();

        let trade = ledger.trade("0xaaa").unwrap().unwrap();
        assert!(trade.processed);
        assert_eq!(trade.execution_status, Some(ExecutionStatus::Success));

        // $10 at 0.50 = 20 tokens in a single order
        let posted = gateway.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].side, Side::Buy);
        assert!((posted[0].amount - 20.0).abs() < 1e-9);
    }

    /// The book moved past the slippage tolerance, so the record terminates
    /// without a single posted order.
    #[tokio::test]
    async fn test_price_moved_terminates_without_order() {
        let now = Utc::now().timestamp();
        let feed = Arc::new(MockFeed::new(vec![vec![trade_activity("0xaaa", now, "BUY", 10.0)]]));
        let ledger = Arc::new(Ledger::open_in_memory(TRACKED).unwrap());

        let mut monitor =
            TradeMonitor::new(feed.clone(), ledger.clone(), TRACKED.to_string(), 24, false).unwrap();
        monitor.run_once().await.unwrap();

        // Best ask 0.80 vs reference 0.50: delta 0.30 > 0.20
        let gateway = Arc::new(MockGateway::with_ask("0.80", "100"));
        let oracle = Arc::new(MockOracle {
            own_balance: 100.0,
            tracked_balance: 100.0,
            allowance: 1000.0,
        });
        let mut executor =
            TradeExecutor::new(ledger.clone(), feed, oracle, gateway.clone(), settings());
        executor.run_once().await.unwrap();

        let trade = ledger.trade("0xaaa").unwrap().unwrap();
        assert!(trade.processed);
        assert_eq!(trade.execution_status, Some(ExecutionStatus::PriceMoved));
        assert!(gateway.posted().is_empty());
    }

    /// Allowance below balance blocks before the sizing engine runs, with no
    /// retry budget spent.
    #[tokio::test]
    async fn test_allowance_precondition() {
        let now = Utc::now().timestamp();
        let feed = Arc::new(MockFeed::new(vec![vec![trade_activity("0xaaa", now, "BUY", 10.0)]]));
        let ledger = Arc::new(Ledger::open_in_memory(TRACKED).unwrap());

        let mut monitor =
            TradeMonitor::new(feed.clone(), ledger.clone(), TRACKED.to_string(), 24, false).unwrap();
        monitor.run_once().await.unwrap();

        let gateway = Arc::new(MockGateway::with_ask("0.50", "100"));
        let oracle = Arc::new(MockOracle {
            own_balance: 10.0,
            tracked_balance: 100.0,
            allowance: 5.0,
        });
        let mut executor =
            TradeExecutor::new(ledger.clone(), feed, oracle, gateway.clone(), settings());
        executor.run_once().await.unwrap();

        let trade = ledger.trade("0xaaa").unwrap().unwrap();
        assert!(trade.processed);
        assert_eq!(trade.execution_status, Some(ExecutionStatus::AllowanceTooLow));
        assert_eq!(trade.attempt_count, 0);
        assert_eq!(gateway.book_fetches.load(Ordering::SeqCst), 0);
        assert!(gateway.posted().is_empty());
    }

    /// At-most-once-effective execution: once SUCCESS, further ticks never
    /// submit another order for the same source trade.
    #[tokio::test]
    async fn test_at_most_once_execution() {
        let now = Utc::now().timestamp();
        let feed = Arc::new(MockFeed::new(vec![
            vec![trade_activity("0xaaa", now, "BUY", 10.0)],
            vec![trade_activity("0xaaa", now, "BUY", 10.0)],
        ]));
        let ledger = Arc::new(Ledger::open_in_memory(TRACKED).unwrap());

        let mut monitor =
            TradeMonitor::new(feed.clone(), ledger.clone(), TRACKED.to_string(), 24, false).unwrap();
        monitor.run_once().await.unwrap();

        let gateway = Arc::new(MockGateway::with_ask("0.50", "100"));
        let oracle = Arc::new(MockOracle {
            own_balance: 100.0,
            tracked_balance: 100.0,
            allowance: 1000.0,
        });
        let mut executor =
            TradeExecutor::new(ledger.clone(), feed.clone(), oracle, gateway.clone(), settings());
        executor.run_once().await.unwrap();
        assert_eq!(gateway.posted().len(), 1);

        // Second monitor tick re-observes the same hash; executor re-runs
        monitor.run_once().await.unwrap();
        executor.run_once().await.unwrap();
        executor.run_once().await.unwrap();

        assert_eq!(gateway.posted().len(), 1, "exactly one order per source trade");
    }
}

// ============================================================================
// MONITOR DEDUP
// ============================================================================

mod dedup_tests {
    use super::*;

    /// Dedup idempotence: replaying identical records produces exactly one
    /// ledger row.
    #[tokio::test]
    async fn test_replayed_feed_writes_once() {
        let now = Utc::now().timestamp();
        let feed = Arc::new(MockFeed::new(vec![
            vec![trade_activity("0xaaa", now, "BUY", 10.0)],
            vec![trade_activity("0xaaa", now, "BUY", 10.0)],
        ]));
        let ledger = Arc::new(Ledger::open_in_memory(TRACKED).unwrap());
        let mut monitor =
            TradeMonitor::new(feed, ledger.clone(), TRACKED.to_string(), 24, false).unwrap();

        let first = monitor.run_once().await.unwrap();
        let second = monitor.run_once().await.unwrap();

        assert_eq!(first.new_trades, 1);
        assert_eq!(second.new_trades, 0);
        assert_eq!(ledger.all_trades().unwrap().len(), 1);
    }

    /// The dedup index survives restarts via the ledger: a new monitor over
    /// the same ledger does not re-insert known trades.
    #[tokio::test]
    async fn test_dedup_index_rebuilt_from_ledger() {
        let now = Utc::now().timestamp();
        let ledger = Arc::new(Ledger::open_in_memory(TRACKED).unwrap());

        let feed1 = Arc::new(MockFeed::new(vec![vec![trade_activity("0xaaa", now, "BUY", 10.0)]]));
        let mut monitor1 =
            TradeMonitor::new(feed1, ledger.clone(), TRACKED.to_string(), 24, false).unwrap();
        monitor1.run_once().await.unwrap();

        let feed2 = Arc::new(MockFeed::new(vec![vec![trade_activity("0xaaa", now, "BUY", 10.0)]]));
        let mut monitor2 =
            TradeMonitor::new(feed2, ledger.clone(), TRACKED.to_string(), 24, false).unwrap();
        let summary = monitor2.run_once().await.unwrap();

        assert_eq!(summary.new_trades, 0);
        assert_eq!(ledger.all_trades().unwrap().len(), 1);
    }
}

// ============================================================================
// RETRY BUDGET
// ============================================================================

mod retry_tests {
    use super::*;

    /// Gateway that always rejects with a generic error.
    struct RejectingGateway {
        posted: AtomicUsize,
    }

    #[async_trait]
    impl OrderGateway for RejectingGateway {
        async fn order_book(&self, _asset_id: &str) -> Result<OrderBook, GatewayError> {
            Ok(OrderBook {
                bids: Vec::new(),
                asks: vec![BookLevel { price: "0.50".to_string(), size: "100".to_string() }],
            })
        }

        async fn post_fok(&self, _order: &OrderArgs) -> Result<OrderAck, GatewayError> {
            self.posted.fetch_add(1, Ordering::SeqCst);
            Ok(OrderAck {
                success: false,
                order_id: None,
                error_message: Some("matching engine error".to_string()),
            })
        }

        async fn market(&self, _condition_id: &str) -> Result<MarketInfo, GatewayError> {
            Err(GatewayError::Http("not scripted".to_string()))
        }
    }

    /// In-loop retries are bounded by the configured limit and the record
    /// terminates as retry-exhausted.
    #[tokio::test]
    async fn test_sizing_retries_bounded() {
        let now = Utc::now().timestamp();
        let feed = Arc::new(MockFeed::new(vec![vec![trade_activity("0xaaa", now, "BUY", 10.0)]]));
        let ledger = Arc::new(Ledger::open_in_memory(TRACKED).unwrap());
        let mut monitor =
            TradeMonitor::new(feed.clone(), ledger.clone(), TRACKED.to_string(), 24, false).unwrap();
        monitor.run_once().await.unwrap();

        let gateway = Arc::new(RejectingGateway { posted: AtomicUsize::new(0) });
        let oracle = Arc::new(MockOracle {
            own_balance: 100.0,
            tracked_balance: 100.0,
            allowance: 1000.0,
        });
        let mut executor =
            TradeExecutor::new(ledger.clone(), feed, oracle, gateway.clone(), settings());
        executor.run_once().await.unwrap();

        let trade = ledger.trade("0xaaa").unwrap().unwrap();
        assert!(trade.processed);
        assert_eq!(trade.execution_status, Some(ExecutionStatus::RetryExhausted));
        assert_eq!(gateway.posted.load(Ordering::SeqCst), 3, "retry limit bounds order posts");
    }
}

// ============================================================================
// REDEMPTION
// ============================================================================

mod redemption_tests {
    use super::*;

    struct ScriptedChain {
        denominator: u128,
        numerator: u128,
        redeem_calls: AtomicUsize,
    }

    #[async_trait]
    impl SettlementChain for ScriptedChain {
        async fn payout_denominator(&self, _condition_id: &str) -> Result<u128, ChainError> {
            Ok(self.denominator)
        }

        async fn payout_numerator(
            &self,
            _condition_id: &str,
            _outcome_index: u32,
        ) -> Result<u128, ChainError> {
            Ok(self.numerator)
        }

        async fn redeem_positions(
            &self,
            _condition_id: &str,
            index_sets: &[u64],
        ) -> Result<String, ChainError> {
            assert_eq!(index_sets, &[1], "outcome 0 claims index set [1]");
            self.redeem_calls.fetch_add(1, Ordering::SeqCst);
            Ok("0xclaimhash".to_string())
        }
    }

    fn redeemable_position() -> PositionRecord {
        PositionRecord {
            asset: "42".to_string(),
            condition_id: "0xcond".to_string(),
            size: 10.0,
            outcome: "Yes".to_string(),
            outcome_index: 0,
            redeemable: true,
            title: "Resolved market".to_string(),
        }
    }

    /// An unresolved oracle (denominator 0) skips the position without
    /// submitting a transaction or recording a failure.
    #[tokio::test]
    async fn test_unresolved_condition_is_skipped() {
        let feed = Arc::new(
            MockFeed::new(vec![]).with_own_positions(vec![redeemable_position()]),
        );
        let chain = Arc::new(ScriptedChain {
            denominator: 0,
            numerator: 0,
            redeem_calls: AtomicUsize::new(0),
        });
        let engine = RedemptionEngine::new(feed, chain.clone(), OWN.to_string());

        let results = engine.run_pass().await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, ClaimState::SkippedNotResolved);
        assert_eq!(chain.redeem_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolved_winner_is_claimed() {
        let feed = Arc::new(
            MockFeed::new(vec![]).with_own_positions(vec![redeemable_position()]),
        );
        let chain = Arc::new(ScriptedChain {
            denominator: 1,
            numerator: 1,
            redeem_calls: AtomicUsize::new(0),
        });
        let engine = RedemptionEngine::new(feed, chain.clone(), OWN.to_string());

        let results = engine.run_pass().await.unwrap();

        assert_eq!(results[0].1, ClaimState::Confirmed { tx_hash: "0xclaimhash".to_string() });
        assert_eq!(chain.redeem_calls.load(Ordering::SeqCst), 1);
    }
}
