//! Core domain types: trade records, position snapshots, and execution status.

use serde::{Deserialize, Serialize};

/// Tolerance used when comparing trade sizes and prices for duplicate detection
pub const DEDUP_EPSILON: f64 = 1e-5;

/// Order side, mirroring the side of the source trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal (or distinguishing) outcome tag persisted on a trade record.
///
/// `PreExisting` is the one non-terminal tag: it marks records observed with a
/// timestamp before process start so the skip-past-trades mode can retire them
/// without handing them to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    /// On-chain allowance below our balance; only an approval tx can fix this
    AllowanceTooLow,
    /// The gateway rejected the order citing allowance
    AllowanceIssue,
    InsufficientBalance,
    InsufficientTokens,
    OrderTooSmall,
    NoLiquidity,
    /// Best ask drifted past the slippage tolerance
    PriceMoved,
    RetryExhausted,
    OrderError,
    PreExisting,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 11] = [
        ExecutionStatus::Success,
        ExecutionStatus::AllowanceTooLow,
        ExecutionStatus::AllowanceIssue,
        ExecutionStatus::InsufficientBalance,
        ExecutionStatus::InsufficientTokens,
        ExecutionStatus::OrderTooSmall,
        ExecutionStatus::NoLiquidity,
        ExecutionStatus::PriceMoved,
        ExecutionStatus::RetryExhausted,
        ExecutionStatus::OrderError,
        ExecutionStatus::PreExisting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::AllowanceTooLow => "FAILED_ALLOWANCE_TOO_LOW",
            ExecutionStatus::AllowanceIssue => "FAILED_ALLOWANCE_ISSUE",
            ExecutionStatus::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ExecutionStatus::InsufficientTokens => "INSUFFICIENT_TOKENS",
            ExecutionStatus::OrderTooSmall => "ORDER_TOO_SMALL",
            ExecutionStatus::NoLiquidity => "NO_LIQUIDITY",
            ExecutionStatus::PriceMoved => "PRICE_MOVED",
            ExecutionStatus::RetryExhausted => "RETRY_EXHAUSTED",
            ExecutionStatus::OrderError => "ORDER_ERROR",
            ExecutionStatus::PreExisting => "PRE_EXISTING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(ExecutionStatus::Success),
            "FAILED_ALLOWANCE_TOO_LOW" => Some(ExecutionStatus::AllowanceTooLow),
            "FAILED_ALLOWANCE_ISSUE" => Some(ExecutionStatus::AllowanceIssue),
            "INSUFFICIENT_BALANCE" => Some(ExecutionStatus::InsufficientBalance),
            "INSUFFICIENT_TOKENS" => Some(ExecutionStatus::InsufficientTokens),
            "ORDER_TOO_SMALL" => Some(ExecutionStatus::OrderTooSmall),
            "NO_LIQUIDITY" => Some(ExecutionStatus::NoLiquidity),
            "PRICE_MOVED" => Some(ExecutionStatus::PriceMoved),
            "RETRY_EXHAUSTED" => Some(ExecutionStatus::RetryExhausted),
            "ORDER_ERROR" => Some(ExecutionStatus::OrderError),
            "PRE_EXISTING" => Some(ExecutionStatus::PreExisting),
            _ => None,
        }
    }

    /// Statuses that may resolve on their own (RPC flakiness, moving books,
    /// operator fixing an approval) and so qualify for a periodic fresh retry
    /// budget. Permanently-dead statuses (dust, slippage, success) do not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::AllowanceTooLow
                | ExecutionStatus::AllowanceIssue
                | ExecutionStatus::OrderError
                | ExecutionStatus::RetryExhausted
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed trade event from the tracked wallet, plus the bot's
/// processing state.
///
/// The transaction hash is the primary dedup key; see
/// [`TradeRecord::is_field_duplicate_of`] for the secondary rule. Processing
/// fields (`processed`, `attempt_count`, `execution_status`) are owned
/// exclusively by the executor.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub tx_hash: String,
    pub condition_id: String,
    pub asset: String,
    pub side: Side,
    /// Trade size in outcome-token units
    pub size: f64,
    pub price: f64,
    /// Notional collateral size in USDC
    pub usdc_size: f64,
    pub title: String,
    pub outcome: String,
    pub outcome_index: i64,
    /// Observed timestamp, seconds
    pub timestamp: i64,
    pub processed: bool,
    pub attempt_count: u32,
    pub execution_status: Option<ExecutionStatus>,
}

impl TradeRecord {
    /// Secondary dedup rule: two records with different transaction hashes are
    /// still duplicates if every observable trade field matches (sizes and
    /// prices within [`DEDUP_EPSILON`]). Defends against feed resubmission
    /// without stable IDs.
    pub fn is_field_duplicate_of(&self, other: &TradeRecord) -> bool {
        self.timestamp == other.timestamp
            && self.side == other.side
            && self.asset == other.asset
            && self.outcome == other.outcome
            && self.condition_id == other.condition_id
            && (self.size - other.size).abs() < DEDUP_EPSILON
            && (self.price - other.price).abs() < DEDUP_EPSILON
    }
}

/// Latest known holding for one (wallet, condition) pair. Represents external
/// state: always re-read fresh, never trusted across executor ticks.
#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub asset: String,
    pub condition_id: String,
    pub size: f64,
    pub outcome: String,
    pub outcome_index: i64,
    pub redeemable: bool,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_trade(tx_hash: &str) -> TradeRecord {
        TradeRecord {
            tx_hash: tx_hash.to_string(),
            condition_id: "0xcond".to_string(),
            asset: "123456".to_string(),
            side: Side::Buy,
            size: 20.0,
            price: 0.5,
            usdc_size: 10.0,
            title: "Test market".to_string(),
            outcome: "Yes".to_string(),
            outcome_index: 0,
            timestamp: 1_700_000_000,
            processed: false,
            attempt_count: 0,
            execution_status: None,
        }
    }

    #[test]
    fn test_field_duplicate_same_fields() {
        let a = make_trade("0xaaa");
        let b = make_trade("0xbbb");
        assert!(a.is_field_duplicate_of(&b), "identical fields with different hashes are duplicates");
    }

    #[test]
    fn test_field_duplicate_within_epsilon() {
        let a = make_trade("0xaaa");
        let mut b = make_trade("0xbbb");
        b.size = 20.0 + 5e-6;
        b.price = 0.5 - 5e-6;
        assert!(a.is_field_duplicate_of(&b));
    }

    #[test]
    fn test_field_duplicate_detects_difference() {
        let a = make_trade("0xaaa");

        let mut different_size = make_trade("0xbbb");
        different_size.size = 20.1;
        assert!(!a.is_field_duplicate_of(&different_size));

        let mut different_side = make_trade("0xccc");
        different_side.side = Side::Sell;
        assert!(!a.is_field_duplicate_of(&different_side));

        let mut different_ts = make_trade("0xddd");
        different_ts.timestamp += 1;
        assert!(!a.is_field_duplicate_of(&different_ts));
    }

    #[test]
    fn test_status_round_trip() {
        for status in ExecutionStatus::ALL {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("bogus"), None);
    }

    #[test]
    fn test_transient_classification() {
        assert!(ExecutionStatus::AllowanceIssue.is_transient());
        assert!(ExecutionStatus::OrderError.is_transient());
        assert!(ExecutionStatus::RetryExhausted.is_transient());
        assert!(ExecutionStatus::AllowanceTooLow.is_transient());
        assert!(!ExecutionStatus::OrderTooSmall.is_transient());
        assert!(!ExecutionStatus::Success.is_transient());
        assert!(!ExecutionStatus::PriceMoved.is_transient());
    }
}
