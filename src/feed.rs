//! Activity feed client for the Polymarket data API.
//!
//! Fetches a wallet's trade history and current positions. The feed is
//! eventually consistent and occasionally duplicative; dedup is the caller's
//! responsibility. Response schemas are strict: a response that does not match
//! the expected shape is a parse error, not something to probe around.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::DATA_API_BASE;
use crate::types::{PositionSnapshot, Side, TradeRecord};

/// One activity event from the data API. Only `TRADE` events become trade
/// records; other types (splits, merges, redemptions) are filtered upstream.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub transaction_hash: String,
    #[serde(rename = "type")]
    pub activity_type: String,
    pub condition_id: String,
    pub asset: String,
    pub side: Option<String>,
    #[serde(default)]
    pub size: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub usdc_size: f64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub outcome_index: i64,
    pub timestamp: i64,
}

impl ActivityRecord {
    pub fn is_trade(&self) -> bool {
        self.activity_type == "TRADE"
    }

    /// Convert to a fresh trade record. Returns `None` for events without a
    /// recognizable side.
    pub fn into_trade_record(self) -> Option<TradeRecord> {
        let side = self.side.as_deref().and_then(Side::parse)?;
        Some(TradeRecord {
            tx_hash: self.transaction_hash,
            condition_id: self.condition_id,
            asset: self.asset,
            side,
            size: self.size,
            price: self.price,
            usdc_size: self.usdc_size,
            title: self.title,
            outcome: self.outcome,
            outcome_index: self.outcome_index,
            timestamp: self.timestamp,
            processed: false,
            attempt_count: 0,
            execution_status: None,
        })
    }
}

/// One position from the data API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRecord {
    pub asset: String,
    pub condition_id: String,
    #[serde(default)]
    pub size: f64,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub outcome_index: i64,
    #[serde(default)]
    pub redeemable: bool,
    #[serde(default)]
    pub title: String,
}

impl PositionRecord {
    pub fn into_snapshot(self) -> PositionSnapshot {
        PositionSnapshot {
            asset: self.asset,
            condition_id: self.condition_id,
            size: self.size,
            outcome: self.outcome,
            outcome_index: self.outcome_index,
            redeemable: self.redeemable,
            title: self.title,
        }
    }
}

/// Read-only view of a wallet's trading activity and holdings.
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    async fn activity(&self, user: &str, limit: usize) -> Result<Vec<ActivityRecord>>;
    async fn positions(&self, user: &str) -> Result<Vec<PositionRecord>>;
}

/// HTTP client for the Polymarket data API.
pub struct DataApiClient {
    http: reqwest::Client,
    base: String,
}

impl DataApiClient {
    pub fn new() -> Self {
        Self::with_base(DATA_API_BASE)
    }

    pub fn with_base(base: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to build HTTP client"),
            base: base.to_string(),
        }
    }
}

impl Default for DataApiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivityFeed for DataApiClient {
    async fn activity(&self, user: &str, limit: usize) -> Result<Vec<ActivityRecord>> {
        let url = format!("{}/activity?user={}&limit={}&offset=0", self.base, user, limit);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("activity request failed")?
            .error_for_status()
            .context("activity request returned error status")?;
        resp.json().await.context("unrecognized activity response shape")
    }

    async fn positions(&self, user: &str) -> Result<Vec<PositionRecord>> {
        let url = format!("{}/positions?user={}", self.base, user);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("positions request failed")?
            .error_for_status()
            .context("positions request returned error status")?;
        resp.json().await.context("unrecognized positions response shape")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_record_parses_trade() {
        let raw = r#"{
            "transactionHash": "0xabc",
            "type": "TRADE",
            "conditionId": "0xcond",
            "asset": "42",
            "side": "BUY",
            "size": 20.0,
            "price": 0.5,
            "usdcSize": 10.0,
            "title": "Will it rain",
            "outcome": "Yes",
            "outcomeIndex": 0,
            "timestamp": 1700000000
        }"#;
        let rec: ActivityRecord = serde_json::from_str(raw).unwrap();
        assert!(rec.is_trade());
        let trade = rec.into_trade_record().unwrap();
        assert_eq!(trade.side, Side::Buy);
        assert!(!trade.processed);
        assert_eq!(trade.attempt_count, 0);
    }

    #[test]
    fn test_activity_record_missing_required_field_is_error() {
        // No transactionHash: the schema is versioned and strict
        let raw = r#"{"type": "TRADE", "conditionId": "0xc", "asset": "42", "timestamp": 1}"#;
        assert!(serde_json::from_str::<ActivityRecord>(raw).is_err());
    }

    #[test]
    fn test_non_trade_without_side_is_dropped() {
        let raw = r#"{
            "transactionHash": "0xabc",
            "type": "REDEEM",
            "conditionId": "0xcond",
            "asset": "42",
            "timestamp": 1700000000
        }"#;
        let rec: ActivityRecord = serde_json::from_str(raw).unwrap();
        assert!(!rec.is_trade());
        assert!(rec.into_trade_record().is_none());
    }
}
