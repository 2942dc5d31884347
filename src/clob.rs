//! Order gateway for the Polymarket CLOB.
//!
//! Exposes order-book retrieval, market metadata, and fill-or-kill order
//! posting behind the [`OrderGateway`] trait so the sizing engine can run
//! against a scripted gateway in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::CLOB_API_BASE;
use crate::types::Side;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("order book request failed: {0}")]
    Http(String),
    #[error("unrecognized response shape: {0}")]
    Parse(String),
    #[error("request timed out")]
    Timeout,
}

/// One price level from the order book. Prices and sizes arrive as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct BookLevel {
    pub price: String,
    pub size: String,
}

impl BookLevel {
    pub fn price_f64(&self) -> f64 {
        self.price.parse().unwrap_or(0.0)
    }

    pub fn size_f64(&self) -> f64 {
        self.size.parse().unwrap_or(0.0)
    }
}

/// Order book snapshot for a single outcome token.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Lowest ask as (price, size), if any ask level exists.
    pub fn best_ask(&self) -> Option<(f64, f64)> {
        self.asks
            .iter()
            .map(|l| (l.price_f64(), l.size_f64()))
            .filter(|(p, _)| *p > 0.0)
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }

    /// Highest bid as (price, size), if any bid level exists.
    pub fn best_bid(&self) -> Option<(f64, f64)> {
        self.bids
            .iter()
            .map(|l| (l.price_f64(), l.size_f64()))
            .filter(|(p, _)| *p > 0.0)
            .max_by(|a, b| a.0.total_cmp(&b.0))
    }

    /// Top of book on the side that opposes `side`: asks for a buy, bids for
    /// a sell.
    pub fn top_opposing(&self, side: Side) -> Option<(f64, f64)> {
        match side {
            Side::Buy => self.best_ask(),
            Side::Sell => self.best_bid(),
        }
    }
}

/// Parameters for one fill-or-kill order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderArgs {
    pub token_id: String,
    pub side: Side,
    /// Token quantity (maker units)
    pub amount: f64,
    pub price: f64,
}

/// Gateway response for a posted order.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    pub success: bool,
    #[serde(default, rename = "orderID")]
    pub order_id: Option<String>,
    #[serde(default, rename = "errorMsg")]
    pub error_message: Option<String>,
}

/// One outcome token inside a market, with its last quoted price.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketToken {
    pub token_id: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub price: f64,
}

/// Market metadata from the CLOB markets endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketInfo {
    #[serde(default)]
    pub question: String,
    pub tokens: Vec<MarketToken>,
}

/// Boundary to the exchange: quote retrieval and order submission.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn order_book(&self, asset_id: &str) -> Result<OrderBook, GatewayError>;

    /// Submit a fill-or-kill order: either it fills completely at submission
    /// or nothing rests on the book.
    async fn post_fok(&self, order: &OrderArgs) -> Result<OrderAck, GatewayError>;

    async fn market(&self, condition_id: &str) -> Result<MarketInfo, GatewayError>;
}

/// HTTP implementation against the CLOB REST API.
pub struct ClobGateway {
    http: reqwest::Client,
    base: String,
    api_key: Option<String>,
}

impl ClobGateway {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base(CLOB_API_BASE, api_key)
    }

    pub fn with_base(base: &str, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to build HTTP client"),
            base: base.to_string(),
            api_key,
        }
    }

    fn map_err(e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::Parse(e.to_string())
        } else {
            GatewayError::Http(e.to_string())
        }
    }
}

#[async_trait]
impl OrderGateway for ClobGateway {
    async fn order_book(&self, asset_id: &str) -> Result<OrderBook, GatewayError> {
        let url = format!("{}/book?token_id={}", self.base, asset_id);
        let resp = self.http.get(&url).send().await.map_err(Self::map_err)?;
        if !resp.status().is_success() {
            return Err(GatewayError::Http(format!("status {}", resp.status())));
        }
        resp.json().await.map_err(Self::map_err)
    }

    async fn post_fok(&self, order: &OrderArgs) -> Result<OrderAck, GatewayError> {
        let url = format!("{}/order", self.base);
        let body = serde_json::json!({
            "order": {
                "tokenID": order.token_id,
                "side": order.side.as_str(),
                "size": order.amount,
                "price": order.price,
            },
            "owner": self.api_key,
            "orderType": "FOK",
        });
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_err)?;
        resp.json().await.map_err(Self::map_err)
    }

    async fn market(&self, condition_id: &str) -> Result<MarketInfo, GatewayError> {
        let url = format!("{}/markets/{}", self.base, condition_id);
        let resp = self.http.get(&url).send().await.map_err(Self::map_err)?;
        if !resp.status().is_success() {
            return Err(GatewayError::Http(format!("status {}", resp.status())));
        }
        resp.json().await.map_err(Self::map_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: &str, size: &str) -> BookLevel {
        BookLevel {
            price: price.to_string(),
            size: size.to_string(),
        }
    }

    #[test]
    fn test_best_ask_is_lowest() {
        let book = OrderBook {
            bids: vec![],
            asks: vec![level("0.55", "10"), level("0.50", "100"), level("0.60", "5")],
        };
        assert_eq!(book.best_ask(), Some((0.50, 100.0)));
    }

    #[test]
    fn test_best_bid_is_highest() {
        let book = OrderBook {
            bids: vec![level("0.45", "30"), level("0.48", "12"), level("0.40", "99")],
            asks: vec![],
        };
        assert_eq!(book.best_bid(), Some((0.48, 12.0)));
    }

    #[test]
    fn test_empty_side_has_no_top() {
        let book = OrderBook::default();
        assert!(book.best_ask().is_none());
        assert!(book.best_bid().is_none());
        assert!(book.top_opposing(Side::Buy).is_none());
        assert!(book.top_opposing(Side::Sell).is_none());
    }

    #[test]
    fn test_top_opposing_matches_side() {
        let book = OrderBook {
            bids: vec![level("0.48", "12")],
            asks: vec![level("0.52", "40")],
        };
        assert_eq!(book.top_opposing(Side::Buy), Some((0.52, 40.0)));
        assert_eq!(book.top_opposing(Side::Sell), Some((0.48, 12.0)));
    }

    #[test]
    fn test_unparseable_level_is_ignored() {
        let book = OrderBook {
            bids: vec![],
            asks: vec![level("garbage", "10"), level("0.50", "100")],
        };
        assert_eq!(book.best_ask(), Some((0.50, 100.0)));
    }
}
