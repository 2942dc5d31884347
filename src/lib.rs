//! Copy-Trading System for Polymarket
//!
//! Mirrors the trading activity of a tracked wallet onto a controlled wallet.
//! A monitor loop polls the data API for the tracked wallet's trades and
//! persists them to a per-wallet ledger; an executor loop replays unprocessed
//! trades through an order-sizing engine with bounded retries; an independent
//! redemption pass claims settled winnings from resolved markets on-chain.

pub mod chain;
pub mod clob;
pub mod config;
pub mod executor;
pub mod feed;
pub mod monitor;
pub mod redeem;
pub mod sizing;
pub mod storage;
pub mod tracker;
pub mod types;
