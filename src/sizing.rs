//! Order sizing and retry engine.
//!
//! Given a trade intent (side, asset, target quantity, reference price), walks
//! the top of the live order book one level at a time, sizing each fill-or-kill
//! order against the best opposing level and the remaining target. The book is
//! re-read before every attempt; it is the single source of truth for fill
//! feasibility, so each retry adapts to a moving market.
//!
//! Quantities are truncated, never rounded, so the engine can never request
//! more than the remaining budget covers.

use tracing::{info, warn};

use crate::clob::{OrderArgs, OrderGateway};
use crate::types::Side;

/// Exchange maker-side (token quantity) precision
pub const TOKEN_DECIMALS: u32 = 5;

/// Exchange taker-side (price / USDC) precision
pub const PRICE_DECIMALS: u32 = 2;

/// Truncate `value` to `decimals` decimal places (floor, never round).
pub fn truncate(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).floor() / factor
}

/// A trade intent handed to the engine. `target` is in the side's natural
/// unit: USDC notional for buys, token count for sells.
#[derive(Debug, Clone)]
pub struct SizingRequest {
    pub asset: String,
    pub side: Side,
    pub target: f64,
    /// Price of the originating trade, used by the buy-side slippage guard
    pub reference_price: f64,
}

#[derive(Debug, Clone)]
pub struct SizingConfig {
    pub retry_limit: u32,
    /// Buy-side slippage guard: abort when best ask > reference + tolerance
    pub slippage_tolerance: f64,
    /// Exchange minimum order value in USDC
    pub min_order_value: f64,
}

/// Terminal result of one engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum SizingOutcome {
    /// Target fully filled; `notional` is the total USDC moved
    Filled { notional: f64 },
    /// No levels on the required book side
    NoLiquidity,
    /// Best ask moved beyond the slippage tolerance; copying would be unfaithful
    PriceMoved { best_ask: f64 },
    /// Remaining notional fell below the exchange minimum
    BelowMinimum { notional: f64 },
    /// Gateway rejected the order citing balance or allowance; cannot self-resolve
    InsufficientFunds { message: String },
    /// Generic failures consumed the retry budget
    RetryExhausted,
}

/// Gateway error strings that signal a balance/allowance problem. Spinning the
/// retry loop against these cannot help; they need an external fix.
fn is_funds_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("not enough balance") || lower.contains("allowance")
}

/// Drive `request` to a terminal outcome against the live book.
pub async fn execute(
    gateway: &dyn OrderGateway,
    request: &SizingRequest,
    config: &SizingConfig,
) -> SizingOutcome {
    let mut remaining = request.target;
    let mut retries: u32 = 0;
    let mut total_notional = 0.0;

    while remaining > 0.0 {
        if retries >= config.retry_limit {
            warn!(
                asset = %request.asset,
                retries,
                "retry budget exhausted with {:.6} remaining",
                remaining
            );
            return SizingOutcome::RetryExhausted;
        }

        let book = match gateway.order_book(&request.asset).await {
            Ok(book) => book,
            Err(e) => {
                warn!(asset = %request.asset, error = %e, "order book fetch failed");
                retries += 1;
                continue;
            }
        };

        let (level_price, level_size) = match book.top_opposing(request.side) {
            Some(top) => top,
            None => {
                info!(asset = %request.asset, side = %request.side, "no liquidity on required side");
                return SizingOutcome::NoLiquidity;
            }
        };

        if request.side == Side::Buy
            && level_price > request.reference_price + config.slippage_tolerance
        {
            info!(
                asset = %request.asset,
                best_ask = level_price,
                reference = request.reference_price,
                "price moved too far to copy faithfully"
            );
            return SizingOutcome::PriceMoved { best_ask: level_price };
        }

        // Remaining target in token units for this level
        let wanted_tokens = match request.side {
            Side::Buy => remaining / level_price,
            Side::Sell => remaining,
        };

        // One level at a time: worst-case price stays bounded to the top of
        // book observed at decision time.
        let clamped = wanted_tokens.min(level_size);
        let amount = truncate(clamped, TOKEN_DECIMALS);
        let price = truncate(level_price, PRICE_DECIMALS);

        let notional = amount * price;
        if notional < config.min_order_value {
            // A residual left over by truncation after real fills is done, not
            // a dust trade.
            if total_notional > 0.0 {
                info!(
                    asset = %request.asset,
                    residual = notional,
                    "residual below exchange minimum, target complete"
                );
                return SizingOutcome::Filled { notional: total_notional };
            }
            info!(
                asset = %request.asset,
                notional,
                minimum = config.min_order_value,
                "order value below exchange minimum"
            );
            return SizingOutcome::BelowMinimum { notional };
        }

        let order = OrderArgs {
            token_id: request.asset.clone(),
            side: request.side,
            amount,
            price,
        };

        match gateway.post_fok(&order).await {
            Ok(ack) if ack.success => {
                match request.side {
                    Side::Buy => remaining -= amount * price,
                    Side::Sell => remaining -= amount,
                }
                total_notional += amount * price;
                retries = 0;
                info!(
                    asset = %request.asset,
                    order_id = ack.order_id.as_deref().unwrap_or("-"),
                    amount,
                    price,
                    remaining,
                    "order filled"
                );
            }
            Ok(ack) => {
                let message = ack.error_message.unwrap_or_default();
                if is_funds_error(&message) {
                    warn!(asset = %request.asset, error = %message, "order rejected for funds");
                    return SizingOutcome::InsufficientFunds { message };
                }
                retries += 1;
                warn!(asset = %request.asset, error = %message, retries, "order rejected, retrying");
            }
            Err(e) => {
                retries += 1;
                warn!(asset = %request.asset, error = %e, retries, "order post failed, retrying");
            }
        }
    }

    SizingOutcome::Filled { notional: total_notional }
}
