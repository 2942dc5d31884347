//! Redemption engine: reclaims settled winnings from resolved markets.
//!
//! Scans the controlled wallet's positions for oracle-resolved, winning,
//! unclaimed outcomes and submits settlement claims. "Not yet resolved" and
//! "lost" are expected skips re-evaluated every pass, never failures. A
//! submission whose confirmation times out is possibly pending: its hash is
//! logged for manual follow-up and it is never blindly resubmitted.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::chain::{ChainError, SettlementChain};
use crate::feed::ActivityFeed;
use crate::types::PositionSnapshot;

/// Submission attempts per claim (exponential backoff between them)
const MAX_CLAIM_ATTEMPTS: u32 = 3;

/// Base delay for the exponential backoff
const CLAIM_BACKOFF_BASE: Duration = Duration::from_secs(3);

/// Delay between consecutive claim transactions
const INTER_CLAIM_DELAY: Duration = Duration::from_secs(3);

/// Binary-market mapping from outcome index to CTF index set:
/// outcome 0 claims partition [1], outcome 1 claims partition [2].
pub fn derive_index_set(outcome_index: i64) -> Vec<u64> {
    if outcome_index == 0 {
        vec![1]
    } else {
        vec![2]
    }
}

/// Terminal state of one claim attempt within a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimState {
    /// Oracle has not reported; re-evaluated next pass
    SkippedNotResolved,
    /// This outcome lost; nothing to claim
    SkippedLost,
    Confirmed { tx_hash: String },
    /// Submitted but confirmation never arrived; effect unknown
    TimedOutUnknown { tx_hash: String },
    Reverted { reason: String },
    /// RPC attempts exhausted without a submission landing
    Failed { reason: String },
}

pub struct RedemptionEngine {
    feed: Arc<dyn ActivityFeed>,
    chain: Arc<dyn SettlementChain>,
    own_wallet: String,
}

impl RedemptionEngine {
    pub fn new(feed: Arc<dyn ActivityFeed>, chain: Arc<dyn SettlementChain>, own_wallet: String) -> Self {
        Self { feed, chain, own_wallet }
    }

    /// One full redemption pass over the wallet's redeemable positions.
    pub async fn run_pass(&self) -> Result<Vec<(String, ClaimState)>> {
        let positions = self.feed.positions(&self.own_wallet).await?;
        let redeemable: Vec<PositionSnapshot> = positions
            .into_iter()
            .map(|p| p.into_snapshot())
            .filter(|p| p.redeemable)
            .collect();

        if redeemable.is_empty() {
            info!("[REDEEM] No redeemable positions");
            return Ok(Vec::new());
        }
        info!("[REDEEM] Found {} redeemable positions", redeemable.len());

        let mut results = Vec::new();
        for (i, position) in redeemable.iter().enumerate() {
            if i > 0 {
                sleep(INTER_CLAIM_DELAY).await;
            }
            let state = self.claim(position).await;
            match &state {
                ClaimState::Confirmed { tx_hash } => {
                    info!("[REDEEM] Claimed '{}': {}", position.title, tx_hash);
                }
                ClaimState::TimedOutUnknown { tx_hash } => {
                    warn!(
                        "[REDEEM] Claim for '{}' possibly pending, check {} manually",
                        position.title, tx_hash
                    );
                }
                ClaimState::SkippedNotResolved => {
                    info!("[REDEEM] '{}' not resolved yet, skipping", position.title);
                }
                ClaimState::SkippedLost => {
                    info!("[REDEEM] '{}' outcome lost, nothing to claim", position.title);
                }
                ClaimState::Reverted { reason } => {
                    warn!("[REDEEM] Claim for '{}' reverted: {}", position.title, reason);
                }
                ClaimState::Failed { reason } => {
                    warn!("[REDEEM] Claim for '{}' failed: {}", position.title, reason);
                }
            }
            results.push((position.condition_id.clone(), state));
        }
        info!("[REDEEM] Pass complete: {} positions handled", results.len());
        Ok(results)
    }

    /// Drive one position through the claim state machine.
    async fn claim(&self, position: &PositionSnapshot) -> ClaimState {
        // Both oracle preconditions are mandatory; an unreadable oracle is
        // treated as not-yet-resolved rather than an error.
        let denominator = match self.chain.payout_denominator(&position.condition_id).await {
            Ok(v) => v,
            Err(e) => {
                warn!("[REDEEM] Oracle state unclear for {}: {}", position.condition_id, e);
                return ClaimState::SkippedNotResolved;
            }
        };
        if denominator == 0 {
            return ClaimState::SkippedNotResolved;
        }

        let numerator = match self
            .chain
            .payout_numerator(&position.condition_id, position.outcome_index as u32)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!("[REDEEM] Oracle state unclear for {}: {}", position.condition_id, e);
                return ClaimState::SkippedNotResolved;
            }
        };
        if numerator == 0 {
            return ClaimState::SkippedLost;
        }

        info!(
            "[REDEEM] '{}' resolved with payout {}/{}, claiming outcome {} ({:.4} tokens)",
            position.title, numerator, denominator, position.outcome_index, position.size
        );

        let index_sets = derive_index_set(position.outcome_index);
        let mut last_error = String::new();
        for attempt in 0..MAX_CLAIM_ATTEMPTS {
            if attempt > 0 {
                sleep(CLAIM_BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
            }
            match self
                .chain
                .redeem_positions(&position.condition_id, &index_sets)
                .await
            {
                Ok(tx_hash) => return ClaimState::Confirmed { tx_hash },
                // Possibly pending: resubmitting risks a duplicate claim
                Err(ChainError::ConfirmTimeout { tx_hash }) => {
                    return ClaimState::TimedOutUnknown { tx_hash }
                }
                // Reverts cannot be fixed by retrying the same call
                Err(ChainError::Revert(reason)) => return ClaimState::Reverted { reason },
                Err(e) if e.is_rpc() => {
                    warn!(
                        "[REDEEM] RPC failure on claim attempt {}/{}: {}",
                        attempt + 1,
                        MAX_CLAIM_ATTEMPTS,
                        e
                    );
                    last_error = e.to_string();
                }
                Err(e) => return ClaimState::Failed { reason: e.to_string() },
            }
        }
        ClaimState::Failed { reason: last_error }
    }
}
