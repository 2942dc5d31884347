//! On-chain access: collateral balance/allowance reads and settlement claims.
//!
//! A thin chain client configured at construction with an ordered list of RPC
//! endpoints. It takes addresses only and performs no name resolution. Reads
//! retry with backoff and rotate to the next endpoint on RPC-classified
//! failures; allowance results are cached with a short TTL to bound RPC
//! volume.

use alloy::primitives::{Address, B256, U256};
use alloy::providers::ProviderBuilder;
use alloy::signers::local::LocalSigner;
use alloy::signers::Signer;
use alloy::sol;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{CTF_ADDRESS, POLYGON_CHAIN_ID, USDC_ADDRESS};

/// USDC uses 6 decimals
const USDC_DECIMALS: f64 = 1e6;

/// Attempts per read before giving up
const READ_ATTEMPTS: u32 = 3;

/// Per-call timeout for view calls
const CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// How long to wait for a settlement transaction to confirm
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

/// Manual gas limit for settlement claims; estimation is unreliable on
/// Polygon under load
const REDEEM_GAS_LIMIT: u64 = 300_000;

/// Allowance cache TTL
const ALLOWANCE_CACHE_TTL: Duration = Duration::from_secs(60);

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
    }

    #[sol(rpc)]
    interface IConditionalTokens {
        function redeemPositions(address collateralToken, bytes32 parentCollectionId, bytes32 conditionId, uint256[] calldata indexSets) external;
        function payoutDenominator(bytes32 conditionId) external view returns (uint256);
        function payoutNumerators(bytes32 conditionId, uint256 index) external view returns (uint256);
    }
}

#[derive(Debug, Error)]
pub enum ChainError {
    /// Transport/endpoint problem; retry against a fallback can help
    #[error("rpc error: {0}")]
    Rpc(String),
    /// The contract rejected the call; retrying the same call cannot help
    #[error("contract revert: {0}")]
    Revert(String),
    /// Submitted but confirmation never arrived; on-chain effect unknown
    #[error("confirmation timed out for {tx_hash}")]
    ConfirmTimeout { tx_hash: String },
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid condition id: {0}")]
    InvalidConditionId(String),
    #[error("invalid private key")]
    InvalidKey,
    #[error("all rpc endpoints failed")]
    AllEndpointsFailed,
}

impl ChainError {
    /// Whether this failure class is worth retrying against another endpoint.
    pub fn is_rpc(&self) -> bool {
        matches!(self, ChainError::Rpc(_) | ChainError::AllEndpointsFailed)
    }
}

/// Collateral-token balance and execution-approval reads.
#[async_trait]
pub trait BalanceOracle: Send + Sync {
    async fn balance_of(&self, address: &str) -> Result<f64, ChainError>;
    async fn allowance(&self, owner: &str, spender: &str) -> Result<f64, ChainError>;
    fn invalidate_allowance_cache(&self);
}

/// Settlement contract access for the redemption engine.
#[async_trait]
pub trait SettlementChain: Send + Sync {
    async fn payout_denominator(&self, condition_id: &str) -> Result<u128, ChainError>;
    async fn payout_numerator(&self, condition_id: &str, outcome_index: u32)
        -> Result<u128, ChainError>;
    /// Submit a claim, returning the transaction hash once confirmed.
    async fn redeem_positions(&self, condition_id: &str, index_sets: &[u64])
        -> Result<String, ChainError>;
}

fn u256_to_usdc(value: U256) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(0.0) / USDC_DECIMALS
}

fn u256_to_u128(value: U256) -> u128 {
    u128::try_from(value).unwrap_or(u128::MAX)
}

pub struct ChainClient {
    endpoints: Vec<String>,
    active: AtomicUsize,
    private_key: String,
    usdc: Address,
    ctf: Address,
    allowance_cache: Mutex<FxHashMap<(String, String), (f64, Instant)>>,
}

impl ChainClient {
    pub fn new(endpoints: Vec<String>, private_key: String) -> Result<Self, ChainError> {
        if endpoints.is_empty() {
            return Err(ChainError::AllEndpointsFailed);
        }
        let usdc = USDC_ADDRESS
            .parse()
            .map_err(|_| ChainError::InvalidAddress(USDC_ADDRESS.to_string()))?;
        let ctf = CTF_ADDRESS
            .parse()
            .map_err(|_| ChainError::InvalidAddress(CTF_ADDRESS.to_string()))?;
        Ok(Self {
            endpoints,
            active: AtomicUsize::new(0),
            private_key,
            usdc,
            ctf,
            allowance_cache: Mutex::new(FxHashMap::default()),
        })
    }

    fn active_endpoint(&self) -> String {
        let idx = self.active.load(Ordering::Relaxed) % self.endpoints.len();
        self.endpoints[idx].clone()
    }

    /// Move to the next fallback endpoint. Called after RPC-classified
    /// failures only; reverts are not an endpoint problem.
    pub fn rotate_endpoint(&self) {
        let next = (self.active.fetch_add(1, Ordering::Relaxed) + 1) % self.endpoints.len();
        warn!("[CHAIN] Rotating to RPC endpoint {}", self.endpoints[next]);
    }

    async fn read_balance_once(&self, url: &str, owner: Address) -> Result<U256, ChainError> {
        let provider = ProviderBuilder::new()
            .connect(url)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        let token = IERC20::new(self.usdc, &provider);
        match tokio::time::timeout(CALL_TIMEOUT, token.balanceOf(owner).call()).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(ChainError::Rpc(e.to_string())),
            Err(_) => Err(ChainError::Rpc("balanceOf timed out".to_string())),
        }
    }

    async fn read_allowance_once(
        &self,
        url: &str,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        let provider = ProviderBuilder::new()
            .connect(url)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        let token = IERC20::new(self.usdc, &provider);
        match tokio::time::timeout(CALL_TIMEOUT, token.allowance(owner, spender).call()).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(ChainError::Rpc(e.to_string())),
            Err(_) => Err(ChainError::Rpc("allowance timed out".to_string())),
        }
    }

    async fn read_payout_once(
        &self,
        url: &str,
        condition: B256,
        outcome_index: Option<u32>,
    ) -> Result<U256, ChainError> {
        let provider = ProviderBuilder::new()
            .connect(url)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        let ctf = IConditionalTokens::new(self.ctf, &provider);
        let call = async {
            match outcome_index {
                Some(index) => ctf.payoutNumerators(condition, U256::from(index)).call().await,
                None => ctf.payoutDenominator(condition).call().await,
            }
        };
        match tokio::time::timeout(CALL_TIMEOUT, call).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(ChainError::Rpc(e.to_string())),
            Err(_) => Err(ChainError::Rpc("payout read timed out".to_string())),
        }
    }

    /// Retry wrapper for view calls: linear backoff, endpoint rotation on
    /// each failure.
    async fn read_with_retry<F, Fut>(&self, desc: &str, f: F) -> Result<U256, ChainError>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<U256, ChainError>>,
    {
        let mut last = ChainError::AllEndpointsFailed;
        for attempt in 0..READ_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(2 * attempt as u64)).await;
            }
            let url = self.active_endpoint();
            match f(url).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    warn!(
                        "[CHAIN] {} failed (attempt {}/{}): {}",
                        desc,
                        attempt + 1,
                        READ_ATTEMPTS,
                        e
                    );
                    self.rotate_endpoint();
                    last = e;
                }
            }
        }
        Err(last)
    }

    fn parse_condition(condition_id: &str) -> Result<B256, ChainError> {
        condition_id
            .parse()
            .map_err(|_| ChainError::InvalidConditionId(condition_id.to_string()))
    }
}

#[async_trait]
impl BalanceOracle for ChainClient {
    async fn balance_of(&self, address: &str) -> Result<f64, ChainError> {
        let owner: Address = address
            .parse()
            .map_err(|_| ChainError::InvalidAddress(address.to_string()))?;
        let raw = self
            .read_with_retry("balanceOf", |url| async move {
                self.read_balance_once(&url, owner).await
            })
            .await?;
        Ok(u256_to_usdc(raw))
    }

    async fn allowance(&self, owner: &str, spender: &str) -> Result<f64, ChainError> {
        let cache_key = (owner.to_string(), spender.to_string());
        if let Ok(cache) = self.allowance_cache.lock() {
            if let Some((value, at)) = cache.get(&cache_key) {
                if at.elapsed() < ALLOWANCE_CACHE_TTL {
                    return Ok(*value);
                }
            }
        }

        let owner_addr: Address = owner
            .parse()
            .map_err(|_| ChainError::InvalidAddress(owner.to_string()))?;
        let spender_addr: Address = spender
            .parse()
            .map_err(|_| ChainError::InvalidAddress(spender.to_string()))?;

        match self
            .read_with_retry("allowance", |url| async move {
                self.read_allowance_once(&url, owner_addr, spender_addr).await
            })
            .await
        {
            Ok(raw) => {
                let value = u256_to_usdc(raw);
                if let Ok(mut cache) = self.allowance_cache.lock() {
                    cache.insert(cache_key, (value, Instant::now()));
                }
                Ok(value)
            }
            Err(e) => {
                // All attempts failed: assume zero so the executor treats the
                // precondition as unmet rather than trading blind.
                warn!("[CHAIN] All allowance checks failed ({}), assuming zero", e);
                Ok(0.0)
            }
        }
    }

    fn invalidate_allowance_cache(&self) {
        if let Ok(mut cache) = self.allowance_cache.lock() {
            cache.clear();
        }
        info!("[CHAIN] Allowance cache cleared");
    }
}

#[async_trait]
impl SettlementChain for ChainClient {
    async fn payout_denominator(&self, condition_id: &str) -> Result<u128, ChainError> {
        let condition = Self::parse_condition(condition_id)?;
        let raw = self
            .read_with_retry("payoutDenominator", |url| async move {
                self.read_payout_once(&url, condition, None).await
            })
            .await?;
        Ok(u256_to_u128(raw))
    }

    async fn payout_numerator(
        &self,
        condition_id: &str,
        outcome_index: u32,
    ) -> Result<u128, ChainError> {
        let condition = Self::parse_condition(condition_id)?;
        let raw = self
            .read_with_retry("payoutNumerators", |url| async move {
                self.read_payout_once(&url, condition, Some(outcome_index)).await
            })
            .await?;
        Ok(u256_to_u128(raw))
    }

    async fn redeem_positions(
        &self,
        condition_id: &str,
        index_sets: &[u64],
    ) -> Result<String, ChainError> {
        let condition = Self::parse_condition(condition_id)?;
        let key = self.private_key.strip_prefix("0x").unwrap_or(&self.private_key);
        let signer = LocalSigner::from_str(key)
            .map_err(|_| ChainError::InvalidKey)?
            .with_chain_id(Some(POLYGON_CHAIN_ID));

        let url = self.active_endpoint();
        let provider = ProviderBuilder::new()
            .wallet(signer)
            .connect(&url)
            .await
            .map_err(|e| {
                self.rotate_endpoint();
                ChainError::Rpc(e.to_string())
            })?;

        let ctf = IConditionalTokens::new(self.ctf, &provider);
        let sets: Vec<U256> = index_sets.iter().map(|i| U256::from(*i)).collect();

        let pending = ctf
            .redeemPositions(self.usdc, B256::ZERO, condition, sets)
            .gas(REDEEM_GAS_LIMIT)
            .send()
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.to_ascii_lowercase().contains("revert") {
                    ChainError::Revert(msg)
                } else {
                    self.rotate_endpoint();
                    ChainError::Rpc(msg)
                }
            })?;

        let tx_hash = pending.tx_hash().to_string();
        info!("[CHAIN] Claim submitted: {}", tx_hash);

        match tokio::time::timeout(CONFIRM_TIMEOUT, pending.get_receipt()).await {
            Ok(Ok(receipt)) if receipt.status() => Ok(tx_hash),
            Ok(Ok(_)) => Err(ChainError::Revert(format!("transaction {} reverted", tx_hash))),
            // The transaction was submitted; a receipt failure or timeout
            // leaves its effect unknown. Never resubmit from here.
            Ok(Err(_)) | Err(_) => Err(ChainError::ConfirmTimeout { tx_hash }),
        }
    }
}
