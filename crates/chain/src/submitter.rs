//! Signed oracle-update submission for the DomaRank oracle contract.
//! Uses Alloy providers for type-safe RPC interactions.
//!
//! One wallet-wrapped provider (and thus one underlying HTTP client) is built
//! at construction and reused for reads and submissions alike. The nonce is
//! tracked locally with atomic operations so consecutive submissions stay
//! strictly ordered without an RPC round-trip per transaction; it is
//! re-synced from the chain after any revert.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::contracts::IDomaRankOracle;

/// Budget for a transaction receipt wait.
pub const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Oracle write/read failure.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid signer key: {0}")]
    InvalidKey(String),
    #[error("invalid rpc url: {0}")]
    InvalidUrl(String),
    #[error("rpc transport: {0}")]
    Rpc(#[from] alloy::transports::TransportError),
    #[error("contract call: {0}")]
    Contract(#[from] alloy::contract::Error),
    #[error("pending transaction: {0}")]
    Pending(#[from] alloy::providers::PendingTransactionError),
    #[error("transaction {0} reverted")]
    Reverted(B256),
    #[error("receipt wait for {0} timed out after {1:?}")]
    ReceiptTimeout(B256, Duration),
}

/// Confirmed oracle update.
#[derive(Debug, Clone)]
pub struct UpdateReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Cached nonce manager for ordered transaction submission.
/// Avoids RPC calls by tracking the nonce locally with atomic operations.
pub struct NonceManager {
    current: AtomicU64,
}

impl NonceManager {
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_nonce),
        }
    }

    /// Get next nonce and increment the counter.
    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    /// Get current nonce without incrementing.
    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Sync nonce from chain. Only moves forward; confirmed transactions
    /// never rewind the counter.
    pub fn sync(&self, chain_nonce: u64) {
        let current = self.current.load(Ordering::SeqCst);
        if chain_nonce > current {
            self.current.store(chain_nonce, Ordering::SeqCst);
        }
    }

    /// Reset nonce to the chain value (use after a revert).
    pub fn reset(&self, chain_nonce: u64) {
        self.current.store(chain_nonce, Ordering::SeqCst);
    }
}

/// Oracle access the broadcaster needs. A trait seam so valuation cycles can
/// be exercised against a scripted oracle in tests.
#[async_trait]
pub trait OracleGateway: Send + Sync {
    /// Current on-chain value for the token, `None` when never set.
    async fn get_token_value(&self, token: Address) -> Result<Option<U256>, SubmitError>;

    /// Signer account balance in wei.
    async fn signer_balance(&self) -> Result<U256, SubmitError>;

    /// Submit `updateTokenValue(token, value_wei)` and wait for the receipt.
    async fn submit_update(&self, token: Address, value_wei: U256)
        -> Result<UpdateReceipt, SubmitError>;
}

/// Signed submitter for the DomaRank oracle.
pub struct OracleSubmitter {
    provider: DynProvider,
    oracle_address: Address,
    /// Signer address.
    pub address: Address,
    chain_id: u64,
    nonce_manager: NonceManager,
    /// Serializes submissions so nonces increase monotonically even when the
    /// periodic and event-triggered paths overlap.
    submit_lock: tokio::sync::Mutex<()>,
}

impl OracleSubmitter {
    /// Create a new submitter from a private key, fetching the chain id and
    /// the initial nonce from the chain.
    pub async fn new(
        private_key: &str,
        rpc_url: &str,
        oracle_address: Address,
    ) -> Result<Self, SubmitError> {
        let key_str = private_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str
            .parse()
            .map_err(|e: alloy::signers::local::LocalSignerError| {
                SubmitError::InvalidKey(e.to_string())
            })?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let url = rpc_url
            .parse::<reqwest::Url>()
            .map_err(|e| SubmitError::InvalidUrl(e.to_string()))?;
        let provider = ProviderBuilder::new().wallet(wallet).on_http(url).erased();

        let chain_id = provider.get_chain_id().await?;
        let initial_nonce = provider.get_transaction_count(address).await?;

        info!(
            address = %address,
            oracle = %oracle_address,
            chain_id = chain_id,
            initial_nonce = initial_nonce,
            "Oracle submitter initialized"
        );

        Ok(Self {
            provider,
            oracle_address,
            address,
            chain_id,
            nonce_manager: NonceManager::new(initial_nonce),
            submit_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn current_nonce(&self) -> u64 {
        self.nonce_manager.current()
    }

    /// Re-sync the cached nonce from the chain (called after a revert).
    async fn sync_nonce(&self) {
        match self.provider.get_transaction_count(self.address).await {
            Ok(chain_nonce) => {
                self.nonce_manager.reset(chain_nonce);
                debug!(nonce = chain_nonce, "Nonce synced from chain");
            }
            Err(e) => {
                warn!(error = %e, "Failed to sync nonce from chain");
            }
        }
    }
}

#[async_trait]
impl OracleGateway for OracleSubmitter {
    async fn get_token_value(&self, token: Address) -> Result<Option<U256>, SubmitError> {
        let oracle = IDomaRankOracle::new(self.oracle_address, &self.provider);
        let value = oracle.getTokenValue(token).call().await?._0;

        // Zero is the contract's "never set" sentinel.
        if value.is_zero() {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    async fn signer_balance(&self) -> Result<U256, SubmitError> {
        Ok(self.provider.get_balance(self.address).await?)
    }

    async fn submit_update(
        &self,
        token: Address,
        value_wei: U256,
    ) -> Result<UpdateReceipt, SubmitError> {
        let _guard = self.submit_lock.lock().await;

        let calldata = Bytes::from(
            IDomaRankOracle::updateTokenValueCall {
                tokenAddress: token,
                valueWei: value_wei,
            }
            .abi_encode(),
        );

        let nonce = self.nonce_manager.next();
        let tx = TransactionRequest::default()
            .with_to(self.oracle_address)
            .with_input(calldata)
            .with_nonce(nonce)
            .with_chain_id(self.chain_id);

        let pending = self.provider.send_transaction(tx).await?;
        let tx_hash = *pending.tx_hash();
        debug!(
            token = %token,
            value_wei = %value_wei,
            nonce = nonce,
            tx_hash = %tx_hash,
            "Oracle update submitted, waiting for receipt"
        );

        let receipt = match tokio::time::timeout(RECEIPT_TIMEOUT, pending.get_receipt()).await {
            Ok(res) => res?,
            Err(_) => return Err(SubmitError::ReceiptTimeout(tx_hash, RECEIPT_TIMEOUT)),
        };

        if !receipt.status() {
            warn!(tx_hash = %tx_hash, "Oracle update reverted, syncing nonce");
            self.sync_nonce().await;
            return Err(SubmitError::Reverted(tx_hash));
        }

        let block_number = receipt.block_number.unwrap_or(0);
        info!(
            token = %token,
            value_wei = %value_wei,
            tx_hash = %tx_hash,
            block = block_number,
            gas_used = receipt.gas_used,
            "Oracle update confirmed"
        );

        Ok(UpdateReceipt {
            tx_hash,
            block_number,
            gas_used: receipt.gas_used as u64,
        })
    }
}
