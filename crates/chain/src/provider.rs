//! JSON-RPC access to the chain hosting the DomaLend contract.
//! Uses Alloy providers for type-safe RPC interactions.

use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log};
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Budget for a single JSON-RPC call.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(15);

/// Chain access failure. RPC errors are surfaced to the caller unchanged;
/// retry policy is the caller's decision.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid rpc url: {0}")]
    InvalidUrl(String),
    #[error("rpc transport: {0}")]
    Rpc(#[from] alloy::transports::TransportError),
    #[error("rpc call timed out after {0:?}")]
    Timeout(Duration),
    #[error("block {0} not found")]
    BlockNotFound(u64),
}

/// Read access the indexer needs from the chain. Split out as a trait so the
/// ingest pipeline can be driven from a scripted log source in tests.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current head block height.
    async fn head_block(&self) -> Result<u64, ChainError>;

    /// Logs emitted by the lending contract with the given topic0, over the
    /// inclusive range `from..=to`. The range per call is bounded; the caller
    /// chunks wide ranges.
    async fn query_logs(&self, topic0: B256, from: u64, to: u64) -> Result<Vec<Log>, ChainError>;

    /// Timestamp (unix seconds) of the given block.
    async fn block_timestamp(&self, number: u64) -> Result<u64, ChainError>;
}

/// HTTP chain client for the lending contract.
///
/// One provider (and thus one underlying HTTP client) is built at
/// construction and reused for every call. Block timestamps are cached
/// because a back-fill batch resolves the same blocks repeatedly.
#[derive(Debug)]
pub struct ChainClient {
    provider: DynProvider,
    rpc_url: String,
    lend_contract: Address,
    timestamp_cache: DashMap<u64, u64>,
}

impl ChainClient {
    pub fn new(rpc_url: impl Into<String>, lend_contract: Address) -> Result<Self, ChainError> {
        let rpc_url = rpc_url.into();
        let url = rpc_url
            .parse::<reqwest::Url>()
            .map_err(|e| ChainError::InvalidUrl(e.to_string()))?;
        let provider = ProviderBuilder::new().on_http(url).erased();

        Ok(Self {
            provider,
            rpc_url,
            lend_contract,
            timestamp_cache: DashMap::new(),
        })
    }

    pub fn lend_contract(&self) -> Address {
        self.lend_contract
    }

    /// Startup reachability probe; failure here is a configuration error.
    pub async fn probe(&self) -> Result<u64, ChainError> {
        let head = self.head_block().await?;
        info!(head = head, rpc_url = %self.rpc_url, "Chain connection verified");
        Ok(head)
    }

    /// Account balance in wei.
    pub async fn balance(&self, address: Address) -> Result<U256, ChainError> {
        with_timeout(self.provider.get_balance(address)).await
    }
}

#[async_trait]
impl ChainReader for ChainClient {
    async fn head_block(&self) -> Result<u64, ChainError> {
        with_timeout(self.provider.get_block_number()).await
    }

    async fn query_logs(&self, topic0: B256, from: u64, to: u64) -> Result<Vec<Log>, ChainError> {
        let filter = Filter::new()
            .address(self.lend_contract)
            .event_signature(topic0)
            .from_block(from)
            .to_block(to);

        let logs = with_timeout(self.provider.get_logs(&filter)).await?;
        debug!(
            topic0 = %topic0,
            from = from,
            to = to,
            count = logs.len(),
            "Fetched logs"
        );
        Ok(logs)
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64, ChainError> {
        if let Some(ts) = self.timestamp_cache.get(&number) {
            return Ok(*ts);
        }

        let block = with_timeout(self.provider.get_block_by_number(BlockNumberOrTag::Number(number)))
            .await?
            .ok_or(ChainError::BlockNotFound(number))?;

        let ts = block.header.timestamp;
        self.timestamp_cache.insert(number, ts);
        Ok(ts)
    }
}

/// Apply the single-call RPC budget to an in-flight request.
async fn with_timeout<T, E, F>(fut: F) -> Result<T, ChainError>
where
    F: std::future::IntoFuture<Output = Result<T, E>>,
    ChainError: From<E>,
{
    match tokio::time::timeout(RPC_TIMEOUT, fut).await {
        Ok(res) => Ok(res?),
        Err(_) => Err(ChainError::Timeout(RPC_TIMEOUT)),
    }
}
