//! Process configuration, assembled once at startup from the environment.
//!
//! Required fields are fatal when missing; optional knobs fall back to the
//! defaults below. No positional arguments, no config files.

use std::time::Duration;

use alloy::primitives::{Address, U256};
use anyhow::{anyhow, Context, Result};
use tracing::info;

/// Environment variable names.
pub mod env {
    pub const RPC_URL: &str = "RPC_URL";
    pub const LEND_CONTRACT: &str = "LEND_CONTRACT_ADDRESS";
    pub const ORACLE_CONTRACT: &str = "ORACLE_CONTRACT_ADDRESS";
    pub const ORACLE_SIGNER_KEY: &str = "ORACLE_SIGNER_KEY";
    pub const SUBGRAPH_URL: &str = "SUBGRAPH_URL";
    pub const SUBGRAPH_API_KEY: &str = "SUBGRAPH_API_KEY";
    pub const START_BLOCK: &str = "START_BLOCK";
    pub const POLL_INTERVAL_SECS: &str = "POLL_INTERVAL_SECS";
    pub const BROADCAST_INTERVAL_SECS: &str = "BROADCAST_INTERVAL_SECS";
    pub const HTTP_PORT: &str = "HTTP_PORT";
    pub const SUPPRESSION_THRESHOLD_BPS: &str = "SUPPRESSION_THRESHOLD_BPS";
    pub const CORS_ORIGIN: &str = "CORS_ORIGIN";
    pub const MIN_SIGNER_BALANCE_WEI: &str = "MIN_SIGNER_BALANCE_WEI";
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rpc_url: String,
    pub lend_contract: Address,
    pub oracle_contract: Address,
    pub signer_key: String,
    pub subgraph_url: String,
    pub subgraph_api_key: String,

    /// Explicit back-fill start; when absent the indexer starts 1000 blocks
    /// behind the head.
    pub start_block: Option<u64>,
    pub poll_interval: Duration,
    pub broadcast_interval: Duration,
    pub http_port: u16,
    pub suppression_bps: u64,
    pub cors_origin: String,
    /// Minimum signer balance below which broadcast cycles are refused.
    pub min_signer_balance: U256,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_broadcast_interval() -> Duration {
    Duration::from_secs(600)
}

fn default_http_port() -> u16 {
    3001
}

fn default_suppression_bps() -> u64 {
    100
}

fn default_cors_origin() -> String {
    "*".to_string()
}

fn default_min_signer_balance() -> U256 {
    // 0.01 native token
    U256::from(10_000_000_000_000_000u64)
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let require = |name: &'static str| -> Result<String> {
            std::env::var(name).map_err(|_| anyhow!("Missing env var: {}", name))
        };

        let require_address = |name: &'static str| -> Result<Address> {
            require(name)?
                .parse()
                .with_context(|| format!("Invalid address for {name}"))
        };

        let optional = |name: &'static str| std::env::var(name).ok();

        let start_block = optional(env::START_BLOCK)
            .map(|v| v.parse::<u64>().with_context(|| format!("Invalid {}", env::START_BLOCK)))
            .transpose()?;

        let poll_interval = optional(env::POLL_INTERVAL_SECS)
            .map(|v| {
                v.parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("Invalid {}", env::POLL_INTERVAL_SECS))
            })
            .transpose()?
            .unwrap_or_else(default_poll_interval);

        let broadcast_interval = optional(env::BROADCAST_INTERVAL_SECS)
            .map(|v| {
                v.parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("Invalid {}", env::BROADCAST_INTERVAL_SECS))
            })
            .transpose()?
            .unwrap_or_else(default_broadcast_interval);

        let http_port = optional(env::HTTP_PORT)
            .map(|v| v.parse::<u16>().with_context(|| format!("Invalid {}", env::HTTP_PORT)))
            .transpose()?
            .unwrap_or_else(default_http_port);

        let suppression_bps = optional(env::SUPPRESSION_THRESHOLD_BPS)
            .map(|v| {
                v.parse::<u64>()
                    .with_context(|| format!("Invalid {}", env::SUPPRESSION_THRESHOLD_BPS))
            })
            .transpose()?
            .unwrap_or_else(default_suppression_bps);

        let min_signer_balance = optional(env::MIN_SIGNER_BALANCE_WEI)
            .map(|v| {
                U256::from_str_radix(&v, 10)
                    .map_err(|e| anyhow!("Invalid {}: {}", env::MIN_SIGNER_BALANCE_WEI, e))
            })
            .transpose()?
            .unwrap_or_else(default_min_signer_balance);

        Ok(Self {
            rpc_url: require(env::RPC_URL)?,
            lend_contract: require_address(env::LEND_CONTRACT)?,
            oracle_contract: require_address(env::ORACLE_CONTRACT)?,
            signer_key: require(env::ORACLE_SIGNER_KEY)?,
            subgraph_url: require(env::SUBGRAPH_URL)?,
            subgraph_api_key: require(env::SUBGRAPH_API_KEY)?,
            start_block,
            poll_interval,
            broadcast_interval,
            http_port,
            suppression_bps,
            cors_origin: optional(env::CORS_ORIGIN).unwrap_or_else(default_cors_origin),
            min_signer_balance,
        })
    }

    /// Log the effective configuration. Secrets are elided.
    pub fn log_summary(&self) {
        info!(
            rpc_url = %self.rpc_url,
            lend_contract = %self.lend_contract,
            oracle_contract = %self.oracle_contract,
            subgraph_url = %self.subgraph_url,
            start_block = ?self.start_block,
            poll_interval_secs = self.poll_interval.as_secs(),
            broadcast_interval_secs = self.broadcast_interval.as_secs(),
            http_port = self.http_port,
            suppression_bps = self.suppression_bps,
            cors_origin = %self.cors_origin,
            min_signer_balance = %self.min_signer_balance,
            "Configuration loaded"
        );
    }
}
