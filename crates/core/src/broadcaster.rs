//! Valuation oracle broadcaster.
//!
//! Two triggers drive valuation refreshes: a periodic timer over the whole
//! token listing, and `LoanCreated` notices from the indexer for collateral
//! the broadcaster recognizes as a fractional domain token. Writes that would
//! not move the on-chain value by the suppression threshold are skipped.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use dashmap::DashSet;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use domalend_api::{DomainFeed, NameDetails, SubgraphError, TokenSummary};
use domalend_chain::OracleGateway;

use crate::math;
use crate::notify::{LoanCreatedNotice, NoticeStream};
use crate::valuation::{self, DomainMetrics};

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub interval: Duration,
    /// Minimum relative change versus the on-chain value that justifies a
    /// transaction, in basis points.
    pub suppression_bps: u64,
    /// Signer balance floor; below it a cycle is refused outright.
    pub min_signer_balance: U256,
    /// Pacing between consecutive submissions.
    pub submit_spacing: Duration,
    /// How long an in-flight submission may finish its receipt wait after a
    /// shutdown signal.
    pub shutdown_grace: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            suppression_bps: 100,
            min_signer_balance: U256::from(10_000_000_000_000_000u64),
            submit_spacing: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Per-cycle outcome accounting, logged as the cycle summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub successes: u32,
    pub failures: u32,
    pub skipped: u32,
}

enum TokenOutcome {
    Updated,
    Skipped,
    Failed,
}

/// The broadcast driver, generic over its two upstream seams.
pub struct Broadcaster<F, G> {
    feed: Arc<F>,
    oracle: Arc<G>,
    cfg: BroadcastConfig,
    /// Single-flight guard: a token being refreshed by one path is skipped
    /// by the other.
    in_flight: DashSet<Address>,
    /// Token addresses seen in the latest listing; the notice filter.
    known_tokens: RwLock<HashSet<Address>>,
}

impl<F: DomainFeed, G: OracleGateway> Broadcaster<F, G> {
    pub fn new(feed: Arc<F>, oracle: Arc<G>, cfg: BroadcastConfig) -> Self {
        Self {
            feed,
            oracle,
            cfg,
            in_flight: DashSet::new(),
            known_tokens: RwLock::new(HashSet::new()),
        }
    }

    /// Drive periodic cycles and event-triggered refreshes until shutdown.
    pub async fn run(self: Arc<Self>, mut notices: NoticeStream, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.cfg.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut notices_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match self.run_once(&shutdown).await {
                        Ok(summary) => info!(
                            successes = summary.successes,
                            failures = summary.failures,
                            skipped = summary.skipped,
                            "Broadcast cycle complete"
                        ),
                        Err(e) => warn!(error = %e, "Broadcast cycle aborted; retrying at next tick"),
                    }
                }
                maybe_notice = notices.recv(), if notices_open => {
                    match maybe_notice {
                        Some(notice) => self.handle_notice(notice, &shutdown).await,
                        None => {
                            debug!("Notice bus closed; event-triggered refreshes disabled");
                            notices_open = false;
                        }
                    }
                }
            }
        }

        info!("Broadcaster stopped");
    }

    /// One full valuation cycle over the token listing. A bulk listing
    /// failure aborts the cycle (retried at the next tick); per-token
    /// failures only count against that token.
    pub async fn run_once(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<CycleSummary, SubgraphError> {
        match self.oracle.signer_balance().await {
            Ok(balance) if balance < self.cfg.min_signer_balance => {
                warn!(
                    balance = %balance,
                    floor = %self.cfg.min_signer_balance,
                    "Signer balance below floor; refusing broadcast cycle"
                );
                return Ok(CycleSummary::default());
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to read signer balance; skipping cycle");
                return Ok(CycleSummary::default());
            }
        }

        let tokens = self.feed.list_fractional_tokens().await?;
        *self.known_tokens.write() = tokens.iter().map(|t| t.address).collect();

        let mut summary = CycleSummary::default();
        for token in &tokens {
            if shutdown.is_cancelled() {
                info!("Shutdown requested; interrupting broadcast cycle");
                break;
            }

            match self.refresh_token(token, shutdown).await {
                TokenOutcome::Updated => {
                    summary.successes += 1;
                    if sleep_or_cancel(self.cfg.submit_spacing, shutdown).await {
                        break;
                    }
                }
                TokenOutcome::Skipped => summary.skipped += 1,
                TokenOutcome::Failed => {
                    summary.failures += 1;
                    if sleep_or_cancel(self.cfg.submit_spacing, shutdown).await {
                        break;
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Event-triggered path: refresh exactly the collateral token of a new
    /// loan, independent of the cycle timer.
    pub async fn handle_notice(&self, notice: LoanCreatedNotice, shutdown: &CancellationToken) {
        {
            let known = self.known_tokens.read();
            // Before the first listing the filter has nothing to say; fall
            // through and let the listing lookup decide.
            if !known.is_empty() && !known.contains(&notice.collateral_address) {
                debug!(
                    collateral = %notice.collateral_address,
                    "Loan collateral is not a known domain token; ignoring notice"
                );
                return;
            }
        }

        info!(
            loan_id = %notice.loan_id,
            collateral = %notice.collateral_address,
            "Refreshing valuation for new loan collateral"
        );

        let tokens = match self.feed.list_fractional_tokens().await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Failed to list tokens for event-triggered refresh");
                return;
            }
        };
        *self.known_tokens.write() = tokens.iter().map(|t| t.address).collect();

        let Some(token) = tokens
            .iter()
            .find(|t| t.address == notice.collateral_address)
        else {
            debug!(
                collateral = %notice.collateral_address,
                "Collateral token absent from listing; ignoring notice"
            );
            return;
        };

        match self.refresh_token(token, shutdown).await {
            TokenOutcome::Updated => {
                info!(token = %token.address, "Event-triggered valuation broadcast")
            }
            TokenOutcome::Skipped => {
                debug!(token = %token.address, "Event-triggered refresh skipped")
            }
            TokenOutcome::Failed => {
                warn!(token = %token.address, "Event-triggered refresh failed")
            }
        }
    }

    /// Refresh a single token behind the per-token single-flight guard.
    async fn refresh_token(&self, token: &TokenSummary, shutdown: &CancellationToken) -> TokenOutcome {
        if !self.in_flight.insert(token.address) {
            debug!(token = %token.address, "Refresh already in flight; skipping");
            return TokenOutcome::Skipped;
        }

        let outcome = self.refresh_inner(token, shutdown).await;
        self.in_flight.remove(&token.address);
        outcome
    }

    async fn refresh_inner(&self, token: &TokenSummary, shutdown: &CancellationToken) -> TokenOutcome {
        let details = match self.feed.name_details(&token.name).await {
            Ok(details) => details,
            Err(e) => {
                warn!(domain = %token.name, error = %e, "Failed to fetch name details");
                return TokenOutcome::Failed;
            }
        };

        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let metrics = match derive_metrics(token, &details, now) {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(domain = %token.name, error = %e, "Unusable token metadata");
                return TokenOutcome::Failed;
            }
        };

        let Some(valuation) = valuation::evaluate(&metrics) else {
            debug!(domain = %token.name, "No meaningful valuation; skipping token");
            return TokenOutcome::Skipped;
        };

        let on_chain = match self.oracle.get_token_value(token.address).await {
            Ok(value) => value,
            Err(e) => {
                warn!(token = %token.address, error = %e, "Failed to read on-chain value");
                return TokenOutcome::Failed;
            }
        };

        if let Some(current) = on_chain {
            if !math::change_exceeds_bps(current, valuation.valuation_wei, self.cfg.suppression_bps)
            {
                debug!(
                    token = %token.address,
                    on_chain = %current,
                    new = %valuation.valuation_wei,
                    change_bps = math::diff_bps(current, valuation.valuation_wei),
                    "Change below suppression threshold; skipping"
                );
                return TokenOutcome::Skipped;
            }
        }

        // An in-flight submission gets a bounded grace window on shutdown
        // instead of being dropped mid-receipt-wait.
        let submit = self.oracle.submit_update(token.address, valuation.valuation_wei);
        tokio::pin!(submit);
        let result = tokio::select! {
            res = &mut submit => res,
            _ = shutdown.cancelled() => {
                match tokio::time::timeout(self.cfg.shutdown_grace, &mut submit).await {
                    Ok(res) => res,
                    Err(_) => {
                        warn!(token = %token.address, "Shutdown grace elapsed before receipt");
                        return TokenOutcome::Failed;
                    }
                }
            }
        };

        match result {
            Ok(receipt) => {
                info!(
                    token = %token.address,
                    domain = %token.name,
                    doma_rank = %valuation.doma_rank,
                    valuation_usd = %valuation.valuation_usd,
                    valuation_wei = %valuation.valuation_wei,
                    tx_hash = %receipt.tx_hash,
                    "Valuation broadcast"
                );
                TokenOutcome::Updated
            }
            Err(e) => {
                warn!(token = %token.address, error = %e, "Oracle update failed");
                TokenOutcome::Failed
            }
        }
    }
}

/// Derive engine inputs from subgraph metadata.
///
/// The TLD is the suffix after the last dot; the label length excludes it.
/// `live_price_usd` converts the upstream's 8-decimal fixed point exactly.
pub fn derive_metrics(
    token: &TokenSummary,
    details: &NameDetails,
    now: u64,
) -> Result<DomainMetrics, String> {
    let (label, tld) = split_domain(&token.name);

    let raw = BigDecimal::from_str(&token.current_price_raw)
        .map_err(|e| format!("bad price {:?}: {e}", token.current_price_raw))?;
    // 10^-8 as an exact scale shift
    let live_price_usd = raw * BigDecimal::new(BigInt::from(1), 8);

    Ok(DomainMetrics {
        name: token.name.clone(),
        tld,
        name_length: label.chars().count() as u32,
        years_on_chain: valuation::years_between(token.fractionalized_at, now),
        years_until_expiry: valuation::years_between(now, details.expires_at),
        active_offers_count: details.active_offers_count,
        live_price_usd,
    })
}

/// Split `crypto.io` into (`crypto`, `io`). A name without a dot has an
/// empty TLD (scored as unknown).
fn split_domain(name: &str) -> (String, String) {
    match name.rsplit_once('.') {
        Some((label, tld)) => (label.to_string(), tld.to_lowercase()),
        None => (name.to_string(), String::new()),
    }
}

/// Sleep unless shutdown fires first; true when cancelled.
async fn sleep_or_cancel(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domalend_chain::{SubmitError, UpdateReceipt};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MockFeed {
        tokens: Vec<TokenSummary>,
        details: HashMap<String, NameDetails>,
        fail_listing: bool,
    }

    #[async_trait]
    impl DomainFeed for MockFeed {
        async fn list_fractional_tokens(&self) -> Result<Vec<TokenSummary>, SubgraphError> {
            if self.fail_listing {
                return Err(SubgraphError::Upstream("listing unavailable".into()));
            }
            Ok(self.tokens.clone())
        }

        async fn name_details(&self, domain_name: &str) -> Result<NameDetails, SubgraphError> {
            self.details
                .get(domain_name)
                .cloned()
                .ok_or_else(|| SubgraphError::NameNotFound(domain_name.to_string()))
        }
    }

    struct MockOracle {
        balance: U256,
        values: Mutex<HashMap<Address, U256>>,
        submissions: Mutex<Vec<(Address, U256)>>,
    }

    impl MockOracle {
        fn new(balance: U256) -> Self {
            Self {
                balance,
                values: Mutex::new(HashMap::new()),
                submissions: Mutex::new(Vec::new()),
            }
        }

        fn with_value(self, token: Address, value: U256) -> Self {
            self.values.lock().unwrap().insert(token, value);
            self
        }

        fn submissions(&self) -> Vec<(Address, U256)> {
            self.submissions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OracleGateway for MockOracle {
        async fn get_token_value(&self, token: Address) -> Result<Option<U256>, SubmitError> {
            Ok(self.values.lock().unwrap().get(&token).copied())
        }

        async fn signer_balance(&self) -> Result<U256, SubmitError> {
            Ok(self.balance)
        }

        async fn submit_update(
            &self,
            token: Address,
            value_wei: U256,
        ) -> Result<UpdateReceipt, SubmitError> {
            self.submissions.lock().unwrap().push((token, value_wei));
            self.values.lock().unwrap().insert(token, value_wei);
            Ok(UpdateReceipt {
                tx_hash: alloy::primitives::B256::repeat_byte(0x77),
                block_number: 1,
                gas_used: 50_000,
            })
        }
    }

    fn wad(units: u64) -> U256 {
        U256::from(units) * U256::from(10u64).pow(U256::from(18u64))
    }

    /// crypto.io with the reference-scenario metadata: rank 98.2, $9820.
    fn crypto_io(now: u64) -> (TokenSummary, NameDetails) {
        let token = TokenSummary {
            address: Address::repeat_byte(0xf2),
            name: "crypto.io".to_string(),
            fractionalized_at: now - 31_557_600 * 5 / 2,
            current_price_raw: "1000000000000".to_string(), // $10000 at 8 decimals
            total_supply: "1000000".to_string(),
            symbol: "CRYPTIO".to_string(),
            decimals: 18,
        };
        let details = NameDetails {
            expires_at: now + 31_557_600 * 8,
            active_offers_count: 12,
            highest_offer_price_raw: None,
            fractional_token_address: Some(token.address),
        };
        (token, details)
    }

    fn broadcaster(
        feed: MockFeed,
        oracle: MockOracle,
    ) -> Broadcaster<MockFeed, MockOracle> {
        Broadcaster::new(Arc::new(feed), Arc::new(oracle), BroadcastConfig {
            submit_spacing: Duration::from_millis(1),
            ..Default::default()
        })
    }

    fn now() -> u64 {
        chrono::Utc::now().timestamp() as u64
    }

    #[tokio::test]
    async fn test_cycle_broadcasts_fresh_valuation() {
        let now = now();
        let (token, details) = crypto_io(now);
        let feed = MockFeed {
            tokens: vec![token.clone()],
            details: HashMap::from([(token.name.clone(), details)]),
            fail_listing: false,
        };
        let oracle = MockOracle::new(wad(1));
        let b = broadcaster(feed, oracle);

        let summary = b.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.successes, 1);
        assert_eq!(summary.failures, 0);

        let submissions = b.oracle.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].0, token.address);
        assert_eq!(submissions[0].1, wad(9820));
    }

    #[tokio::test]
    async fn test_suppression_skips_insignificant_change() {
        let now = now();
        let (token, details) = crypto_io(now);
        let feed = MockFeed {
            tokens: vec![token.clone()],
            details: HashMap::from([(token.name.clone(), details)]),
            fail_listing: false,
        };
        // On-chain 9850e18 versus a fresh 9820e18 is a ~0.3% move.
        let oracle = MockOracle::new(wad(1)).with_value(token.address, wad(9850));
        let b = broadcaster(feed, oracle);

        let summary = b.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.successes, 0);
        assert_eq!(summary.skipped, 1);
        assert!(b.oracle.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_balance_floor_refuses_cycle() {
        let now = now();
        let (token, details) = crypto_io(now);
        let feed = MockFeed {
            tokens: vec![token.clone()],
            details: HashMap::from([(token.name.clone(), details)]),
            fail_listing: false,
        };
        let oracle = MockOracle::new(U256::from(1u64)); // dust balance
        let b = broadcaster(feed, oracle);

        let summary = b.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary, CycleSummary::default());
        assert!(b.oracle.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_cycle() {
        let feed = MockFeed {
            tokens: Vec::new(),
            details: HashMap::new(),
            fail_listing: true,
        };
        let oracle = MockOracle::new(wad(1));
        let b = broadcaster(feed, oracle);

        assert!(b.run_once(&CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_details_failure_counts_token_and_continues() {
        let now = now();
        let (good, details) = crypto_io(now);
        let orphan = TokenSummary {
            address: Address::repeat_byte(0x99),
            name: "missing.xyz".to_string(),
            ..good.clone()
        };
        let feed = MockFeed {
            tokens: vec![orphan, good.clone()],
            details: HashMap::from([(good.name.clone(), details)]),
            fail_listing: false,
        };
        let oracle = MockOracle::new(wad(1));
        let b = broadcaster(feed, oracle);

        let summary = b.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.successes, 1);
        assert_eq!(b.oracle.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_notice_refreshes_exactly_the_collateral_token() {
        let now = now();
        let (target, target_details) = crypto_io(now);
        let other = TokenSummary {
            address: Address::repeat_byte(0x55),
            name: "other.com".to_string(),
            ..target.clone()
        };
        let other_details = NameDetails {
            expires_at: now + 31_557_600,
            active_offers_count: 1,
            highest_offer_price_raw: None,
            fractional_token_address: Some(other.address),
        };
        let feed = MockFeed {
            tokens: vec![other.clone(), target.clone()],
            details: HashMap::from([
                (target.name.clone(), target_details),
                (other.name.clone(), other_details),
            ]),
            fail_listing: false,
        };
        let oracle = MockOracle::new(wad(1));
        let b = broadcaster(feed, oracle);

        b.handle_notice(
            LoanCreatedNotice {
                loan_id: U256::from(1u64),
                token_address: Address::repeat_byte(0xbb),
                collateral_address: target.address,
            },
            &CancellationToken::new(),
        )
        .await;

        let submissions = b.oracle.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].0, target.address);
    }

    #[tokio::test]
    async fn test_notice_for_unknown_collateral_is_ignored() {
        let now = now();
        let (token, details) = crypto_io(now);
        let feed = MockFeed {
            tokens: vec![token.clone()],
            details: HashMap::from([(token.name.clone(), details)]),
            fail_listing: false,
        };
        let oracle = MockOracle::new(wad(1));
        let b = broadcaster(feed, oracle);

        // Populate the known-token filter first.
        b.run_once(&CancellationToken::new()).await.unwrap();
        let before = b.oracle.submissions().len();

        b.handle_notice(
            LoanCreatedNotice {
                loan_id: U256::from(2u64),
                token_address: Address::repeat_byte(0xbb),
                collateral_address: Address::repeat_byte(0x01), // not a domain token
            },
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(b.oracle.submissions().len(), before);
    }

    #[test]
    fn test_derive_metrics_reference_domain() {
        let now = 1_700_000_000u64;
        let (token, details) = crypto_io(now);
        let metrics = derive_metrics(&token, &details, now).unwrap();

        assert_eq!(metrics.tld, "io");
        assert_eq!(metrics.name_length, 6);
        assert_eq!(
            metrics.live_price_usd,
            BigDecimal::from_str("10000").unwrap()
        );
        assert_eq!(
            metrics.years_on_chain,
            BigDecimal::from_str("2.5").unwrap()
        );
        assert_eq!(metrics.years_until_expiry, BigDecimal::from(8));
    }

    #[test]
    fn test_split_domain() {
        assert_eq!(
            split_domain("crypto.io"),
            ("crypto".to_string(), "io".to_string())
        );
        assert_eq!(
            split_domain("a.b.XYZ"),
            ("a.b".to_string(), "xyz".to_string())
        );
        assert_eq!(split_domain("bare"), ("bare".to_string(), String::new()));
    }
}
