//! Event ingestion: historical back-fill, then continuous tail-polling.
//!
//! The indexer is the sole writer to the event store and its cursor. Raw logs
//! are fetched per event kind in parallel, decoded, deduplicated by record id
//! (back-fill and tail-poll can overlap at restart), and newly inserted
//! `LoanCreated` records are published on the notice bus.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use rand::Rng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use domalend_chain::{decode_log, ChainError, ChainReader, EventKind};

use crate::notify::{LoanCreatedNotice, NoticeBus, NOTICE_BUFFER};
use crate::store::EventStore;

/// Lifecycle phase, surfaced through `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerPhase {
    Initializing,
    BackFilling,
    Tailing,
    Paused,
    Stopped,
}

impl IndexerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::BackFilling => "backfilling",
            Self::Tailing => "tailing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Explicit back-fill start block. When absent, the first run starts
    /// `backfill_window` blocks behind the head.
    pub start_block: Option<u64>,
    pub poll_interval: Duration,
    pub backfill_window: u64,
    /// Widest block range issued in a single `eth_getLogs` call; wider
    /// ranges are chunked.
    pub max_block_range: u64,
    /// Consecutive tail-poll failures before the indexer pauses itself.
    pub pause_after_failures: u32,
    pub pause_window: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            start_block: None,
            poll_interval: Duration::from_secs(5),
            backfill_window: 1000,
            max_block_range: 10_000,
            pause_after_failures: 5,
            pause_window: Duration::from_secs(30),
        }
    }
}

/// Observer handle for the supervisor and the HTTP surface.
#[derive(Clone)]
pub struct IndexerHandle {
    phase: watch::Receiver<IndexerPhase>,
    bus: NoticeBus,
    poll_failures: Arc<AtomicU32>,
}

impl IndexerHandle {
    pub fn phase(&self) -> IndexerPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_notices(&self) -> crate::notify::NoticeStream {
        self.bus.subscribe()
    }

    pub fn consecutive_poll_failures(&self) -> u32 {
        self.poll_failures.load(Ordering::Relaxed)
    }

    pub fn dropped_notices(&self) -> u64 {
        self.bus.dropped()
    }

    /// Resolve once the indexer has left `Initializing` (the cursor is placed
    /// and ingestion has begun), or the indexer task has ended.
    pub async fn wait_until_started(&mut self) {
        while *self.phase.borrow() == IndexerPhase::Initializing {
            if self.phase.changed().await.is_err() {
                return;
            }
        }
    }

    /// Next phase transition, `None` once the indexer task has ended. Lets
    /// the supervisor observe pauses and resumes.
    pub async fn phase_changed(&mut self) -> Option<IndexerPhase> {
        if self.phase.changed().await.is_ok() {
            Some(*self.phase.borrow())
        } else {
            None
        }
    }
}

/// The ingest driver. Owns the chain reader and the store write path.
pub struct Indexer<C> {
    chain: Arc<C>,
    store: Arc<EventStore>,
    bus: NoticeBus,
    cfg: IndexerConfig,
    phase_tx: watch::Sender<IndexerPhase>,
    poll_failures: Arc<AtomicU32>,
}

impl<C: ChainReader> Indexer<C> {
    pub fn new(chain: Arc<C>, store: Arc<EventStore>, cfg: IndexerConfig) -> (Self, IndexerHandle) {
        let (phase_tx, phase_rx) = watch::channel(IndexerPhase::Initializing);
        let bus = NoticeBus::new(NOTICE_BUFFER);
        let poll_failures = Arc::new(AtomicU32::new(0));

        let handle = IndexerHandle {
            phase: phase_rx,
            bus: bus.clone(),
            poll_failures: poll_failures.clone(),
        };

        (
            Self {
                chain,
                store,
                bus,
                cfg,
                phase_tx,
                poll_failures,
            },
            handle,
        )
    }

    fn set_phase(&self, phase: IndexerPhase) {
        let _ = self.phase_tx.send(phase);
    }

    /// Drive the full lifecycle until the shutdown token fires.
    pub async fn run(self, shutdown: CancellationToken) {
        self.set_phase(IndexerPhase::Initializing);
        self.store.set_indexing(true);

        // Resolve the head with indefinite backoff; without it there is no
        // cursor to place.
        let head = {
            let mut attempt = 0u32;
            loop {
                if shutdown.is_cancelled() {
                    self.finish();
                    return;
                }
                match self.chain.head_block().await {
                    Ok(head) => break head,
                    Err(e) => {
                        attempt += 1;
                        let delay = backoff_delay(attempt);
                        warn!(error = %e, attempt = attempt, delay_ms = delay.as_millis() as u64, "Failed to resolve head block; retrying");
                        if sleep_or_cancel(delay, &shutdown).await {
                            self.finish();
                            return;
                        }
                    }
                }
            }
        };

        let first_block = self
            .cfg
            .start_block
            .unwrap_or_else(|| head.saturating_sub(self.cfg.backfill_window));
        self.store.init_cursor(first_block);

        self.set_phase(IndexerPhase::BackFilling);
        info!(from = first_block, to = head, "Starting back-fill");

        let mut attempt = 0u32;
        loop {
            if shutdown.is_cancelled() {
                self.finish();
                return;
            }
            match self.sync_range(first_block, head).await {
                Ok(inserted) => {
                    info!(from = first_block, to = head, inserted = inserted, "Back-fill complete");
                    break;
                }
                Err(e) => {
                    attempt += 1;
                    let delay = backoff_delay(attempt);
                    warn!(error = %e, attempt = attempt, delay_ms = delay.as_millis() as u64, "Back-fill attempt failed; retrying");
                    if sleep_or_cancel(delay, &shutdown).await {
                        self.finish();
                        return;
                    }
                }
            }
        }
        self.store.advance_cursor(head + 1, head);

        self.set_phase(IndexerPhase::Tailing);
        let mut interval = tokio::time::interval(self.cfg.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match self.poll_once().await {
                        Ok(_) => {
                            self.poll_failures.store(0, Ordering::Relaxed);
                        }
                        Err(e) => {
                            let failures = self.poll_failures.fetch_add(1, Ordering::Relaxed) + 1;
                            warn!(error = %e, consecutive_failures = failures, "Tail poll failed");

                            if failures >= self.cfg.pause_after_failures {
                                error!(
                                    failures = failures,
                                    pause_secs = self.cfg.pause_window.as_secs(),
                                    "Too many consecutive poll failures; pausing indexer"
                                );
                                self.set_phase(IndexerPhase::Paused);
                                self.store.set_indexing(false);
                                if sleep_or_cancel(self.cfg.pause_window, &shutdown).await {
                                    break;
                                }
                                self.poll_failures.store(0, Ordering::Relaxed);
                                self.store.set_indexing(true);
                                self.set_phase(IndexerPhase::Tailing);
                                info!("Indexer resumed");
                            }
                        }
                    }
                }
            }
        }

        self.finish();
    }

    fn finish(&self) {
        self.store.set_indexing(false);
        self.set_phase(IndexerPhase::Stopped);
        info!("Indexer stopped");
    }

    /// One tail-poll iteration: nothing to do while the head is behind the
    /// cursor, otherwise ingest the outstanding range and advance.
    async fn poll_once(&self) -> Result<u64, ChainError> {
        let head = self.chain.head_block().await?;
        let next = self.store.status().next_block;
        if head < next {
            return Ok(0);
        }

        let inserted = self.sync_range(next, head).await?;
        self.store.advance_cursor(head + 1, head);

        if inserted > 0 {
            debug!(from = next, to = head, inserted = inserted, "Tail poll ingested new events");
        }
        Ok(inserted)
    }

    /// Ingest the inclusive range `[from, to]`: per chunk, issue the seven
    /// per-kind log queries in parallel, then decode and insert. Decode
    /// failures drop the single record; RPC failures fail the whole attempt
    /// (the cursor is not advanced by this function).
    async fn sync_range(&self, from: u64, to: u64) -> Result<u64, ChainError> {
        let mut inserted = 0u64;
        let mut lo = from;

        while lo <= to {
            let hi = lo
                .saturating_add(self.cfg.max_block_range.saturating_sub(1))
                .min(to);

            let queries = EventKind::ALL.iter().map(|kind| {
                let chain = self.chain.clone();
                let kind = *kind;
                async move {
                    chain
                        .query_logs(kind.topic0(), lo, hi)
                        .await
                        .map(|logs| (kind, logs))
                }
            });
            let batches = try_join_all(queries).await?;

            for (kind, logs) in batches {
                for log in logs {
                    let Some(block_number) = log.block_number else {
                        warn!(kind = kind.name(), "Dropping log without a block number");
                        continue;
                    };
                    let block_timestamp = self.chain.block_timestamp(block_number).await?;

                    let record = match decode_log(kind, &log, block_timestamp) {
                        Ok(record) => record,
                        Err(e) => {
                            warn!(kind = kind.name(), error = %e, "Dropping undecodable log");
                            continue;
                        }
                    };

                    let notice = record.as_loan_created().map(|created| LoanCreatedNotice {
                        loan_id: created.loan_id,
                        token_address: created.token_address,
                        collateral_address: created.collateral_address,
                    });

                    if self.store.insert(record) {
                        inserted += 1;
                        if let Some(notice) = notice {
                            self.bus.publish(notice);
                        }
                    }
                }
            }

            if hi == u64::MAX {
                break;
            }
            lo = hi + 1;
        }

        Ok(inserted)
    }
}

/// Exponential backoff base: 500 ms doubling per attempt, capped at 30 s.
fn backoff_base_ms(attempt: u32) -> u64 {
    const BASE_MS: u64 = 500;
    const CAP_MS: u64 = 30_000;
    let shift = attempt.saturating_sub(1).min(16);
    BASE_MS.saturating_mul(1u64 << shift).min(CAP_MS)
}

/// Backoff with ±20% jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let base = backoff_base_ms(attempt) as f64;
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((base * jitter) as u64)
}

/// Sleep unless shutdown fires first; true when cancelled.
async fn sleep_or_cancel(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
