//! DomaLend off-chain core.
//!
//! This crate provides the heart of both subsystems:
//! - In-memory event store with derived protocol aggregates
//! - Indexer: back-fill plus tail-poll ingestion with a notice bus
//! - DomaRank valuation engine
//! - Valuation oracle broadcaster with change suppression
//! - Process configuration

pub mod broadcaster;
pub mod config;
pub mod indexer;
pub mod math;
pub mod notify;
pub mod store;
pub mod valuation;

pub use broadcaster::{derive_metrics, BroadcastConfig, Broadcaster, CycleSummary};
pub use config::AppConfig;
pub use indexer::{Indexer, IndexerConfig, IndexerHandle, IndexerPhase};
pub use notify::{LoanCreatedNotice, NoticeBus, NoticeStream, NOTICE_BUFFER};
pub use store::{
    EventStore, ListOptions, OrderDirection, OrderField, ProtocolStats, StoreStatus,
};
pub use valuation::{DomainMetrics, Valuation};
