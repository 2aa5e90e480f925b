//! In-memory projection of DomaLend contract events.
//!
//! A single reader-writer lock guards the whole projection: the write rate is
//! low (one indexer task) and readers are many (HTTP handlers). Readers never
//! observe a half-inserted record, and aggregates are maintained inside the
//! same critical section as the insert they derive from.

use std::collections::{HashMap, HashSet};

use alloy::primitives::U256;
use parking_lot::RwLock;
use serde::{Serialize, Serializer};

use domalend_chain::{EventKind, EventRecord};

/// Derived protocol aggregates, updated on `LoanCreated` inserts.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolStats {
    #[serde(serialize_with = "u64_string")]
    pub total_loans_created: u64,
    #[serde(serialize_with = "u256_string")]
    pub total_loan_volume: U256,
    /// Updated opportunistically when a price is available; otherwise
    /// unchanged (this system has no ingest-time price source).
    #[serde(rename = "totalLoanVolumeUSD", serialize_with = "u256_string")]
    pub total_loan_volume_usd: U256,
    #[serde(serialize_with = "u64_string")]
    pub last_processed_block: u64,
}

/// Indexer-facing status snapshot.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    pub next_block: u64,
    pub last_processed_block: u64,
    pub total_loans_indexed: u64,
    pub is_indexing: bool,
}

/// Field a read view is ordered by. Restricted to the integer-valued fields;
/// anything else is rejected at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderField {
    BlockNumber,
    #[default]
    BlockTimestamp,
    Timestamp,
}

impl OrderField {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blockNumber" => Some(Self::BlockNumber),
            "blockTimestamp" => Some(Self::BlockTimestamp),
            "timestamp" => Some(Self::Timestamp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

impl OrderDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

/// Read-view options with the subgraph defaults.
#[derive(Debug, Clone, Copy)]
pub struct ListOptions {
    pub first: u32,
    pub skip: u32,
    pub order_by: OrderField,
    pub direction: OrderDirection,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            first: 100,
            skip: 0,
            order_by: OrderField::default(),
            direction: OrderDirection::default(),
        }
    }
}

#[derive(Default)]
struct Inner {
    events: HashMap<EventKind, Vec<EventRecord>>,
    seen: HashMap<EventKind, HashSet<String>>,
    stats: ProtocolStats,
    next_block: u64,
    is_indexing: bool,
}

/// The shared event projection. Records are created only by the indexer and
/// never mutated or deleted; reads return owned copies.
#[derive(Default)]
pub struct EventStore {
    inner: RwLock<Inner>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, deduplicating on its id. Returns whether the record
    /// was newly inserted. `LoanCreated` inserts update the aggregates in the
    /// same critical section.
    pub fn insert(&self, record: EventRecord) -> bool {
        let kind = record.kind();
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let seen = inner.seen.entry(kind).or_default();
        if !seen.insert(record.meta().id.clone()) {
            return false;
        }

        if let Some(created) = record.as_loan_created() {
            inner.stats.total_loans_created += 1;
            inner.stats.total_loan_volume =
                inner.stats.total_loan_volume.saturating_add(created.amount);
        }

        inner.events.entry(kind).or_default().push(record);
        true
    }

    /// Ordered, paginated read view. Sorting compares the requested field
    /// numerically; ties keep insertion order.
    pub fn list(&self, kind: EventKind, opts: &ListOptions) -> Vec<EventRecord> {
        let inner = self.inner.read();
        let Some(records) = inner.events.get(&kind) else {
            return Vec::new();
        };

        let mut view: Vec<&EventRecord> = records.iter().collect();
        match opts.direction {
            OrderDirection::Asc => view.sort_by_key(|r| sort_key(r, opts.order_by)),
            OrderDirection::Desc => {
                view.sort_by(|a, b| sort_key(b, opts.order_by).cmp(&sort_key(a, opts.order_by)))
            }
        }

        view.into_iter()
            .skip(opts.skip as usize)
            .take(opts.first as usize)
            .cloned()
            .collect()
    }

    /// Number of records held for a kind.
    pub fn count(&self, kind: EventKind) -> usize {
        self.inner
            .read()
            .events
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn stats(&self) -> ProtocolStats {
        self.inner.read().stats.clone()
    }

    pub fn status(&self) -> StoreStatus {
        let inner = self.inner.read();
        StoreStatus {
            next_block: inner.next_block,
            last_processed_block: inner.stats.last_processed_block,
            total_loans_indexed: inner.stats.total_loans_created,
            is_indexing: inner.is_indexing,
        }
    }

    pub fn set_indexing(&self, is_indexing: bool) {
        self.inner.write().is_indexing = is_indexing;
    }

    /// Place the cursor at its startup position, before any range is
    /// processed.
    pub fn init_cursor(&self, next_block: u64) {
        let mut inner = self.inner.write();
        assert!(
            inner.next_block == 0,
            "indexer cursor initialized twice (at {})",
            inner.next_block
        );
        inner.next_block = next_block;
    }

    /// Advance the cursor after a processed range. The cursor moving backward
    /// is a bug, not a recoverable condition; the process aborts.
    pub fn advance_cursor(&self, next_block: u64, last_processed_block: u64) {
        let mut inner = self.inner.write();
        assert!(
            next_block >= inner.next_block,
            "indexer cursor moved backward: {} -> {}",
            inner.next_block,
            next_block
        );
        assert!(
            last_processed_block >= inner.stats.last_processed_block,
            "last processed block moved backward: {} -> {}",
            inner.stats.last_processed_block,
            last_processed_block
        );
        inner.next_block = next_block;
        inner.stats.last_processed_block = last_processed_block;
    }
}

fn sort_key(record: &EventRecord, field: OrderField) -> u64 {
    match field {
        OrderField::BlockNumber => record.meta().block_number,
        OrderField::BlockTimestamp => record.meta().block_timestamp,
        // Kinds without an explicit timestamp sort by block timestamp.
        OrderField::Timestamp => record
            .event_timestamp()
            .unwrap_or(record.meta().block_timestamp),
    }
}

fn u64_string<S: Serializer>(v: &u64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&v.to_string())
}

fn u256_string<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, B256};
    use domalend_chain::{event_id, EventMeta, LoanCreatedEvent, LoanRepaidEvent};

    fn meta(tag: u8, log_index: u64, block_number: u64, block_timestamp: u64) -> EventMeta {
        let tx = B256::repeat_byte(tag);
        EventMeta {
            id: event_id(tx, log_index),
            block_number,
            block_timestamp,
            transaction_hash: tx,
        }
    }

    fn repaid(tag: u8, timestamp: u64) -> EventRecord {
        EventRecord::LoanRepaid(LoanRepaidEvent {
            meta: meta(tag, 0, timestamp / 10, timestamp),
            loan_id: U256::from(tag),
            borrower: Address::repeat_byte(tag),
            repayment_amount: U256::from(100u64),
            timestamp,
        })
    }

    fn created(tag: u8, amount: u64) -> EventRecord {
        EventRecord::LoanCreated(LoanCreatedEvent {
            meta: meta(tag, 0, 1200, 1_700_000_000),
            loan_id: U256::from(tag),
            lender: Address::repeat_byte(0xaa),
            token_address: Address::repeat_byte(0xbb),
            amount: U256::from(amount),
            interest_rate: U256::from(500u64),
            duration: U256::from(86_400u64),
            collateral_address: Address::repeat_byte(0xf2),
            collateral_amount: U256::from(1u64),
            min_collateral_ratio_bps: U256::from(15_000u64),
            liquidation_threshold_bps: U256::from(12_000u64),
            max_price_staleness: U256::from(3_600u64),
            price_usd: "0".to_string(),
            amount_usd: "0".to_string(),
        })
    }

    #[test]
    fn test_insert_is_idempotent_on_id() {
        let store = EventStore::new();
        assert!(store.insert(created(1, 1000)));
        assert!(!store.insert(created(1, 1000)));
        assert_eq!(store.count(EventKind::LoanCreated), 1);
        // the duplicate did not double-count the aggregates
        assert_eq!(store.stats().total_loans_created, 1);
        assert_eq!(store.stats().total_loan_volume, U256::from(1000u64));
    }

    #[test]
    fn test_stats_track_loan_created_only() {
        let store = EventStore::new();
        store.insert(created(1, 700));
        store.insert(created(2, 300));
        store.insert(repaid(3, 1500));

        let stats = store.stats();
        assert_eq!(stats.total_loans_created, 2);
        assert_eq!(stats.total_loan_volume, U256::from(1000u64));
        assert_eq!(
            stats.total_loans_created,
            store.count(EventKind::LoanCreated) as u64
        );
    }

    #[test]
    fn test_list_sorts_and_paginates() {
        let store = EventStore::new();
        store.insert(repaid(1, 1000));
        store.insert(repaid(2, 2000));
        store.insert(repaid(3, 1500));

        let page = store.list(
            EventKind::LoanRepaid,
            &ListOptions {
                first: 2,
                ..Default::default()
            },
        );
        let timestamps: Vec<u64> = page.iter().filter_map(|r| r.event_timestamp()).collect();
        assert_eq!(timestamps, vec![2000, 1500]);

        let rest = store.list(
            EventKind::LoanRepaid,
            &ListOptions {
                first: 2,
                skip: 2,
                ..Default::default()
            },
        );
        let timestamps: Vec<u64> = rest.iter().filter_map(|r| r.event_timestamp()).collect();
        assert_eq!(timestamps, vec![1000]);
    }

    #[test]
    fn test_pagination_consistency() {
        let store = EventStore::new();
        for (tag, ts) in [(1u8, 500u64), (2, 900), (3, 100), (4, 700), (5, 300)] {
            store.insert(repaid(tag, ts));
        }

        let first_page = store.list(
            EventKind::LoanRepaid,
            &ListOptions {
                first: 2,
                ..Default::default()
            },
        );
        let second_page = store.list(
            EventKind::LoanRepaid,
            &ListOptions {
                first: 2,
                skip: 2,
                ..Default::default()
            },
        );
        let combined = store.list(
            EventKind::LoanRepaid,
            &ListOptions {
                first: 4,
                ..Default::default()
            },
        );

        let ids = |records: &[EventRecord]| -> Vec<String> {
            records.iter().map(|r| r.meta().id.clone()).collect()
        };
        let mut chained = ids(&first_page);
        chained.extend(ids(&second_page));
        assert_eq!(chained, ids(&combined));
        assert!(first_page.len() <= 2);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let store = EventStore::new();
        store.insert(repaid(1, 1000));
        store.insert(repaid(2, 1000));
        store.insert(repaid(3, 1000));

        let page = store.list(
            EventKind::LoanRepaid,
            &ListOptions {
                direction: OrderDirection::Asc,
                ..Default::default()
            },
        );
        let ids: Vec<String> = page.iter().map(|r| r.meta().id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                event_id(B256::repeat_byte(1), 0),
                event_id(B256::repeat_byte(2), 0),
                event_id(B256::repeat_byte(3), 0)
            ]
        );
    }

    #[test]
    fn test_list_unknown_kind_is_empty() {
        let store = EventStore::new();
        assert!(store
            .list(EventKind::OracleAddressSet, &ListOptions::default())
            .is_empty());
    }

    #[test]
    fn test_cursor_advances() {
        let store = EventStore::new();
        store.init_cursor(0);
        store.advance_cursor(1001, 1000);

        let status = store.status();
        assert_eq!(status.next_block, 1001);
        assert_eq!(status.last_processed_block, 1000);
    }

    #[test]
    #[should_panic(expected = "cursor moved backward")]
    fn test_cursor_cannot_move_backward() {
        let store = EventStore::new();
        store.init_cursor(100);
        store.advance_cursor(50, 49);
    }

    #[test]
    fn test_stats_serialization_shape() {
        let store = EventStore::new();
        store.insert(created(1, 1000));
        store.advance_cursor(1201, 1200);

        let json = serde_json::to_value(store.stats()).unwrap();
        assert_eq!(json["totalLoansCreated"], "1");
        assert_eq!(json["totalLoanVolume"], "1000");
        assert_eq!(json["totalLoanVolumeUSD"], "0");
        assert_eq!(json["lastProcessedBlock"], "1200");
    }
}
