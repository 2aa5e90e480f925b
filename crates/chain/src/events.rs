//! Typed projections of DomaLend contract events.
//!
//! Every record shares a synthetic identity `id = "<txHash>-<logIndex>"` plus
//! block metadata. Integer amounts are serialized as lossless decimal strings
//! (they exceed 64-bit range) and addresses as lowercase hex, matching the
//! subgraph shape the HTTP surface mimics.

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use serde::Serialize;
use thiserror::Error;

use crate::contracts::{event_signatures, IDomaLend};

/// The seven projected event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LoanCreated,
    LoanAccepted,
    LoanRepaid,
    LoanLiquidated,
    LoanOfferCancelled,
    LoanOfferRemoved,
    OracleAddressSet,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::LoanCreated,
        EventKind::LoanAccepted,
        EventKind::LoanRepaid,
        EventKind::LoanLiquidated,
        EventKind::LoanOfferCancelled,
        EventKind::LoanOfferRemoved,
        EventKind::OracleAddressSet,
    ];

    /// Solidity event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LoanCreated => "LoanCreated",
            Self::LoanAccepted => "LoanAccepted",
            Self::LoanRepaid => "LoanRepaid",
            Self::LoanLiquidated => "LoanLiquidated",
            Self::LoanOfferCancelled => "LoanOfferCancelled",
            Self::LoanOfferRemoved => "LoanOfferRemoved",
            Self::OracleAddressSet => "OracleAddressSet",
        }
    }

    /// topic0 used for log filtering.
    pub fn topic0(&self) -> B256 {
        match self {
            Self::LoanCreated => event_signatures::LOAN_CREATED,
            Self::LoanAccepted => event_signatures::LOAN_ACCEPTED,
            Self::LoanRepaid => event_signatures::LOAN_REPAID,
            Self::LoanLiquidated => event_signatures::LOAN_LIQUIDATED,
            Self::LoanOfferCancelled => event_signatures::LOAN_OFFER_CANCELLED,
            Self::LoanOfferRemoved => event_signatures::LOAN_OFFER_REMOVED,
            Self::OracleAddressSet => event_signatures::ORACLE_ADDRESS_SET,
        }
    }

    /// Plural collection key used by the subgraph-shaped responses.
    pub fn collection_key(&self) -> &'static str {
        match self {
            Self::LoanCreated => "loanCreateds",
            Self::LoanAccepted => "loanAccepteds",
            Self::LoanRepaid => "loanRepaids",
            Self::LoanLiquidated => "loanLiquidateds",
            Self::LoanOfferCancelled => "loanOfferCancelleds",
            Self::LoanOfferRemoved => "loanOfferRemoveds",
            Self::OracleAddressSet => "oracleAddressSets",
        }
    }
}

/// Synthetic record identity: `"<txHash>-<logIndex>"`, lowercase hex.
pub fn event_id(transaction_hash: B256, log_index: u64) -> String {
    format!("0x{}-{}", hex::encode(transaction_hash), log_index)
}

/// Fields shared by every record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub id: String,
    #[serde(serialize_with = "ser::u64_string")]
    pub block_number: u64,
    #[serde(serialize_with = "ser::u64_string")]
    pub block_timestamp: u64,
    #[serde(serialize_with = "ser::b256_hex")]
    pub transaction_hash: B256,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanCreatedEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(serialize_with = "ser::u256_string")]
    pub loan_id: U256,
    #[serde(serialize_with = "ser::address_lower")]
    pub lender: Address,
    #[serde(serialize_with = "ser::address_lower")]
    pub token_address: Address,
    #[serde(serialize_with = "ser::u256_string")]
    pub amount: U256,
    #[serde(serialize_with = "ser::u256_string")]
    pub interest_rate: U256,
    #[serde(serialize_with = "ser::u256_string")]
    pub duration: U256,
    #[serde(serialize_with = "ser::address_lower")]
    pub collateral_address: Address,
    #[serde(serialize_with = "ser::u256_string")]
    pub collateral_amount: U256,
    #[serde(rename = "minCollateralRatioBPS", serialize_with = "ser::u256_string")]
    pub min_collateral_ratio_bps: U256,
    #[serde(rename = "liquidationThresholdBPS", serialize_with = "ser::u256_string")]
    pub liquidation_threshold_bps: U256,
    #[serde(serialize_with = "ser::u256_string")]
    pub max_price_staleness: U256,
    /// Reserved for a later USD enrichment pass; defaults to "0".
    #[serde(rename = "priceUSD")]
    pub price_usd: String,
    /// Reserved for a later USD enrichment pass; defaults to "0".
    #[serde(rename = "amountUSD")]
    pub amount_usd: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanAcceptedEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(serialize_with = "ser::u256_string")]
    pub loan_id: U256,
    #[serde(serialize_with = "ser::address_lower")]
    pub borrower: Address,
    #[serde(serialize_with = "ser::u64_string")]
    pub timestamp: u64,
    #[serde(serialize_with = "ser::opt_u256_string")]
    pub initial_collateral_ratio: Option<U256>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanRepaidEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(serialize_with = "ser::u256_string")]
    pub loan_id: U256,
    #[serde(serialize_with = "ser::address_lower")]
    pub borrower: Address,
    #[serde(serialize_with = "ser::u256_string")]
    pub repayment_amount: U256,
    #[serde(serialize_with = "ser::u64_string")]
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanLiquidatedEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(serialize_with = "ser::u256_string")]
    pub loan_id: U256,
    #[serde(serialize_with = "ser::address_lower")]
    pub liquidator: Address,
    #[serde(serialize_with = "ser::u256_string")]
    pub collateral_claimed_by_lender: U256,
    #[serde(serialize_with = "ser::u256_string")]
    pub liquidator_reward: U256,
    #[serde(serialize_with = "ser::u64_string")]
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanOfferCancelledEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(serialize_with = "ser::u256_string")]
    pub loan_id: U256,
    #[serde(serialize_with = "ser::address_lower")]
    pub lender: Address,
    #[serde(serialize_with = "ser::u64_string")]
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanOfferRemovedEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(serialize_with = "ser::u256_string")]
    pub loan_id: U256,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleAddressSetEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(serialize_with = "ser::address_lower")]
    pub new_oracle_address: Address,
}

/// A projected event record of any kind.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventRecord {
    LoanCreated(LoanCreatedEvent),
    LoanAccepted(LoanAcceptedEvent),
    LoanRepaid(LoanRepaidEvent),
    LoanLiquidated(LoanLiquidatedEvent),
    LoanOfferCancelled(LoanOfferCancelledEvent),
    LoanOfferRemoved(LoanOfferRemovedEvent),
    OracleAddressSet(OracleAddressSetEvent),
}

impl EventRecord {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::LoanCreated(_) => EventKind::LoanCreated,
            Self::LoanAccepted(_) => EventKind::LoanAccepted,
            Self::LoanRepaid(_) => EventKind::LoanRepaid,
            Self::LoanLiquidated(_) => EventKind::LoanLiquidated,
            Self::LoanOfferCancelled(_) => EventKind::LoanOfferCancelled,
            Self::LoanOfferRemoved(_) => EventKind::LoanOfferRemoved,
            Self::OracleAddressSet(_) => EventKind::OracleAddressSet,
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::LoanCreated(e) => &e.meta,
            Self::LoanAccepted(e) => &e.meta,
            Self::LoanRepaid(e) => &e.meta,
            Self::LoanLiquidated(e) => &e.meta,
            Self::LoanOfferCancelled(e) => &e.meta,
            Self::LoanOfferRemoved(e) => &e.meta,
            Self::OracleAddressSet(e) => &e.meta,
        }
    }

    /// The explicit `timestamp` field, for kinds that carry one.
    pub fn event_timestamp(&self) -> Option<u64> {
        match self {
            Self::LoanAccepted(e) => Some(e.timestamp),
            Self::LoanRepaid(e) => Some(e.timestamp),
            Self::LoanLiquidated(e) => Some(e.timestamp),
            Self::LoanOfferCancelled(e) => Some(e.timestamp),
            _ => None,
        }
    }

    pub fn as_loan_created(&self) -> Option<&LoanCreatedEvent> {
        match self {
            Self::LoanCreated(e) => Some(e),
            _ => None,
        }
    }
}

/// Log decoding failure. A single bad record is dropped by the caller; it
/// never poisons the batch.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("topic0 mismatch: expected {expected}, got {got}")]
    TopicMismatch { expected: B256, got: B256 },
    #[error("abi decode failed: {0}")]
    Abi(#[from] alloy::sol_types::Error),
}

/// Decode a raw log into the record for `kind`.
///
/// The log's topic0 and payload must match the declared ABI exactly; field
/// drift surfaces as `DecodeError`, never as silent coercion. The block
/// timestamp is resolved by the caller (cached per block number).
pub fn decode_log(kind: EventKind, log: &Log, block_timestamp: u64) -> Result<EventRecord, DecodeError> {
    let topic0 = log.topic0().copied().ok_or(DecodeError::MissingField("topics"))?;
    if topic0 != kind.topic0() {
        return Err(DecodeError::TopicMismatch {
            expected: kind.topic0(),
            got: topic0,
        });
    }

    let transaction_hash = log
        .transaction_hash
        .ok_or(DecodeError::MissingField("transactionHash"))?;
    let log_index = log.log_index.ok_or(DecodeError::MissingField("logIndex"))?;
    let block_number = log.block_number.ok_or(DecodeError::MissingField("blockNumber"))?;

    let meta = EventMeta {
        id: event_id(transaction_hash, log_index),
        block_number,
        block_timestamp,
        transaction_hash,
    };

    let record = match kind {
        EventKind::LoanCreated => {
            let ev = IDomaLend::LoanCreated::decode_log(&log.inner, true)?.data;
            EventRecord::LoanCreated(LoanCreatedEvent {
                meta,
                loan_id: ev.loanId,
                lender: ev.lender,
                token_address: ev.tokenAddress,
                amount: ev.amount,
                interest_rate: ev.interestRate,
                duration: ev.duration,
                collateral_address: ev.collateralAddress,
                collateral_amount: ev.collateralAmount,
                min_collateral_ratio_bps: ev.minCollateralRatioBPS,
                liquidation_threshold_bps: ev.liquidationThresholdBPS,
                max_price_staleness: ev.maxPriceStaleness,
                price_usd: "0".to_string(),
                amount_usd: "0".to_string(),
            })
        }
        EventKind::LoanAccepted => {
            let ev = IDomaLend::LoanAccepted::decode_log(&log.inner, true)?.data;
            EventRecord::LoanAccepted(LoanAcceptedEvent {
                meta,
                loan_id: ev.loanId,
                borrower: ev.borrower,
                timestamp: block_timestamp,
                initial_collateral_ratio: Some(ev.initialCollateralRatio),
            })
        }
        EventKind::LoanRepaid => {
            let ev = IDomaLend::LoanRepaid::decode_log(&log.inner, true)?.data;
            EventRecord::LoanRepaid(LoanRepaidEvent {
                meta,
                loan_id: ev.loanId,
                borrower: ev.borrower,
                repayment_amount: ev.repaymentAmount,
                timestamp: block_timestamp,
            })
        }
        EventKind::LoanLiquidated => {
            let ev = IDomaLend::LoanLiquidated::decode_log(&log.inner, true)?.data;
            EventRecord::LoanLiquidated(LoanLiquidatedEvent {
                meta,
                loan_id: ev.loanId,
                liquidator: ev.liquidator,
                collateral_claimed_by_lender: ev.collateralClaimedByLender,
                liquidator_reward: ev.liquidatorReward,
                timestamp: block_timestamp,
            })
        }
        EventKind::LoanOfferCancelled => {
            let ev = IDomaLend::LoanOfferCancelled::decode_log(&log.inner, true)?.data;
            EventRecord::LoanOfferCancelled(LoanOfferCancelledEvent {
                meta,
                loan_id: ev.loanId,
                lender: ev.lender,
                timestamp: block_timestamp,
            })
        }
        EventKind::LoanOfferRemoved => {
            let ev = IDomaLend::LoanOfferRemoved::decode_log(&log.inner, true)?.data;
            EventRecord::LoanOfferRemoved(LoanOfferRemovedEvent {
                meta,
                loan_id: ev.loanId,
                reason: ev.reason,
            })
        }
        EventKind::OracleAddressSet => {
            let ev = IDomaLend::OracleAddressSet::decode_log(&log.inner, true)?.data;
            EventRecord::OracleAddressSet(OracleAddressSetEvent {
                meta,
                new_oracle_address: ev.newOracleAddress,
            })
        }
    };

    Ok(record)
}

/// Serialization helpers for the subgraph-shaped JSON encoding.
mod ser {
    use alloy::primitives::{Address, B256, U256};
    use serde::Serializer;

    pub fn u64_string<S: Serializer>(v: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn u256_string<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn opt_u256_string<S: Serializer>(v: &Option<U256>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(v) => s.serialize_str(&v.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn address_lower<S: Serializer>(v: &Address, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(v.as_slice())))
    }

    pub fn b256_hex<S: Serializer>(v: &B256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(v.as_slice())))
    }
}
