//! DomaLend chain interaction layer.
//!
//! This crate provides:
//! - Contract bindings for the DomaLend lending contract and DomaRank oracle
//! - Typed event records and raw-log decoding
//! - An HTTP chain client for head/log/timestamp/balance reads
//! - Signed oracle-update submission with nonce management

mod contracts;
mod events;
mod provider;
mod submitter;

pub use contracts::{event_signatures, IDomaLend, IDomaRankOracle};
pub use events::{
    decode_log, event_id, DecodeError, EventKind, EventMeta, EventRecord, LoanAcceptedEvent,
    LoanCreatedEvent, LoanLiquidatedEvent, LoanOfferCancelledEvent, LoanOfferRemovedEvent,
    LoanRepaidEvent, OracleAddressSetEvent,
};
pub use provider::{ChainClient, ChainError, ChainReader, RPC_TIMEOUT};
pub use submitter::{
    NonceManager, OracleGateway, OracleSubmitter, SubmitError, UpdateReceipt, RECEIPT_TIMEOUT,
};
