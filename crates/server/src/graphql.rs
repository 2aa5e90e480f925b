//! GraphQL-compatible POST endpoint.
//!
//! Deliberately not a GraphQL parser: the upstream client surface is known
//! and stable, so queries are recognized by substring against the canonical
//! collection names and the options are scanned out of the query text.
//! Unknown shapes yield an empty `data` object, matching the permissive
//! behavior the subgraph-shaped clients expect.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use regex_lite::Regex;
use serde_json::{json, Value};
use tracing::error;

use domalend_chain::EventKind;
use domalend_core::{EventStore, ListOptions, OrderDirection, OrderField};

use crate::{error_response, AppState};

/// Collections the recognizer answers for.
const QUERY_KINDS: [EventKind; 6] = [
    EventKind::LoanCreated,
    EventKind::LoanAccepted,
    EventKind::LoanRepaid,
    EventKind::LoanLiquidated,
    EventKind::LoanOfferCancelled,
    EventKind::LoanOfferRemoved,
];

/// `POST /graphql` with body `{ query: string, variables?: object }`.
pub async fn graphql(State(state): State<AppState>, body: String) -> Response {
    let parsed: Value = match serde_json::from_str(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                format!("malformed body: {e}"),
            )
        }
    };

    let Some(query) = parsed.get("query").and_then(Value::as_str) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            "body must carry a string `query` field",
        );
    };

    match execute_query(&state.store, query) {
        Ok(data) => Json(json!({ "data": data })).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to serialize query result");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "internal fault",
            )
        }
    }
}

/// Evaluate the recognizer table against a query: every recognized
/// collection name populates its field in `data` from the store.
pub fn execute_query(store: &EventStore, query: &str) -> Result<Value, serde_json::Error> {
    let opts = scan_options(query);
    let mut data = serde_json::Map::new();

    for kind in QUERY_KINDS {
        if query.contains(kind.collection_key()) {
            let records = serde_json::to_value(store.list(kind, &opts))?;
            data.insert(kind.collection_key().to_string(), records);
        }
    }

    if query.contains("protocolStats_collection") || query.contains("protocolStatsCollection") {
        let stats = serde_json::to_value(store.stats())?;
        data.insert("protocolStats_collection".to_string(), json!([stats]));
    }

    Ok(Value::Object(data))
}

/// Scan `first`/`skip`/`orderBy`/`orderDirection` out of the query text.
/// Unparseable or unknown values fall back to the defaults.
fn scan_options(query: &str) -> ListOptions {
    let mut opts = ListOptions::default();

    if let Some(v) = capture(query, r"first\s*:\s*(\d+)") {
        if let Ok(n) = v.parse() {
            opts.first = n;
        }
    }
    if let Some(v) = capture(query, r"skip\s*:\s*(\d+)") {
        if let Ok(n) = v.parse() {
            opts.skip = n;
        }
    }
    if let Some(v) = capture(query, r"orderBy\s*:\s*([A-Za-z_][A-Za-z0-9_]*)") {
        if let Some(field) = OrderField::parse(&v) {
            opts.order_by = field;
        }
    }
    if let Some(v) = capture(query, r"orderDirection\s*:\s*([A-Za-z_][A-Za-z0-9_]*)") {
        if let Some(direction) = OrderDirection::parse(&v) {
            opts.direction = direction;
        }
    }

    opts
}

fn capture(query: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(query)?.get(1).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_options() {
        let query = "{ loanCreateds(first: 5, skip:10, orderBy: blockNumber, orderDirection: asc) { id } }";
        let opts = scan_options(query);
        assert_eq!(opts.first, 5);
        assert_eq!(opts.skip, 10);
        assert_eq!(opts.order_by, OrderField::BlockNumber);
        assert_eq!(opts.direction, OrderDirection::Asc);
    }

    #[test]
    fn test_scan_options_defaults_on_unknown_idents() {
        let query = "{ loanCreateds(orderBy: lender, orderDirection: diagonal) { id } }";
        let opts = scan_options(query);
        assert_eq!(opts.order_by, OrderField::BlockTimestamp);
        assert_eq!(opts.direction, OrderDirection::Desc);
    }

    #[test]
    fn test_unknown_shape_yields_empty_data() {
        let store = EventStore::new();
        let data = execute_query(&store, "{ somethingElse { id } }").unwrap();
        assert_eq!(data, json!({}));
    }

    #[test]
    fn test_stats_alias_recognition() {
        let store = EventStore::new();
        let data = execute_query(&store, "{ protocolStatsCollection { totalLoansCreated } }")
            .unwrap();
        assert!(data.get("protocolStats_collection").is_some());
    }
}
