//! REST read endpoints over the event store.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::error;

use domalend_chain::EventKind;
use domalend_core::{ListOptions, OrderDirection, OrderField};

use crate::{error_response, AppState};

/// REST path segments for the queryable loan kinds. `OracleAddressSet` is
/// projected but not exposed here.
const REST_KINDS: [(&str, EventKind); 6] = [
    ("created", EventKind::LoanCreated),
    ("accepted", EventKind::LoanAccepted),
    ("repaid", EventKind::LoanRepaid),
    ("liquidated", EventKind::LoanLiquidated),
    ("cancelled", EventKind::LoanOfferCancelled),
    ("removed", EventKind::LoanOfferRemoved),
];

fn kind_from_path(segment: &str) -> Option<EventKind> {
    REST_KINDS
        .iter()
        .find(|(name, _)| *name == segment)
        .map(|(_, kind)| *kind)
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let status = state.store.status();
    Json(json!({
        "status": "ok",
        "indexer": {
            "nextBlock": status.next_block,
            "lastProcessedBlock": status.last_processed_block,
            "totalLoansIndexed": status.total_loans_indexed,
            "isIndexing": status.is_indexing,
            "phase": state.indexer.phase().as_str(),
            "consecutivePollFailures": state.indexer.consecutive_poll_failures(),
            "droppedNotices": state.indexer.dropped_notices(),
        },
        "ts": chrono::Utc::now().timestamp(),
    }))
}

/// `GET /api/stats`
pub async fn stats(State(state): State<AppState>) -> Response {
    match serde_json::to_value(state.store.stats()) {
        Ok(stats) => Json(json!({ "protocolStats_collection": [stats] })).into_response(),
        Err(e) => internal_fault(e),
    }
}

/// `GET /api/loans/{kind}?first=&skip=&orderBy=&orderDirection=`
pub async fn loans_by_kind(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(kind) = kind_from_path(&segment) else {
        return error_response(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("unknown loan kind: {segment:?}"),
        );
    };

    let opts = match parse_list_options(&params) {
        Ok(opts) => opts,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, "BAD_REQUEST", message),
    };

    let records = state.store.list(kind, &opts);
    match serde_json::to_value(&records) {
        Ok(records) => {
            let mut body = serde_json::Map::new();
            body.insert(kind.collection_key().to_string(), records);
            Json(Value::Object(body)).into_response()
        }
        Err(e) => internal_fault(e),
    }
}

/// `GET /api/loans/all` — first page of every kind plus the stats.
pub async fn loans_all(State(state): State<AppState>) -> Response {
    let opts = ListOptions::default();
    let mut body = serde_json::Map::new();

    for (_, kind) in REST_KINDS {
        match serde_json::to_value(state.store.list(kind, &opts)) {
            Ok(records) => {
                body.insert(kind.collection_key().to_string(), records);
            }
            Err(e) => return internal_fault(e),
        }
    }
    match serde_json::to_value(state.store.stats()) {
        Ok(stats) => {
            body.insert("protocolStats_collection".to_string(), json!([stats]));
        }
        Err(e) => return internal_fault(e),
    }

    Json(Value::Object(body)).into_response()
}

/// Parse the list query parameters, rejecting anything malformed.
pub(crate) fn parse_list_options(params: &HashMap<String, String>) -> Result<ListOptions, String> {
    let mut opts = ListOptions::default();

    if let Some(v) = params.get("first") {
        opts.first = v.parse().map_err(|_| format!("invalid first: {v:?}"))?;
    }
    if let Some(v) = params.get("skip") {
        opts.skip = v.parse().map_err(|_| format!("invalid skip: {v:?}"))?;
    }
    if let Some(v) = params.get("orderBy") {
        opts.order_by = OrderField::parse(v).ok_or_else(|| {
            format!("invalid orderBy: {v:?} (expected blockNumber, blockTimestamp or timestamp)")
        })?;
    }
    if let Some(v) = params.get("orderDirection") {
        opts.direction = OrderDirection::parse(v)
            .ok_or_else(|| format!("invalid orderDirection: {v:?} (expected asc or desc)"))?;
    }

    Ok(opts)
}

fn internal_fault(e: serde_json::Error) -> Response {
    error!(error = %e, "Failed to serialize response body");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_SERVER_ERROR",
        "internal fault",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_path() {
        assert_eq!(kind_from_path("created"), Some(EventKind::LoanCreated));
        assert_eq!(kind_from_path("removed"), Some(EventKind::LoanOfferRemoved));
        assert_eq!(kind_from_path("oracle"), None);
    }

    #[test]
    fn test_parse_list_options_defaults() {
        let opts = parse_list_options(&HashMap::new()).unwrap();
        assert_eq!(opts.first, 100);
        assert_eq!(opts.skip, 0);
        assert_eq!(opts.order_by, OrderField::BlockTimestamp);
        assert_eq!(opts.direction, OrderDirection::Desc);
    }

    #[test]
    fn test_parse_list_options_rejects_bad_values() {
        let params = HashMap::from([("first".to_string(), "lots".to_string())]);
        assert!(parse_list_options(&params).is_err());

        let params = HashMap::from([("orderBy".to_string(), "lender".to_string())]);
        assert!(parse_list_options(&params).is_err());

        let params = HashMap::from([("orderDirection".to_string(), "sideways".to_string())]);
        assert!(parse_list_options(&params).is_err());
    }
}
