//! Doma subgraph client for fractional domain token metadata.

use std::time::{Duration, Instant};

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Budget for a single GraphQL call.
pub const GRAPHQL_TIMEOUT: Duration = Duration::from_secs(20);

/// Minimum spacing between outgoing requests, per upstream rate limits.
pub const MIN_REQUEST_SPACING: Duration = Duration::from_millis(100);

/// Page size for the token listing.
const PAGE_SIZE: u64 = 100;

/// Subgraph access failure.
#[derive(Debug, Error)]
pub enum SubgraphError {
    #[error("subgraph API key is not configured")]
    MissingApiKey,
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("subgraph returned HTTP {0}")]
    Status(u16),
    #[error("subgraph errors: {0}")]
    Upstream(String),
    #[error("malformed subgraph response: {0}")]
    Malformed(String),
    #[error("domain name not indexed: {0}")]
    NameNotFound(String),
}

/// One fractional domain token from the bulk listing.
#[derive(Debug, Clone)]
pub struct TokenSummary {
    pub address: Address,
    pub name: String,
    /// Unix seconds at which the domain was fractionalized.
    pub fractionalized_at: u64,
    /// Live market price in the upstream's fixed 8-decimal format, carried
    /// as a decimal string.
    pub current_price_raw: String,
    pub total_supply: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Per-name details used by the valuation pipeline.
#[derive(Debug, Clone)]
pub struct NameDetails {
    /// Unix seconds at which the domain registration expires.
    pub expires_at: u64,
    pub active_offers_count: u64,
    /// Highest open offer, 8-decimal fixed point, when any offer exists.
    pub highest_offer_price_raw: Option<String>,
    pub fractional_token_address: Option<Address>,
}

/// Listing and per-name reads the broadcaster needs. A trait seam so
/// valuation cycles can run against a scripted feed in tests.
#[async_trait]
pub trait DomainFeed: Send + Sync {
    async fn list_fractional_tokens(&self) -> Result<Vec<TokenSummary>, SubgraphError>;

    async fn name_details(&self, domain_name: &str) -> Result<NameDetails, SubgraphError>;
}

const FRACTIONAL_TOKENS_QUERY: &str = r#"
query FractionalTokens($skip: Int!, $take: Int!) {
  fractionalTokens(skip: $skip, take: $take) {
    items {
      address
      name
      fractionalizedAt
      currentPrice
      totalSupply
      params { symbol decimals }
    }
    totalCount
  }
}"#;

const NAME_DETAILS_QUERY: &str = r#"
query NameDetails($name: String!) {
  name(name: $name) {
    expiresAt
    activeOffersCount
    highestOffer { price }
    tokens { address }
  }
}"#;

/// Authenticated GraphQL client for the Doma subgraph.
///
/// One reused HTTP client; every request carries the opaque `API-KEY` header
/// and outgoing calls are spaced at least 100 ms apart.
#[derive(Debug)]
pub struct SubgraphClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    last_call: tokio::sync::Mutex<Option<Instant>>,
}

impl SubgraphClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, SubgraphError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(SubgraphError::MissingApiKey);
        }

        let http = reqwest::Client::builder()
            .timeout(GRAPHQL_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
            api_key,
            last_call: tokio::sync::Mutex::new(None),
        })
    }

    /// Sleep long enough that consecutive requests stay ≥100 ms apart.
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < MIN_REQUEST_SPACING {
                tokio::time::sleep(MIN_REQUEST_SPACING - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn post<T: DeserializeOwned>(
        &self,
        query: &'static str,
        variables: serde_json::Value,
    ) -> Result<T, SubgraphError> {
        self.pace().await;

        let response = self
            .http
            .post(&self.url)
            .header("API-KEY", &self.api_key)
            .json(&serde_json::json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SubgraphError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        parse_envelope(&body)
    }
}

#[async_trait]
impl DomainFeed for SubgraphClient {
    /// Page through the remote collection until a short page.
    #[instrument(skip(self))]
    async fn list_fractional_tokens(&self) -> Result<Vec<TokenSummary>, SubgraphError> {
        let mut tokens = Vec::new();
        let mut skip = 0u64;
        let mut malformed = 0usize;

        loop {
            let data: TokensData = self
                .post(
                    FRACTIONAL_TOKENS_QUERY,
                    serde_json::json!({ "skip": skip, "take": PAGE_SIZE }),
                )
                .await?;

            let page = data.fractional_tokens;
            let fetched = page.items.len();

            for item in page.items {
                match item.into_summary() {
                    Ok(summary) => tokens.push(summary),
                    Err(e) => {
                        malformed += 1;
                        warn!(error = %e, "Skipping malformed token item");
                    }
                }
            }

            debug!(
                skip = skip,
                fetched = fetched,
                total_so_far = tokens.len(),
                "Fetched fractional token page"
            );

            skip += fetched as u64;
            if fetched < PAGE_SIZE as usize || skip >= page.total_count {
                break;
            }
        }

        info!(
            count = tokens.len(),
            malformed = malformed,
            "Fetched fractional tokens"
        );
        Ok(tokens)
    }

    #[instrument(skip(self))]
    async fn name_details(&self, domain_name: &str) -> Result<NameDetails, SubgraphError> {
        let data: NameData = self
            .post(NAME_DETAILS_QUERY, serde_json::json!({ "name": domain_name }))
            .await?;

        let item = data
            .name
            .ok_or_else(|| SubgraphError::NameNotFound(domain_name.to_string()))?;

        let fractional_token_address = item
            .tokens
            .first()
            .and_then(|t| t.address.parse::<Address>().ok());

        Ok(NameDetails {
            expires_at: item.expires_at,
            active_offers_count: item.active_offers_count,
            highest_offer_price_raw: item.highest_offer.map(|o| o.price),
            fractional_token_address,
        })
    }
}

/// Parse a GraphQL response body, propagating `errors[]` as a typed failure
/// rather than returning partial data.
fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<T, SubgraphError> {
    let envelope: GraphQlResponse<T> =
        serde_json::from_str(body).map_err(|e| SubgraphError::Malformed(e.to_string()))?;

    if !envelope.errors.is_empty() {
        let messages = envelope
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(SubgraphError::Upstream(messages));
    }

    envelope
        .data
        .ok_or_else(|| SubgraphError::Malformed("response carried neither data nor errors".into()))
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct TokensData {
    #[serde(rename = "fractionalTokens")]
    fractional_tokens: TokensPage,
}

#[derive(Debug, Deserialize)]
struct TokensPage {
    items: Vec<TokenItem>,
    #[serde(rename = "totalCount")]
    total_count: u64,
}

#[derive(Debug, Deserialize)]
struct TokenItem {
    address: String,
    name: String,
    #[serde(rename = "fractionalizedAt", deserialize_with = "de_timestamp")]
    fractionalized_at: u64,
    #[serde(rename = "currentPrice", deserialize_with = "de_decimal_string")]
    current_price: String,
    #[serde(rename = "totalSupply", deserialize_with = "de_decimal_string")]
    total_supply: String,
    params: TokenParams,
}

impl TokenItem {
    fn into_summary(self) -> Result<TokenSummary, String> {
        let address = self
            .address
            .parse::<Address>()
            .map_err(|e| format!("bad address {:?}: {}", self.address, e))?;

        Ok(TokenSummary {
            address,
            name: self.name,
            fractionalized_at: self.fractionalized_at,
            current_price_raw: self.current_price,
            total_supply: self.total_supply,
            symbol: self.params.symbol,
            decimals: self.params.decimals,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenParams {
    symbol: String,
    decimals: u8,
}

#[derive(Debug, Deserialize)]
struct NameData {
    name: Option<NameItem>,
}

#[derive(Debug, Deserialize)]
struct NameItem {
    #[serde(rename = "expiresAt", deserialize_with = "de_timestamp")]
    expires_at: u64,
    #[serde(rename = "activeOffersCount", default)]
    active_offers_count: u64,
    #[serde(rename = "highestOffer", default)]
    highest_offer: Option<Offer>,
    #[serde(default)]
    tokens: Vec<NameToken>,
}

#[derive(Debug, Deserialize)]
struct Offer {
    #[serde(deserialize_with = "de_decimal_string")]
    price: String,
}

#[derive(Debug, Deserialize)]
struct NameToken {
    address: String,
}

// Custom deserializers

/// Unix seconds from an integer, a numeric string, or an RFC 3339 date.
fn de_timestamp<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => Ok(n),
        Repr::Text(s) => {
            if let Ok(n) = s.parse::<u64>() {
                return Ok(n);
            }
            chrono::DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.timestamp().max(0) as u64)
                .map_err(serde::de::Error::custom)
        }
    }
}

/// Lossless decimal string from either a JSON string or a JSON number.
fn de_decimal_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(serde_json::Number),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Text(s) => Ok(s),
        Repr::Number(n) => Ok(n.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_is_rejected() {
        let err = SubgraphClient::new("https://api.doma.xyz/graphql", "").unwrap_err();
        assert!(matches!(err, SubgraphError::MissingApiKey));
    }

    #[test]
    fn test_parse_token_page() {
        // Shape as served by the upstream token listing
        let body = r#"{
            "data": {
                "fractionalTokens": {
                    "items": [
                        {
                            "address": "0xf2ddA6d4c4bbE5B8499cC2f1C9E9cB28Ab9Df51f",
                            "name": "crypto.io",
                            "fractionalizedAt": "2024-02-20T12:00:00Z",
                            "currentPrice": "1000000000000",
                            "totalSupply": "1000000000000000000000000",
                            "params": { "symbol": "CRYPTIO", "decimals": 18 }
                        }
                    ],
                    "totalCount": 1
                }
            }
        }"#;

        let data: TokensData = parse_envelope(body).unwrap();
        let page = data.fractional_tokens;
        assert_eq!(page.total_count, 1);

        let summary = page.items.into_iter().next().unwrap().into_summary().unwrap();
        assert_eq!(summary.name, "crypto.io");
        assert_eq!(summary.current_price_raw, "1000000000000");
        assert_eq!(summary.fractionalized_at, 1_708_430_400);
        assert_eq!(summary.decimals, 18);
    }

    #[test]
    fn test_parse_name_details_without_offers() {
        let body = r#"{
            "data": {
                "name": {
                    "expiresAt": 1893456000,
                    "activeOffersCount": 0,
                    "highestOffer": null,
                    "tokens": [{ "address": "0xf2ddA6d4c4bbE5B8499cC2f1C9E9cB28Ab9Df51f" }]
                }
            }
        }"#;

        let data: NameData = parse_envelope(body).unwrap();
        let item = data.name.unwrap();
        assert_eq!(item.expires_at, 1_893_456_000);
        assert_eq!(item.active_offers_count, 0);
        assert!(item.highest_offer.is_none());
    }

    #[test]
    fn test_graphql_errors_become_typed_failures() {
        let body = r#"{
            "data": null,
            "errors": [
                { "message": "API key missing" },
                { "message": "rate limited" }
            ]
        }"#;

        let err = parse_envelope::<TokensData>(body).unwrap_err();
        match err {
            SubgraphError::Upstream(msg) => {
                assert!(msg.contains("API key missing"));
                assert!(msg.contains("rate limited"));
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_pacing() {
        let client =
            SubgraphClient::new("https://api.doma.xyz/graphql", "test-key").unwrap();

        let start = Instant::now();
        client.pace().await;
        client.pace().await;
        client.pace().await;

        // Second and third calls each wait out the spacing floor.
        assert!(start.elapsed() >= MIN_REQUEST_SPACING * 2);
    }
}
