//! External service clients for the DomaLend off-chain services.
//!
//! Currently a single client: the Doma subgraph, which serves fractional
//! domain token listings and per-name details.

mod subgraph;

pub use subgraph::{
    DomainFeed, NameDetails, SubgraphClient, SubgraphError, TokenSummary, GRAPHQL_TIMEOUT,
    MIN_REQUEST_SPACING,
};
