//! OpenFEMA Client SDK
//!
//! A Rust client for the OpenFEMA open data API that turns a dataset name,
//! an optional field selection and a per-field filter into a single uniform
//! table, paging through the API's 1000-row response limit.
//!
//! # Features
//!
//! - **Query building**: OData `$filter` / `$select` generation with value escaping
//! - **Count probing**: one-row `$inlinecount` request to size a retrieval
//! - **Planning**: page count and a latency-based duration estimate
//! - **Confirmation**: a caller-supplied [`Prompt`] approves large retrievals
//! - **Normalization**: column reconciliation and date coercion across pages
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use openfema_client::{ClientConfig, FilterSpec, OpenFemaClient, RetrievalRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OpenFemaClient::new(ClientConfig::from_env()?)?;
//!
//!     let request = RetrievalRequest::new("FimaNfipClaims")
//!         .select(["countyCode", "yearOfLoss", "amountPaidOnBuildingClaim"])
//!         .filters(
//!             FilterSpec::new()
//!                 .field("countyCode", ["= 01001"])
//!                 .field("yearOfLoss", [">= 2010", "<= 2020"]),
//!         );
//!
//!     // Approve every plan; an interactive caller would ask the user.
//!     let table = client.retrieve(&request, &mut |_: &_| true).await?;
//!     println!("{} rows, columns {:?}", table.len(), table.column_names());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Retrieval flow
//!
//! A `top_n` of at most one page is served by a single request. Anything
//! larger is probed for its total, planned, and (unless `ask_before_call` is
//! off) gated through the prompt before any data page is requested. Pages are
//! fetched sequentially; a failure on any page fails the whole retrieval and
//! no partial table is returned.
//!
//! # Error Handling
//!
//! All operations return `Result<T, RetrievalError>`. Errors include:
//!
//! - `UnknownDataset`: the name is not in the catalog
//! - `InvalidQuery`: a malformed field name or predicate
//! - `TransientNetwork`: connect failures and timeouts
//! - `Upstream`: non-2xx or unusable responses, tagged with the page index
//! - `Aborted`: the prompt declined the plan (not a fault)
//!
//! The client does not retry by default. Set `max_retries` to retry
//! transport failures with exponential backoff.

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod gate;
pub mod normalize;
pub mod planner;
pub mod probe;
pub mod query;
pub mod retrieve;
pub mod source;
pub mod types;

#[cfg(test)]
mod test_utils;

// Re-exports for convenience
pub use catalog::{DatasetCatalog, DatasetEntry, StaticCatalog};
pub use client::OpenFemaClient;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{Result, RetrievalError};
pub use fetcher::{PagedFetcher, ReconciledPage};
pub use gate::{AlwaysConfirm, ConfirmationGate, GateState, NeverConfirm, Prompt};
pub use normalize::{Column, ColumnType, Normalizer, ResultTable, Value};
pub use planner::RetrievalPlan;
pub use probe::{CountProbe, ProbeResult};
pub use query::{FilterSpec, QueryBuilder, QueryDescriptor, Selection};
pub use retrieve::{RetrievalRequest, Retriever};
pub use source::PageSource;
pub use types::{DataSetField, DataSetSummary, PageResponse};
