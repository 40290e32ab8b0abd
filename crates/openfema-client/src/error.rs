//! Error types for the OpenFEMA retrieval client.

use crate::planner::RetrievalPlan;
use std::time::Duration;

/// Errors that can occur while planning or running a retrieval.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The dataset name has no case-insensitive match in the catalog.
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    /// A field name, predicate or selection could not be turned into a query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connectivity failure or timeout. Safe to retry the whole retrieval.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// Non-2xx status (or an unusable 2xx body) from the probe or a page.
    #[error("Upstream error ({status}){}: {message}", page_suffix(.page))]
    Upstream {
        /// HTTP status code
        status: u16,
        /// Error message from the server, or the status text
        message: String,
        /// Zero-based page index when the failure happened mid-sequence
        page: Option<u64>,
        /// Optional retry-after duration from the server
        retry_after: Option<Duration>,
    },

    /// The caller declined the confirmation prompt.
    #[error(
        "Retrieval aborted: {} records over {} calls were declined",
        .plan.total_records,
        .plan.page_count
    )]
    Aborted {
        /// The plan that was presented and declined
        plan: RetrievalPlan,
    },

    /// Pages did not line up with the page-size contract.
    #[error("Result assembly error: {0}")]
    ResultAssembly(String),
}

fn page_suffix(page: &Option<u64>) -> String {
    match page {
        Some(index) => format!(" on page {}", index),
        None => String::new(),
    }
}

impl RetrievalError {
    /// Returns true if re-running the whole retrieval may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RetrievalError::TransientNetwork(_) => true,
            RetrievalError::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns false for a user-initiated cancellation, true for everything else.
    pub fn is_fault(&self) -> bool {
        !matches!(self, RetrievalError::Aborted { .. })
    }

    /// Attach a page index to an upstream error.
    pub(crate) fn at_page(self, index: u64) -> Self {
        match self {
            RetrievalError::Upstream {
                status,
                message,
                retry_after,
                ..
            } => RetrievalError::Upstream {
                status,
                message,
                page: Some(index),
                retry_after,
            },
            other => other,
        }
    }
}

impl From<reqwest::Error> for RetrievalError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => RetrievalError::Upstream {
                status: status.as_u16(),
                message: err.to_string(),
                page: None,
                retry_after: None,
            },
            None => RetrievalError::TransientNetwork(err.to_string()),
        }
    }
}

impl From<reqwest_middleware::Error> for RetrievalError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(inner) => inner.into(),
            reqwest_middleware::Error::Middleware(inner) => {
                RetrievalError::TransientNetwork(inner.to_string())
            }
        }
    }
}

/// Result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;
