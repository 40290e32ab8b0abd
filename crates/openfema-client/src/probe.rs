//! Total-count probe.

use crate::error::{Result, RetrievalError};
use crate::query::QueryDescriptor;
use crate::source::PageSource;
use std::time::{Duration, Instant};

/// Outcome of a count probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// Records matching the query
    pub total: u64,
    /// Round-trip time of the probe call
    pub latency: Duration,
}

/// Reads the number of matching records without fetching the data.
pub struct CountProbe<'a, S: PageSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: PageSource + ?Sized> CountProbe<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Issue a one-row, identifier-only call and read `metadata.count`.
    pub async fn probe(&self, descriptor: &QueryDescriptor) -> Result<ProbeResult> {
        let query = descriptor.probe();
        let start = Instant::now();
        let response = self.source.fetch_page(&query).await?;
        let latency = start.elapsed();

        let total = response.count.ok_or_else(|| RetrievalError::Upstream {
            status: 200,
            message: "response metadata has no record count".to_string(),
            page: None,
            retry_after: None,
        })?;

        tracing::debug!(
            dataset = %descriptor.dataset.name,
            total,
            latency_ms = %latency.as_millis(),
            "Count probe complete"
        );

        Ok(ProbeResult { total, latency })
    }
}
