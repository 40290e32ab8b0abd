//! Sequential page loop with per-page row reconciliation.
//!
//! The API omits null-valued fields instead of sending explicit nulls, so rows
//! of one page can have different key sets. Each page is padded to the keys
//! it locally observed before it is handed on; the cross-page column union is
//! the normalizer's job.

use crate::error::{Result, RetrievalError};
use crate::gate::Prompt;
use crate::planner::{format_duration, RetrievalPlan};
use crate::query::QueryDescriptor;
use crate::source::PageSource;
use crate::types::RawPage;
use std::time::Instant;

/// A page whose rows all share the same column list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciledPage {
    /// Keys seen in this page, in first-seen order
    pub columns: Vec<String>,
    /// One cell per column; `Null` where the row omitted the key
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl ReconciledPage {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Pad every row of `page` to the page's local key set.
pub fn reconcile_page(page: RawPage) -> ReconciledPage {
    let mut columns: Vec<String> = Vec::new();
    for row in &page {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }

    let rows = page
        .into_iter()
        .map(|mut row| {
            columns
                .iter()
                .map(|c| row.remove(c).unwrap_or(serde_json::Value::Null))
                .collect()
        })
        .collect();

    ReconciledPage { columns, rows }
}

/// Runs the page sequence for a confirmed plan.
pub struct PagedFetcher<'a, S: PageSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: PageSource + ?Sized> PagedFetcher<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Fetch every page of `plan`, one request at a time.
    ///
    /// Any failure aborts the whole sequence; pages fetched so far are
    /// dropped. The first page is timed and, when more than one page follows,
    /// a refined estimate for the rest is reported through `prompt`.
    pub async fn fetch(
        &self,
        base: &QueryDescriptor,
        plan: &RetrievalPlan,
        prompt: &mut dyn Prompt,
    ) -> Result<Vec<ReconciledPage>> {
        let mut pages = Vec::with_capacity(plan.page_count as usize);
        let mut short_page: Option<u64> = None;

        for index in 0..plan.page_count {
            let top = plan.rows_for_page(index);
            let query = base.page(index, top);

            let started = Instant::now();
            let response = self
                .source
                .fetch_page(&query)
                .await
                .map_err(|e| e.at_page(index))?;
            let latency = started.elapsed();

            let received = response.rows.len() as u64;
            if received > u64::from(query.top) {
                return Err(RetrievalError::ResultAssembly(format!(
                    "page {} returned {} rows but only {} were requested",
                    index, received, query.top
                )));
            }
            if let Some(short) = short_page.filter(|_| received > 0) {
                return Err(RetrievalError::ResultAssembly(format!(
                    "page {} was truncated but page {} still returned {} rows",
                    short, index, received
                )));
            }
            if received < u64::from(query.top) && short_page.is_none() {
                tracing::debug!(
                    page = index,
                    received,
                    requested = query.top,
                    "Short page"
                );
                short_page = Some(index);
            }

            tracing::debug!(
                page = index,
                pages = plan.page_count,
                offset = query.offset,
                rows = received,
                latency_ms = %latency.as_millis(),
                "Fetched page"
            );

            if index == 0 {
                if let Some(rest) = plan.remaining_after_first(latency) {
                    tracing::info!(
                        remaining_pages = rest.page_count,
                        estimate = %format_duration(rest.estimated_duration),
                        "Best-effort estimate for remaining pages under current network conditions"
                    );
                    prompt.estimate(&rest);
                }
            }

            pages.push(reconcile_page(response.rows));
            prompt.progress(index, plan.page_count);
        }

        Ok(pages)
    }
}
