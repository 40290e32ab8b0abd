//! End-to-end retrieval: build, probe, plan, confirm, fetch, normalize.

use crate::catalog::DatasetCatalog;
use crate::error::{Result, RetrievalError};
use crate::fetcher::{reconcile_page, PagedFetcher};
use crate::gate::{ConfirmationGate, GateState, Prompt};
use crate::normalize::{Normalizer, ResultTable};
use crate::planner::{format_duration, RetrievalPlan};
use crate::probe::CountProbe;
use crate::query::{FilterSpec, QueryBuilder};
use crate::source::PageSource;

/// What to retrieve.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// Dataset name, any casing
    pub dataset: String,
    /// Fields to return; `None` for all
    pub select: Option<Vec<String>>,
    /// Filter predicates
    pub filters: FilterSpec,
    /// Cap on the number of records
    pub top_n: Option<u64>,
    /// Ask before fetching more than one page (default: true)
    pub ask_before_call: bool,
}

impl RetrievalRequest {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            select: None,
            filters: FilterSpec::new(),
            top_n: None,
            ask_before_call: true,
        }
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn filters(mut self, filters: FilterSpec) -> Self {
        self.filters = filters;
        self
    }

    pub fn top_n(mut self, top_n: u64) -> Self {
        self.top_n = Some(top_n);
        self
    }

    pub fn ask_before_call(mut self, ask: bool) -> Self {
        self.ask_before_call = ask;
        self
    }
}

/// Paginated retrieval engine.
///
/// Holds no per-retrieval state: every call to [`Retriever::retrieve`] keeps
/// its descriptor, pages and timers local, so one `Retriever` can serve
/// independent retrievals.
pub struct Retriever<S, C> {
    source: S,
    catalog: C,
    page_size: u32,
}

impl<S: PageSource, C: DatasetCatalog> Retriever<S, C> {
    /// Create a retriever that pages through `source` in pages of `page_size`.
    pub fn new(source: S, catalog: C, page_size: u32) -> Self {
        Self {
            source,
            catalog,
            page_size,
        }
    }

    /// Run one retrieval.
    ///
    /// With `top_n <= page_size` a single page of `top_n` rows is fetched with
    /// no probe and no prompt. Otherwise the total is probed (and capped by
    /// `top_n`), planned, and gated through `prompt` before any data page is
    /// requested. A declined prompt yields [`RetrievalError::Aborted`].
    pub async fn retrieve(
        &self,
        request: &RetrievalRequest,
        prompt: &mut dyn Prompt,
    ) -> Result<ResultTable> {
        let base = QueryBuilder::new(&self.catalog).build(
            &request.dataset,
            request.select.as_deref(),
            &request.filters,
            self.page_size,
            0,
        )?;
        let normalizer = Normalizer::new(
            base.dataset.identifier.clone(),
            self.catalog.known_date_fields(&base.dataset.name),
        );

        tracing::debug!(
            dataset = %base.dataset.name,
            filter = ?base.filter,
            select = ?base.selection.to_odata(),
            top_n = ?request.top_n,
            "Starting retrieval"
        );

        if let Some(top_n) = request.top_n.filter(|n| *n <= u64::from(self.page_size)) {
            if top_n == 0 {
                return Ok(ResultTable::empty());
            }
            let query = base.page(0, top_n as u32);
            let response = self
                .source
                .fetch_page(&query)
                .await
                .map_err(|e| e.at_page(0))?;
            if response.rows.len() as u64 > top_n {
                return Err(RetrievalError::ResultAssembly(format!(
                    "page 0 returned {} rows but only {} were requested",
                    response.rows.len(),
                    top_n
                )));
            }
            prompt.progress(0, 1);
            return normalizer.assemble(vec![reconcile_page(response.rows)]);
        }

        let probe = CountProbe::new(&self.source).probe(&base).await?;
        let total = match request.top_n {
            Some(cap) => probe.total.min(cap),
            None => probe.total,
        };
        let plan = RetrievalPlan::new(
            total,
            self.page_size,
            probe.latency,
            request.ask_before_call,
        );

        tracing::info!(
            dataset = %base.dataset.name,
            records = plan.total_records,
            pages = plan.page_count,
            estimate = %format_duration(plan.estimated_duration),
            "Planned retrieval"
        );

        if plan.is_empty() {
            return Ok(ResultTable::empty());
        }

        let mut gate = ConfirmationGate::new();
        if gate.resolve(&plan, prompt) == GateState::Declined {
            tracing::info!(dataset = %base.dataset.name, "Retrieval declined");
            return Err(RetrievalError::Aborted { plan });
        }

        let pages = PagedFetcher::new(&self.source)
            .fetch(&base, &plan, prompt)
            .await?;
        let table = normalizer.assemble(pages)?;

        tracing::info!(
            dataset = %base.dataset.name,
            rows = table.len(),
            columns = table.columns().len(),
            "Retrieval complete"
        );
        Ok(table)
    }
}
