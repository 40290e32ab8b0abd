//! In-memory page source for unit tests.

use crate::error::{Result, RetrievalError};
use crate::query::QueryDescriptor;
use crate::source::PageSource;
use crate::types::{PageResponse, RawRow};
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Serves rows out of a fixed in-memory dataset, honouring `$top`/`$skip`,
/// with optional injected failures by call number.
pub(crate) struct ScriptedSource {
    rows: Vec<RawRow>,
    calls: Mutex<Vec<QueryDescriptor>>,
    failures: Mutex<VecDeque<(usize, RetrievalError)>>,
    overrides: Mutex<VecDeque<(usize, PageResponse)>>,
}

impl ScriptedSource {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self {
            rows,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            overrides: Mutex::new(VecDeque::new()),
        }
    }

    /// `count` rows of `{"id": "row-N", "n": N}`.
    pub fn numbered(count: usize) -> Self {
        let rows = (0..count)
            .map(|n| row(json!({"id": format!("row-{}", n), "n": n})))
            .collect();
        Self::new(rows)
    }

    /// Fail the `call`-th request (zero-based, counting the probe).
    pub fn fail_on(self, call: usize, error: RetrievalError) -> Self {
        self.failures.lock().unwrap().push_back((call, error));
        self
    }

    /// Answer the `call`-th request with a canned response.
    pub fn respond_on(self, call: usize, response: PageResponse) -> Self {
        self.overrides.lock().unwrap().push_back((call, response));
        self
    }

    pub fn calls(&self) -> Vec<QueryDescriptor> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch_page(&self, query: &QueryDescriptor) -> Result<PageResponse> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(query.clone());
            calls.len() - 1
        };

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(pos) = failures.iter().position(|(c, _)| *c == call) {
                let (_, error) = failures.remove(pos).unwrap();
                return Err(error);
            }
        }
        {
            let mut overrides = self.overrides.lock().unwrap();
            if let Some(pos) = overrides.iter().position(|(c, _)| *c == call) {
                let (_, response) = overrides.remove(pos).unwrap();
                return Ok(response);
            }
        }

        let rows = self
            .rows
            .iter()
            .skip(query.offset as usize)
            .take(query.top as usize)
            .cloned()
            .collect();

        Ok(PageResponse {
            rows,
            count: Some(self.rows.len() as u64),
        })
    }
}

/// Turn a `json!({...})` object into a row.
pub(crate) fn row(value: serde_json::Value) -> RawRow {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("row fixture must be an object, got {}", other),
    }
}

pub(crate) fn upstream(status: u16, message: &str) -> RetrievalError {
    RetrievalError::Upstream {
        status,
        message: message.to_string(),
        page: None,
        retry_after: None,
    }
}
