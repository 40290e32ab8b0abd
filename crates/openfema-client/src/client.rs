//! HTTP transport for the OpenFEMA API.

use crate::catalog::{DatasetCatalog, StaticCatalog};
use crate::config::ClientConfig;
use crate::error::{Result, RetrievalError};
use crate::gate::Prompt;
use crate::normalize::ResultTable;
use crate::query::{escape_value, QueryDescriptor};
use crate::retrieve::{RetrievalRequest, Retriever};
use crate::source::PageSource;
use crate::types::{
    api_error_message, DataSetField, DataSetFieldsResponse, DataSetSummary, DataSetsResponse,
    PageResponse,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{
    policies::ExponentialBackoff, RetryTransientMiddleware, Retryable, RetryableStrategy,
};
use std::time::{Duration, Instant};

/// OpenFEMA HTTP client.
///
/// Implements [`PageSource`] so it can drive a [`Retriever`], and exposes the
/// single-shot metadata endpoints (`DataSets`, `DataSetFields`).
pub struct OpenFemaClient {
    http: ClientWithMiddleware,
    config: ClientConfig,
}

impl OpenFemaClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static("openfema-client")),
        );

        let reqwest_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.tls_verify)
            .build()
            .map_err(|e| RetrievalError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(config.retry_initial_delay, config.retry_max_delay)
            .build_with_max_retries(config.max_retries);

        let http = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                retry_policy,
                TransportOnlyRetryStrategy,
            ))
            .build();

        Ok(Self { http, config })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Rows per page call.
    pub fn page_size(&self) -> u32 {
        self.config.page_size
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Retrieval engine over this client and `catalog`.
    pub fn retriever<C: DatasetCatalog>(&self, catalog: C) -> Retriever<&Self, C> {
        Retriever::new(self, catalog, self.config.page_size)
    }

    /// Run one retrieval against the built-in dataset catalog.
    pub async fn retrieve(
        &self,
        request: &RetrievalRequest,
        prompt: &mut dyn Prompt,
    ) -> Result<ResultTable> {
        self.retriever(StaticCatalog::builtin())
            .retrieve(request, prompt)
            .await
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// List every dataset the API publishes.
    pub async fn list_data_sets(&self) -> Result<Vec<DataSetSummary>> {
        let response: DataSetsResponse = self
            .get_json(
                "/v1/DataSets",
                "$top=1000&$select=name,title,version,description,lastRefresh",
            )
            .await?;
        Ok(response.data_sets)
    }

    /// List the fields of one dataset version.
    pub async fn data_set_fields(&self, name: &str, version: u32) -> Result<Vec<DataSetField>> {
        let filter = format!(
            "openFemaDataSet eq {} and datasetVersion eq {}",
            escape_value(name),
            version
        );
        let query = format!("$top=1000&$filter={}", urlencoding::encode(&filter));
        let response: DataSetFieldsResponse = self.get_json("/v1/DataSetFields", &query).await?;
        Ok(response.data_set_fields)
    }

    /// Built-in catalog refreshed with the live dataset list.
    pub async fn refreshed_catalog(&self) -> Result<StaticCatalog> {
        let mut catalog = StaticCatalog::builtin();
        catalog.merge_remote(&self.list_data_sets().await?);
        Ok(catalog)
    }

    // =========================================================================
    // Internal HTTP Methods
    // =========================================================================

    /// Perform a GET request and deserialize the response.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        let (status, body) = self.get(path, query).await?;
        serde_json::from_slice(&body).map_err(|e| RetrievalError::Upstream {
            status,
            message: format!("Failed to parse response: {}", e),
            page: None,
            retry_after: None,
        })
    }

    /// Perform a GET request, returning the status and body of a 2xx response.
    async fn get(&self, path: &str, query: &str) -> Result<(u16, Vec<u8>)> {
        let url = if query.is_empty() {
            format!("{}{}", self.config.base_url, path)
        } else {
            format!("{}{}?{}", self.config.base_url, path, query)
        };
        let start = Instant::now();

        tracing::debug!(path = %path, query = %query, "Sending request");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let duration = start.elapsed();

        tracing::debug!(
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Received response"
        );

        if status.is_success() {
            let body = response.bytes().await?;
            return Ok((status.as_u16(), body.to_vec()));
        }

        let retry_after = Self::parse_retry_after(response.headers());
        let error_body = response.bytes().await.ok();
        let message = error_body
            .as_ref()
            .and_then(|b| api_error_message(b))
            .or_else(|| {
                error_body
                    .as_ref()
                    .filter(|b| !b.is_empty())
                    .map(|b| String::from_utf8_lossy(b).to_string())
            })
            .unwrap_or_else(|| status.to_string());

        tracing::warn!(
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            error = %message,
            "Request failed"
        );

        Err(RetrievalError::Upstream {
            status: status.as_u16(),
            message,
            page: None,
            retry_after,
        })
    }

    /// Parse the Retry-After header value into a Duration.
    ///
    /// Supports both formats per RFC 7231:
    /// - Seconds: "120" -> Duration::from_secs(120)
    /// - HTTP-date: "Fri, 31 Dec 2024 23:59:59 GMT" -> Duration until that time
    fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
        let header_value = headers.get("retry-after")?.to_str().ok()?;

        if let Ok(seconds) = header_value.parse::<u64>() {
            return Some(Duration::from_secs(seconds));
        }

        if let Ok(date) = httpdate::parse_http_date(header_value) {
            let now = std::time::SystemTime::now();
            return Some(date.duration_since(now).unwrap_or(Duration::ZERO));
        }

        None
    }
}

#[async_trait]
impl PageSource for OpenFemaClient {
    async fn fetch_page(&self, query: &QueryDescriptor) -> Result<PageResponse> {
        let (status, body) = self.get(&query.path(), &query.to_query_string()).await?;

        let unusable = |message: String| RetrievalError::Upstream {
            status,
            message,
            page: None,
            retry_after: None,
        };
        let json: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| unusable(format!("Failed to parse response: {}", e)))?;

        PageResponse::from_envelope(json, &query.dataset.name).map_err(unusable)
    }
}

/// Retry strategy that only retries transport failures.
///
/// Connect errors and timeouts are transient. Every HTTP status, including
/// 5xx and 429, is handed straight back so the caller decides whether to
/// re-run the retrieval.
struct TransportOnlyRetryStrategy;

impl RetryableStrategy for TransportOnlyRetryStrategy {
    fn handle(&self, res: &reqwest_middleware::Result<reqwest::Response>) -> Option<Retryable> {
        match res {
            Ok(_) => None,
            Err(error) => {
                if error.is_timeout() || error.is_connect() {
                    Some(Retryable::Transient)
                } else {
                    Some(Retryable::Fatal)
                }
            }
        }
    }
}
