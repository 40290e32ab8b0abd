//! Client configuration and builder pattern.

use crate::error::{Result, RetrievalError};
use std::time::Duration;

/// Largest `$top` the OpenFEMA API honours for a single call.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Public OpenFEMA endpoint.
pub const DEFAULT_BASE_URL: &str = "https://www.fema.gov/api/open";

/// Configuration for the OpenFEMA client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API (e.g., "https://www.fema.gov/api/open")
    pub base_url: String,
    /// Request timeout (default: 30 seconds)
    pub timeout: Duration,
    /// Transport-level retries for connect/timeout failures (default: 0)
    pub max_retries: u32,
    /// Initial retry delay for exponential backoff (default: 100ms)
    pub retry_initial_delay: Duration,
    /// Maximum retry delay (default: 10 seconds)
    pub retry_max_delay: Duration,
    /// Rows requested per page call (default: 1000, the API maximum)
    pub page_size: u32,
    /// Whether to verify TLS certificates (default: true)
    pub tls_verify: bool,
    /// User-Agent header value
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 0,
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(10),
            page_size: MAX_PAGE_SIZE,
            tls_verify: true,
            user_agent: format!("openfema-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder(base_url: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(base_url)
    }

    /// Minimum allowed timeout value.
    pub const MIN_TIMEOUT: Duration = Duration::from_millis(100);

    /// Build a configuration from `OPENFEMA_*` environment variables,
    /// falling back to defaults for anything unset.
    ///
    /// Recognised variables: `OPENFEMA_BASE_URL`, `OPENFEMA_TIMEOUT_SECS`,
    /// `OPENFEMA_PAGE_SIZE`, `OPENFEMA_MAX_RETRIES`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = ClientConfig::default();

        if let Some(base_url) = lookup("OPENFEMA_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(secs) = lookup("OPENFEMA_TIMEOUT_SECS") {
            let secs = secs.trim().parse::<u64>().map_err(|e| {
                RetrievalError::Config(format!("Invalid OPENFEMA_TIMEOUT_SECS: {}", e))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(size) = lookup("OPENFEMA_PAGE_SIZE") {
            config.page_size = size.trim().parse::<u32>().map_err(|e| {
                RetrievalError::Config(format!("Invalid OPENFEMA_PAGE_SIZE: {}", e))
            })?;
        }
        if let Some(retries) = lookup("OPENFEMA_MAX_RETRIES") {
            config.max_retries = retries.trim().parse::<u32>().map_err(|e| {
                RetrievalError::Config(format!("Invalid OPENFEMA_MAX_RETRIES: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(RetrievalError::Config(
                "base_url cannot be empty".to_string(),
            ));
        }

        url::Url::parse(&self.base_url)
            .map_err(|e| RetrievalError::Config(format!("Invalid base_url: {}", e)))?;

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(RetrievalError::Config(format!(
                "page_size ({}) must be between 1 and {}",
                self.page_size, MAX_PAGE_SIZE
            )));
        }

        if self.retry_initial_delay > self.retry_max_delay {
            return Err(RetrievalError::Config(format!(
                "retry_initial_delay ({:?}) must be <= retry_max_delay ({:?})",
                self.retry_initial_delay, self.retry_max_delay
            )));
        }

        if self.timeout < Self::MIN_TIMEOUT {
            return Err(RetrievalError::Config(format!(
                "timeout ({:?}) must be >= {:?}",
                self.timeout,
                Self::MIN_TIMEOUT
            )));
        }

        Ok(())
    }
}

/// Builder for client configuration.
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder with the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: ClientConfig {
                base_url: base_url.into(),
                ..Default::default()
            },
        }
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the number of transport retries. Zero disables retrying.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the initial retry delay for exponential backoff.
    pub fn retry_initial_delay(mut self, delay: Duration) -> Self {
        self.config.retry_initial_delay = delay;
        self
    }

    /// Set the maximum retry delay.
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.config.retry_max_delay = delay;
        self
    }

    /// Set the number of rows requested per page call.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.config.page_size = page_size;
        self
    }

    /// Set whether to verify TLS certificates.
    pub fn tls_verify(mut self, verify: bool) -> Self {
        self.config.tls_verify = verify;
        self
    }

    /// Set a custom User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Build the configuration, validating all settings.
    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
