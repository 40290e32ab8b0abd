//! The outbound seam the retrieval engine pulls pages through.

use crate::error::Result;
use crate::query::QueryDescriptor;
use crate::types::PageResponse;
use async_trait::async_trait;

/// Something that can execute one page query.
///
/// Implementations must surface connectivity problems as
/// [`RetrievalError::TransientNetwork`](crate::RetrievalError::TransientNetwork)
/// and non-2xx statuses as [`RetrievalError::Upstream`](crate::RetrievalError::Upstream).
/// [`OpenFemaClient`](crate::OpenFemaClient) is the HTTP implementation.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the rows described by `query`.
    async fn fetch_page(&self, query: &QueryDescriptor) -> Result<PageResponse>;
}

#[async_trait]
impl<T: PageSource + ?Sized> PageSource for std::sync::Arc<T> {
    async fn fetch_page(&self, query: &QueryDescriptor) -> Result<PageResponse> {
        (**self).fetch_page(query).await
    }
}

#[async_trait]
impl<T: PageSource + ?Sized> PageSource for &T {
    async fn fetch_page(&self, query: &QueryDescriptor) -> Result<PageResponse> {
        (**self).fetch_page(query).await
    }
}
