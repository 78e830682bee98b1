use async_trait::async_trait;

use crate::error::ProviderError;
use crate::pagination::Page;

/// A paginated control-plane endpoint.
///
/// Implementations perform exactly one HTTP exchange per `call`; rate
/// limiting, retries and page walking are layered on by
/// [`GovernedClient`](super::GovernedClient).
#[async_trait]
pub trait ControlPlaneApi: Send + Sync {
    /// Query or command sent to the provider
    type Request: Send + Sync;

    /// One result row
    type Row: Send;

    /// Fetch the page at `cursor` (`None` for the first page)
    async fn call(
        &self,
        request: &Self::Request,
        cursor: Option<&str>,
    ) -> Result<Page<Self::Row>, ProviderError>;
}
