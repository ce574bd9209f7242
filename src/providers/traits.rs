use async_trait::async_trait;

use super::types::{ChatRequest, ProviderError};

/// The seam between prompt units and whatever actually talks to a model.
/// Vendor specifics live behind this trait; the host only ever sees a
/// completed string or a `ProviderError`.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, ProviderError>;
}
