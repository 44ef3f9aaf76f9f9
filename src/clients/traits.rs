use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schemas::CandidateItem;

/// Sampling parameters for one generation call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("http error: {0}")]
    Http(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("malformed challenge: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<CandidateItem, GenerationError>;

    /// Provider label for logs and reports
    fn provider(&self) -> &str;
}
