// Deterministic, local generator for development and demos (no network)

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::clients::traits::{GenerationClient, GenerationError, GenerationParams};
use crate::schemas::{CandidateItem, META_ESTIMATED_MINUTES};

const INDUSTRIES: [&str; 6] = [
    "healthcare billing",
    "cross-border e-commerce",
    "regional manufacturing",
    "digital payments",
    "remote-first SaaS",
    "municipal procurement",
];

const SCHEMES: [&str; 6] = [
    "duplicate vendor invoices",
    "round-tripped cryptocurrency transfers",
    "ghost employees on a remote payroll",
    "channel stuffing before quarter close",
    "split purchases under approval limits",
    "related-party lease payments",
];

/// Same prompt and temperature always produce the same challenge; any change
/// to either (new exclusion hints, escalated temperature) produces a new one.
pub struct FakeGenerationClient;

impl Default for FakeGenerationClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGenerationClient {
    pub fn new() -> Self {
        FakeGenerationClient
    }

    fn compose(&self, prompt: &str, params: &GenerationParams) -> CandidateItem {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hasher.update(params.temperature.to_le_bytes());
        let digest = hasher.finalize();

        let industry = INDUSTRIES[digest[0] as usize % INDUSTRIES.len()];
        let scheme = SCHEMES[digest[1] as usize % SCHEMES.len()];
        let case_ref = format!("{:02x}{:02x}{:02x}", digest[2], digest[3], digest[4]);
        let amount = 10_000 + (u32::from(digest[5]) << 8 | u32::from(digest[6]));

        CandidateItem::new(
            format!("Case {}: {} in {}", case_ref, scheme, industry),
            format!(
                "A {} client reports unexplained losses of roughly ${} over two quarters. \
                 Transaction exports, approval logs and vendor master data are available. \
                 Determine whether {} explain the losses and quantify the exposure.",
                industry, amount, scheme
            ),
            format!(
                "Reconcile the ledger against approval logs, isolate transactions matching {}, \
                 trace beneficiaries through vendor master data, and size the loss at about ${}. \
                 Recommend control changes that close the gap.",
                scheme, amount
            ),
        )
        .with_metadata(META_ESTIMATED_MINUTES, "30")
    }
}

#[async_trait]
impl GenerationClient for FakeGenerationClient {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<CandidateItem, GenerationError> {
        Ok(self.compose(prompt, params))
    }

    fn provider(&self) -> &str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(temperature: f32) -> GenerationParams {
        GenerationParams {
            temperature,
            max_tokens: 1500,
        }
    }

    #[tokio::test]
    async fn fake_client_is_deterministic() {
        let client = FakeGenerationClient::new();
        let a = client.generate("prompt", &params(0.9)).await.unwrap();
        let b = client.generate("prompt", &params(0.9)).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn fake_client_varies_with_temperature() {
        let client = FakeGenerationClient::new();
        let a = client.generate("prompt", &params(0.9)).await.unwrap();
        let b = client.generate("prompt", &params(1.0)).await.unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
