pub mod fake;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ProofAndFitError, Result};

pub use fake::FakeGenerationClient;
pub use openai::OpenAiChatClient;
pub use traits::{GenerationClient, GenerationError, GenerationParams};

fn is_placeholder(s: &str) -> bool {
    let t = s.trim();
    t.is_empty()
        || t.contains("${")
        || t.eq_ignore_ascii_case("your-api-key-here")
        || t.eq_ignore_ascii_case("changeme")
}

fn openai_client(config: &Config, key: &str) -> Result<Arc<dyn GenerationClient>> {
    let generation = &config.generation;
    info!("Using OpenAI-compatible generation (model={})", generation.model);
    let client = OpenAiChatClient::new(
        key.to_string(),
        generation.model.clone(),
        generation.api_base.clone(),
        generation.attempt_timeout_ms,
    )?
    .with_requests_per_minute(generation.requests_per_minute.unwrap_or(0));
    Ok(Arc::new(client))
}

/// Build the generation client selected by configuration
///
/// Provider selection order:
/// 1) `openai` or `fake` when set explicitly
/// 2) `auto`: OpenAI when a usable key is present
/// 3) otherwise the deterministic fake, unless strict mode is on
pub fn create_generation_client(config: &Config) -> Result<Arc<dyn GenerationClient>> {
    let key = config.runtime.openai_api_key.clone().unwrap_or_default();

    match config.generation.provider.as_str() {
        "openai" => {
            if is_placeholder(&key) {
                return Err(ProofAndFitError::config(
                    "generation provider is openai but OPENAI_API_KEY is not set",
                ));
            }
            return openai_client(config, &key);
        }
        "fake" => {
            info!("Using FakeGenerationClient (deterministic)");
            return Ok(Arc::new(FakeGenerationClient::new()));
        }
        "auto" => {
            if !is_placeholder(&key) {
                return openai_client(config, &key);
            }
        }
        other => {
            return Err(ProofAndFitError::config(format!(
                "unknown generation provider '{}' (expected openai, fake or auto)",
                other
            )));
        }
    }

    if config.runtime.strict_provider {
        return Err(ProofAndFitError::config(
            "No generation provider configured; set OPENAI_API_KEY or PF_GEN_PROVIDER.",
        ));
    }

    warn!("No OPENAI_API_KEY found; falling back to FakeGenerationClient");
    Ok(Arc::new(FakeGenerationClient::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_keys_are_ignored() {
        assert!(is_placeholder(""));
        assert!(is_placeholder("${OPENAI_API_KEY}"));
        assert!(is_placeholder("changeme"));
        assert!(!is_placeholder("sk-live-123"));
    }

    #[test]
    fn auto_without_key_falls_back_to_fake() {
        let mut config = Config::default();
        config.generation.provider = "auto".to_string();
        config.runtime.openai_api_key = None;
        let client = create_generation_client(&config).unwrap();
        assert_eq!(client.provider(), "fake");
    }

    #[test]
    fn strict_mode_refuses_fallback() {
        let mut config = Config::default();
        config.generation.provider = "auto".to_string();
        config.runtime.openai_api_key = None;
        config.runtime.strict_provider = true;
        assert!(create_generation_client(&config).is_err());
    }

    #[test]
    fn explicit_openai_requires_key() {
        let mut config = Config::default();
        config.generation.provider = "openai".to_string();
        config.runtime.openai_api_key = Some("changeme".to_string());
        assert!(create_generation_client(&config).is_err());
        config.runtime.openai_api_key = Some("sk-test".to_string());
        assert_eq!(create_generation_client(&config).unwrap().provider(), "openai");
    }
}
