use serde::{Deserialize, Serialize};

use crate::error::{ProofAndFitError, Result};
use crate::orchestrator::GenerationPolicy;

/// Main configuration structure loaded from proofandfit.toml and environment variables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub generation: GenerationConfig,
    pub storage: StorageConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// Generation provider and retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// openai | fake | auto
    pub provider: String,
    pub model: String,
    pub api_base: Option<String>,
    pub max_attempts_per_item: u32,
    pub base_temperature: f32,
    pub temperature_step: f32,
    pub max_temperature: f32,
    pub max_tokens: u32,
    pub attempt_timeout_ms: u64,
    pub exclusion_hint_limit: usize,
    pub concurrency: usize,
    pub requests_per_minute: Option<u32>,
    pub max_batch_size: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let policy = GenerationPolicy::default();
        Self {
            provider: "auto".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_base: None,
            max_attempts_per_item: policy.max_attempts_per_item,
            base_temperature: policy.base_temperature,
            temperature_step: policy.temperature_step,
            max_temperature: policy.max_temperature,
            max_tokens: policy.max_tokens,
            attempt_timeout_ms: policy.attempt_timeout_ms,
            exclusion_hint_limit: policy.exclusion_hint_limit,
            concurrency: policy.concurrency,
            requests_per_minute: None,
            max_batch_size: 20,
        }
    }
}

/// Where accepted challenges are persisted
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// sqlite | memory | rest
    pub backend: String,
    pub sqlite_path: String,
    pub rest_base_url: Option<String>,
    pub rest_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            sqlite_path: "proofandfit.db".to_string(),
            rest_base_url: None,
            rest_timeout_ms: 10_000,
        }
    }
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub openai_api_key: Option<String>,
    pub rest_api_token: Option<String>,
    pub strict_provider: bool,
    pub log_level: String,
    pub http_bind: std::net::SocketAddr,
    pub bearer_token: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            rest_api_token: None,
            strict_provider: false,
            log_level: DEFAULT_LOG_FILTER.to_string(),
            http_bind: std::net::SocketAddr::from(([127, 0, 0, 1], 8787)),
            bearer_token: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from TOML file and environment variables
    /// Uses PROOFANDFIT_CONFIG environment variable or defaults to "proofandfit.toml"
    pub fn load() -> Result<Self> {
        Self::load_env_file();

        let config_path = std::env::var("PROOFANDFIT_CONFIG")
            .unwrap_or_else(|_| "proofandfit.toml".to_string());

        let mut config: Config = if let Ok(content) = std::fs::read_to_string(&config_path) {
            Self::from_toml_str(&content)?
        } else {
            tracing::warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides();
        config.runtime = RuntimeConfig::load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Read the env file into the process environment; existing vars win
    pub fn load_env_file() {
        // Load environment variables with smart fallbacks:
        // 1) PF_ENV_FILE if set
        // 2) ./.env
        // 3) ../.env (repo root when running from crate dir)
        if let Ok(env_path) = std::env::var("PF_ENV_FILE") {
            let _ = dotenvy::from_path(env_path);
        } else {
            let _ = dotenvy::from_path(".env");
            let core_present = std::env::var("OPENAI_API_KEY").is_ok()
                || std::env::var("PF_GEN_PROVIDER").is_ok()
                || std::env::var("PF_STORE_BACKEND").is_ok();
            if !core_present {
                let _ = dotenvy::from_path("../.env");
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) {
        let generation = &mut self.generation;
        if let Some(provider) = env_nonempty("PF_GEN_PROVIDER") {
            generation.provider = provider.to_lowercase();
        }
        if let Some(model) = env_nonempty("PF_GEN_MODEL") {
            generation.model = model;
        }
        if let Some(base) = env_nonempty("OPENAI_BASE_URL") {
            generation.api_base = Some(base);
        }
        if let Some(v) = env_parse("PF_GEN_MAX_ATTEMPTS") {
            generation.max_attempts_per_item = v;
        }
        if let Some(v) = env_parse("PF_GEN_BASE_TEMPERATURE") {
            generation.base_temperature = v;
        }
        if let Some(v) = env_parse("PF_GEN_TEMPERATURE_STEP") {
            generation.temperature_step = v;
        }
        if let Some(v) = env_parse("PF_GEN_MAX_TOKENS") {
            generation.max_tokens = v;
        }
        if let Some(v) = env_parse("PF_GEN_TIMEOUT_MS") {
            generation.attempt_timeout_ms = v;
        }
        if let Some(v) = env_parse("PF_GEN_CONCURRENCY") {
            generation.concurrency = v;
        }
        if let Some(v) = env_parse("PF_GEN_RPM") {
            generation.requests_per_minute = Some(v);
        }
        if let Some(v) = env_parse("PF_GEN_HINT_LIMIT") {
            generation.exclusion_hint_limit = v;
        }
        if let Some(v) = env_parse("PF_MAX_BATCH_SIZE") {
            generation.max_batch_size = v;
        }

        if let Some(backend) = env_nonempty("PF_STORE_BACKEND") {
            self.storage.backend = backend.to_lowercase();
        }
        if let Some(path) = env_nonempty("PF_SQLITE_PATH") {
            self.storage.sqlite_path = path;
        }
        if let Some(url) = env_nonempty("PF_REST_BASE_URL") {
            self.storage.rest_base_url = Some(url);
        }
    }

    /// Clamp soft limits with a warning; reject settings that cannot work
    pub fn validate(&mut self) -> Result<()> {
        let generation = &mut self.generation;

        if generation.max_attempts_per_item == 0 {
            generation.max_attempts_per_item = 1;
        } else if generation.max_attempts_per_item > 10 {
            tracing::warn!(
                "max_attempts_per_item {} exceeds max 10, clamping to 10",
                generation.max_attempts_per_item
            );
            generation.max_attempts_per_item = 10;
        }

        if !(1..=8).contains(&generation.concurrency) {
            let clamped = generation.concurrency.clamp(1, 8);
            tracing::warn!(
                "concurrency {} outside 1..=8, clamping to {}",
                generation.concurrency,
                clamped
            );
            generation.concurrency = clamped;
        }

        for (name, value) in [
            ("base_temperature", &mut generation.base_temperature),
            ("max_temperature", &mut generation.max_temperature),
        ] {
            if !(0.0..=2.0).contains(&*value) {
                let clamped = value.clamp(0.0, 2.0);
                tracing::warn!("{} {} outside 0.0..=2.0, clamping to {}", name, value, clamped);
                *value = clamped;
            }
        }
        // Retries must run strictly hotter than the attempt before them
        if generation.temperature_step.is_nan() || generation.temperature_step <= 0.0 {
            return Err(ProofAndFitError::config(format!(
                "temperature_step must be > 0 (got {})",
                generation.temperature_step
            )));
        }
        let headroom = (generation.max_temperature - generation.base_temperature)
            / generation.temperature_step;
        let attempts_within_cap = (headroom + 1e-4).floor().max(0.0) as u32;
        if attempts_within_cap == 0 {
            return Err(ProofAndFitError::config(format!(
                "base_temperature {:.2} + temperature_step {:.2} exceeds max_temperature {:.2}",
                generation.base_temperature,
                generation.temperature_step,
                generation.max_temperature
            )));
        }
        if generation.max_attempts_per_item > attempts_within_cap {
            tracing::warn!(
                "max_attempts_per_item {} would pass max_temperature {:.2}, clamping to {}",
                generation.max_attempts_per_item,
                generation.max_temperature,
                attempts_within_cap
            );
            generation.max_attempts_per_item = attempts_within_cap;
        }

        if generation.exclusion_hint_limit > 100 {
            tracing::warn!(
                "exclusion_hint_limit {} exceeds max 100, clamping to 100",
                generation.exclusion_hint_limit
            );
            generation.exclusion_hint_limit = 100;
        }
        if generation.max_batch_size == 0 {
            generation.max_batch_size = 1;
        }
        if generation.attempt_timeout_ms == 0 {
            return Err(ProofAndFitError::config("attempt_timeout_ms must be > 0"));
        }

        match self.storage.backend.as_str() {
            "sqlite" | "memory" => {}
            "rest" => {
                if self
                    .storage
                    .rest_base_url
                    .as_deref()
                    .is_none_or(|u| !u.starts_with("http://") && !u.starts_with("https://"))
                {
                    return Err(ProofAndFitError::config(
                        "storage backend rest requires rest_base_url starting with http:// or https://",
                    ));
                }
            }
            other => {
                return Err(ProofAndFitError::config(format!(
                    "unknown storage backend '{}' (expected sqlite, memory or rest)",
                    other
                )));
            }
        }

        Ok(())
    }

    /// Convenience: snapshot the orchestrator policy
    pub fn policy(&self) -> GenerationPolicy {
        let g = &self.generation;
        GenerationPolicy {
            max_attempts_per_item: g.max_attempts_per_item,
            base_temperature: g.base_temperature,
            temperature_step: g.temperature_step,
            max_temperature: g.max_temperature,
            max_tokens: g.max_tokens,
            attempt_timeout_ms: g.attempt_timeout_ms,
            exclusion_hint_limit: g.exclusion_hint_limit,
            concurrency: g.concurrency,
        }
    }
}

pub const DEFAULT_LOG_FILTER: &str = "proofandfit=info";

/// `RUST_LOG` when set and non-blank, else the crate default
pub fn log_filter(rust_log: Option<&str>) -> String {
    rust_log
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_LOG_FILTER)
        .to_string()
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        let mut cfg = Self {
            openai_api_key: env_nonempty("OPENAI_API_KEY"),
            rest_api_token: env_nonempty("PF_REST_TOKEN"),
            strict_provider: env_flag("PF_GEN_STRICT"),
            log_level: log_filter(std::env::var("RUST_LOG").ok().as_deref()),
            bearer_token: env_nonempty("PF_BEARER_TOKEN"),
            ..Self::default()
        };
        if let Ok(v) = std::env::var("PF_HTTP_BIND")
            && let Ok(bind) = v.parse::<std::net::SocketAddr>()
        {
            cfg.http_bind = bind;
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy() {
        let config = Config::default();
        let policy = config.policy();
        assert_eq!(policy.max_attempts_per_item, 3);
        assert!((policy.base_temperature - 0.8).abs() < f32::EPSILON);
        assert!((policy.temperature_step - 0.1).abs() < f32::EPSILON);
        assert_eq!(policy.exclusion_hint_limit, 20);
        assert_eq!(config.storage.backend, "sqlite");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [generation]
            provider = "fake"
            max_attempts_per_item = 5

            [storage]
            backend = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.generation.provider, "fake");
        assert_eq!(config.generation.max_attempts_per_item, 5);
        assert_eq!(config.generation.max_tokens, 1500);
        assert_eq!(config.storage.backend, "memory");
    }

    #[test]
    fn test_validate_clamps_soft_limits() {
        let mut config = Config::default();
        config.generation.max_attempts_per_item = 0;
        config.generation.concurrency = 64;
        config.generation.max_temperature = 3.5;
        config.generation.exclusion_hint_limit = 500;
        config.validate().unwrap();
        assert_eq!(config.generation.max_attempts_per_item, 1);
        assert_eq!(config.generation.concurrency, 8);
        assert!((config.generation.max_temperature - 2.0).abs() < f32::EPSILON);
        assert_eq!(config.generation.exclusion_hint_limit, 100);
    }

    #[test]
    fn test_log_filter_falls_back_to_default() {
        assert_eq!(log_filter(None), DEFAULT_LOG_FILTER);
        assert_eq!(log_filter(Some("  ")), DEFAULT_LOG_FILTER);
        assert_eq!(log_filter(Some("proofandfit=debug")), "proofandfit=debug");
        assert_eq!(RuntimeConfig::default().log_level, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_validate_rejects_flat_temperature() {
        let mut config = Config::default();
        config.generation.temperature_step = 0.0;
        assert!(config.validate().is_err());

        config.generation.temperature_step = -0.1;
        assert!(config.validate().is_err());

        config.generation.temperature_step = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_keeps_every_attempt_below_the_cap() {
        let mut config = Config::default();
        config.generation.base_temperature = 1.9;
        config.validate().unwrap();
        assert_eq!(config.generation.max_attempts_per_item, 1);

        let mut config = Config::default();
        config.generation.base_temperature = 1.5;
        config.generation.max_attempts_per_item = 8;
        config.validate().unwrap();
        assert_eq!(config.generation.max_attempts_per_item, 5);

        let policy = config.policy();
        let temps: Vec<f32> = (1..=policy.max_attempts_per_item)
            .map(|a| policy.temperature_for_attempt(a))
            .collect();
        assert!(temps.windows(2).all(|w| w[1] > w[0]), "temperatures: {temps:?}");

        let mut config = Config::default();
        config.generation.base_temperature = 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_storage() {
        let mut config = Config::default();
        config.storage.backend = "postgres".to_string();
        assert!(config.validate().is_err());

        config.storage.backend = "rest".to_string();
        config.storage.rest_base_url = Some("ftp://backend".to_string());
        assert!(config.validate().is_err());

        config.storage.rest_base_url = Some("https://backend.example/api".to_string());
        assert!(config.validate().is_ok());
    }
}
