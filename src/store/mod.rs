pub mod memory;
pub mod rest;
pub mod sqlite;
pub mod traits;

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::Result;

pub use memory::MemoryStore;
pub use rest::RestStore;
pub use sqlite::{ChallengeSummary, SqliteStore};
pub use traits::{
    AnswerKeyRecord, ChallengeRecord, PersistedId, PersistenceError, PersistenceGateway,
    RequestContext,
};

/// Open the storage backend selected by configuration
pub fn create_store(config: &Config) -> Result<Arc<dyn PersistenceGateway>> {
    let storage = &config.storage;
    match storage.backend.as_str() {
        "memory" => {
            info!("Using in-memory challenge store");
            Ok(Arc::new(MemoryStore::new()))
        }
        "rest" => {
            let base = storage.rest_base_url.clone().unwrap_or_default();
            info!("Using REST challenge store at {}", base);
            Ok(Arc::new(RestStore::new(
                base,
                config.runtime.rest_api_token.clone(),
                storage.rest_timeout_ms,
            )?))
        }
        _ => {
            info!("Using SQLite challenge store at {}", storage.sqlite_path);
            Ok(Arc::new(SqliteStore::open(&storage.sqlite_path)?))
        }
    }
}
