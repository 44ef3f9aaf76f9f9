//! Batch generation end to end: seed from the store, orchestrate, persist

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clients::GenerationClient;
use crate::error::{ProofAndFitError, Result};
use crate::fingerprint::Fingerprint;
use crate::orchestrator::{
    BatchCounters, GenerationPolicy, ProgressEvent, UniqueGenerationOrchestrator,
};
use crate::schemas::{AcceptedItem, GenerationRequest};
use crate::seen::SeenFingerprintSet;
use crate::store::{PersistedId, PersistenceError, PersistenceGateway, RequestContext};

#[derive(Debug, Clone, Serialize)]
pub struct SavedChallenge {
    pub id: PersistedId,
    pub title: String,
    pub fingerprint: Fingerprint,
    pub slot: usize,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveFailure {
    pub title: String,
    pub fingerprint: Fingerprint,
    pub duplicate: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub requested: usize,
    /// Fingerprints loaded from the store before generation
    pub seeded: usize,
    pub seed_error: Option<String>,
    pub counters: BatchCounters,
    pub saved: Vec<SavedChallenge>,
    pub save_failures: Vec<SaveFailure>,
}

impl BatchReport {
    /// Honest count for display, e.g. "Generated 3 of 5 unique challenges"
    pub fn summary(&self) -> String {
        let mut msg = format!(
            "Generated {} of {} unique challenge{}",
            self.saved.len(),
            self.requested,
            if self.requested == 1 { "" } else { "s" }
        );
        if self.counters.duplicates_rejected > 0 {
            msg.push_str(&format!(
                " ({} duplicate{} rejected)",
                self.counters.duplicates_rejected,
                if self.counters.duplicates_rejected == 1 { "" } else { "s" }
            ));
        }
        if !self.save_failures.is_empty() {
            msg.push_str(&format!("; {} failed to save", self.save_failures.len()));
        }
        msg
    }

    /// Zero saved items is an error for the caller, not "0 generated"
    pub fn into_result(self) -> Result<Self> {
        if self.saved.is_empty() {
            return Err(ProofAndFitError::NothingGenerated {
                requested: self.requested,
                duplicates_rejected: self.counters.duplicates_rejected
                    + self.save_failures.iter().filter(|f| f.duplicate).count(),
                generation_failures: self.counters.generation_failures,
                save_failures: self.save_failures.iter().filter(|f| !f.duplicate).count(),
                cancelled: self.counters.cancelled,
            });
        }
        Ok(self)
    }
}

/// Wires a generation client and a store around the orchestrator
pub struct ChallengeGenerationService {
    client: Arc<dyn GenerationClient>,
    store: Arc<dyn PersistenceGateway>,
    policy: GenerationPolicy,
}

impl ChallengeGenerationService {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        store: Arc<dyn PersistenceGateway>,
        policy: GenerationPolicy,
    ) -> Self {
        Self {
            client,
            store,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn PersistenceGateway> {
        &self.store
    }

    pub fn provider(&self) -> &str {
        self.client.provider()
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
        ctx: &RequestContext,
    ) -> Result<BatchReport> {
        self.generate_with(request, ctx, None, CancellationToken::new())
            .await
    }

    pub async fn generate_with(
        &self,
        request: &GenerationRequest,
        ctx: &RequestContext,
        progress: Option<UnboundedSender<ProgressEvent>>,
        cancel: CancellationToken,
    ) -> Result<BatchReport> {
        let seen = SeenFingerprintSet::new();
        let seed_error = match self.store.list_existing_fingerprints().await {
            Ok(existing) => {
                seen.seed_from(existing);
                None
            }
            Err(e) => {
                warn!(
                    "Could not load existing challenges from {} store, continuing unseeded: {}",
                    self.store.backend(),
                    e
                );
                Some(e.to_string())
            }
        };
        let seeded = seen.len();

        let mut orchestrator =
            UniqueGenerationOrchestrator::new(Arc::clone(&self.client), self.policy.clone())
                .with_cancellation(cancel);
        if let Some(tx) = progress {
            orchestrator = orchestrator.with_progress(tx);
        }
        let outcome = orchestrator.run(request, &seen).await;

        let mut saved = Vec::with_capacity(outcome.items.len());
        let mut save_failures = Vec::new();
        for item in &outcome.items {
            match self.store.save(item, ctx).await {
                Ok(id) => saved.push(saved_challenge(id, item)),
                Err(e) => {
                    warn!("Failed to save challenge '{}': {}", item.title(), e);
                    save_failures.push(SaveFailure {
                        title: item.title().to_string(),
                        fingerprint: item.fingerprint.clone(),
                        duplicate: matches!(e, PersistenceError::Duplicate(_)),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let report = BatchReport {
            requested: request.desired_count(),
            seeded,
            seed_error,
            counters: outcome.counters,
            saved,
            save_failures,
        };
        info!("{}", report.summary());
        Ok(report)
    }
}

fn saved_challenge(id: PersistedId, item: &AcceptedItem) -> SavedChallenge {
    SavedChallenge {
        id,
        title: item.title().to_string(),
        fingerprint: item.fingerprint.clone(),
        slot: item.slot,
        attempt: item.attempt,
    }
}
