//! Unique challenge generation: bounded retries with escalating temperature
//!
//! Each of the `desired_count` slots of a batch gets up to
//! `max_attempts_per_item` generation attempts. An attempt is consumed by a
//! generation failure (error, timeout, malformed output) as well as by a
//! duplicate fingerprint; both share the same budget. A slot that runs out
//! of attempts is skipped, so a batch degrades to fewer items instead of
//! failing.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::{GenerationClient, GenerationError, GenerationParams};
use crate::fingerprint::Fingerprint;
use crate::prompts::challenge_prompt;
use crate::schemas::{AcceptedItem, GenerationRequest};
use crate::seen::SeenFingerprintSet;

/// Retry and sampling policy for one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPolicy {
    pub max_attempts_per_item: u32,
    pub base_temperature: f32,
    pub temperature_step: f32,
    pub max_temperature: f32,
    pub max_tokens: u32,
    pub attempt_timeout_ms: u64,
    pub exclusion_hint_limit: usize,
    /// Slots generated at the same time; 1 keeps the batch sequential
    pub concurrency: usize,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            max_attempts_per_item: 3,
            base_temperature: 0.8,
            temperature_step: 0.1,
            max_temperature: 2.0,
            max_tokens: 1500,
            attempt_timeout_ms: 60_000,
            exclusion_hint_limit: 20,
            concurrency: 1,
        }
    }
}

impl GenerationPolicy {
    /// Temperature for a 1-based attempt number
    pub fn temperature_for_attempt(&self, attempt: u32) -> f32 {
        (self.base_temperature + attempt as f32 * self.temperature_step).min(self.max_temperature)
    }

    fn params_for_attempt(&self, attempt: u32) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature_for_attempt(attempt),
            max_tokens: self.max_tokens,
        }
    }
}

/// Progress notifications for whoever renders the batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    AttemptStarted {
        slot: usize,
        attempt: u32,
        temperature: f32,
    },
    GenerationFailed {
        slot: usize,
        attempt: u32,
        reason: String,
    },
    DuplicateRejected {
        slot: usize,
        attempt: u32,
        fingerprint: Fingerprint,
    },
    ItemAccepted {
        slot: usize,
        attempt: u32,
        fingerprint: Fingerprint,
    },
    SlotSkipped {
        slot: usize,
        attempts: u32,
    },
    SlotCancelled {
        slot: usize,
    },
    SlotFinished {
        completed: usize,
        total: usize,
    },
}

/// Batch-level counters returned to the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounters {
    pub requested: usize,
    pub produced: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub attempts: usize,
    pub duplicates_rejected: usize,
    pub generation_failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    /// Accepted items in slot order
    pub items: Vec<AcceptedItem>,
    pub counters: BatchCounters,
}

#[derive(Debug, Default)]
struct SlotReport {
    accepted: Option<AcceptedItem>,
    attempts: u32,
    duplicates: u32,
    failures: u32,
    cancelled: bool,
}

pub struct UniqueGenerationOrchestrator {
    client: Arc<dyn GenerationClient>,
    policy: GenerationPolicy,
    progress: Option<UnboundedSender<ProgressEvent>>,
    cancel: CancellationToken,
}

impl UniqueGenerationOrchestrator {
    pub fn new(client: Arc<dyn GenerationClient>, policy: GenerationPolicy) -> Self {
        Self {
            client,
            policy,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, tx: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn policy(&self) -> &GenerationPolicy {
        &self.policy
    }

    pub fn provider(&self) -> &str {
        self.client.provider()
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            // receiver may be gone; progress is best effort
            let _ = tx.send(event);
        }
    }

    /// Produce up to `request.desired_count()` unique items.
    ///
    /// Never fails: per-attempt errors are absorbed and reflected in the
    /// counters. `seen` is checked and extended atomically per fingerprint.
    pub async fn run(&self, request: &GenerationRequest, seen: &SeenFingerprintSet) -> BatchOutcome {
        let total = request.desired_count();
        let concurrency = self.policy.concurrency.max(1);
        info!(
            "Generating {} challenge(s) via {} (max_attempts={}, concurrency={}, seeded={})",
            total,
            self.client.provider(),
            self.policy.max_attempts_per_item,
            concurrency,
            seen.len()
        );

        let mut reports = stream::iter(0..total)
            .map(move |slot| self.acquire_slot(slot, request, seen))
            .buffered(concurrency);

        let mut counters = BatchCounters {
            requested: total,
            ..BatchCounters::default()
        };
        let mut items = Vec::new();
        let mut completed = 0;
        while let Some(report) = reports.next().await {
            completed += 1;
            counters.attempts += report.attempts as usize;
            counters.duplicates_rejected += report.duplicates as usize;
            counters.generation_failures += report.failures as usize;
            match report.accepted {
                Some(item) => {
                    counters.produced += 1;
                    items.push(item);
                }
                None if report.cancelled => counters.cancelled += 1,
                None => counters.skipped += 1,
            }
            self.emit(ProgressEvent::SlotFinished { completed, total });
        }

        info!(
            "Batch finished: {}/{} produced, {} duplicates rejected, {} generation failures, {} skipped",
            counters.produced,
            total,
            counters.duplicates_rejected,
            counters.generation_failures,
            counters.skipped
        );
        BatchOutcome { items, counters }
    }

    async fn acquire_slot(
        &self,
        slot: usize,
        request: &GenerationRequest,
        seen: &SeenFingerprintSet,
    ) -> SlotReport {
        let max_attempts = self.policy.max_attempts_per_item;
        let challenge_type = request.type_for_slot(slot);
        let timeout = Duration::from_millis(self.policy.attempt_timeout_ms);
        let mut report = SlotReport::default();

        while report.attempts < max_attempts {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.attempts += 1;
            let attempt = report.attempts;
            let params = self.policy.params_for_attempt(attempt);
            let hints = seen.recent(self.policy.exclusion_hint_limit);
            let prompt = challenge_prompt(request, challenge_type, &hints);

            debug!(
                "Slot {} attempt {}/{} (temperature={:.2})",
                slot + 1,
                attempt,
                max_attempts,
                params.temperature
            );
            self.emit(ProgressEvent::AttemptStarted {
                slot,
                attempt,
                temperature: params.temperature,
            });

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                res = tokio::time::timeout(timeout, self.client.generate(&prompt, &params)) => res,
            };

            let candidate = match outcome {
                Ok(Ok(candidate)) => candidate,
                Ok(Err(err)) => {
                    self.record_failure(&mut report, slot, attempt, err);
                    continue;
                }
                Err(_elapsed) => {
                    let err = GenerationError::Timeout {
                        timeout_ms: self.policy.attempt_timeout_ms,
                    };
                    self.record_failure(&mut report, slot, attempt, err);
                    continue;
                }
            };

            let fingerprint = candidate.fingerprint();
            if !seen.add(fingerprint.clone()) {
                report.duplicates += 1;
                warn!(
                    "Duplicate detected for challenge {}, attempt {} ({})",
                    slot + 1,
                    attempt,
                    fingerprint.short()
                );
                self.emit(ProgressEvent::DuplicateRejected {
                    slot,
                    attempt,
                    fingerprint,
                });
                continue;
            }

            info!(
                "Accepted challenge {} on attempt {}: {} ({})",
                slot + 1,
                attempt,
                candidate.title,
                fingerprint.short()
            );
            self.emit(ProgressEvent::ItemAccepted {
                slot,
                attempt,
                fingerprint: fingerprint.clone(),
            });
            report.accepted = Some(AcceptedItem::accept(
                candidate,
                fingerprint,
                request,
                slot,
                attempt,
            ));
            return report;
        }

        if report.cancelled {
            debug!("Slot {} cancelled after {} attempt(s)", slot + 1, report.attempts);
            self.emit(ProgressEvent::SlotCancelled { slot });
        } else {
            warn!(
                "Skipping challenge {}: no unique result after {} attempt(s)",
                slot + 1,
                report.attempts
            );
            self.emit(ProgressEvent::SlotSkipped {
                slot,
                attempts: report.attempts,
            });
        }
        report
    }

    fn record_failure(
        &self,
        report: &mut SlotReport,
        slot: usize,
        attempt: u32,
        err: GenerationError,
    ) {
        report.failures += 1;
        warn!(
            "Generation failed for challenge {}, attempt {}: {}",
            slot + 1,
            attempt,
            err
        );
        self.emit(ProgressEvent::GenerationFailed {
            slot,
            attempt,
            reason: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_escalates_per_attempt() {
        let policy = GenerationPolicy::default();
        let temps: Vec<f32> = (1..=3).map(|a| policy.temperature_for_attempt(a)).collect();
        assert!((temps[0] - 0.9).abs() < 1e-6);
        assert!((temps[1] - 1.0).abs() < 1e-6);
        assert!((temps[2] - 1.1).abs() < 1e-6);
    }

    #[test]
    fn temperature_is_capped() {
        let policy = GenerationPolicy {
            base_temperature: 1.8,
            temperature_step: 0.5,
            ..GenerationPolicy::default()
        };
        assert!((policy.temperature_for_attempt(3) - 2.0).abs() < 1e-6);
        assert_eq!(policy.params_for_attempt(1).max_tokens, 1500);
    }
}
