//! Retry, uniqueness and cancellation behavior of the orchestrator

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use proofandfit::{
    ChallengeType, Difficulty, GenerationPolicy, GenerationRequest, ProgressEvent,
    SeenFingerprintSet, UniqueGenerationOrchestrator,
};
use support::{ScriptedClient, Step, item_for};
use tokio_util::sync::CancellationToken;

fn request(count: usize) -> GenerationRequest {
    GenerationRequest::new(
        ["Fraud Detection"],
        Difficulty::Intermediate,
        ChallengeType::Scenario,
        count,
    )
    .unwrap()
}

fn orchestrator(
    client: &Arc<ScriptedClient>,
    policy: GenerationPolicy,
) -> UniqueGenerationOrchestrator {
    UniqueGenerationOrchestrator::new(client.clone(), policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_known_duplicate_exhausts_attempts() {
        let client = Arc::new(ScriptedClient::always(Step::Item("A")));
        let seen = SeenFingerprintSet::seeded(vec![item_for("A").fingerprint()]);

        let outcome = orchestrator(&client, GenerationPolicy::default())
            .run(&request(1), &seen)
            .await;

        assert!(outcome.items.is_empty());
        assert_eq!(client.calls(), 3);
        assert_eq!(outcome.counters.duplicates_rejected, 3);
        assert_eq!(outcome.counters.skipped, 1);
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn test_constant_failure_is_bounded_per_slot() {
        let client = Arc::new(ScriptedClient::always(Step::Fail));
        let seen = SeenFingerprintSet::new();

        let outcome = orchestrator(&client, GenerationPolicy::default())
            .run(&request(2), &seen)
            .await;

        assert!(outcome.items.is_empty());
        assert_eq!(client.calls(), 6);
        assert_eq!(outcome.counters.generation_failures, 6);
        assert_eq!(outcome.counters.attempts, 6);
        assert_eq!(outcome.counters.skipped, 2);
    }

    #[tokio::test]
    async fn test_partial_success_keeps_unique_items() {
        // slot 1: A, slot 2: A x3, slot 3: B, slot 4: B x3, slot 5: C
        let steps = vec![
            Step::Item("A"),
            Step::Item("A"),
            Step::Item("A"),
            Step::Item("A"),
            Step::Item("B"),
            Step::Item("B"),
            Step::Item("B"),
            Step::Item("B"),
            Step::Item("C"),
        ];
        let client = Arc::new(ScriptedClient::new(steps, Step::Fail));
        let seen = SeenFingerprintSet::new();

        let outcome = orchestrator(&client, GenerationPolicy::default())
            .run(&request(5), &seen)
            .await;

        let titles: Vec<&str> = outcome.items.iter().map(|i| i.title()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
        let slots: Vec<usize> = outcome.items.iter().map(|i| i.slot).collect();
        assert_eq!(slots, vec![0, 2, 4]);
        assert_eq!(outcome.counters.produced, 3);
        assert_eq!(outcome.counters.skipped, 2);
        assert_eq!(outcome.counters.duplicates_rejected, 6);
        assert_eq!(client.calls(), 9);
    }

    #[tokio::test]
    async fn test_temperature_strictly_increases_across_attempts() {
        let client = Arc::new(ScriptedClient::always(Step::Fail));
        let seen = SeenFingerprintSet::new();

        orchestrator(&client, GenerationPolicy::default())
            .run(&request(1), &seen)
            .await;

        let temps = client.temperatures();
        assert_eq!(temps.len(), 3);
        assert!(temps.windows(2).all(|w| w[1] > w[0]), "temperatures: {temps:?}");
    }

    #[tokio::test]
    async fn test_parallel_slots_accept_a_fingerprint_once() {
        let client = Arc::new(
            ScriptedClient::always(Step::Item("same")).with_delay(Duration::from_millis(10)),
        );
        let seen = SeenFingerprintSet::new();
        let policy = GenerationPolicy {
            concurrency: 4,
            ..GenerationPolicy::default()
        };

        let outcome = orchestrator(&client, policy).run(&request(4), &seen).await;

        assert_eq!(outcome.items.len(), 1);
        assert_eq!(seen.len(), 1);
        // the winner used one attempt, every other slot burned its budget
        assert_eq!(client.calls(), 1 + 3 * 3);
        assert_eq!(outcome.counters.duplicates_rejected, 9);
    }

    #[tokio::test]
    async fn test_parallel_slots_keep_slot_order() {
        let steps = vec![Step::Item("W"), Step::Item("X"), Step::Item("Y"), Step::Item("Z")];
        let client = Arc::new(ScriptedClient::new(steps, Step::Fail));
        let seen = SeenFingerprintSet::new();
        let policy = GenerationPolicy {
            concurrency: 3,
            ..GenerationPolicy::default()
        };

        let outcome = orchestrator(&client, policy).run(&request(4), &seen).await;

        let slots: Vec<usize> = outcome.items.iter().map(|i| i.slot).collect();
        assert_eq!(slots, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_failure() {
        let client = Arc::new(ScriptedClient::always(Step::Hang));
        let seen = SeenFingerprintSet::new();
        let policy = GenerationPolicy {
            max_attempts_per_item: 2,
            attempt_timeout_ms: 20,
            ..GenerationPolicy::default()
        };

        let started = Instant::now();
        let outcome = orchestrator(&client, policy).run(&request(1), &seen).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(outcome.items.is_empty());
        assert_eq!(outcome.counters.generation_failures, 2);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_keeps_accepted_items() {
        let client = Arc::new(ScriptedClient::new(vec![Step::Item("first")], Step::Hang));
        let seen = SeenFingerprintSet::new();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = orchestrator(&client, GenerationPolicy::default())
            .with_cancellation(token)
            .run(&request(3), &seen)
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].title(), "first");
        assert_eq!(outcome.counters.cancelled, 2);
        assert_eq!(outcome.counters.skipped, 0);
    }

    #[tokio::test]
    async fn test_progress_events_follow_the_batch() {
        let client = Arc::new(ScriptedClient::new(
            vec![Step::Fail, Step::Item("A")],
            Step::Fail,
        ));
        let seen = SeenFingerprintSet::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let outcome = orchestrator(&client, GenerationPolicy::default())
            .with_progress(tx)
            .run(&request(1), &seen)
            .await;
        assert_eq!(outcome.items.len(), 1);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events[0], ProgressEvent::AttemptStarted { slot: 0, attempt: 1, .. }));
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::GenerationFailed { attempt: 1, .. })));
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::ItemAccepted { attempt: 2, .. })));
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::SlotFinished { completed: 1, total: 1 })
        );
    }
}
