//! Tests for the event dispatcher.

use super::*;
use crate::handlers::testing::Harness;
use nq_core::monitoring::MemoryRecorder;
use serde_json::json;
use std::time::Duration;

fn dispatcher(harness: &Harness, recorder: &MemoryRecorder) -> Dispatcher {
    let retry = RetryPolicy::exponential(3, Duration::from_millis(100), Duration::from_secs(1))
        .without_jitter();
    Dispatcher::new(harness.ctx.clone(), Arc::new(recorder.clone()), retry)
        .with_metrics(harness.metrics.clone())
}

fn announcement() -> serde_json::Value {
    json!({
        "source": "demo",
        "source_id": "A1",
        "crn_full": "crn:v1::::::::",
        "source_update_time": "2024-01-01T00:00:00Z",
    })
}

mod routing {
    use super::*;

    #[tokio::test]
    async fn test_success_is_acked_with_span() {
        let harness = Harness::new();
        let recorder = MemoryRecorder::new();
        let payload = harness.payload(announcement());

        let action = dispatcher(&harness, &recorder)
            .dispatch("notification", &payload)
            .await;

        assert_eq!(action, DeliveryAction::Ack);
        let spans = recorder.finished();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "notification");
        assert_eq!(spans[0].tag("routing_key"), Some("notification"));
        assert_eq!(spans[0].tag("outcome"), Some("ack"));
        assert!(spans[0].error.is_none());
    }

    /// Verify unknown routing keys are acknowledged without a handler span.
    #[tokio::test]
    async fn test_unknown_key_is_acked() {
        let harness = Harness::new();
        let recorder = MemoryRecorder::new();

        let action = dispatcher(&harness, &recorder)
            .dispatch("nq2ds.incident", b"anything")
            .await;

        assert_eq!(action, DeliveryAction::Ack);
        assert!(recorder.finished().is_empty());
        assert_eq!(
            harness
                .metrics
                .deliveries_total
                .with_label_values(&["nq2ds.incident", "ignored"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_each_key_selects_its_handler() {
        let harness = Harness::new();
        let recorder = MemoryRecorder::new();
        let dispatcher = dispatcher(&harness, &recorder);

        for kind in EventKind::ALL {
            dispatcher.dispatch(kind.as_str(), b"garbage").await;
        }

        let names: Vec<String> = recorder.finished().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec!["incident", "maintenance", "resource", "status", "notification"]
        );
    }
}

mod failures {
    use super::*;

    /// Verify undecryptable payloads are dead-lettered and tagged.
    #[tokio::test]
    async fn test_decrypt_failure_is_rejected_without_requeue() {
        let harness = Harness::new();
        let recorder = MemoryRecorder::new();

        let action = dispatcher(&harness, &recorder)
            .dispatch("incident", b"not ciphertext")
            .await;

        assert_eq!(action, DeliveryAction::Reject { requeue: false });
        assert_eq!(recorder.with_tag("error_category", "decrypt-failed").len(), 1);
        assert_eq!(harness.store.row_count(), 0);
        assert_eq!(
            harness
                .metrics
                .deliveries_total
                .with_label_values(&["incident", "reject"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_bad_message_is_rejected() {
        let harness = Harness::new();
        let recorder = MemoryRecorder::new();
        let payload = harness.payload(json!({"record_id": "missing", "tags": "x"}));

        let action = dispatcher(&harness, &recorder)
            .dispatch("status", &payload)
            .await;

        assert_eq!(action, DeliveryAction::Reject { requeue: false });
        assert_eq!(recorder.with_tag("error_category", "bad-message").len(), 1);
    }

    #[tokio::test]
    async fn test_maintenance_parse_failure_is_acked() {
        let harness = Harness::new();
        let recorder = MemoryRecorder::new();
        let payload = harness.payload(json!(42));

        let action = dispatcher(&harness, &recorder)
            .dispatch("maintenance", &payload)
            .await;

        assert_eq!(action, DeliveryAction::Ack);
    }

    /// Verify a persistent store outage exhausts the in-place retries and requeues.
    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_then_requeued() {
        let harness = Harness::new();
        let recorder = MemoryRecorder::new();
        harness.store.set_outage(true);
        let payload = harness.payload(announcement());

        let action = dispatcher(&harness, &recorder)
            .dispatch("notification", &payload)
            .await;

        assert_eq!(action, DeliveryAction::Nack { requeue: true });
        assert_eq!(
            harness
                .metrics
                .handler_retries_total
                .with_label_values(&["notification"])
                .get(),
            2
        );
        assert_eq!(recorder.with_tag("error_category", "transient").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_that_clears_is_acked() {
        let harness = Harness::new();
        let recorder = MemoryRecorder::new();
        harness.store.set_outage(true);
        let payload = harness.payload(announcement());

        let store = harness.store.clone();
        let healer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.set_outage(false);
        });

        let action = dispatcher(&harness, &recorder)
            .dispatch("notification", &payload)
            .await;
        healer.await.unwrap();

        assert_eq!(action, DeliveryAction::Ack);
        assert_eq!(harness.store.row_count(), 1);
    }
}

mod policy {
    use super::*;

    #[test]
    fn test_action_for_each_category() {
        assert_eq!(
            action_for(&PipelineError::transient("db")),
            DeliveryAction::Nack { requeue: true }
        );
        assert_eq!(
            action_for(&PipelineError::DecryptFailed {
                message: "tag".to_string()
            }),
            DeliveryAction::Reject { requeue: false }
        );
        assert_eq!(
            action_for(&PipelineError::bad_message("json")),
            DeliveryAction::Reject { requeue: false }
        );
        assert_eq!(
            action_for(&PipelineError::fatal("serialize")),
            DeliveryAction::Reject { requeue: false }
        );
    }
}
