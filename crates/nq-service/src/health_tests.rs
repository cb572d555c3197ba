//! Tests for the liveness supervisor and its HTTP routes.

use super::*;
use axum::body::{to_bytes, Body};
use axum::http::Request;
use nq_core::store::InMemoryNotificationStore;
use tower::ServiceExt;

fn supervisor(store: &Arc<InMemoryNotificationStore>) -> LivenessSupervisor {
    LivenessSupervisor::new(store.clone(), Duration::from_secs(10))
        .with_metrics(PipelineMetrics::new().unwrap())
}

mod probe {
    use super::*;

    #[tokio::test]
    async fn test_starts_healthy() {
        let store = Arc::new(InMemoryNotificationStore::new());

        let supervisor = supervisor(&store);

        assert!(supervisor.liveness().is_healthy());
    }

    /// Verify a failed probe flips the flag and reopens the pool.
    #[tokio::test]
    async fn test_failed_probe_resets_store() {
        // Arrange
        let store = Arc::new(InMemoryNotificationStore::new());
        let supervisor = supervisor(&store);
        store.set_outage(true);

        // Act
        let ok = supervisor.probe_once().await;

        // Assert
        assert!(!ok);
        assert!(!supervisor.liveness().is_healthy());
        assert_eq!(store.reset_count(), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_outage() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let supervisor = supervisor(&store);
        store.set_outage(true);
        supervisor.probe_once().await;

        store.set_outage(false);
        let ok = supervisor.probe_once().await;

        assert!(ok);
        assert!(supervisor.liveness().is_healthy());
        assert_eq!(store.reset_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_probes_on_interval_until_shutdown() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let supervisor = Arc::new(supervisor(&store));
        store.set_outage(true);
        let (stop, shutdown) = watch::channel(false);

        let runner = supervisor.clone();
        let task = tokio::spawn(async move { runner.run(shutdown).await });

        tokio::time::sleep(Duration::from_secs(35)).await;
        stop.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(store.reset_count(), 3);
        assert!(!supervisor.liveness().is_healthy());
    }
}

mod routes {
    use super::*;

    fn app(healthy: bool) -> Router {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.produced("nq2ds.resource");
        router(HealthState {
            liveness: Liveness(Arc::new(AtomicBool::new(healthy))),
            metrics,
        })
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_healthz_ok_when_healthy() {
        let (status, body) = get(app(true), "/healthz").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"status\":\"healthy\""));
    }

    #[tokio::test]
    async fn test_healthz_unavailable_when_unhealthy() {
        let (status, body) = get(app(false), "/healthz").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("unhealthy"));
    }

    #[tokio::test]
    async fn test_metrics_are_rendered() {
        let (status, body) = get(app(true), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("nq_messages_produced_total"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (status, _) = get(app(true), "/ready").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
