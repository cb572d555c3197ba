//! Tests for close notification plumbing.

use super::*;
use std::time::Duration;

#[tokio::test]
async fn test_signal_resolves_with_first_reason() {
    let notifier = CloseNotifier::new();
    let mut signal = notifier.signal();

    notifier.notify("connection reset");
    notifier.notify("second reason is ignored");

    let reason = tokio::time::timeout(Duration::from_secs(1), signal.closed())
        .await
        .expect("signal should resolve");
    assert_eq!(reason, "connection reset");
    assert!(notifier.is_closed());
}

/// Verify a signal created after the close still observes it.
#[tokio::test]
async fn test_signal_created_after_close_resolves_immediately() {
    let notifier = CloseNotifier::new();
    notifier.notify("already closed");

    let mut signal = notifier.signal();
    assert!(signal.is_closed());
    assert_eq!(signal.closed().await, "already closed");
}

#[tokio::test]
async fn test_signal_pending_while_open() {
    let notifier = CloseNotifier::new();
    let mut signal = notifier.signal();

    let result = tokio::time::timeout(Duration::from_millis(20), signal.closed()).await;
    assert!(result.is_err(), "open channel must not report closed");
}

#[tokio::test]
async fn test_dropped_notifier_resolves_signal() {
    let notifier = CloseNotifier::new();
    let mut signal = notifier.signal();
    drop(notifier);

    assert_eq!(signal.closed().await, "channel dropped");
}
