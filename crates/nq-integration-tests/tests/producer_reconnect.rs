//! Integration tests for publishing across a broker restart
//!
//! These tests verify:
//! - Publishes issued while the connection is down wait for the reconnect
//! - Every message of a batch arrives exactly once and in input order

mod common;

use common::{test_cipher, EXCHANGE, PRIMARY};
use nq_broker::{
    new_producer, ConnectionSettings, EndpointPool, ExchangeKind, ExchangeName, InMemoryBroker,
    RoutingKey,
};
use nq_core::Cipher;
use nq_service::ReliableProducer;
use std::sync::Arc;
use std::time::Duration;

const BATCH: usize = 100;
const OUTPUT_KEY: &str = "nq2ds.notification";

/// Verify a connection close in the middle of a batch is invisible to the caller.
#[tokio::test(start_paused = true)]
async fn test_broker_close_mid_publish_is_invisible() {
    let broker = InMemoryBroker::new();
    let producer = Arc::new(
        new_producer(
            Arc::new(broker.clone()),
            EndpointPool::new([PRIMARY]).unwrap(),
            None,
            ExchangeName::new(EXCHANGE).unwrap(),
            ExchangeKind::Direct,
            ConnectionSettings::default(),
        )
        .await
        .unwrap(),
    );
    let reliable = Arc::new(ReliableProducer::new(
        producer.clone(),
        Arc::new(test_cipher()),
        Duration::from_secs(5),
    ));

    let batch = {
        let reliable = reliable.clone();
        tokio::spawn(async move {
            let key = RoutingKey::new(OUTPUT_KEY).unwrap();
            for i in 0..BATCH {
                reliable
                    .produce_plaintext(&key, i.to_string().as_bytes())
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    // Close the connection once part of the batch is out
    loop {
        if broker.published_bodies(EXCHANGE, OUTPUT_KEY).len() >= BATCH / 3 {
            broker.close_all_connections("broker restart");
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(producer.is_quiesced());

    batch.await.unwrap();

    let cipher = test_cipher();
    let received: Vec<usize> = broker
        .published_bodies(EXCHANGE, OUTPUT_KEY)
        .iter()
        .map(|body| {
            let plaintext = cipher.decrypt(body).unwrap();
            String::from_utf8(plaintext).unwrap().parse().unwrap()
        })
        .collect();
    assert_eq!(received, (0..BATCH).collect::<Vec<_>>());
    assert!(!producer.is_quiesced());

    producer.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_publish_waits_while_endpoint_is_down() {
    let broker = InMemoryBroker::new();
    let producer = Arc::new(
        new_producer(
            Arc::new(broker.clone()),
            EndpointPool::new([PRIMARY]).unwrap(),
            None,
            ExchangeName::new(EXCHANGE).unwrap(),
            ExchangeKind::Direct,
            ConnectionSettings::default(),
        )
        .await
        .unwrap(),
    );
    let reliable = ReliableProducer::new(producer.clone(), Arc::new(test_cipher()), Duration::from_secs(5));

    broker.set_endpoint_reachable(PRIMARY, false);
    broker.close_all_connections("broker down");

    let key = RoutingKey::new(OUTPUT_KEY).unwrap();
    let publish = tokio::spawn(async move { reliable.produce_plaintext(&key, b"held").await });

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!publish.is_finished());
    assert!(broker.published_bodies(EXCHANGE, OUTPUT_KEY).is_empty());

    broker.set_endpoint_reachable(PRIMARY, true);
    publish.await.unwrap().unwrap();

    assert_eq!(broker.published_bodies(EXCHANGE, OUTPUT_KEY).len(), 1);
    producer.close().await;
}
