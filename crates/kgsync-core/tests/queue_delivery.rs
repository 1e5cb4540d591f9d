//! Stream queue delivery guarantees and the sorted-set delay queue

use std::time::Duration;

use kgsync_core::queue::{DelayQueue, ReliableQueue};
use kgsync_core::store::KvClient;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Job {
    kb_id: String,
    attempt: u32,
}

#[tokio::test]
async fn unacked_message_is_recovered_unchanged() {
    let queue = ReliableQueue::with_defaults(KvClient::memory());
    let job = Job {
        kb_id: "kb1".into(),
        attempt: 1,
    };
    assert!(queue.produce("jobs", &job).await);

    let delivered = queue.consume("jobs", "workers", "w1", None).await.unwrap();
    assert_eq!(delivered.parse::<Job>().unwrap(), job);
    // Crash before ack: nothing new to read, but recovery finds it
    assert!(queue.consume("jobs", "workers", "w1", None).await.is_none());

    let recovered = queue.recover_unacked("w1", "jobs", "workers").await.unwrap();
    assert_eq!(recovered.id(), delivered.id());
    assert_eq!(recovered.parse::<Job>().unwrap(), job);

    assert!(recovered.ack().await);
    assert!(queue.recover_unacked("w1", "jobs", "workers").await.is_none());
}

#[tokio::test]
async fn recovery_is_scoped_to_the_consumer() {
    let queue = ReliableQueue::with_defaults(KvClient::memory());
    assert!(queue.produce("jobs", &json!({"n": 1})).await);
    assert!(queue.consume("jobs", "workers", "w1", None).await.is_some());

    assert!(queue.recover_unacked("w2", "jobs", "workers").await.is_none());
    assert!(queue.recover_unacked("w1", "jobs", "workers").await.is_some());
}

#[tokio::test]
async fn first_consume_creates_group_at_stream_start() {
    let client = KvClient::memory();
    let queue = ReliableQueue::with_defaults(client.clone());
    for n in 0..3 {
        assert!(queue.produce("jobs", &json!({ "n": n })).await);
    }
    assert!(client.stream_groups("jobs").await.unwrap().is_empty());

    for n in 0..3 {
        let message = queue.consume("jobs", "fresh", "w1", None).await.unwrap();
        assert_eq!(message.payload()["n"], n);
        assert!(message.ack().await);
    }
    let info = queue.info("jobs", "fresh").await.unwrap().unwrap();
    assert_eq!(info.pending, 0);
    assert_eq!(info.consumers, 1);
}

#[tokio::test]
async fn missing_stream_is_nothing_to_do() {
    let queue = ReliableQueue::with_defaults(KvClient::memory());
    assert!(queue.recover_unacked("w1", "nowhere", "g").await.is_none());
    assert!(queue.info("nowhere", "g").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn blocking_consume_sees_later_produce() {
    let client = KvClient::memory();
    let queue = ReliableQueue::with_defaults(client.clone());
    assert!(queue.produce("jobs", &json!({"warmup": true})).await);
    let warmup = queue.consume("jobs", "g", "w1", None).await.unwrap();
    assert!(warmup.ack().await);

    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            queue.produce("jobs", &json!({"late": true})).await
        })
    };
    let message = queue
        .consume("jobs", "g", "w1", Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(message.payload()["late"], true);
    assert!(producer.await.unwrap());
}

#[tokio::test]
async fn delay_queue_pops_in_score_order() {
    let delays = DelayQueue::new(KvClient::memory(), "retry");
    assert!(delays.push("c", 30.0).await.unwrap());
    assert!(delays.push("a", 10.0).await.unwrap());
    assert!(delays.push("b", 20.0).await.unwrap());

    assert_eq!(delays.count(0.0, 20.0).await.unwrap(), 2);
    assert_eq!(delays.due(25.0).await.unwrap(), vec!["a", "b"]);

    let popped = delays.pop_min(2).await.unwrap();
    assert_eq!(popped, vec![("a".to_string(), 10.0), ("b".to_string(), 20.0)]);
    assert_eq!(delays.len().await.unwrap(), 1);
}
