mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use framebus::channel::{Endpoint, RemoteEndpoint};
use framebus::protocol::{MessageType, ResponseCode};
use framebus::pubsub::Subscriber;
use framebus::stream::{DeviceConfig, DeviceStream};
use framebus::Frame;
use tokio::task::JoinSet;

use common::*;

fn frame(id: &str, sequence: u64) -> Bytes {
    Frame::new(vec![0x80u8; 8 * 2], 2, 2, 8, 4)
        .with_id(id)
        .with_sequence(sequence)
        .serialize()
        .unwrap()
}

#[tokio::test]
async fn test_register_publish_and_suppress_duplicate() {
    init_tracing();
    let (_dir, ns) = namespace();

    let broker = fast_broker("pub", &ns);
    broker.start().unwrap();

    let (device, queue) = DeviceStream::with_ring_buffer(
        "pub",
        ns.clone(),
        DeviceConfig::default().subscriber(fast_subscriber_config().identifier("A1")),
    );
    device.start().unwrap();

    assert!(connected_subscribers(&broker, 1).await);
    let stats = broker.stats();
    assert_eq!(stats.subscribers[0].identifier, "A1");
    assert_eq!(stats.subscribers[0].channel_name, "pub.A1");
    assert!(eventually(|| device.subscriber().is_registered()).await);

    let bytes = frame("f1", 0);
    let report = broker.publish(bytes.clone()).await;
    assert_eq!(report.delivered, 1);
    assert_eq!(queue.len(), 1);

    // Same bytes again: acknowledged, but not handed to the sink twice
    let report = broker.publish(bytes).await;
    assert_eq!(report.delivered, 1);
    assert_eq!(queue.len(), 1);
    assert_eq!(device.stats().duplicates, 1);

    let queued = queue.dequeue().unwrap();
    assert_eq!(queued.frame.id, "f1");
    assert_eq!(queued.frame.sequence, 0);
}

#[tokio::test]
async fn test_unreachable_subscriber_does_not_block_others() {
    init_tracing();
    let (_dir, ns) = namespace();

    let broker = fast_broker("pub", &ns);
    broker.start().unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    let mut subscribers = Vec::new();
    for id in ["A", "B", "C"] {
        let subscriber =
            Subscriber::new("pub", ns.clone(), fast_subscriber_config().identifier(id));
        let received = Arc::clone(&received);
        subscriber.set_frame_handler(move |_| {
            received.fetch_add(1, Ordering::SeqCst);
        });
        subscriber.start().unwrap();
        subscribers.push(subscriber);
    }
    assert!(connected_subscribers(&broker, 3).await);

    // C disappears without deregistering
    drop(subscribers.pop());

    let report = broker.publish(frame("f1", 0)).await;
    assert_eq!(report.delivered, 2);
    assert_eq!(received.load(Ordering::SeqCst), 2);

    let report = broker.publish(frame("f2", 1)).await;
    assert_eq!(report.delivered, 2);
    assert_eq!(received.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_never_reachable_registration_is_skipped() {
    init_tracing();
    let (_dir, ns) = namespace();

    let broker = fast_broker("pub", &ns);
    broker.start().unwrap();

    // Register an identifier nobody listens for
    let mut remote = RemoteEndpoint::open(&ns, "pub").await.unwrap();
    let response = remote
        .send_request(MessageType::Register, Some(Bytes::from_static(b"ghost")))
        .await;
    assert_eq!(response.code(), ResponseCode::Success);

    let subscriber = Subscriber::new("pub", ns.clone(), fast_subscriber_config().identifier("A"));
    subscriber.set_frame_handler(|_| {});
    subscriber.start().unwrap();
    assert!(eventually(|| broker.stats().connected_count() == 1).await);

    let report = broker.publish(frame("f1", 0)).await;
    assert_eq!(report.delivered, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(broker.subscriber_count(), 2);
}

#[tokio::test]
async fn test_full_device_queue_refuses_without_blocking() {
    init_tracing();
    let (_dir, ns) = namespace();

    let broker = fast_broker("pub", &ns);
    broker.start().unwrap();

    let (device, queue) = DeviceStream::with_ring_buffer(
        "pub",
        ns.clone(),
        DeviceConfig::default()
            .queue_capacity(2)
            .subscriber(fast_subscriber_config()),
    );
    device.start().unwrap();
    assert!(connected_subscribers(&broker, 1).await);

    for seq in 0..3 {
        broker.publish(frame(&format!("f{}", seq), seq)).await;
    }

    assert_eq!(queue.len(), 2);
    assert!(queue.is_full());
    let stats = device.stats();
    assert_eq!(stats.enqueued, 2);
    assert_eq!(stats.dropped_queue_full, 1);

    // Oldest frames stay queued
    assert_eq!(queue.dequeue().unwrap().frame.id, "f0");
    assert_eq!(queue.dequeue().unwrap().frame.id, "f1");
}

#[tokio::test]
async fn test_stopped_device_refuses_frames() {
    init_tracing();
    let (_dir, ns) = namespace();

    let broker = fast_broker("pub", &ns);
    broker.start().unwrap();

    let (device, queue) = DeviceStream::with_ring_buffer(
        "pub",
        ns.clone(),
        DeviceConfig::default().subscriber(fast_subscriber_config()),
    );
    device.start().unwrap();
    assert!(connected_subscribers(&broker, 1).await);

    device.stop();
    let report = broker.publish(frame("f1", 0)).await;
    assert_eq!(report.delivered, 0);
    assert_eq!(report.failed, 1);
    assert!(queue.is_empty());

    device.start().unwrap();
    let report = broker.publish(frame("f2", 1)).await;
    assert_eq!(report.delivered, 1);
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_deregister_on_close() {
    init_tracing();
    let (_dir, ns) = namespace();

    let broker = fast_broker("pub", &ns);
    broker.start().unwrap();

    let subscriber = Subscriber::new("pub", ns.clone(), fast_subscriber_config());
    subscriber.start().unwrap();
    assert!(connected_subscribers(&broker, 1).await);

    subscriber.close().await;
    assert!(eventually(|| broker.subscriber_count() == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_handler_call_after_endpoint_close() {
    init_tracing();
    let (_dir, ns) = namespace();

    let calls = Arc::new(AtomicUsize::new(0));
    let handler = {
        let calls = Arc::clone(&calls);
        move |_id: u32, _payload: Option<Bytes>| -> Option<Bytes> {
            calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            None
        }
    };
    let endpoint = Endpoint::listen(&ns, "pub", handler).unwrap();

    let mut clients = JoinSet::new();
    for _ in 0..8 {
        let ns = ns.clone();
        clients.spawn(async move {
            if let Ok(mut remote) = RemoteEndpoint::open(&ns, "pub").await {
                remote.send_request(MessageType::Ping, None).await;
            }
        });
    }

    tokio::time::sleep(Duration::from_millis(45)).await;
    endpoint.close();
    let at_close = calls.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), at_close);
    assert!(at_close < 8, "{} calls before close", at_close);

    clients.shutdown().await;
}
