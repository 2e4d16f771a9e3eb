//! Shared helpers for integration tests

#![allow(dead_code)]

use std::time::Duration;

use framebus::channel::ChannelNamespace;
use framebus::connection::ConnectionConfig;
use framebus::pubsub::{Broker, BrokerConfig, SubscriberConfig};
use tempfile::TempDir;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A namespace in a fresh temporary directory
pub fn namespace() -> (TempDir, ChannelNamespace) {
    let dir = TempDir::new().unwrap();
    let ns = ChannelNamespace::in_dir(dir.path());
    (dir, ns)
}

pub fn fast_connection() -> ConnectionConfig {
    ConnectionConfig::default()
        .retry_interval(Duration::from_millis(20))
        .timeout(Duration::from_millis(500))
}

pub fn fast_broker_config() -> BrokerConfig {
    BrokerConfig::default().subscriber_connection(fast_connection())
}

pub fn fast_subscriber_config() -> SubscriberConfig {
    SubscriberConfig::default()
        .broker_connection(fast_connection())
        .reregister_interval(Duration::from_millis(100))
}

pub fn fast_broker(name: &str, ns: &ChannelNamespace) -> Broker {
    Broker::new(name, ns.clone()).with_config(fast_broker_config())
}

/// Poll `condition` every few milliseconds for up to two seconds
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Wait until `broker` has `count` subscribers, all connected
pub async fn connected_subscribers(broker: &Broker, count: usize) -> bool {
    eventually(|| {
        let stats = broker.stats();
        stats.subscriber_count() == count && stats.connected_count() == count
    })
    .await
}
