//! Publish side: accepts registrations and fans frames out to subscribers
//!
//! ```text
//!  Subscriber "A1" ──Register("A1")──► Broker "pub"
//!                                         │ creates Connection("pub.A1")
//!  Subscriber endpoint "pub.A1" ◄──ReceiveFrame(bytes)── publish()
//! ```

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use tokio::task::JoinSet;

use super::config::BrokerConfig;
use super::subscribers::{Registration, SubscriberSet};
use crate::channel::{ChannelNamespace, Endpoint, RequestHandler};
use crate::connection::{Connection, ConnectionStatus};
use crate::error::Result;
use crate::protocol::{subscriber_channel_name, MessageType, ResponseCode};
use crate::stats::{BrokerCounters, BrokerStats, SubscriberMetrics};

/// Supplies the current frame for `GetFrame` requests
pub type FrameProvider = Arc<dyn Fn() -> Option<Bytes> + Send + Sync>;

/// Receives frames pushed to the broker with `ReceiveFrame`
pub type FrameSink = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Result of one `publish()` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that acknowledged the frame
    pub delivered: usize,
    /// Subscribers whose request failed or was refused
    pub failed: usize,
    /// Subscribers not connected at publish time
    pub skipped: usize,
}

impl PublishReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// State reachable from the endpoint's dispatch task
struct BrokerShared {
    name: String,
    namespace: ChannelNamespace,
    config: BrokerConfig,
    subscribers: SubscriberSet,
    frame_provider: RwLock<Option<FrameProvider>>,
    frame_sink: RwLock<Option<FrameSink>>,
    counters: BrokerCounters,
}

impl BrokerShared {
    fn handle_register(&self, payload: Option<Bytes>) -> ResponseCode {
        let identifier = match parse_identifier(payload) {
            Some(identifier) => identifier,
            None => {
                tracing::warn!(channel = %self.name, "Register without a valid identifier");
                return ResponseCode::NotAvailable;
            }
        };

        let channel_name = subscriber_channel_name(&self.name, &identifier);
        let (registration, connection) = self.subscribers.register(&identifier, || {
            Connection::new(
                self.namespace.clone(),
                channel_name.clone(),
                self.config.subscriber_connection.clone(),
            )
        });

        match registration {
            Registration::New | Registration::Replaced => {
                tracing::info!(
                    channel = %self.name,
                    subscriber = %channel_name,
                    replaced = registration == Registration::Replaced,
                    "Subscriber registered"
                );
                connection.connect();
                ResponseCode::Success
            }
            Registration::Existing => {
                // Keep-alive; nudge a connection that lost its subscriber
                if connection.status() == ConnectionStatus::Disconnected {
                    connection.connect();
                }
                tracing::trace!(channel = %self.name, subscriber = %channel_name, "Subscriber re-registered");
                ResponseCode::Ok
            }
        }
    }

    fn handle_deregister(&self, payload: Option<Bytes>) -> ResponseCode {
        let Some(identifier) = parse_identifier(payload) else {
            return ResponseCode::NotAvailable;
        };

        match self.subscribers.remove(&identifier) {
            Some(connection) => {
                connection.close();
                tracing::info!(
                    channel = %self.name,
                    subscriber = %connection.remote_name(),
                    "Subscriber deregistered"
                );
                ResponseCode::Success
            }
            None => ResponseCode::NotAvailable,
        }
    }

    fn handle_get_frame(&self) -> Option<Bytes> {
        let provider = self
            .frame_provider
            .read()
            .ok()
            .and_then(|guard| guard.clone());
        provider.and_then(|provide| provide())
    }

    fn handle_receive_frame(&self, payload: Option<Bytes>) -> ResponseCode {
        let sink = self.frame_sink.read().ok().and_then(|guard| guard.clone());
        match (sink, payload) {
            (Some(sink), Some(frame)) => {
                sink(frame);
                ResponseCode::Ok
            }
            _ => ResponseCode::NotAvailable,
        }
    }
}

struct BrokerHandler(Arc<BrokerShared>);

impl RequestHandler for BrokerHandler {
    fn on_request(&self, message_id: u32, payload: Option<Bytes>) -> Option<Bytes> {
        let shared = &self.0;
        let code = match MessageType::from_id(message_id) {
            Some(MessageType::Register) => shared.handle_register(payload),
            Some(MessageType::Deregister) => shared.handle_deregister(payload),
            Some(MessageType::GetFrame) => return shared.handle_get_frame(),
            Some(MessageType::ReceiveFrame) => shared.handle_receive_frame(payload),
            Some(MessageType::Ping) => ResponseCode::Ok,
            Some(MessageType::KillServer) => {
                tracing::warn!(channel = %shared.name, "Ignoring remote shutdown request");
                ResponseCode::NotAvailable
            }
            Some(ty) => {
                tracing::debug!(channel = %shared.name, message_type = ?ty, "Unhandled message type");
                ResponseCode::Unknown
            }
            None => {
                tracing::debug!(channel = %shared.name, message_id = message_id, "Unknown message id");
                ResponseCode::Unknown
            }
        };
        Some(code.to_bytes())
    }
}

/// Accepts subscriber registrations and broadcasts frames to them
pub struct Broker {
    shared: Arc<BrokerShared>,
    endpoint: Mutex<Option<Endpoint>>,
}

impl Broker {
    /// Create a stopped broker that will listen under `name`
    pub fn new(name: impl Into<String>, namespace: ChannelNamespace) -> Self {
        Self {
            shared: Arc::new(BrokerShared {
                name: name.into(),
                namespace,
                config: BrokerConfig::default(),
                subscribers: SubscriberSet::new(),
                frame_provider: RwLock::new(None),
                frame_sink: RwLock::new(None),
                counters: BrokerCounters::new(),
            }),
            endpoint: Mutex::new(None),
        }
    }

    /// Replace the configuration. Only effective before `start()`.
    pub fn with_config(mut self, config: BrokerConfig) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.config = config,
            None => tracing::warn!(channel = %self.shared.name, "Config ignored on a started broker"),
        }
        self
    }

    /// Answer `GetFrame` with whatever `provider` returns
    pub fn with_frame_provider<F>(self, provider: F) -> Self
    where
        F: Fn() -> Option<Bytes> + Send + Sync + 'static,
    {
        self.set_frame_provider(Some(Arc::new(provider)));
        self
    }

    /// Accept `ReceiveFrame` requests and hand them to `sink`
    pub fn with_frame_sink<F>(self, sink: F) -> Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.set_frame_sink(Some(Arc::new(sink)));
        self
    }

    pub fn set_frame_provider(&self, provider: Option<FrameProvider>) {
        if let Ok(mut guard) = self.shared.frame_provider.write() {
            *guard = provider;
        }
    }

    pub fn set_frame_sink(&self, sink: Option<FrameSink>) {
        if let Ok(mut guard) = self.shared.frame_sink.write() {
            *guard = sink;
        }
    }

    /// Channel name the broker listens on
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn namespace(&self) -> &ChannelNamespace {
        &self.shared.namespace
    }

    /// Open the listening endpoint. No-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut endpoint = self.lock_endpoint();
        if endpoint.is_some() {
            return Ok(());
        }

        let listening = Endpoint::listen(
            &self.shared.namespace,
            &self.shared.name,
            BrokerHandler(Arc::clone(&self.shared)),
        )?;
        *endpoint = Some(listening);

        tracing::info!(channel = %self.shared.name, "Broker started");
        Ok(())
    }

    /// Close the listening endpoint. Registered subscribers are kept.
    pub fn stop(&self) {
        if let Some(endpoint) = self.lock_endpoint().take() {
            endpoint.close();
            tracing::info!(channel = %self.shared.name, "Broker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_endpoint().is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.len()
    }

    /// Send `frame` to every registered subscriber.
    ///
    /// Sends run concurrently; a failing subscriber never affects the
    /// others. Disconnected subscribers are skipped and asked to reconnect.
    pub async fn publish(&self, frame: Bytes) -> PublishReport {
        let shared = &self.shared;
        shared.counters.frames_published.fetch_add(1, Ordering::Relaxed);

        let mut report = PublishReport::default();
        let mut sends = JoinSet::new();

        for (_, connection) in shared.subscribers.snapshot() {
            match connection.status() {
                ConnectionStatus::Connected => {
                    let frame = frame.clone();
                    sends.spawn(async move {
                        let response = connection
                            .send_request(MessageType::ReceiveFrame, Some(frame))
                            .await;
                        (connection, response)
                    });
                }
                ConnectionStatus::Disconnected => {
                    connection.connect();
                    report.skipped += 1;
                }
                _ => report.skipped += 1,
            }
        }

        while let Some(joined) = sends.join_next().await {
            let (connection, response) = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(channel = %shared.name, error = %e, "Publish task failed");
                    report.failed += 1;
                    continue;
                }
            };

            if response.is_success() && response.code().is_accepted() {
                report.delivered += 1;
            } else {
                report.failed += 1;
                tracing::debug!(
                    channel = %shared.name,
                    subscriber = %connection.remote_name(),
                    status = ?response.status,
                    code = ?response.code(),
                    "Frame not delivered"
                );
            }
        }

        shared
            .counters
            .deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        shared
            .counters
            .delivery_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);

        report
    }

    /// Per-subscriber metrics and delivery counters
    pub fn stats(&self) -> BrokerStats {
        let shared = &self.shared;
        let mut subscribers: Vec<SubscriberMetrics> = shared
            .subscribers
            .snapshot()
            .into_iter()
            .map(|(identifier, connection)| SubscriberMetrics {
                identifier,
                channel_name: connection.remote_name().to_string(),
                status: connection.status(),
                last_response: connection.last_response_time(),
            })
            .collect();
        subscribers.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        BrokerStats {
            channel_name: shared.name.clone(),
            running: self.is_running(),
            uptime: shared.counters.started_at.elapsed(),
            frames_published: shared.counters.frames_published.load(Ordering::Relaxed),
            deliveries: shared.counters.deliveries.load(Ordering::Relaxed),
            delivery_failures: shared.counters.delivery_failures.load(Ordering::Relaxed),
            subscribers,
        }
    }

    fn lock_endpoint(&self) -> std::sync::MutexGuard<'_, Option<Endpoint>> {
        self.endpoint.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.stop();
        for connection in self.shared.subscribers.drain() {
            connection.close();
        }
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn parse_identifier(payload: Option<Bytes>) -> Option<String> {
    let payload = payload?;
    let identifier = std::str::from_utf8(&payload).ok()?;
    if identifier.is_empty() {
        return None;
    }
    Some(identifier.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::channel::RemoteEndpoint;
    use crate::connection::ConnectionConfig;

    fn fast_config() -> BrokerConfig {
        BrokerConfig::default().subscriber_connection(
            ConnectionConfig::default()
                .retry_interval(Duration::from_millis(20))
                .timeout(Duration::from_millis(500)),
        )
    }

    fn handler(broker: &Broker) -> BrokerHandler {
        BrokerHandler(Arc::clone(&broker.shared))
    }

    fn code(reply: Option<Bytes>) -> Option<ResponseCode> {
        reply.and_then(|b| match b.as_ref() {
            [byte] => ResponseCode::from_byte(*byte),
            _ => None,
        })
    }

    fn ack(code: ResponseCode) -> impl Fn(u32, Option<Bytes>) -> Option<Bytes> + Send + Sync {
        move |_, _| Some(code.to_bytes())
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let dir = TempDir::new().unwrap();
        let broker = Broker::new("pub", ChannelNamespace::in_dir(dir.path()));

        assert!(!broker.is_running());
        broker.start().unwrap();
        broker.start().unwrap();
        assert!(broker.is_running());

        broker.stop();
        broker.stop();
        assert!(!broker.is_running());

        // Name is free again
        broker.start().unwrap();
        assert!(broker.is_running());
    }

    #[tokio::test]
    async fn test_register_new_then_existing() {
        let dir = TempDir::new().unwrap();
        let broker = Broker::new("pub", ChannelNamespace::in_dir(dir.path())).with_config(fast_config());
        let handler = handler(&broker);
        let id = Some(Bytes::from_static(b"A1"));

        let first = handler.on_request(MessageType::Register.id(), id.clone());
        assert_eq!(code(first), Some(ResponseCode::Success));

        let second = handler.on_request(MessageType::Register.id(), id);
        assert_eq!(code(second), Some(ResponseCode::Ok));

        let stats = broker.stats();
        assert_eq!(stats.subscriber_count(), 1);
        assert_eq!(stats.subscribers[0].channel_name, "pub.A1");
        assert_eq!(stats.subscribers[0].status, ConnectionStatus::Connecting);
    }

    #[tokio::test]
    async fn test_register_without_identifier() {
        let dir = TempDir::new().unwrap();
        let broker = Broker::new("pub", ChannelNamespace::in_dir(dir.path()));
        let handler = handler(&broker);

        let reply = handler.on_request(MessageType::Register.id(), None);
        assert_eq!(code(reply), Some(ResponseCode::NotAvailable));

        let reply = handler.on_request(MessageType::Register.id(), Some(Bytes::from_static(&[0xff, 0xfe])));
        assert_eq!(code(reply), Some(ResponseCode::NotAvailable));
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_register_replaces_closed_connection() {
        let dir = TempDir::new().unwrap();
        let broker = Broker::new("pub", ChannelNamespace::in_dir(dir.path())).with_config(fast_config());
        let handler = handler(&broker);
        let id = Some(Bytes::from_static(b"A1"));

        handler.on_request(MessageType::Register.id(), id.clone());
        broker.shared.subscribers.get("A1").unwrap().close();

        let reply = handler.on_request(MessageType::Register.id(), id);
        assert_eq!(code(reply), Some(ResponseCode::Success));
        assert_eq!(
            broker.shared.subscribers.get("A1").unwrap().status(),
            ConnectionStatus::Connecting
        );
    }

    #[tokio::test]
    async fn test_deregister() {
        let dir = TempDir::new().unwrap();
        let broker = Broker::new("pub", ChannelNamespace::in_dir(dir.path())).with_config(fast_config());
        let handler = handler(&broker);
        let id = Some(Bytes::from_static(b"A1"));

        handler.on_request(MessageType::Register.id(), id.clone());
        let connection = broker.shared.subscribers.get("A1").unwrap();

        let reply = handler.on_request(MessageType::Deregister.id(), id.clone());
        assert_eq!(code(reply), Some(ResponseCode::Success));
        assert_eq!(connection.status(), ConnectionStatus::Closed);
        assert_eq!(broker.subscriber_count(), 0);

        let reply = handler.on_request(MessageType::Deregister.id(), id);
        assert_eq!(code(reply), Some(ResponseCode::NotAvailable));
    }

    #[tokio::test]
    async fn test_control_messages() {
        let dir = TempDir::new().unwrap();
        let broker = Broker::new("pub", ChannelNamespace::in_dir(dir.path()));
        let handler = handler(&broker);

        assert_eq!(code(handler.on_request(MessageType::Ping.id(), None)), Some(ResponseCode::Ok));
        assert_eq!(
            code(handler.on_request(MessageType::KillServer.id(), None)),
            Some(ResponseCode::NotAvailable)
        );
        assert_eq!(code(handler.on_request(0x42, None)), Some(ResponseCode::Unknown));
        assert_eq!(
            code(handler.on_request(MessageType::ReceiveData.id(), None)),
            Some(ResponseCode::Unknown)
        );
    }

    #[tokio::test]
    async fn test_get_frame_uses_provider() {
        let dir = TempDir::new().unwrap();
        let ns = ChannelNamespace::in_dir(dir.path());

        let empty = Broker::new("empty", ns.clone());
        assert!(handler(&empty).on_request(MessageType::GetFrame.id(), None).is_none());

        let broker = Broker::new("pub", ns).with_frame_provider(|| Some(Bytes::from_static(b"frame")));
        let reply = handler(&broker).on_request(MessageType::GetFrame.id(), None);
        assert_eq!(reply.as_deref(), Some(&b"frame"[..]));
    }

    #[tokio::test]
    async fn test_receive_frame_uses_sink() {
        let dir = TempDir::new().unwrap();
        let ns = ChannelNamespace::in_dir(dir.path());
        let frame = Some(Bytes::from_static(b"frame"));

        let no_sink = Broker::new("a", ns.clone());
        let reply = handler(&no_sink).on_request(MessageType::ReceiveFrame.id(), frame.clone());
        assert_eq!(code(reply), Some(ResponseCode::NotAvailable));

        let received = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&received);
        let broker = Broker::new("b", ns).with_frame_sink(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let reply = handler(&broker).on_request(MessageType::ReceiveFrame.id(), frame);
        assert_eq!(code(reply), Some(ResponseCode::Ok));
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_register_over_the_wire() {
        let dir = TempDir::new().unwrap();
        let ns = ChannelNamespace::in_dir(dir.path());
        let broker = Broker::new("pub", ns.clone()).with_config(fast_config());
        broker.start().unwrap();

        let mut remote = RemoteEndpoint::open(&ns, "pub").await.unwrap();
        let response = remote
            .send_request(MessageType::Register, Some(Bytes::from_static(b"A1")))
            .await;

        assert!(response.is_success());
        assert_eq!(response.code(), ResponseCode::Success);
        assert_eq!(broker.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_skips_unreachable_subscriber() {
        let dir = TempDir::new().unwrap();
        let ns = ChannelNamespace::in_dir(dir.path());
        let broker = Broker::new("pub", ns.clone()).with_config(fast_config());
        let handler = handler(&broker);

        let _a = Endpoint::listen(&ns, "pub.A", ack(ResponseCode::Ok)).unwrap();
        let _b = Endpoint::listen(&ns, "pub.B", ack(ResponseCode::Ok)).unwrap();
        for id in ["A", "B", "C"] {
            handler.on_request(MessageType::Register.id(), Some(Bytes::from(id)));
        }

        // A and B connect on the first retry tick; C never will
        tokio::time::sleep(Duration::from_millis(100)).await;

        let report = broker.publish(Bytes::from_static(b"frame")).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);

        let stats = broker.stats();
        assert_eq!(stats.frames_published, 1);
        assert_eq!(stats.deliveries, 2);
        assert_eq!(stats.connected_count(), 2);
    }

    #[tokio::test]
    async fn test_publish_counts_refusals_and_failures() {
        let dir = TempDir::new().unwrap();
        let ns = ChannelNamespace::in_dir(dir.path());
        let broker = Broker::new("pub", ns.clone()).with_config(fast_config());
        let handler = handler(&broker);

        let _a = Endpoint::listen(&ns, "pub.A", ack(ResponseCode::NotAvailable)).unwrap();
        let b = Endpoint::listen(&ns, "pub.B", ack(ResponseCode::Ok)).unwrap();
        for id in ["A", "B"] {
            handler.on_request(MessageType::Register.id(), Some(Bytes::from(id)));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        b.close();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = broker.publish(Bytes::from_static(b"frame")).await;
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, 2);

        // B dropped to Disconnected and the next publish asks it to reconnect
        let b_conn = broker.shared.subscribers.get("B").unwrap();
        assert_eq!(b_conn.status(), ConnectionStatus::Disconnected);
        let report = broker.publish(Bytes::from_static(b"frame")).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(b_conn.status(), ConnectionStatus::Connecting);
    }
}
