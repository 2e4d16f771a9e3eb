//! Consume side: registers with a broker and receives its frames
//!
//! The subscriber listens on `"<broker>.<identifier>"` and keeps a
//! connection to the broker. A keep-alive timer re-sends `Register`; after
//! enough consecutive failures the broker connection is thrown away and
//! rebuilt, which is how a subscriber resyncs with a restarted broker.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use bytes::Bytes;
use uuid::Uuid;

use super::config::SubscriberConfig;
use crate::channel::{ChannelNamespace, Endpoint, RequestHandler};
use crate::connection::{Connection, ConnectionStatus};
use crate::error::Result;
use crate::protocol::{subscriber_channel_name, MessageType, ResponseCode};
use crate::timer::RepeatingTimer;

/// Receives raw frame payloads pushed by the broker
pub type FrameHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Upper bound on the best-effort `Deregister` sent by `close()`
const DEREGISTER_GRACE: Duration = Duration::from_secs(1);

struct SubscriberShared {
    identifier: String,
    broker_name: String,
    channel_name: String,
    namespace: ChannelNamespace,
    config: SubscriberConfig,
    connection: Mutex<Arc<Connection>>,
    frame_handler: RwLock<Option<FrameHandler>>,
    failures: AtomicU32,
    registered: AtomicBool,
    closed: AtomicBool,
}

impl SubscriberShared {
    fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.lock_connection())
    }

    fn lock_connection(&self) -> MutexGuard<'_, Arc<Connection>> {
        self.connection.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn new_connection(&self) -> Arc<Connection> {
        Connection::new(
            self.namespace.clone(),
            self.broker_name.clone(),
            self.config.broker_connection.clone(),
        )
    }

    /// Connect to the broker and register as soon as the connection is up
    fn connect(self: &Arc<Self>, connection: &Connection) {
        let weak = Arc::downgrade(self);
        connection.connect_with(move || {
            if let Some(shared) = weak.upgrade() {
                tokio::spawn(async move {
                    shared.register().await;
                });
            }
        });
    }

    async fn register(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }

        let response = self
            .connection()
            .send_request(
                MessageType::Register,
                Some(Bytes::from(self.identifier.clone())),
            )
            .await;
        let accepted = response.is_success() && response.code().is_accepted();

        if accepted {
            self.failures.store(0, Ordering::SeqCst);
            if !self.registered.swap(true, Ordering::SeqCst) {
                tracing::info!(
                    broker = %self.broker_name,
                    identifier = %self.identifier,
                    code = ?response.code(),
                    "Registered with broker"
                );
            }
        } else {
            self.registered.store(false, Ordering::SeqCst);
            tracing::debug!(
                broker = %self.broker_name,
                status = ?response.status,
                code = ?response.code(),
                "Registration not accepted"
            );
        }
        accepted
    }

    /// Keep-alive tick
    async fn reregister(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        if self.connection().status() == ConnectionStatus::Connecting {
            tracing::trace!(broker = %self.broker_name, "Broker connection still retrying");
            return;
        }

        if self.register().await {
            return;
        }

        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures < self.config.reset_threshold {
            return;
        }
        self.failures.store(0, Ordering::SeqCst);

        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        tracing::info!(
            broker = %self.broker_name,
            failures = failures,
            "Broker unreachable, rebuilding connection"
        );

        let fresh = self.new_connection();
        let stale = std::mem::replace(&mut *self.lock_connection(), Arc::clone(&fresh));
        stale.close();
        self.connect(&fresh);
    }

    fn handle_receive_frame(&self, payload: Option<Bytes>) -> ResponseCode {
        let handler = self.frame_handler.read().ok().and_then(|guard| guard.clone());
        match (handler, payload) {
            (Some(handler), Some(frame)) => {
                handler(frame);
                ResponseCode::Ok
            }
            _ => ResponseCode::NotAvailable,
        }
    }
}

struct SubscriberHandler(Arc<SubscriberShared>);

impl RequestHandler for SubscriberHandler {
    fn on_request(&self, message_id: u32, payload: Option<Bytes>) -> Option<Bytes> {
        let code = match MessageType::from_id(message_id) {
            Some(MessageType::ReceiveFrame) => self.0.handle_receive_frame(payload),
            Some(MessageType::Ping) => ResponseCode::Ok,
            _ => {
                tracing::debug!(channel = %self.0.channel_name, message_id = message_id, "Unhandled request");
                ResponseCode::Unknown
            }
        };
        Some(code.to_bytes())
    }
}

/// Receives frames from a broker
pub struct Subscriber {
    shared: Arc<SubscriberShared>,
    endpoint: Mutex<Option<Endpoint>>,
    reregister_timer: RepeatingTimer,
}

impl Subscriber {
    /// Create a stopped subscriber for the broker listening under
    /// `broker_name`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        broker_name: impl Into<String>,
        namespace: ChannelNamespace,
        config: SubscriberConfig,
    ) -> Self {
        let broker_name = broker_name.into();
        let identifier = config
            .identifier
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let channel_name = subscriber_channel_name(&broker_name, &identifier);

        let connection = Connection::new(
            namespace.clone(),
            broker_name.clone(),
            config.broker_connection.clone(),
        );

        let shared = Arc::new(SubscriberShared {
            identifier,
            broker_name,
            channel_name,
            namespace,
            connection: Mutex::new(connection),
            frame_handler: RwLock::new(None),
            failures: AtomicU32::new(0),
            registered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            config,
        });

        let weak = Arc::downgrade(&shared);
        let reregister_timer = RepeatingTimer::new(shared.config.reregister_interval, move || {
            let weak = weak.clone();
            async move {
                if let Some(shared) = weak.upgrade() {
                    shared.reregister().await;
                }
            }
        });

        Self {
            shared,
            endpoint: Mutex::new(None),
            reregister_timer,
        }
    }

    /// Identifier sent with `Register`
    pub fn identifier(&self) -> &str {
        &self.shared.identifier
    }

    /// Channel name this subscriber receives frames on
    pub fn channel_name(&self) -> &str {
        &self.shared.channel_name
    }

    pub fn broker_name(&self) -> &str {
        &self.shared.broker_name
    }

    /// Install the callback that receives frame payloads
    pub fn set_frame_handler<F>(&self, handler: F)
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        if let Ok(mut guard) = self.shared.frame_handler.write() {
            *guard = Some(Arc::new(handler));
        }
    }

    /// Remove the frame callback; frames are then answered `NotAvailable`
    pub fn clear_frame_handler(&self) {
        if let Ok(mut guard) = self.shared.frame_handler.write() {
            *guard = None;
        }
    }

    /// Whether the last registration was accepted by the broker
    pub fn is_registered(&self) -> bool {
        self.shared.registered.load(Ordering::SeqCst)
    }

    /// Status of the current broker connection
    pub fn connection_status(&self) -> ConnectionStatus {
        self.shared.connection().status()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Open the receiving endpoint, connect to the broker and register.
    ///
    /// Calling it again after `stop()` resumes the keep-alive.
    pub fn start(&self) -> Result<()> {
        if self.is_closed() {
            return Err(crate::error::Error::InvalidState("subscriber is closed"));
        }

        {
            let mut endpoint = self.lock_endpoint();
            if endpoint.is_none() {
                *endpoint = Some(Endpoint::listen(
                    &self.shared.namespace,
                    &self.shared.channel_name,
                    SubscriberHandler(Arc::clone(&self.shared)),
                )?);
                tracing::info!(channel = %self.shared.channel_name, "Subscriber listening");
            }
        }

        let connection = self.shared.connection();
        self.shared.connect(&connection);
        self.reregister_timer.resume();
        Ok(())
    }

    /// Suspend the keep-alive.
    ///
    /// The endpoint stays open so frames already in flight are still
    /// acknowledged.
    pub fn stop(&self) {
        self.reregister_timer.suspend();
    }

    /// Pull the broker's current frame
    pub async fn get_frame(&self) -> Option<Bytes> {
        let response = self
            .shared
            .connection()
            .send_request(MessageType::GetFrame, None)
            .await;
        if response.is_success() {
            response.into_data()
        } else {
            None
        }
    }

    /// Tear everything down. Idempotent.
    ///
    /// Sends a best-effort `Deregister` first so the broker stops delivering
    /// right away instead of waiting for its sends to fail.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reregister_timer.cancel();

        let connection = self.shared.connection();
        let deregister = connection.send_request(
            MessageType::Deregister,
            Some(Bytes::from(self.shared.identifier.clone())),
        );
        if tokio::time::timeout(DEREGISTER_GRACE, deregister).await.is_err() {
            tracing::debug!(broker = %self.shared.broker_name, "Deregister timed out");
        }

        self.teardown();
    }

    fn teardown(&self) {
        self.reregister_timer.cancel();
        self.shared.connection().close();
        if let Some(endpoint) = self.lock_endpoint().take() {
            endpoint.close();
        }
        self.shared.registered.store(false, Ordering::SeqCst);
        tracing::debug!(channel = %self.shared.channel_name, "Subscriber closed");
    }

    fn lock_endpoint(&self) -> MutexGuard<'_, Option<Endpoint>> {
        self.endpoint.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.teardown();
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("identifier", &self.shared.identifier)
            .field("broker", &self.shared.broker_name)
            .field("registered", &self.is_registered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::pubsub::{Broker, BrokerConfig};

    fn fast_connection() -> ConnectionConfig {
        ConnectionConfig::default()
            .retry_interval(Duration::from_millis(20))
            .timeout(Duration::from_millis(300))
    }

    fn fast_config() -> SubscriberConfig {
        SubscriberConfig::default()
            .broker_connection(fast_connection())
            .reregister_interval(Duration::from_millis(50))
    }

    fn fast_broker(name: &str, ns: &ChannelNamespace) -> Broker {
        Broker::new(name, ns.clone())
            .with_config(BrokerConfig::default().subscriber_connection(fast_connection()))
    }

    async fn wait_until<F: Fn() -> bool>(condition: F, budget: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + budget;
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_identifier_and_channel_name() {
        let dir = TempDir::new().unwrap();
        let ns = ChannelNamespace::in_dir(dir.path());

        let fixed = Subscriber::new("pub", ns.clone(), SubscriberConfig::default().identifier("A1"));
        assert_eq!(fixed.identifier(), "A1");
        assert_eq!(fixed.channel_name(), "pub.A1");

        let generated = Subscriber::new("pub", ns, SubscriberConfig::default());
        assert!(Uuid::parse_str(generated.identifier()).is_ok());
        assert!(generated.channel_name().starts_with("pub."));
    }

    #[tokio::test]
    async fn test_receive_frame_with_and_without_handler() {
        let dir = TempDir::new().unwrap();
        let ns = ChannelNamespace::in_dir(dir.path());
        let subscriber = Subscriber::new("pub", ns, SubscriberConfig::default().identifier("A1"));
        let handler = SubscriberHandler(Arc::clone(&subscriber.shared));
        let frame = Some(Bytes::from_static(b"frame"));

        let reply = handler.on_request(MessageType::ReceiveFrame.id(), frame.clone());
        assert_eq!(reply.as_deref(), Some(&[ResponseCode::NotAvailable.as_byte()][..]));

        let received = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&received);
        subscriber.set_frame_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let reply = handler.on_request(MessageType::ReceiveFrame.id(), frame.clone());
        assert_eq!(reply.as_deref(), Some(&[ResponseCode::Ok.as_byte()][..]));
        assert_eq!(received.load(Ordering::SeqCst), 1);

        subscriber.clear_frame_handler();
        let reply = handler.on_request(MessageType::ReceiveFrame.id(), frame);
        assert_eq!(reply.as_deref(), Some(&[ResponseCode::NotAvailable.as_byte()][..]));

        let reply = handler.on_request(MessageType::Ping.id(), None);
        assert_eq!(reply.as_deref(), Some(&[ResponseCode::Ok.as_byte()][..]));
    }

    #[tokio::test]
    async fn test_start_registers_with_broker() {
        let dir = TempDir::new().unwrap();
        let ns = ChannelNamespace::in_dir(dir.path());
        let broker = fast_broker("pub", &ns);
        broker.start().unwrap();

        let subscriber = Subscriber::new("pub", ns, fast_config().identifier("A1"));
        subscriber.start().unwrap();

        assert!(wait_until(|| subscriber.is_registered(), Duration::from_secs(1)).await);
        assert_eq!(broker.subscriber_count(), 1);
        assert_eq!(broker.stats().subscribers[0].channel_name, "pub.A1");
    }

    #[tokio::test]
    async fn test_get_frame_from_broker() {
        let dir = TempDir::new().unwrap();
        let ns = ChannelNamespace::in_dir(dir.path());
        let broker = fast_broker("pub", &ns).with_frame_provider(|| Some(Bytes::from_static(b"current")));
        broker.start().unwrap();

        let subscriber = Subscriber::new("pub", ns, fast_config());
        assert!(subscriber.get_frame().await.is_none());

        subscriber.start().unwrap();
        assert!(wait_until(|| subscriber.is_registered(), Duration::from_secs(1)).await);

        let frame = subscriber.get_frame().await;
        assert_eq!(frame.as_deref(), Some(&b"current"[..]));
    }

    #[tokio::test]
    async fn test_resyncs_after_broker_restart() {
        let dir = TempDir::new().unwrap();
        let ns = ChannelNamespace::in_dir(dir.path());
        let broker = fast_broker("pub", &ns);
        broker.start().unwrap();

        let subscriber = Subscriber::new("pub", ns.clone(), fast_config().identifier("A1"));
        subscriber.start().unwrap();
        assert!(wait_until(|| subscriber.is_registered(), Duration::from_secs(1)).await);

        // Broker process goes away and a fresh one takes the name
        drop(broker);
        let restarted = fast_broker("pub", &ns);
        restarted.start().unwrap();
        assert_eq!(restarted.subscriber_count(), 0);

        assert!(wait_until(|| restarted.subscriber_count() == 1, Duration::from_secs(2)).await);
        assert!(wait_until(|| subscriber.is_registered(), Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_reset_threshold_tolerates_single_failure() {
        let dir = TempDir::new().unwrap();
        let ns = ChannelNamespace::in_dir(dir.path());
        let subscriber = Subscriber::new(
            "pub",
            ns.clone(),
            fast_config()
                .reregister_interval(Duration::from_secs(60))
                .reset_threshold(2),
        );
        let broker = fast_broker("pub", &ns);
        broker.start().unwrap();

        subscriber.start().unwrap();
        assert!(wait_until(|| subscriber.is_registered(), Duration::from_secs(1)).await);
        let original = subscriber.shared.connection();

        broker.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;

        subscriber.shared.reregister().await;
        assert!(Arc::ptr_eq(&original, &subscriber.shared.connection()));
        assert!(!subscriber.is_registered());

        subscriber.shared.reregister().await;
        assert!(!Arc::ptr_eq(&original, &subscriber.shared.connection()));
        assert_eq!(original.status(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn test_close_deregisters_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let ns = ChannelNamespace::in_dir(dir.path());
        let broker = fast_broker("pub", &ns);
        broker.start().unwrap();

        let subscriber = Subscriber::new("pub", ns.clone(), fast_config().identifier("A1"));
        subscriber.start().unwrap();
        assert!(wait_until(|| broker.subscriber_count() == 1, Duration::from_secs(1)).await);

        subscriber.close().await;
        subscriber.close().await;

        assert!(subscriber.is_closed());
        assert_eq!(broker.subscriber_count(), 0);
        assert!(!ns.path_for("pub.A1").unwrap().exists());
        assert!(subscriber.start().is_err());
    }

    #[tokio::test]
    async fn test_stop_keeps_endpoint_open() {
        let dir = TempDir::new().unwrap();
        let ns = ChannelNamespace::in_dir(dir.path());
        let subscriber = Subscriber::new("pub", ns.clone(), fast_config().identifier("A1"));

        subscriber.start().unwrap();
        subscriber.stop();

        assert!(ns.path_for("pub.A1").unwrap().exists());
    }
}
