//! Outbound connection to a named endpoint
//!
//! A [`Connection`] resolves a remote channel by name, retrying on a fixed
//! interval until it succeeds, and then carries request/reply exchanges over
//! the resulting handle. Transport failures during a request flip it to
//! `Disconnected`; the owner decides when to `connect()` again.

pub mod config;
pub mod state;

pub use config::ConnectionConfig;
pub use state::ConnectionStatus;

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::watch;

use crate::channel::{ChannelNamespace, RemoteEndpoint};
use crate::protocol::{MessageType, Response};
use crate::timer::RepeatingTimer;

/// Invoked once when the connection next reaches `Connected`
pub type OnConnect = Box<dyn FnOnce() + Send>;

struct Inner {
    status: ConnectionStatus,
    attempts: u32,
    last_response: Option<Instant>,
    on_connect: Vec<OnConnect>,
}

/// Client side of a named channel with retry
pub struct Connection {
    namespace: ChannelNamespace,
    remote_name: String,
    config: ConnectionConfig,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<ConnectionStatus>,
    remote: tokio::sync::Mutex<Option<RemoteEndpoint>>,
    /// Held while on-connect callbacks run
    firing: Mutex<()>,
    retry_timer: RepeatingTimer,
}

impl Connection {
    /// Create a connection in the `Ready` state.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        namespace: ChannelNamespace,
        remote_name: impl Into<String>,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        let remote_name = remote_name.into();
        let (status_tx, _) = watch::channel(ConnectionStatus::Ready);

        Arc::new_cyclic(|weak: &Weak<Connection>| {
            let weak = weak.clone();
            let retry_timer = RepeatingTimer::new(config.retry_interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(connection) = weak.upgrade() {
                        connection.attempt_connect().await;
                    }
                }
            });

            Self {
                namespace,
                remote_name,
                config,
                inner: Mutex::new(Inner {
                    status: ConnectionStatus::Ready,
                    attempts: 0,
                    last_response: None,
                    on_connect: Vec::new(),
                }),
                status_tx,
                remote: tokio::sync::Mutex::new(None),
                firing: Mutex::new(()),
                retry_timer,
            }
        })
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.lock().status
    }

    /// Watch status transitions
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Failed attempts since the last successful connect
    pub fn connection_attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Time of the last successful connect or request
    pub fn last_response_time(&self) -> Option<Instant> {
        self.lock().last_response
    }

    /// Start connecting.
    ///
    /// No-op while already `Connecting` or `Connected`, and once `Closed`.
    pub fn connect(&self) {
        self.connect_inner(None);
    }

    /// Start connecting and run `on_connect` once connected.
    ///
    /// If already `Connected` the callback runs immediately. A `Closed`
    /// connection drops the callback without calling it. The callback must
    /// not close this connection.
    pub fn connect_with<F>(&self, on_connect: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.connect_inner(Some(Box::new(on_connect)));
    }

    fn connect_inner(&self, on_connect: Option<OnConnect>) {
        let mut inner = self.lock();
        match inner.status {
            ConnectionStatus::Connected => {
                drop(inner);
                if let Some(callback) = on_connect {
                    callback();
                }
            }
            ConnectionStatus::Connecting => {
                inner.on_connect.extend(on_connect);
            }
            ConnectionStatus::Ready | ConnectionStatus::Disconnected => {
                inner.on_connect.extend(on_connect);
                self.set_status(&mut inner, ConnectionStatus::Connecting);
                drop(inner);

                tracing::debug!(channel = %self.remote_name, "Connecting");
                self.retry_timer.resume();
            }
            ConnectionStatus::Closed => {
                tracing::trace!(channel = %self.remote_name, "Connect on closed connection ignored");
            }
        }
    }

    /// Try once to open the remote handle.
    ///
    /// This is what the retry timer runs. Returns whether the connection is
    /// `Connected` afterwards.
    pub async fn attempt_connect(&self) -> bool {
        let mut remote = self.remote.lock().await;

        {
            let mut inner = self.lock();
            match inner.status {
                ConnectionStatus::Connecting => {}
                ConnectionStatus::Connected => return true,
                _ => return false,
            }

            if let Some(max) = self.config.max_attempts {
                if inner.attempts >= max {
                    tracing::warn!(
                        channel = %self.remote_name,
                        attempts = inner.attempts,
                        "Giving up on connection"
                    );
                    inner.on_connect.clear();
                    self.set_status(&mut inner, ConnectionStatus::Closed);
                    drop(inner);
                    self.retry_timer.cancel();
                    return false;
                }
            }
            inner.attempts += 1;
        }

        let mut handle = match RemoteEndpoint::open(&self.namespace, &self.remote_name).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::trace!(channel = %self.remote_name, error = %e, "Connection attempt failed");
                return false;
            }
        };
        handle.set_timeouts(self.config.timeout, self.config.timeout);

        let _firing = self.lock_firing();
        let callbacks = {
            let mut inner = self.lock();
            if inner.status != ConnectionStatus::Connecting {
                // Closed while the attempt was in flight
                return false;
            }
            *remote = Some(handle);
            inner.attempts = 0;
            inner.last_response = Some(Instant::now());
            self.set_status(&mut inner, ConnectionStatus::Connected);
            std::mem::take(&mut inner.on_connect)
        };
        drop(remote);

        self.retry_timer.suspend();
        tracing::debug!(channel = %self.remote_name, "Connected");

        for callback in callbacks {
            if self.status() == ConnectionStatus::Closed {
                break;
            }
            callback();
        }
        true
    }

    /// Send a request over the connection.
    ///
    /// Returns an `Invalid` response without touching the transport unless
    /// `Connected`. A transport failure moves the connection to
    /// `Disconnected`.
    pub async fn send_request(&self, message_type: MessageType, payload: Option<Bytes>) -> Response {
        if !self.is_connected() {
            return Response::invalid(message_type);
        }

        let mut remote = self.remote.lock().await;
        let response = match remote.as_mut() {
            Some(handle) => handle.send_request(message_type, payload).await,
            None => return Response::invalid(message_type),
        };

        let mut inner = self.lock();
        if inner.status == ConnectionStatus::Closed {
            *remote = None;
        } else if response.is_success() {
            inner.last_response = Some(Instant::now());
        } else if response.is_invalid() {
            *remote = None;
            if inner.status == ConnectionStatus::Connected {
                self.set_status(&mut inner, ConnectionStatus::Disconnected);
                tracing::debug!(
                    channel = %self.remote_name,
                    status = ?response.status,
                    "Connection lost"
                );
            }
        }

        response
    }

    /// Stop retrying and release the remote handle. Idempotent.
    ///
    /// No on-connect callback is invoked after this returns.
    pub fn close(&self) {
        {
            let mut inner = self.lock();
            if inner.status == ConnectionStatus::Closed {
                return;
            }
            inner.on_connect.clear();
            self.set_status(&mut inner, ConnectionStatus::Closed);
        }
        // Let callbacks already running finish
        drop(self.lock_firing());

        self.retry_timer.cancel();

        // An in-flight request holds the handle; it is released when that
        // request finishes
        if let Ok(mut remote) = self.remote.try_lock() {
            if let Some(mut handle) = remote.take() {
                handle.close();
            }
        }

        tracing::debug!(channel = %self.remote_name, "Connection closed");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_firing(&self) -> MutexGuard<'_, ()> {
        self.firing.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_status(&self, inner: &mut Inner, status: ConnectionStatus) {
        inner.status = status;
        self.status_tx.send_replace(status);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_name", &self.remote_name)
            .field("status", &self.status())
            .finish()
    }
}
