//! Listening side of a named channel
//!
//! An endpoint owns one accept task and one dispatch task. Each accepted
//! stream gets a reader task that decodes requests and forwards them to the
//! dispatcher, so the handler sees one request at a time in arrival order
//! regardless of how many peers are connected. Handler calls run on the
//! blocking pool.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use super::namespace::ChannelNamespace;
use super::wire;
use crate::error::TransportError;

/// Handles requests arriving on an endpoint
///
/// Called on the blocking pool, never concurrently with itself.
/// Returning `None` sends an empty reply.
pub trait RequestHandler: Send + Sync + 'static {
    fn on_request(&self, message_id: u32, payload: Option<Bytes>) -> Option<Bytes>;
}

impl<F> RequestHandler for F
where
    F: Fn(u32, Option<Bytes>) -> Option<Bytes> + Send + Sync + 'static,
{
    fn on_request(&self, message_id: u32, payload: Option<Bytes>) -> Option<Bytes> {
        self(message_id, payload)
    }
}

struct Dispatch {
    message_id: u32,
    payload: Option<Bytes>,
    reply: oneshot::Sender<Option<Bytes>>,
}

/// Closed flag plus the lock every handler call runs under
#[derive(Default)]
struct Gate {
    closed: AtomicBool,
    running: Mutex<()>,
}

impl Gate {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn enter(&self) -> MutexGuard<'_, ()> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A listening named channel
///
/// Dropping the endpoint closes it.
pub struct Endpoint {
    name: String,
    path: PathBuf,
    gate: Arc<Gate>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Endpoint {
    /// Start listening under `name`.
    ///
    /// Fails with [`TransportError::NameInUse`] if another live listener owns
    /// the name. A socket file left behind by a dead process is replaced.
    /// Must be called from within a Tokio runtime.
    pub fn listen<H: RequestHandler>(
        namespace: &ChannelNamespace,
        name: &str,
        handler: H,
    ) -> Result<Self, TransportError> {
        let path = namespace.path_for(name)?;
        namespace.ensure_dir()?;

        let listener = bind_exclusive(name, &path)?;
        let config = namespace.config();

        let gate = Arc::new(Gate::default());
        let (tx, rx) = mpsc::channel(config.dispatch_queue_depth);
        let dispatcher = tokio::spawn(dispatch_loop(
            name.to_string(),
            rx,
            Arc::new(handler),
            Arc::clone(&gate),
        ));
        let acceptor = tokio::spawn(accept_loop(
            name.to_string(),
            listener,
            tx,
            Arc::clone(&gate),
            config.max_payload_size,
        ));

        tracing::debug!(channel = %name, path = %path.display(), "Endpoint listening");

        Ok(Self {
            name: name.to_string(),
            path,
            gate,
            tasks: Mutex::new(vec![acceptor, dispatcher]),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }

    /// Stop accepting, drop every open stream and release the name.
    ///
    /// Idempotent. Waits for a handler call in progress; no handler call
    /// starts after this returns. Must not be called from the handler.
    pub fn close(&self) {
        if self.gate.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        drop(self.gate.enter());

        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(channel = %self.name, error = %e, "Failed to remove socket file");
            }
        }

        tracing::debug!(channel = %self.name, "Endpoint closed");
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn bind_exclusive(name: &str, path: &Path) -> Result<UnixListener, TransportError> {
    match UnixListener::bind(path) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            // A live listener accepts the probe; a stale file refuses it
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                return Err(TransportError::NameInUse(name.to_string()));
            }

            tracing::debug!(channel = %name, "Replacing stale socket file");
            std::fs::remove_file(path)?;
            Ok(UnixListener::bind(path)?)
        }
        Err(e) => Err(e.into()),
    }
}

async fn accept_loop(
    name: String,
    listener: UnixListener,
    dispatch: mpsc::Sender<Dispatch>,
    gate: Arc<Gate>,
    max_payload_size: usize,
) {
    // Dropping the set on abort tears down every reader
    let mut readers = JoinSet::new();
    let next_stream_id = AtomicU64::new(1);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let stream_id = next_stream_id.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(channel = %name, stream_id = stream_id, "Stream accepted");

                    readers.spawn(serve_stream(
                        name.clone(),
                        stream_id,
                        stream,
                        dispatch.clone(),
                        Arc::clone(&gate),
                        max_payload_size,
                    ));
                }
                Err(e) => {
                    tracing::error!(channel = %name, error = %e, "Failed to accept stream");
                }
            },
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
        }
    }
}

async fn serve_stream(
    name: String,
    stream_id: u64,
    mut stream: UnixStream,
    dispatch: mpsc::Sender<Dispatch>,
    gate: Arc<Gate>,
    max_payload_size: usize,
) {
    loop {
        let request = match wire::read_request(&mut stream, max_payload_size).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(channel = %name, stream_id = stream_id, error = %e, "Stream read failed");
                break;
            }
        };

        if gate.is_closed() {
            break;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let queued = dispatch
            .send(Dispatch {
                message_id: request.message_id,
                payload: request.payload,
                reply: reply_tx,
            })
            .await;
        if queued.is_err() {
            break;
        }

        let reply = match reply_rx.await {
            Ok(reply) => reply,
            Err(_) => break,
        };

        if let Err(e) = wire::write_response(&mut stream, reply.as_deref()).await {
            tracing::debug!(channel = %name, stream_id = stream_id, error = %e, "Stream write failed");
            break;
        }
    }

    tracing::trace!(channel = %name, stream_id = stream_id, "Stream closed");
}

async fn dispatch_loop<H: RequestHandler>(
    name: String,
    mut rx: mpsc::Receiver<Dispatch>,
    handler: Arc<H>,
    gate: Arc<Gate>,
) {
    while let Some(request) = rx.recv().await {
        let Dispatch {
            message_id,
            payload,
            reply,
        } = request;

        let handler = Arc::clone(&handler);
        let call_gate = Arc::clone(&gate);
        let outcome = tokio::task::spawn_blocking(move || {
            let _running = call_gate.enter();
            if call_gate.is_closed() {
                return None;
            }
            Some(handler.on_request(message_id, payload))
        })
        .await;

        match outcome {
            // Requester may have timed out and gone away
            Ok(Some(response)) => {
                let _ = reply.send(response);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!(channel = %name, message_id, error = %e, "Request handler failed");
            }
        }
    }
}
