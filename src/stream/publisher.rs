//! Producer pipeline
//!
//! ```text
//!  source ──try_send──► [bounded queue] ──► processing task
//!                                             decode ─► filter ─► pool
//!                                             ─► serialize ─► Broker::publish
//! ```
//!
//! The source callback never waits. When processing falls behind, new
//! frames are dropped at the queue. Decoding, filtering and copying run on
//! the blocking pool, one frame at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::StreamConfig;
use super::source::{FrameCallback, FrameSource};
use crate::channel::ChannelNamespace;
use crate::error::Result;
use crate::frame::Frame;
use crate::pubsub::Broker;
use crate::raster::{decode_frame, Filter, NoFilter, RasterPool, BGRA_PIXEL_SIZE};
use crate::stats::{BrokerStats, PipelineCounters, PipelineStats};

struct PublishShared {
    config: StreamConfig,
    filter: RwLock<Arc<dyn Filter>>,
    pool: Mutex<Option<RasterPool>>,
    current: RwLock<Option<Bytes>>,
    sequence: AtomicU64,
    counters: PipelineCounters,
}

impl PublishShared {
    fn lock_pool(&self) -> MutexGuard<'_, Option<RasterPool>> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_frame(&self) -> Option<Bytes> {
        self.current.read().ok().and_then(|guard| guard.clone())
    }

    /// Turn a source frame into the serialized raster frame to publish
    fn prepare(&self, frame: Frame) -> Option<Bytes> {
        let image = match decode_frame(&frame) {
            Ok(image) => image,
            Err(e) => {
                PipelineCounters::bump(&self.counters.decode_failures);
                debug!(id = %frame.id, error = %e, "Source frame not decodable");
                return None;
            }
        };

        let filter = self.filter.read().ok().map(|guard| Arc::clone(&*guard));
        let image = match filter {
            Some(filter) => filter.apply(image),
            None => image,
        };
        if let Err(e) = image.validate() {
            PipelineCounters::bump(&self.counters.raster_failures);
            debug!(id = %frame.id, error = %e, "Filter output rejected");
            return None;
        }

        let raster = {
            let mut pool = self.lock_pool();
            if pool.is_none() {
                match RasterPool::for_image(
                    &image,
                    self.config.pool_min_buffers,
                    self.config.pool_max_buffers,
                ) {
                    Ok(created) => *pool = Some(created),
                    Err(e) => {
                        PipelineCounters::bump(&self.counters.raster_failures);
                        warn!(error = %e, "Raster pool not created");
                        return None;
                    }
                }
            }
            match pool.as_ref().map(|pool| pool.fill(&image)) {
                Some(Ok(raster)) => raster,
                Some(Err(e)) => {
                    PipelineCounters::bump(&self.counters.raster_failures);
                    debug!(id = %frame.id, error = %e, "Frame dropped");
                    return None;
                }
                None => return None,
            }
        };

        let (width, height) = (raster.width(), raster.height());
        let bytes_per_row = raster.bytes_per_row();
        let mut out = frame.derive(raster.into_bytes());
        out.width = width;
        out.height = height;
        out.bytes_per_row = bytes_per_row;
        out.pixel_size = BGRA_PIXEL_SIZE;
        out.is_raster_buffer = true;
        out.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        if out.fps == 0 {
            out.fps = self.config.fps;
        }

        match out.serialize() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                PipelineCounters::bump(&self.counters.publish_failures);
                warn!(id = %out.id, error = %e, "Frame not serializable");
                None
            }
        }
    }
}

/// Captures frames from a source and publishes them through a broker
pub struct PublishStream {
    broker: Arc<Broker>,
    shared: Arc<PublishShared>,
    source: Mutex<Option<Box<dyn FrameSource>>>,
    sender: Mutex<Option<mpsc::Sender<Frame>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PublishStream {
    /// Create a stopped stream whose broker listens under `broker_name`
    pub fn new(
        broker_name: impl Into<String>,
        namespace: ChannelNamespace,
        config: StreamConfig,
    ) -> Self {
        let shared = Arc::new(PublishShared {
            filter: RwLock::new(Arc::new(NoFilter)),
            pool: Mutex::new(None),
            current: RwLock::new(None),
            sequence: AtomicU64::new(0),
            counters: PipelineCounters::new(),
            config,
        });

        let provider = Arc::clone(&shared);
        let broker = Broker::new(broker_name, namespace)
            .with_config(shared.config.broker.clone())
            .with_frame_provider(move || provider.current_frame());

        Self {
            broker: Arc::new(broker),
            shared,
            source: Mutex::new(None),
            sender: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Start the broker, the processing task and the source.
    ///
    /// No-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }

        self.broker.start()?;

        let (tx, mut rx) = mpsc::channel::<Frame>(self.shared.config.channel_capacity);
        let shared = Arc::clone(&self.shared);
        let broker = Arc::clone(&self.broker);
        *task = Some(tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let worker = Arc::clone(&shared);
                let prepared = tokio::task::spawn_blocking(move || worker.prepare(frame)).await;
                let bytes = match prepared {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => continue,
                    Err(e) => {
                        PipelineCounters::bump(&shared.counters.raster_failures);
                        warn!(error = %e, "Frame processing failed");
                        continue;
                    }
                };

                if let Ok(mut current) = shared.current.write() {
                    *current = Some(bytes.clone());
                }

                let report = broker.publish(bytes).await;
                PipelineCounters::bump(&shared.counters.published);
                shared
                    .counters
                    .publish_failures
                    .fetch_add(report.failed as u64, Ordering::Relaxed);
            }
        }));

        *lock(&self.sender) = Some(tx.clone());
        if let Some(source) = lock(&self.source).as_mut() {
            self.attach(source.as_mut(), tx);
        }

        info!(channel = %self.broker.name(), "Publish stream started");
        Ok(())
    }

    /// Stop the source, the processing task and the broker. Idempotent.
    pub fn stop(&self) {
        let Some(task) = lock(&self.task).take() else {
            return;
        };

        if let Some(source) = lock(&self.source).as_mut() {
            source.activate(false);
            source.set_frame_callback(None);
        }
        lock(&self.sender).take();
        task.abort();

        if let Some(pool) = self.shared.lock_pool().take() {
            pool.flush();
        }
        self.broker.stop();

        info!(channel = %self.broker.name(), "Publish stream stopped");
    }

    /// Whether the processing task is alive
    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Replace the frame source. The old one is deactivated; the new one is
    /// activated right away if the stream is running.
    pub fn set_source(&self, source: impl FrameSource + 'static) {
        let mut slot = lock(&self.source);
        if let Some(old) = slot.as_mut() {
            old.activate(false);
            old.set_frame_callback(None);
        }

        let mut source: Box<dyn FrameSource> = Box::new(source);
        if let Some(tx) = lock(&self.sender).clone() {
            self.attach(source.as_mut(), tx);
        }
        *slot = Some(source);
    }

    /// Replace the filter applied before publication
    pub fn set_filter(&self, filter: impl Filter + 'static) {
        if let Ok(mut guard) = self.shared.filter.write() {
            *guard = Arc::new(filter);
        }
    }

    /// Most recently published frame, as served to `GetFrame`
    pub fn current_frame(&self) -> Option<Bytes> {
        self.shared.current_frame()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }

    pub fn broker_stats(&self) -> BrokerStats {
        self.broker.stats()
    }

    fn attach(&self, source: &mut dyn FrameSource, tx: mpsc::Sender<Frame>) {
        let shared = Arc::clone(&self.shared);
        let callback: FrameCallback = Arc::new(move |frame: Frame| {
            PipelineCounters::bump(&shared.counters.received);
            match tx.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    PipelineCounters::bump(&shared.counters.dropped_backlog);
                    tracing::trace!(sequence = frame.sequence, "Processing behind, frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(frame)) => {
                    PipelineCounters::bump(&shared.counters.dropped_backlog);
                    debug!(sequence = frame.sequence, "Processing stopped, frame dropped");
                }
            }
        });
        source.set_frame_callback(Some(callback));

        if !source.activate(true) {
            warn!("Frame source did not activate");
        }
    }
}

impl Drop for PublishStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
