//! Consumer pipeline
//!
//! Frames pushed by the broker are handled inside the subscriber's request
//! handler, one at a time and off the async workers: deserialize, drop
//! repeats of the previous id, decode to BGRA, stamp device timing, hand to
//! the sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, info, trace};

use super::config::DeviceConfig;
use super::sink::{DeviceSink, RingBufferSink};
use crate::channel::ChannelNamespace;
use crate::error::Result;
use crate::frame::{Frame, SampleTiming};
use crate::pubsub::Subscriber;
use crate::raster::{decode_frame, RasterFrame};
use crate::stats::{PipelineCounters, PipelineStats};

struct DeviceShared {
    sink: Arc<dyn DeviceSink>,
    last_id: Mutex<Option<String>>,
    /// Output position of the next accepted frame
    sequence: AtomicU64,
    counters: PipelineCounters,
}

impl DeviceShared {
    fn handle(&self, payload: Bytes) {
        PipelineCounters::bump(&self.counters.received);

        let frame = match Frame::deserialize(payload) {
            Ok(frame) => frame,
            Err(e) => {
                PipelineCounters::bump(&self.counters.decode_failures);
                debug!(error = %e, "Malformed frame dropped");
                return;
            }
        };

        {
            let mut last = self.last_id.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if last.as_deref() == Some(frame.id.as_str()) {
                PipelineCounters::bump(&self.counters.duplicates);
                trace!(id = %frame.id, "Duplicate frame dropped");
                return;
            }
            *last = Some(frame.id.clone());
        }

        let image = match decode_frame(&frame) {
            Ok(image) => image,
            Err(e) => {
                PipelineCounters::bump(&self.counters.decode_failures);
                debug!(id = %frame.id, error = %e, "Frame not decodable");
                return;
            }
        };

        let sequence = self.sequence.load(Ordering::SeqCst);
        let timing = SampleTiming::for_sequence(frame.fps, sequence);
        let raster = RasterFrame::from_image(&frame, image);

        if self.sink.enqueue(raster, timing) {
            self.sequence.fetch_add(1, Ordering::SeqCst);
            PipelineCounters::bump(&self.counters.enqueued);
        } else {
            PipelineCounters::bump(&self.counters.dropped_queue_full);
            debug!(id = %frame.id, "Device queue full, frame dropped");
        }
    }
}

/// Receives frames from a broker and feeds them to a device sink
pub struct DeviceStream {
    subscriber: Subscriber,
    shared: Arc<DeviceShared>,
}

impl DeviceStream {
    /// Create a stopped stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        broker_name: impl Into<String>,
        namespace: ChannelNamespace,
        config: DeviceConfig,
        sink: Arc<dyn DeviceSink>,
    ) -> Self {
        Self {
            subscriber: Subscriber::new(broker_name, namespace, config.subscriber),
            shared: Arc::new(DeviceShared {
                sink,
                last_id: Mutex::new(None),
                sequence: AtomicU64::new(0),
                counters: PipelineCounters::new(),
            }),
        }
    }

    /// Create a stream feeding a new [`RingBufferSink`] of the configured
    /// capacity
    pub fn with_ring_buffer(
        broker_name: impl Into<String>,
        namespace: ChannelNamespace,
        config: DeviceConfig,
    ) -> (Self, Arc<RingBufferSink>) {
        let sink = Arc::new(RingBufferSink::new(config.queue_capacity));
        let stream = Self::new(
            broker_name,
            namespace,
            config,
            Arc::clone(&sink) as Arc<dyn DeviceSink>,
        );
        (stream, sink)
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    /// Start accepting frames and register with the broker
    pub fn start(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.subscriber.set_frame_handler(move |payload| shared.handle(payload));
        self.subscriber.start()?;

        info!(channel = %self.subscriber.channel_name(), "Device stream started");
        Ok(())
    }

    /// Stop accepting frames.
    ///
    /// Frames arriving afterwards are answered `NotAvailable` and
    /// registration keep-alives stop.
    pub fn stop(&self) {
        self.subscriber.clear_frame_handler();
        self.subscriber.stop();
        info!(channel = %self.subscriber.channel_name(), "Device stream stopped");
    }

    /// Stop and close the subscriber
    pub async fn close(&self) {
        self.subscriber.clear_frame_handler();
        self.subscriber.close().await;
    }

    /// Id of the last frame seen, duplicates excluded
    pub fn last_frame_id(&self) -> Option<String> {
        self.shared
            .last_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Frames accepted by the sink so far
    pub fn output_sequence(&self) -> u64 {
        self.shared.sequence.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }
}
