//! Device-side frame queue
//!
//! The device sink is the end of the consumer pipeline. It owns a bounded
//! queue and refuses frames once the queue is full; the pipeline never
//! waits for room.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::frame::SampleTiming;
use crate::raster::RasterFrame;

/// Default ring buffer capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 30;

/// Accepts decoded frames from a [`DeviceStream`](super::DeviceStream)
pub trait DeviceSink: Send + Sync {
    /// Queue a frame. Returns `false` if it was refused.
    fn enqueue(&self, frame: RasterFrame, timing: SampleTiming) -> bool;
}

impl<F> DeviceSink for F
where
    F: Fn(RasterFrame, SampleTiming) -> bool + Send + Sync,
{
    fn enqueue(&self, frame: RasterFrame, timing: SampleTiming) -> bool {
        self(frame, timing)
    }
}

/// A frame waiting in a [`RingBufferSink`]
#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub frame: RasterFrame,
    pub timing: SampleTiming,
}

/// Called with the queue length after every enqueue and dequeue
pub type QueueAlteredCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// Bounded FIFO of decoded frames
pub struct RingBufferSink {
    capacity: usize,
    queue: Mutex<VecDeque<QueuedFrame>>,
    on_altered: RwLock<Option<QueueAlteredCallback>>,
}

impl RingBufferSink {
    /// Create a sink holding at most `capacity` frames (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            on_altered: RwLock::new(None),
        }
    }

    /// Install the queue-altered notification
    pub fn set_queue_altered<F>(&self, callback: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        if let Ok(mut guard) = self.on_altered.write() {
            *guard = Some(Arc::new(callback));
        }
    }

    /// Take the oldest frame
    pub fn dequeue(&self) -> Option<QueuedFrame> {
        let (frame, len) = {
            let mut queue = self.lock();
            let frame = queue.pop_front()?;
            (frame, queue.len())
        };
        self.notify(len);
        Some(frame)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.lock().len() >= self.capacity
    }

    /// Drop every queued frame
    pub fn clear(&self) {
        self.lock().clear();
        self.notify(0);
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedFrame>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, len: usize) {
        let callback = self.on_altered.read().ok().and_then(|guard| guard.clone());
        if let Some(callback) = callback {
            callback(len);
        }
    }
}

impl Default for RingBufferSink {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl DeviceSink for RingBufferSink {
    fn enqueue(&self, frame: RasterFrame, timing: SampleTiming) -> bool {
        let len = {
            let mut queue = self.lock();
            if queue.len() >= self.capacity {
                return false;
            }
            queue.push_back(QueuedFrame { frame, timing });
            queue.len()
        };
        self.notify(len);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;

    fn raster(sequence: u64) -> RasterFrame {
        RasterFrame {
            id: format!("f{}", sequence),
            sequence,
            fps: 30,
            timestamp: 0,
            width: 1,
            height: 1,
            bytes_per_row: 4,
            data: Bytes::from_static(&[0, 0, 0, 255]),
        }
    }

    fn enqueue(sink: &RingBufferSink, sequence: u64) -> bool {
        sink.enqueue(raster(sequence), SampleTiming::for_sequence(30, sequence))
    }

    #[test]
    fn test_fifo_order() {
        let sink = RingBufferSink::new(3);
        assert!(enqueue(&sink, 0));
        assert!(enqueue(&sink, 1));

        assert_eq!(sink.dequeue().unwrap().frame.sequence, 0);
        assert_eq!(sink.dequeue().unwrap().frame.sequence, 1);
        assert!(sink.dequeue().is_none());
    }

    #[test]
    fn test_full_queue_refuses() {
        let sink = RingBufferSink::new(2);
        assert!(enqueue(&sink, 0));
        assert!(enqueue(&sink, 1));
        assert!(sink.is_full());

        assert!(!enqueue(&sink, 2));
        assert_eq!(sink.len(), 2);

        // Oldest frames are kept
        assert_eq!(sink.dequeue().unwrap().frame.sequence, 0);
        assert!(enqueue(&sink, 3));
    }

    #[test]
    fn test_default_capacity() {
        let sink = RingBufferSink::default();
        assert_eq!(sink.capacity(), 30);
        assert!(sink.is_empty());
        assert_eq!(RingBufferSink::new(0).capacity(), 1);
    }

    #[test]
    fn test_queue_altered_notifications() {
        let sink = RingBufferSink::new(2);
        let last = Arc::new(AtomicUsize::new(usize::MAX));
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let last = Arc::clone(&last);
            let calls = Arc::clone(&calls);
            sink.set_queue_altered(move |len| {
                last.store(len, Ordering::SeqCst);
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        enqueue(&sink, 0);
        enqueue(&sink, 1);
        assert_eq!(last.load(Ordering::SeqCst), 2);

        // A refused frame does not alter the queue
        enqueue(&sink, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        sink.dequeue();
        assert_eq!(last.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closure_sink() {
        let sink = |frame: RasterFrame, _timing: SampleTiming| frame.sequence % 2 == 0;

        assert!(sink.enqueue(raster(0), SampleTiming::for_sequence(30, 0)));
        assert!(!sink.enqueue(raster(1), SampleTiming::for_sequence(30, 1)));
    }
}
