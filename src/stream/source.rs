//! Frame sources
//!
//! A source pushes frames at its own cadence through a callback. The
//! camera integration lives outside this crate; [`TestPatternSource`] is a
//! stand-in that produces moving colour bars.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::frame::{monotonic_ticks, Frame, DEFAULT_FPS};
use crate::raster::{RasterImage, BGRA_PIXEL_SIZE};

/// Receives every frame a source produces
pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// Something that captures frames
pub trait FrameSource: Send {
    /// Start or stop capture. Returns whether the source is now active.
    fn activate(&mut self, active: bool) -> bool;

    /// Install or remove the frame callback
    fn set_frame_callback(&mut self, callback: Option<FrameCallback>);

    fn is_active(&self) -> bool;
}

/// Bars in BGRA, left to right
const BARS: [[u8; 4]; 8] = [
    [0xff, 0xff, 0xff, 0xff],
    [0x00, 0xff, 0xff, 0xff],
    [0xff, 0xff, 0x00, 0xff],
    [0x00, 0xff, 0x00, 0xff],
    [0xff, 0x00, 0xff, 0xff],
    [0x00, 0x00, 0xff, 0xff],
    [0xff, 0x00, 0x00, 0xff],
    [0x00, 0x00, 0x00, 0xff],
];

/// Raster colour bars that scroll one column per frame
pub struct TestPatternSource {
    width: u32,
    height: u32,
    fps: u32,
    callback: Arc<RwLock<Option<FrameCallback>>>,
    sequence: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            fps: DEFAULT_FPS,
            callback: Arc::new(RwLock::new(None)),
            sequence: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Frames produced so far
    pub fn frames_produced(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Render the frame for `sequence`
    pub fn render(width: u32, height: u32, sequence: u64) -> RasterImage {
        let mut image = RasterImage::new(width, height);
        let bar_width = (width as usize / BARS.len()).max(1);
        let shift = sequence as usize;
        let row_len = (width * BGRA_PIXEL_SIZE) as usize;

        let mut row = Vec::with_capacity(row_len);
        for x in 0..width as usize {
            let bar = ((x + shift) / bar_width) % BARS.len();
            row.extend_from_slice(&BARS[bar]);
        }
        for line in image.data.chunks_exact_mut(image.bytes_per_row as usize) {
            line[..row_len].copy_from_slice(&row);
        }
        image
    }

    fn spawn(&self, handle: Handle) -> JoinHandle<()> {
        let (width, height, fps) = (self.width, self.height, self.fps);
        let callback = Arc::clone(&self.callback);
        let sequence = Arc::clone(&self.sequence);
        let period = Duration::from_secs(1) / fps;

        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let current = callback.read().ok().and_then(|guard| guard.clone());
                let Some(deliver) = current else {
                    continue;
                };

                let seq = sequence.fetch_add(1, Ordering::Relaxed);
                let image = Self::render(width, height, seq);
                let bytes_per_row = image.bytes_per_row;
                let frame = Frame::new(image.data, width, height, bytes_per_row, BGRA_PIXEL_SIZE)
                    .with_sequence(seq)
                    .with_fps(fps)
                    .with_timestamp(monotonic_ticks());
                deliver(frame);
            }
        })
    }
}

impl FrameSource for TestPatternSource {
    fn activate(&mut self, active: bool) -> bool {
        if !active {
            if let Some(task) = self.task.take() {
                task.abort();
                tracing::debug!("Test pattern stopped");
            }
            return false;
        }

        if self.task.is_some() {
            return true;
        }

        match Handle::try_current() {
            Ok(handle) => {
                self.task = Some(self.spawn(handle));
                tracing::debug!(
                    width = self.width,
                    height = self.height,
                    fps = self.fps,
                    "Test pattern started"
                );
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Test pattern needs a Tokio runtime");
                false
            }
        }
    }

    fn set_frame_callback(&mut self, callback: Option<FrameCallback>) {
        if let Ok(mut guard) = self.callback.write() {
            *guard = callback;
        }
    }

    fn is_active(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_render_scrolls() {
        let first = TestPatternSource::render(16, 2, 0);
        let next = TestPatternSource::render(16, 2, 1);

        assert_eq!(first.pixel(0, 0), BARS[0]);
        assert_eq!(first.pixel(2, 1), BARS[1]);
        assert_eq!(next.pixel(1, 0), BARS[1]);
        assert_eq!(first.row(0), first.row(1));
        assert!(first.row(0).is_some());
    }

    #[test]
    fn test_activate_without_runtime_fails() {
        let mut source = TestPatternSource::new(8, 8);
        assert!(!source.activate(true));
        assert!(!source.is_active());
    }

    #[tokio::test]
    async fn test_emits_sequenced_frames() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let mut source = TestPatternSource::new(8, 4).with_fps(100);
        {
            let frames = Arc::clone(&frames);
            source.set_frame_callback(Some(Arc::new(move |frame: Frame| {
                frames.lock().unwrap().push(frame);
            })));
        }

        assert!(source.activate(true));
        assert!(source.activate(true));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!source.activate(false));
        assert!(!source.is_active());

        let frames = frames.lock().unwrap();
        assert!(frames.len() >= 3, "got {} frames", frames.len());
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.sequence, i as u64);
            assert_eq!(frame.fps, 100);
            assert_eq!(frame.bytes_per_row, 32);
            assert_eq!(frame.data.len(), 128);
        }
    }

    #[tokio::test]
    async fn test_no_callback_no_frames() {
        let mut source = TestPatternSource::new(8, 4).with_fps(100);
        source.activate(true);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(source.frames_produced(), 0);
    }
}
