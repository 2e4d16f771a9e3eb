//! Video frame record
//!
//! A [`Frame`] is one image plus the metadata a consumer needs to place it
//! in time. Raster frames carry BGRA rows (`bytes_per_row > 0`); compressed
//! frames carry an encoded image (`bytes_per_row == 0`).

pub mod codec;
pub mod envelope;
pub mod timing;

pub use timing::{MediaTime, SampleTiming};

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use bytes::Bytes;
use uuid::Uuid;

/// Default frame rate
pub const DEFAULT_FPS: u32 = 30;

/// Alpha premultiplied, stored last
pub const ALPHA_PREMULTIPLIED_LAST: u32 = 0x1;

/// 32-bit little-endian pixel byte order
pub const BYTE_ORDER_32_LITTLE: u32 = 0x2000;

/// Default bitmap layout flags
pub const DEFAULT_BITMAP_INFO: u32 = ALPHA_PREMULTIPLIED_LAST | BYTE_ORDER_32_LITTLE;

/// One video frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Unique per frame; consumers use it to drop duplicates
    pub id: String,
    pub width: u32,
    pub height: u32,
    /// Zero for compressed frames
    pub bytes_per_row: u32,
    /// Bytes per pixel, zero for compressed frames
    pub pixel_size: u32,
    pub data: Bytes,
    pub bitmap_info: u32,
    /// Capture time in [`monotonic_ticks`] units
    pub timestamp: u64,
    pub fps: u32,
    /// Position in the source's output
    pub sequence: u64,
    /// `data` is a device-ready raster buffer
    pub is_raster_buffer: bool,
}

impl Frame {
    /// Create a frame with a fresh id
    pub fn new(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        bytes_per_row: u32,
        pixel_size: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            width,
            height,
            bytes_per_row,
            pixel_size,
            data: data.into(),
            bitmap_info: DEFAULT_BITMAP_INFO,
            timestamp: 0,
            fps: DEFAULT_FPS,
            sequence: 0,
            is_raster_buffer: false,
        }
    }

    /// Create a frame holding an encoded image (JPEG, PNG)
    pub fn compressed(data: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self::new(data, width, height, 0, 0)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_compressed(&self) -> bool {
        self.bytes_per_row == 0
    }

    /// Byte length a raster frame's data must have
    pub fn expected_len(&self) -> Option<usize> {
        if self.is_compressed() {
            return None;
        }
        (self.bytes_per_row as usize).checked_mul(self.height as usize)
    }

    /// A new frame with `data` in place of this one's.
    ///
    /// Gets a fresh id; format, timing and sequence carry over.
    pub fn derive(&self, data: impl Into<Bytes>) -> Frame {
        Frame {
            id: Uuid::new_v4().to_string(),
            data: data.into(),
            ..self.clone()
        }
    }

    /// Timing derived from this frame's fps and sequence
    pub fn timing(&self) -> SampleTiming {
        SampleTiming::for_sequence(self.fps, self.sequence)
    }

    /// Distance between this frame's timestamp and `ticks`, in either order
    pub fn elapsed_since(&self, ticks: u64) -> Duration {
        Duration::from_nanos(self.timestamp.abs_diff(ticks))
    }
}

/// Nanoseconds since the first call in this process
///
/// Monotonic; used for frame timestamps.
pub fn monotonic_ticks() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}
