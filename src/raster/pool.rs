//! Reusable raster buffers
//!
//! A pool is sized to one geometry. Buffers are handed out as
//! [`PooledRaster`] and go back to the pool's idle list when dropped, so
//! steady-state publishing allocates nothing. A pool only ever holds
//! `max_buffers` allocations; asking for more fails instead of growing.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use tracing::debug;

use super::{RasterImage, BGRA_PIXEL_SIZE};
use crate::error::RasterError;

struct PoolShared {
    width: u32,
    height: u32,
    bytes_per_row: u32,
    max_buffers: usize,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<Vec<u8>>,
    /// Buffers alive right now, idle or checked out
    allocated: usize,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn buffer_len(&self) -> usize {
        self.bytes_per_row as usize * self.height as usize
    }

    fn release(&self, buf: Vec<u8>) {
        let mut state = self.lock();
        if buf.len() == self.buffer_len() {
            state.idle.push(buf);
        } else {
            state.allocated = state.allocated.saturating_sub(1);
        }
    }
}

/// Fixed-geometry BGRA8 buffer pool
#[derive(Clone)]
pub struct RasterPool {
    shared: Arc<PoolShared>,
}

impl RasterPool {
    /// Create a pool and preallocate `min_buffers` buffers
    pub fn new(
        width: u32,
        height: u32,
        min_buffers: usize,
        max_buffers: usize,
    ) -> Result<Self, RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::EmptyImage);
        }

        let max_buffers = max_buffers.max(min_buffers).max(1);
        let shared = Arc::new(PoolShared {
            width,
            height,
            bytes_per_row: width * BGRA_PIXEL_SIZE,
            max_buffers,
            state: Mutex::new(PoolState::default()),
        });

        {
            let len = shared.buffer_len();
            let mut state = shared.lock();
            state.idle = (0..min_buffers).map(|_| vec![0u8; len]).collect();
            state.allocated = min_buffers;
        }

        debug!(width, height, min_buffers, max_buffers, "Raster pool created");
        Ok(Self { shared })
    }

    /// Create a pool sized to `image`
    pub fn for_image(
        image: &RasterImage,
        min_buffers: usize,
        max_buffers: usize,
    ) -> Result<Self, RasterError> {
        Self::new(image.width, image.height, min_buffers, max_buffers)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.shared.width, self.shared.height)
    }

    pub fn bytes_per_row(&self) -> u32 {
        self.shared.bytes_per_row
    }

    pub fn max_buffers(&self) -> usize {
        self.shared.max_buffers
    }

    /// Buffers waiting to be reused
    pub fn idle_count(&self) -> usize {
        self.shared.lock().idle.len()
    }

    /// Buffers alive right now, idle or checked out
    pub fn allocated(&self) -> usize {
        self.shared.lock().allocated
    }

    /// Check out a buffer. Contents are whatever the last user left.
    pub fn acquire(&self) -> Result<PooledRaster, RasterError> {
        let buf = {
            let mut state = self.shared.lock();
            match state.idle.pop() {
                Some(buf) => buf,
                None if state.allocated < self.shared.max_buffers => {
                    state.allocated += 1;
                    vec![0u8; self.shared.buffer_len()]
                }
                None => return Err(RasterError::PoolExhausted),
            }
        };

        Ok(PooledRaster {
            buf,
            width: self.shared.width,
            height: self.shared.height,
            bytes_per_row: self.shared.bytes_per_row,
            pool: Arc::downgrade(&self.shared),
        })
    }

    /// Check out a buffer holding a copy of `image`
    pub fn fill(&self, image: &RasterImage) -> Result<PooledRaster, RasterError> {
        if image.dimensions() != self.dimensions() {
            return Err(RasterError::DimensionMismatch {
                pool: self.dimensions(),
                frame: image.dimensions(),
            });
        }
        image.validate()?;

        let mut raster = self.acquire()?;
        let row_len = self.shared.bytes_per_row as usize;
        for (y, dst) in raster.buf.chunks_exact_mut(row_len).enumerate() {
            let src = image.row(y as u32).ok_or(RasterError::SizeMismatch {
                expected: row_len * image.height as usize,
                actual: image.data.len(),
            })?;
            dst.copy_from_slice(src);
        }
        Ok(raster)
    }

    /// Drop idle buffers. Checked-out buffers still come back when released.
    pub fn flush(&self) {
        let mut state = self.shared.lock();
        let freed = state.idle.len();
        state.idle.clear();
        state.allocated -= freed;
        debug!(freed, "Raster pool flushed");
    }
}

impl fmt::Debug for RasterPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterPool")
            .field("width", &self.shared.width)
            .field("height", &self.shared.height)
            .field("max_buffers", &self.shared.max_buffers)
            .finish()
    }
}

/// A buffer checked out of a [`RasterPool`]
pub struct PooledRaster {
    buf: Vec<u8>,
    width: u32,
    height: u32,
    bytes_per_row: u32,
    pool: Weak<PoolShared>,
}

impl PooledRaster {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_row(&self) -> u32 {
        self.bytes_per_row
    }

    /// Share this buffer as `Bytes`.
    ///
    /// The buffer goes back to the pool once every clone is dropped.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from_owner(self)
    }
}

impl Deref for PooledRaster {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledRaster {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl AsRef<[u8]> for PooledRaster {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl fmt::Debug for PooledRaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledRaster")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.buf.len())
            .finish()
    }
}

impl Drop for PooledRaster {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release(std::mem::take(&mut self.buf));
        }
    }
}
