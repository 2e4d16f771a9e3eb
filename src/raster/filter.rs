//! Image filters applied on the publish path
//!
//! A filter is a pure `RasterImage -> RasterImage` function. Closures with
//! that signature are filters too.

use super::{RasterImage, BGRA_PIXEL_SIZE};

/// Image transform run before a frame is published
pub trait Filter: Send + Sync {
    fn apply(&self, image: RasterImage) -> RasterImage;

    /// Name used in logs
    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> Filter for F
where
    F: Fn(RasterImage) -> RasterImage + Send + Sync,
{
    fn apply(&self, image: RasterImage) -> RasterImage {
        self(image)
    }
}

/// Passes images through untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFilter;

impl Filter for NoFilter {
    fn apply(&self, image: RasterImage) -> RasterImage {
        image
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Flips images horizontally
#[derive(Debug, Clone, Copy, Default)]
pub struct Mirror;

impl Filter for Mirror {
    fn apply(&self, mut image: RasterImage) -> RasterImage {
        let px = BGRA_PIXEL_SIZE as usize;
        let row_len = image.width as usize * px;
        let stride = image.bytes_per_row as usize;

        for row in image.data.chunks_exact_mut(stride) {
            let row = &mut row[..row_len];
            let (mut left, mut right) = (0, row_len.saturating_sub(px));
            while left < right {
                for i in 0..px {
                    row.swap(left + i, right + i);
                }
                left += px;
                right -= px;
            }
        }
        image
    }

    fn name(&self) -> &str {
        "mirror"
    }
}

/// Replaces each `scale` x `scale` block with its top-left pixel
#[derive(Debug, Clone, Copy)]
pub struct Pixellate {
    pub scale: u32,
}

impl Pixellate {
    pub fn new(scale: u32) -> Self {
        Self {
            scale: scale.max(1),
        }
    }
}

impl Default for Pixellate {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Filter for Pixellate {
    fn apply(&self, mut image: RasterImage) -> RasterImage {
        let scale = self.scale.max(1);
        if scale == 1 {
            return image;
        }

        for y in 0..image.height {
            let block_y = y - y % scale;
            for x in 0..image.width {
                let block_x = x - x % scale;
                if block_x == x && block_y == y {
                    continue;
                }
                let sample = image.pixel(block_x, block_y);
                image.set_pixel(x, y, sample);
            }
        }
        image
    }

    fn name(&self) -> &str {
        "pixellate"
    }
}

/// Runs filters in order
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Filter for FilterChain {
    fn apply(&self, image: RasterImage) -> RasterImage {
        self.filters.iter().fold(image, |img, f| f.apply(img))
    }

    fn name(&self) -> &str {
        "chain"
    }
}
