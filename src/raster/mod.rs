//! Device-ready raster images
//!
//! Everything downstream of decoding works on BGRA8 rows: 4 bytes per pixel,
//! rows possibly padded (`bytes_per_row >= width * 4`).

pub mod filter;
pub mod pool;

pub use filter::{Filter, FilterChain, Mirror, NoFilter, Pixellate};
pub use pool::{PooledRaster, RasterPool};

use bytes::Bytes;

use crate::error::RasterError;
use crate::frame::Frame;

/// Bytes per BGRA8 pixel
pub const BGRA_PIXEL_SIZE: u32 = 4;

/// Owned BGRA8 image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub data: Vec<u8>,
}

impl RasterImage {
    /// Zero-filled image with tightly packed rows
    pub fn new(width: u32, height: u32) -> Self {
        let bytes_per_row = width * BGRA_PIXEL_SIZE;
        Self {
            width,
            height,
            bytes_per_row,
            data: vec![0; bytes_per_row as usize * height as usize],
        }
    }

    /// Wrap existing BGRA8 rows
    pub fn from_bgra(
        width: u32,
        height: u32,
        bytes_per_row: u32,
        data: Vec<u8>,
    ) -> Result<Self, RasterError> {
        let image = Self {
            width,
            height,
            bytes_per_row,
            data,
        };
        image.validate()?;

        let expected = image.min_len();
        if image.data.len() != expected {
            return Err(RasterError::SizeMismatch {
                expected,
                actual: image.data.len(),
            });
        }
        Ok(image)
    }

    /// Check that the geometry fits `data`.
    ///
    /// Extra bytes past the last row are allowed.
    pub fn validate(&self) -> Result<(), RasterError> {
        if self.width == 0 || self.height == 0 {
            return Err(RasterError::EmptyImage);
        }
        if (self.bytes_per_row as u64) < self.width as u64 * BGRA_PIXEL_SIZE as u64 {
            return Err(RasterError::InvalidStride {
                bytes_per_row: self.bytes_per_row,
                width: self.width,
            });
        }

        let expected = self.min_len();
        if self.data.len() < expected {
            return Err(RasterError::SizeMismatch {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    fn min_len(&self) -> usize {
        self.bytes_per_row as usize * self.height as usize
    }

    /// Offset of pixel `(x, y)` in `data`
    pub fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.bytes_per_row as usize + x as usize * BGRA_PIXEL_SIZE as usize
    }

    /// BGRA of pixel `(x, y)`
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let at = self.offset(x, y);
        [
            self.data[at],
            self.data[at + 1],
            self.data[at + 2],
            self.data[at + 3],
        ]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, bgra: [u8; 4]) {
        let at = self.offset(x, y);
        self.data[at..at + 4].copy_from_slice(&bgra);
    }

    /// One row without its padding, `None` if it lies outside `data`
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        let start = self.offset(0, y);
        let len = self.width as usize * BGRA_PIXEL_SIZE as usize;
        self.data.get(start..start.checked_add(len)?)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// A decoded image ready for a device sink, with the frame it came from
#[derive(Debug, Clone)]
pub struct RasterFrame {
    pub id: String,
    pub sequence: u64,
    pub fps: u32,
    pub timestamp: u64,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub data: Bytes,
}

impl RasterFrame {
    /// Pair a raster image with its source frame's metadata
    pub fn from_image(frame: &Frame, image: RasterImage) -> Self {
        Self {
            id: frame.id.clone(),
            sequence: frame.sequence,
            fps: frame.fps,
            timestamp: frame.timestamp,
            width: image.width,
            height: image.height,
            bytes_per_row: image.bytes_per_row,
            data: Bytes::from(image.data),
        }
    }
}

/// Decode a frame into BGRA8.
///
/// Raster frames are validated and copied; compressed frames are decoded
/// with the `image` crate.
pub fn decode_frame(frame: &Frame) -> Result<RasterImage, RasterError> {
    if frame.is_compressed() {
        return decode_compressed(&frame.data);
    }

    if frame.pixel_size != BGRA_PIXEL_SIZE {
        return Err(RasterError::Decode(format!(
            "unsupported pixel size {}",
            frame.pixel_size
        )));
    }

    RasterImage::from_bgra(
        frame.width,
        frame.height,
        frame.bytes_per_row,
        frame.data.to_vec(),
    )
}

fn decode_compressed(data: &[u8]) -> Result<RasterImage, RasterError> {
    if data.is_empty() {
        return Err(RasterError::EmptyImage);
    }

    let rgba = image::load_from_memory(data)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixels = rgba.into_raw();

    // RGBA -> BGRA
    for px in pixels.chunks_exact_mut(4) {
        px.swap(0, 2);
    }

    RasterImage::from_bgra(width, height, width * BGRA_PIXEL_SIZE, pixels)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgba, RgbaImage};

    use super::*;

    fn png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(rgba));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_new_is_packed() {
        let img = RasterImage::new(3, 2);

        assert_eq!(img.bytes_per_row, 12);
        assert_eq!(img.data.len(), 24);
    }

    #[test]
    fn test_from_bgra_validates() {
        assert_eq!(
            RasterImage::from_bgra(2, 2, 8, vec![0; 15]),
            Err(RasterError::SizeMismatch {
                expected: 16,
                actual: 15
            })
        );
        assert!(RasterImage::from_bgra(0, 2, 8, Vec::new()).is_err());
        assert_eq!(
            RasterImage::from_bgra(4, 1, 8, vec![0; 8]),
            Err(RasterError::InvalidStride {
                bytes_per_row: 8,
                width: 4
            })
        );
    }

    #[test]
    fn test_validate_catches_short_data() {
        let mut img = RasterImage::new(4, 2);
        assert!(img.validate().is_ok());

        img.data.truncate(4);
        assert_eq!(
            img.validate(),
            Err(RasterError::SizeMismatch {
                expected: 32,
                actual: 4
            })
        );
        assert_eq!(img.row(1), None);

        img.data.resize(40, 0);
        assert!(img.validate().is_ok());
    }

    #[test]
    fn test_padded_rows() {
        let mut img = RasterImage::from_bgra(2, 2, 12, vec![0; 24]).unwrap();
        img.set_pixel(1, 1, [1, 2, 3, 4]);

        assert_eq!(img.pixel(1, 1), [1, 2, 3, 4]);
        assert_eq!(img.row(1), Some(&[0, 0, 0, 0, 1, 2, 3, 4][..]));
    }

    #[test]
    fn test_decode_raster_frame() {
        let frame = Frame::new(vec![9u8; 16], 2, 2, 8, 4);
        let img = decode_frame(&frame).unwrap();

        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.pixel(1, 1), [9, 9, 9, 9]);
    }

    #[test]
    fn test_decode_raster_wrong_length() {
        let frame = Frame::new(vec![0u8; 10], 2, 2, 8, 4);
        assert!(matches!(
            decode_frame(&frame),
            Err(RasterError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_raster_unsupported_pixel_size() {
        let frame = Frame::new(vec![0u8; 12], 2, 2, 6, 3);
        assert!(matches!(decode_frame(&frame), Err(RasterError::Decode(_))));
    }

    #[test]
    fn test_decode_png_to_bgra() {
        let frame = Frame::compressed(png(3, 2, [255, 0, 0, 255]), 3, 2);
        let img = decode_frame(&frame).unwrap();

        assert_eq!(img.dimensions(), (3, 2));
        // Red in BGRA order
        assert_eq!(img.pixel(2, 1), [0, 0, 255, 255]);
    }

    #[test]
    fn test_decode_garbage_compressed() {
        let frame = Frame::compressed(vec![1, 2, 3, 4], 2, 2);
        assert!(matches!(decode_frame(&frame), Err(RasterError::Decode(_))));

        let empty = Frame::compressed(Vec::<u8>::new(), 2, 2);
        assert_eq!(decode_frame(&empty), Err(RasterError::EmptyImage));
    }

    #[test]
    fn test_raster_frame_keeps_metadata() {
        let frame = Frame::new(vec![0u8; 16], 2, 2, 8, 4).with_sequence(4);
        let img = decode_frame(&frame).unwrap();
        let raster = RasterFrame::from_image(&frame, img);

        assert_eq!(raster.id, frame.id);
        assert_eq!(raster.sequence, 4);
        assert_eq!(raster.data.len(), 16);
    }
}
