//! Frame serialization
//!
//! Frames travel as an [`envelope`](super::envelope) with one entry per
//! field. Field order is irrelevant and unknown keys are ignored, so newer
//! writers can add fields without breaking older readers.

use bytes::Bytes;

use super::envelope::{Envelope, EnvelopeEncoder, Value};
use super::Frame;
use crate::error::CodecError;

const KEY_ID: &str = "id";
const KEY_WIDTH: &str = "width";
const KEY_HEIGHT: &str = "height";
const KEY_BYTES_PER_ROW: &str = "bytesPerRow";
const KEY_PIXEL_SIZE: &str = "pixelSize";
const KEY_DATA: &str = "data";
const KEY_BITMAP_INFO: &str = "bitmapInfo";
const KEY_TIMESTAMP: &str = "timestamp";
const KEY_FPS: &str = "fps";
const KEY_SEQUENCE: &str = "sequence";
const KEY_IS_RASTER_BUFFER: &str = "isRasterBuffer";

/// Envelope overhead beyond the pixel data, rounded up
const METADATA_CAPACITY: usize = 256;

impl Frame {
    /// Encode this frame
    pub fn serialize(&self) -> Result<Bytes, CodecError> {
        let mut enc = EnvelopeEncoder::with_capacity(METADATA_CAPACITY + self.data.len());
        enc.put(KEY_ID, &Value::String(self.id.clone()))
            .put(KEY_WIDTH, &Value::Unsigned(self.width.into()))
            .put(KEY_HEIGHT, &Value::Unsigned(self.height.into()))
            .put(KEY_BYTES_PER_ROW, &Value::Unsigned(self.bytes_per_row.into()))
            .put(KEY_PIXEL_SIZE, &Value::Unsigned(self.pixel_size.into()))
            .put(KEY_BITMAP_INFO, &Value::Unsigned(self.bitmap_info.into()))
            .put(KEY_TIMESTAMP, &Value::Unsigned(self.timestamp))
            .put(KEY_FPS, &Value::Unsigned(self.fps.into()))
            .put(KEY_SEQUENCE, &Value::Unsigned(self.sequence))
            .put(KEY_IS_RASTER_BUFFER, &Value::Boolean(self.is_raster_buffer))
            .put(KEY_DATA, &Value::Binary(self.data.clone()));
        enc.finish()
    }

    /// Decode a frame.
    ///
    /// Every field is required. The pixel data shares `bytes`' allocation.
    pub fn deserialize(bytes: Bytes) -> Result<Frame, CodecError> {
        let mut env = Envelope::decode(bytes)?;

        Ok(Frame {
            id: take_string(&mut env, KEY_ID)?,
            width: take_u32(&mut env, KEY_WIDTH)?,
            height: take_u32(&mut env, KEY_HEIGHT)?,
            bytes_per_row: take_u32(&mut env, KEY_BYTES_PER_ROW)?,
            pixel_size: take_u32(&mut env, KEY_PIXEL_SIZE)?,
            data: take_binary(&mut env, KEY_DATA)?,
            bitmap_info: take_u32(&mut env, KEY_BITMAP_INFO)?,
            timestamp: take_u64(&mut env, KEY_TIMESTAMP)?,
            fps: take_u32(&mut env, KEY_FPS)?,
            sequence: take_u64(&mut env, KEY_SEQUENCE)?,
            is_raster_buffer: take_bool(&mut env, KEY_IS_RASTER_BUFFER)?,
        })
    }
}

fn take(env: &mut Envelope, key: &'static str) -> Result<Value, CodecError> {
    env.take(key).ok_or(CodecError::MissingKey(key))
}

fn mismatch(key: &'static str, value: &Value) -> CodecError {
    CodecError::TypeMismatch {
        key,
        marker: value.marker(),
    }
}

fn take_u64(env: &mut Envelope, key: &'static str) -> Result<u64, CodecError> {
    match take(env, key)? {
        Value::Unsigned(v) => Ok(v),
        other => Err(mismatch(key, &other)),
    }
}

fn take_u32(env: &mut Envelope, key: &'static str) -> Result<u32, CodecError> {
    let v = take_u64(env, key)?;
    u32::try_from(v).map_err(|_| CodecError::OutOfRange(key))
}

fn take_bool(env: &mut Envelope, key: &'static str) -> Result<bool, CodecError> {
    match take(env, key)? {
        Value::Boolean(v) => Ok(v),
        other => Err(mismatch(key, &other)),
    }
}

fn take_string(env: &mut Envelope, key: &'static str) -> Result<String, CodecError> {
    match take(env, key)? {
        Value::String(v) => Ok(v),
        other => Err(mismatch(key, &other)),
    }
}

fn take_binary(env: &mut Envelope, key: &'static str) -> Result<Bytes, CodecError> {
    match take(env, key)? {
        Value::Binary(v) => Ok(v),
        other => Err(mismatch(key, &other)),
    }
}
