//! Self-describing key/value envelope
//!
//! ```text
//! +--------+-------------+-----------+---------------------------+
//! | "FBFR" | version u16 | count u16 | entry * count             |
//! +--------+-------------+-----------+---------------------------+
//!
//! entry: | key len u16 | key UTF-8 | marker u8 | value len u32 | value |
//! ```
//!
//! Value markers:
//! ```text
//! 0x01 - Unsigned (u64 BE)
//! 0x02 - Signed   (i64 BE)
//! 0x03 - Double   (f64 BE)
//! 0x04 - Boolean  (u8, non-zero = true)
//! 0x05 - String   (UTF-8)
//! 0x06 - Binary   (raw bytes)
//! ```
//!
//! Every value carries its length, so entries with a marker this version
//! does not know are skipped rather than rejected.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// Envelope magic
pub const MAGIC: &[u8; 4] = b"FBFR";

/// Envelope version written by this crate
pub const VERSION: u16 = 1;

const HEADER_SIZE: usize = 8;

const MARKER_UNSIGNED: u8 = 0x01;
const MARKER_SIGNED: u8 = 0x02;
const MARKER_DOUBLE: u8 = 0x03;
const MARKER_BOOLEAN: u8 = 0x04;
const MARKER_STRING: u8 = 0x05;
const MARKER_BINARY: u8 = 0x06;

/// A typed envelope value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unsigned(u64),
    Signed(i64),
    Double(f64),
    Boolean(bool),
    String(String),
    Binary(Bytes),
}

impl Value {
    /// Wire marker for this value
    pub fn marker(&self) -> u8 {
        match self {
            Value::Unsigned(_) => MARKER_UNSIGNED,
            Value::Signed(_) => MARKER_SIGNED,
            Value::Double(_) => MARKER_DOUBLE,
            Value::Boolean(_) => MARKER_BOOLEAN,
            Value::String(_) => MARKER_STRING,
            Value::Binary(_) => MARKER_BINARY,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Value::Unsigned(_) | Value::Signed(_) | Value::Double(_) => 8,
            Value::Boolean(_) => 1,
            Value::String(s) => s.len(),
            Value::Binary(b) => b.len(),
        }
    }
}

/// Builds an envelope entry by entry
#[derive(Debug)]
pub struct EnvelopeEncoder {
    buf: BytesMut,
    count: usize,
    error: Option<CodecError>,
}

impl EnvelopeEncoder {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Pre-size the output; binary payloads dominate frame envelopes
    pub fn with_capacity(capacity: usize) -> Self {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + capacity);
        buf.put_slice(MAGIC);
        buf.put_u16(VERSION);
        buf.put_u16(0); // patched in finish()
        Self {
            buf,
            count: 0,
            error: None,
        }
    }

    /// Append one entry
    pub fn put(&mut self, key: &str, value: &Value) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        if key.len() > u16::MAX as usize {
            self.error = Some(CodecError::OutOfRange("key length"));
            return self;
        }
        let len = value.encoded_len();
        if len > u32::MAX as usize {
            self.error = Some(CodecError::OutOfRange("value length"));
            return self;
        }

        self.buf.reserve(2 + key.len() + 1 + 4 + len);
        self.buf.put_u16(key.len() as u16);
        self.buf.put_slice(key.as_bytes());
        self.buf.put_u8(value.marker());
        self.buf.put_u32(len as u32);

        match value {
            Value::Unsigned(v) => self.buf.put_u64(*v),
            Value::Signed(v) => self.buf.put_i64(*v),
            Value::Double(v) => self.buf.put_f64(*v),
            Value::Boolean(v) => self.buf.put_u8(u8::from(*v)),
            Value::String(s) => self.buf.put_slice(s.as_bytes()),
            Value::Binary(b) => self.buf.put_slice(b),
        }

        self.count += 1;
        self
    }

    /// Patch the entry count and return the envelope
    pub fn finish(mut self) -> Result<Bytes, CodecError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.count > u16::MAX as usize {
            return Err(CodecError::TooManyEntries(self.count));
        }

        let count = (self.count as u16).to_be_bytes();
        self.buf[6..8].copy_from_slice(&count);
        Ok(self.buf.freeze())
    }
}

impl Default for EnvelopeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded envelope
///
/// Keeps entries in wire order. Lookups are linear; frame envelopes carry a
/// dozen keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    entries: Vec<(String, Value)>,
}

impl Envelope {
    /// Decode an envelope. Binary values share the input allocation.
    pub fn decode(mut buf: Bytes) -> Result<Self, CodecError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(CodecError::UnexpectedEof);
        }
        if &buf[..4] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        buf.advance(4);

        let version = buf.get_u16();
        if version != VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let count = buf.get_u16() as usize;
        let mut entries = Vec::with_capacity(count);

        for _ in 0..count {
            let key = read_key(&mut buf)?;
            if buf.remaining() < 5 {
                return Err(CodecError::UnexpectedEof);
            }
            let marker = buf.get_u8();
            let len = buf.get_u32() as usize;
            if buf.remaining() < len {
                return Err(CodecError::UnexpectedEof);
            }
            let mut raw = buf.split_to(len);

            if let Some(value) = decode_value(marker, &mut raw)? {
                entries.push((key, value));
            }
        }

        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Remove and return an entry
    pub fn take(&mut self, key: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.swap_remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

fn read_key(buf: &mut Bytes) -> Result<String, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::UnexpectedEof);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(CodecError::UnexpectedEof);
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

/// Decode a value; `None` for markers this version does not know
fn decode_value(marker: u8, raw: &mut Bytes) -> Result<Option<Value>, CodecError> {
    let value = match marker {
        MARKER_UNSIGNED => Value::Unsigned(fixed(raw)?.get_u64()),
        MARKER_SIGNED => Value::Signed(fixed(raw)?.get_i64()),
        MARKER_DOUBLE => Value::Double(fixed(raw)?.get_f64()),
        MARKER_BOOLEAN => {
            if raw.remaining() != 1 {
                return Err(CodecError::UnexpectedEof);
            }
            Value::Boolean(raw.get_u8() != 0)
        }
        MARKER_STRING => Value::String(
            String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)?,
        ),
        MARKER_BINARY => Value::Binary(std::mem::take(raw)),
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn fixed(raw: &mut Bytes) -> Result<&mut Bytes, CodecError> {
    if raw.remaining() != 8 {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(raw)
}
