//! Error types
//!
//! Every failure in this crate degrades to "drop this frame", "skip this
//! subscriber" or "retry this connection". These types exist so the
//! component that decides which of those to do can log something useful.

use std::fmt;
use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Named channel transport failure
    Transport(TransportError),
    /// Serialized frame could not be encoded or decoded
    Codec(CodecError),
    /// Raster conversion or buffer allocation failure
    Raster(RasterError),
    /// Component is not in a state that allows the operation
    InvalidState(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "Transport error: {}", e),
            Error::Codec(e) => write!(f, "Codec error: {}", e),
            Error::Raster(e) => write!(f, "Raster error: {}", e),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => Some(e),
            Error::Codec(e) => Some(e),
            Error::Raster(e) => Some(e),
            Error::InvalidState(_) => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(err)
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Error::Codec(err)
    }
}

impl From<RasterError> for Error {
    fn from(err: RasterError) -> Self {
        Error::Raster(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transport(TransportError::Io(err))
    }
}

/// Named channel transport errors
#[derive(Debug)]
pub enum TransportError {
    /// Another live listener already owns this channel name
    NameInUse(String),
    /// Channel name cannot be mapped to an endpoint
    InvalidName(String),
    /// No listener is reachable under this channel name
    Unreachable(String),
    /// Payload exceeds the configured maximum
    PayloadTooLarge { size: usize, max: usize },
    /// Peer closed the stream mid-exchange
    Closed,
    /// Underlying I/O failure
    Io(io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NameInUse(name) => write!(f, "Channel name already in use: {}", name),
            TransportError::InvalidName(name) => write!(f, "Invalid channel name: {:?}", name),
            TransportError::Unreachable(name) => write!(f, "Channel unreachable: {}", name),
            TransportError::PayloadTooLarge { size, max } => {
                write!(f, "Payload too large: {} bytes (max {})", size, max)
            }
            TransportError::Closed => write!(f, "Channel closed by peer"),
            TransportError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            TransportError::Io(err)
        }
    }
}

/// Frame envelope errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a complete value was read
    UnexpectedEof,
    /// Envelope does not start with the expected magic bytes
    BadMagic,
    /// Envelope version this build cannot read
    UnsupportedVersion(u16),
    /// A required key is absent
    MissingKey(&'static str),
    /// A known key carries a value of the wrong type
    TypeMismatch { key: &'static str, marker: u8 },
    /// A numeric value does not fit the target field
    OutOfRange(&'static str),
    /// String value is not valid UTF-8
    InvalidUtf8,
    /// Too many entries to fit the envelope header
    TooManyEntries(usize),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::UnexpectedEof => write!(f, "Unexpected end of envelope"),
            CodecError::BadMagic => write!(f, "Not a frame envelope"),
            CodecError::UnsupportedVersion(v) => write!(f, "Unsupported envelope version: {}", v),
            CodecError::MissingKey(key) => write!(f, "Missing required key: {}", key),
            CodecError::TypeMismatch { key, marker } => {
                write!(f, "Key {} has unexpected type marker 0x{:02x}", key, marker)
            }
            CodecError::OutOfRange(key) => write!(f, "Value out of range for key: {}", key),
            CodecError::InvalidUtf8 => write!(f, "Invalid UTF-8 string"),
            CodecError::TooManyEntries(n) => write!(f, "Too many envelope entries: {}", n),
        }
    }
}

impl std::error::Error for CodecError {}

/// Raster conversion and buffer pool errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RasterError {
    /// Compressed payload could not be decoded
    Decode(String),
    /// Raster payload length does not match its declared geometry
    SizeMismatch { expected: usize, actual: usize },
    /// Frame geometry differs from the pool's buffer geometry
    DimensionMismatch {
        pool: (u32, u32),
        frame: (u32, u32),
    },
    /// Row stride is shorter than a row of pixels
    InvalidStride { bytes_per_row: u32, width: u32 },
    /// Every pooled buffer is currently checked out
    PoolExhausted,
    /// Width or height is zero
    EmptyImage,
}

impl fmt::Display for RasterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterError::Decode(msg) => write!(f, "Image decode failed: {}", msg),
            RasterError::SizeMismatch { expected, actual } => {
                write!(f, "Raster size mismatch: expected {} bytes, got {}", expected, actual)
            }
            RasterError::DimensionMismatch { pool, frame } => write!(
                f,
                "Pool sized for {}x{}, frame is {}x{}",
                pool.0, pool.1, frame.0, frame.1
            ),
            RasterError::InvalidStride {
                bytes_per_row,
                width,
            } => write!(
                f,
                "Row stride {} too small for width {}",
                bytes_per_row, width
            ),
            RasterError::PoolExhausted => write!(f, "Raster pool exhausted"),
            RasterError::EmptyImage => write!(f, "Image has zero width or height"),
        }
    }
}

impl std::error::Error for RasterError {}

impl From<image::ImageError> for RasterError {
    fn from(err: image::ImageError) -> Self {
        RasterError::Decode(err.to_string())
    }
}
