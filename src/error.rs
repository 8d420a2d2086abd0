//! Layered error taxonomy.
//!
//! Each subsystem owns an error enum; [`SlideError`] composes all of them
//! behind the single type returned across the public API boundary.

use thiserror::Error;

/// Errors reading bytes from a container file.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Requested range exceeds the file's size.
    #[error("range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// The underlying file or sidecar path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// `std::io::Error` surfaced from the local-file backend.
    #[error("I/O error: {0}")]
    Read(String),
}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            IoError::NotFound(e.to_string())
        } else {
            IoError::Read(e.to_string())
        }
    }
}

/// Errors from the container discovery protocol.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("sidecar not found for {0}")]
    NotFound(String),

    #[error("header magic mismatch: expected {expected:?}, found {found:?}")]
    BadMagic { expected: &'static str, found: String },

    #[error("unsupported container: {reason}")]
    Unsupported { reason: String },
}

/// Errors parsing the SIS/ETS binary headers and tile directory.
#[derive(Debug, Clone, Error)]
pub enum HeaderError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("header magic mismatch: expected {expected:?}, found {found:?}")]
    BadMagic { expected: &'static str, found: Vec<u8> },

    #[error("corrupt header field {field}: {reason}")]
    CorruptHeader {
        field: &'static str,
        reason: String,
    },
}

/// Errors reconstructing the tile pyramid from a flat tile index.
#[derive(Debug, Clone, Error)]
pub enum PyramidError {
    #[error("inconsistent pyramid: {reason}")]
    InconsistentPyramid { reason: String },
}

/// Errors reading and validating OME-TIFF structure and metadata.
#[derive(Debug, Clone, Error)]
pub enum OmeError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    #[error("missing required OME metadata attribute: {attribute}")]
    MissingMetadata { attribute: &'static str },

    #[error("channels disagree on {field} within level {level}")]
    ChannelDisagreement { level: usize, field: &'static str },

    #[error("malformed OME XML: {reason}")]
    MalformedXml { reason: String },
}

/// Errors parsing the generic TIFF structure underneath OME-TIFF.
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    #[error("invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    #[error("invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    #[error("file too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    #[error("invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    #[error("missing required tag: {0}")]
    MissingTag(&'static str),

    #[error("invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    #[error("unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors surfaced from a single `read_tile` call.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("no tile entry for level {level} col {col} row {row} plane {plane}")]
    MissingTile {
        level: u32,
        col: u32,
        row: u32,
        plane: u32,
    },

    #[error("unsupported codec: {code}")]
    UnsupportedCodec { code: u32 },

    #[error("decode failed: {reason}")]
    DecodeFailed { reason: String },

    #[error("invalid level {level}, slide has {max_levels} levels")]
    InvalidLevel { level: u32, max_levels: u32 },

    #[error("tile ({col}, {row}) at level {level} out of bounds (max {max_col}, {max_row})")]
    TileOutOfBounds {
        level: u32,
        col: u32,
        row: u32,
        max_col: u32,
        max_row: u32,
    },
}

/// Errors from the DeepZoom coordinate adapter.
#[derive(Debug, Clone, Error)]
pub enum DeepZoomError {
    #[error("DeepZoom level {level} out of range, have {dz_levels} levels")]
    InvalidLevel { level: u32, dz_levels: u32 },

    #[error("DeepZoom tile ({col}, {row}) at level {level} out of range (max {max_col}, {max_row})")]
    OutOfRange {
        level: u32,
        col: u32,
        row: u32,
        max_col: u32,
        max_row: u32,
    },

    #[error(transparent)]
    Tile(#[from] TileError),
}

/// Error validating a [`crate::config::SlideOptions`] value.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
}

/// The single error type returned across the public API boundary.
///
/// Once [`crate::Slide::open`] fails, every subsequent call on a host's
/// reference to it must return [`SlideError::Poisoned`].
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Pyramid(#[from] PyramidError),

    #[error(transparent)]
    Ome(#[from] OmeError),

    #[error(transparent)]
    Tile(#[from] TileError),

    #[error(transparent)]
    DeepZoom(#[from] DeepZoomError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("slide failed to open and is permanently unusable: {0}")]
    Poisoned(String),
}

impl From<TiffError> for SlideError {
    fn from(e: TiffError) -> Self {
        SlideError::Ome(OmeError::Tiff(e))
    }
}
