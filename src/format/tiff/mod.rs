//! Generic TIFF/BigTIFF structure parsing.
//!
//! This module parses the directory chain underlying an OME-TIFF sidecar:
//! byte order and version detection, IFD entries, and typed tag value
//! resolution. It has no OME-specific knowledge — [`crate::format::ome`]
//! walks the chain this module exposes and layers the OME XML semantics on
//! top.
//!
//! # Key Concepts
//!
//! - **Byte order**: TIFF files declare their endianness (II = little-endian, MM = big-endian)
//!   in the header. All multi-byte values must be read respecting this order.
//!
//! - **Classic TIFF vs BigTIFF**: Classic TIFF uses 32-bit offsets (max 4GB files),
//!   while BigTIFF uses 64-bit offsets. The parser handles both transparently.
//!
//! - **IFD (Image File Directory)**: Contains metadata and pointers to image data.
//!   Each directory here represents one level × channel combination.
//!
//! - **Inline vs offset values**: Small values are stored inline in the IFD entry,
//!   larger values are stored at an offset pointed to by the entry.

mod parser;
mod tags;
mod values;

pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use tags::{Compression, FieldType, TiffTag};
pub use values::{parse_u32_array, parse_u64_array, ValueReader};
