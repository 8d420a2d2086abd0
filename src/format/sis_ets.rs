//! SIS/ETS binary header and tile-directory codec.
//!
//! All integers are little-endian. The SIS header wraps a fixed-size ETS
//! header, which is followed by a flat tile directory and then the
//! compressed tile payloads themselves, in no particular order.
//!
//! This module only decodes bytes into typed structs and enforces the
//! header's own invariants (magic bytes, fixed sizes, enumerated field
//! values). Reconstructing the pyramid from the decoded tile directory is
//! [`crate::pyramid`]'s job.

use crate::error::HeaderError;
use crate::io::RangeReader;
use crate::pyramid::TileDirectoryEntry;

/// Byte size of the SIS header, fixed by the format.
pub const SIS_HEADER_SIZE: usize = 64;

/// Byte size of the ETS header, fixed by the format.
pub const ETS_HEADER_SIZE: usize = 228;

/// Byte size of a single tile-directory entry.
pub const TILE_DIR_ENTRY_SIZE: usize = 32;

fn u32_le(bytes: &[u8]) -> u32 {
    crate::io::read_u32_le(bytes)
}

fn u64_le(bytes: &[u8]) -> u64 {
    crate::io::read_u64_le(bytes)
}

fn expect_magic(bytes: &[u8], expected: &'static str) -> Result<(), HeaderError> {
    if &bytes[..4] != expected.as_bytes() {
        return Err(HeaderError::BadMagic {
            expected,
            found: bytes[..4].to_vec(),
        });
    }
    Ok(())
}

fn expect_u32(field: &'static str, bytes: &[u8], expected: u32) -> Result<u32, HeaderError> {
    let value = u32_le(bytes);
    if value != expected {
        return Err(HeaderError::CorruptHeader {
            field,
            reason: format!("expected {expected}, found {value}"),
        });
    }
    Ok(value)
}

/// The 64-byte SIS header at file offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SisHeader {
    pub version: u32,
    /// Number of tile-directory coordinate dimensions: 4 (brightfield) or 6 (fluorescence).
    pub ndim: u32,
    pub ets_offset: u64,
    pub tile_dir_offset: u64,
    pub tile_count: u32,
}

impl SisHeader {
    /// Parse the SIS header from the first [`SIS_HEADER_SIZE`] bytes of the file.
    pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < SIS_HEADER_SIZE {
            return Err(HeaderError::CorruptHeader {
                field: "header",
                reason: format!("need {SIS_HEADER_SIZE} bytes, got {}", bytes.len()),
            });
        }

        expect_magic(&bytes[0..4], "SIS0")?;
        expect_u32("headerSize", &bytes[4..8], 64)?;
        let version = u32_le(&bytes[8..12]);

        let ndim = u32_le(&bytes[12..16]);
        if ndim != 4 && ndim != 6 {
            return Err(HeaderError::CorruptHeader {
                field: "Ndim",
                reason: format!("expected 4 or 6, found {ndim}"),
            });
        }

        let ets_offset = u64_le(&bytes[16..24]);
        if ets_offset != 64 {
            return Err(HeaderError::CorruptHeader {
                field: "etsOffset",
                reason: format!("expected 64, found {ets_offset}"),
            });
        }
        expect_u32("etsBytes", &bytes[24..28], 228)?;
        // bytes[28..32]: reserved, =0.
        expect_u32("reserved@28", &bytes[28..32], 0)?;

        let tile_dir_offset = u64_le(&bytes[32..40]);
        let tile_count = u32_le(&bytes[40..44]);
        // bytes[44..48]: reserved, =0.
        expect_u32("reserved@44", &bytes[44..48], 0)?;
        // bytes[48..64]: two misc u32 fields each followed by a reserved u32; not asserted.

        Ok(SisHeader {
            version,
            ndim,
            ets_offset,
            tile_dir_offset,
            tile_count,
        })
    }
}

/// ETS pixel sample type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    UInt8,
    Int32,
}

impl PixelType {
    fn from_u32(value: u32) -> Result<Self, HeaderError> {
        match value {
            2 => Ok(PixelType::UInt8),
            4 => Ok(PixelType::Int32),
            other => Err(HeaderError::CorruptHeader {
                field: "pixelType",
                reason: format!("expected 2 (UInt8) or 4 (Int32), found {other}"),
            }),
        }
    }

    /// Byte width of one channel sample.
    pub fn sample_bytes(self) -> usize {
        match self {
            PixelType::UInt8 => 1,
            PixelType::Int32 => 4,
        }
    }
}

/// ETS channel organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Grayscale,
    Rgb,
}

impl ChannelKind {
    fn from_u32(value: u32) -> Result<Self, HeaderError> {
        match value {
            1 => Ok(ChannelKind::Grayscale),
            3 => Ok(ChannelKind::Rgb),
            other => Err(HeaderError::CorruptHeader {
                field: "channelKind",
                reason: format!("expected 1 (Grayscale) or 3 (RGB), found {other}"),
            }),
        }
    }

    /// Number of samples packed per tile pixel.
    pub fn component_count(self) -> usize {
        match self {
            ChannelKind::Grayscale => 1,
            ChannelKind::Rgb => 3,
        }
    }
}

/// ETS acquisition colourspace, distinguishing brightfield (packed RGB, one
/// plane) from fluorescence (N scalar planes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colorspace {
    Fluorescence,
    Brightfield,
}

impl Colorspace {
    fn from_u32(value: u32) -> Result<Self, HeaderError> {
        match value {
            1 => Ok(Colorspace::Fluorescence),
            4 => Ok(Colorspace::Brightfield),
            other => Err(HeaderError::CorruptHeader {
                field: "colorspace",
                reason: format!("expected 1 (Fluorescence) or 4 (Brightfield), found {other}"),
            }),
        }
    }
}

/// ETS tile compression scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtsCompression {
    Jpeg,
    Jp2,
    /// Reserved, not yet implemented by any decoder collaborator.
    Png,
    /// Reserved, not yet implemented by any decoder collaborator.
    Bmp,
}

impl EtsCompression {
    fn from_u32(value: u32) -> Result<Self, HeaderError> {
        match value {
            2 => Ok(EtsCompression::Jpeg),
            3 => Ok(EtsCompression::Jp2),
            8 => Ok(EtsCompression::Png),
            9 => Ok(EtsCompression::Bmp),
            other => Err(HeaderError::CorruptHeader {
                field: "compression",
                reason: format!("unrecognized compression code {other}"),
            }),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            EtsCompression::Jpeg => 2,
            EtsCompression::Jp2 => 3,
            EtsCompression::Png => 8,
            EtsCompression::Bmp => 9,
        }
    }
}

/// The 228-byte ETS header at file offset 64.
#[derive(Debug, Clone, PartialEq)]
pub struct EtsHeader {
    pub version: u32,
    pub pixel_type: PixelType,
    pub channel_kind: ChannelKind,
    pub colorspace: Colorspace,
    pub compression: EtsCompression,
    pub quality: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub background_color: Vec<u8>,
    pub component_order: u32,
    pub use_pyramid: bool,
}

impl EtsHeader {
    /// Parse the ETS header from [`ETS_HEADER_SIZE`] bytes (the slice at file offset 64).
    pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < ETS_HEADER_SIZE {
            return Err(HeaderError::CorruptHeader {
                field: "header",
                reason: format!("need {ETS_HEADER_SIZE} bytes, got {}", bytes.len()),
            });
        }

        expect_magic(&bytes[0..4], "ETS0")?;
        let version = u32_le(&bytes[4..8]);
        let pixel_type = PixelType::from_u32(u32_le(&bytes[8..12]))?;
        let channel_kind = ChannelKind::from_u32(u32_le(&bytes[12..16]))?;
        let colorspace = Colorspace::from_u32(u32_le(&bytes[16..20]))?;
        let compression = EtsCompression::from_u32(u32_le(&bytes[20..24]))?;
        let quality = u32_le(&bytes[24..28]);
        let tile_width = u32_le(&bytes[28..32]);
        let tile_height = u32_le(&bytes[32..36]);
        let tile_depth = u32_le(&bytes[36..40]);
        if tile_depth != 1 {
            return Err(HeaderError::CorruptHeader {
                field: "tileDepth",
                reason: format!("expected 1, found {tile_depth}"),
            });
        }

        // 68 skip bytes: bytes[40..108].
        let bg_start = 108;
        let bg_len = channel_kind.component_count() * pixel_type.sample_bytes();
        let bg_bytes = &bytes[bg_start..bg_start + bg_len];
        // Clamp every component to 8 bits, regardless of stored width.
        let background_color: Vec<u8> = match pixel_type {
            PixelType::UInt8 => bg_bytes.to_vec(),
            PixelType::Int32 => bg_bytes
                .chunks_exact(4)
                .map(|c| u32_le(c).min(255) as u8)
                .collect(),
        };

        // Padding to 10 slots of u32 (40 bytes) starting at bg_start.
        let padded_end = bg_start + 10 * 4;
        let component_order = u32_le(&bytes[padded_end..padded_end + 4]);
        let use_pyramid_raw = u32_le(&bytes[padded_end + 4..padded_end + 8]);

        Ok(EtsHeader {
            version,
            pixel_type,
            channel_kind,
            colorspace,
            compression,
            quality,
            tile_width,
            tile_height,
            background_color,
            component_order,
            use_pyramid: use_pyramid_raw != 0,
        })
    }
}

/// Parse `tile_count` consecutive 32-byte tile-directory entries starting
/// at the beginning of `bytes`.
pub fn parse_tile_directory(bytes: &[u8], tile_count: u32) -> Result<Vec<TileDirectoryEntry>, HeaderError> {
    let required = tile_count as usize * TILE_DIR_ENTRY_SIZE;
    if bytes.len() < required {
        return Err(HeaderError::CorruptHeader {
            field: "tileDirectory",
            reason: format!("need {required} bytes for {tile_count} entries, got {}", bytes.len()),
        });
    }

    let mut entries = Vec::with_capacity(tile_count as usize);
    for i in 0..tile_count as usize {
        let entry = &bytes[i * TILE_DIR_ENTRY_SIZE..(i + 1) * TILE_DIR_ENTRY_SIZE];
        // reserved:u32, coord[3]:u32 (col,row,channel), level:u32, offset:u64, bytes:u32, reserved:u32
        let col = u32_le(&entry[4..8]);
        let row = u32_le(&entry[8..12]);
        let channel = u32_le(&entry[12..16]);
        let level = u32_le(&entry[16..20]);
        let offset = u64_le(&entry[20..28]);
        let byte_count = u32_le(&entry[28..32]);

        entries.push(TileDirectoryEntry {
            col,
            row,
            channel,
            level,
            offset,
            bytes: byte_count,
        });
    }

    Ok(entries)
}

/// Everything decoded from an `.ets` file's headers and directory, before
/// pyramid inference.
#[derive(Debug, Clone)]
pub struct EtsContainer {
    pub sis: SisHeader,
    pub ets: EtsHeader,
    pub entries: Vec<TileDirectoryEntry>,
}

impl EtsContainer {
    /// Open and fully parse an ETS container's headers and tile directory
    /// over `reader`. Validates `offset + bytes ≤ file length` for every
    /// directory entry.
    pub async fn open<R: RangeReader>(reader: &R) -> Result<Self, HeaderError> {
        let file_size = reader.size();
        let sis_bytes = reader
            .read_exact_at(0, SIS_HEADER_SIZE)
            .await
            .map_err(HeaderError::Io)?;
        let sis = SisHeader::parse(&sis_bytes)?;

        let ets_bytes = reader
            .read_exact_at(sis.ets_offset, ETS_HEADER_SIZE)
            .await
            .map_err(HeaderError::Io)?;
        let ets = EtsHeader::parse(&ets_bytes)?;

        let dir_len = sis.tile_count as usize * TILE_DIR_ENTRY_SIZE;
        let dir_bytes = reader
            .read_exact_at(sis.tile_dir_offset, dir_len)
            .await
            .map_err(HeaderError::Io)?;
        let entries = parse_tile_directory(&dir_bytes, sis.tile_count)?;

        for e in &entries {
            if e.offset + e.bytes as u64 > file_size {
                return Err(HeaderError::CorruptHeader {
                    field: "tileDirectory",
                    reason: format!(
                        "tile at ({}, {}, level {}) extends past end of file: offset {} + {} bytes > size {}",
                        e.col, e.row, e.level, e.offset, e.bytes, file_size
                    ),
                });
            }
        }

        Ok(EtsContainer { sis, ets, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    fn push_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn build_sis_header(tile_count: u32, tile_dir_offset: u64) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(b"SIS0");
        push_u32(&mut b, 64); // headerSize
        push_u32(&mut b, 1); // version
        push_u32(&mut b, 4); // Ndim
        push_u64(&mut b, 64); // etsOffset
        push_u32(&mut b, 228); // etsBytes
        push_u32(&mut b, 0); // reserved
        push_u64(&mut b, tile_dir_offset);
        push_u32(&mut b, tile_count);
        push_u32(&mut b, 0); // reserved
        push_u32(&mut b, 0); // misc
        push_u32(&mut b, 0); // reserved
        push_u32(&mut b, 0); // misc
        push_u32(&mut b, 0); // reserved
        assert_eq!(b.len(), 64);
        b
    }

    fn build_ets_header(tile_width: u32, tile_height: u32, compression: u32) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(b"ETS0");
        push_u32(&mut b, 1); // version
        push_u32(&mut b, 2); // pixelType UInt8
        push_u32(&mut b, 3); // channelKind RGB
        push_u32(&mut b, 4); // colorspace Brightfield
        push_u32(&mut b, compression);
        push_u32(&mut b, 90); // quality
        push_u32(&mut b, tile_width);
        push_u32(&mut b, tile_height);
        push_u32(&mut b, 1); // tileDepth
        b.extend_from_slice(&[0u8; 68]); // skip bytes
        // background color: RGB, UInt8 => 3 bytes, padded to 40 bytes total
        b.extend_from_slice(&[10, 20, 30]);
        b.extend_from_slice(&[0u8; 37]);
        push_u32(&mut b, 0); // component order
        push_u32(&mut b, 1); // usePyramid
        b.resize(ETS_HEADER_SIZE, 0);
        assert_eq!(b.len(), ETS_HEADER_SIZE);
        b
    }

    fn build_tile_entry(col: u32, row: u32, channel: u32, level: u32, offset: u64, bytes: u32) -> Vec<u8> {
        let mut b = Vec::new();
        push_u32(&mut b, 0); // reserved
        push_u32(&mut b, col);
        push_u32(&mut b, row);
        push_u32(&mut b, channel);
        push_u32(&mut b, level);
        push_u64(&mut b, offset);
        push_u32(&mut b, bytes);
        push_u32(&mut b, 0); // reserved
        assert_eq!(b.len(), 32);
        b
    }

    #[test]
    fn sis_header_round_trips() {
        let raw = build_sis_header(4, 64 + 228);
        let sis = SisHeader::parse(&raw).unwrap();
        assert_eq!(sis.ndim, 4);
        assert_eq!(sis.ets_offset, 64);
        assert_eq!(sis.tile_dir_offset, 64 + 228);
        assert_eq!(sis.tile_count, 4);
    }

    #[test]
    fn sis_header_bad_magic() {
        let mut raw = build_sis_header(1, 292);
        raw[0] = b'X';
        let result = SisHeader::parse(&raw);
        assert!(matches!(result, Err(HeaderError::BadMagic { .. })));
    }

    #[test]
    fn sis_header_wrong_ndim() {
        let mut raw = build_sis_header(1, 292);
        // Ndim is at bytes[12..16]
        raw[12..16].copy_from_slice(&5u32.to_le_bytes());
        let result = SisHeader::parse(&raw);
        assert!(matches!(result, Err(HeaderError::CorruptHeader { field: "Ndim", .. })));
    }

    #[test]
    fn ets_header_round_trips() {
        let raw = build_ets_header(512, 512, 2);
        let ets = EtsHeader::parse(&raw).unwrap();
        assert_eq!(ets.pixel_type, PixelType::UInt8);
        assert_eq!(ets.channel_kind, ChannelKind::Rgb);
        assert_eq!(ets.colorspace, Colorspace::Brightfield);
        assert_eq!(ets.compression, EtsCompression::Jpeg);
        assert_eq!(ets.tile_width, 512);
        assert_eq!(ets.tile_height, 512);
        assert_eq!(ets.background_color, vec![10, 20, 30]);
        assert!(ets.use_pyramid);
    }

    #[test]
    fn ets_header_unknown_compression() {
        let raw = build_ets_header(512, 512, 99);
        let result = EtsHeader::parse(&raw);
        assert!(matches!(result, Err(HeaderError::CorruptHeader { field: "compression", .. })));
    }

    #[test]
    fn tile_directory_round_trips() {
        let mut raw = Vec::new();
        raw.extend(build_tile_entry(0, 0, 0, 0, 1000, 2048));
        raw.extend(build_tile_entry(1, 0, 0, 0, 3048, 2048));
        let entries = parse_tile_directory(&raw, 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].col, 0);
        assert_eq!(entries[1].col, 1);
        assert_eq!(entries[1].offset, 3048);
    }

    struct MockReader {
        data: Bytes,
    }

    #[async_trait::async_trait]
    impl RangeReader for MockReader {
        async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, crate::error::IoError> {
            let start = offset as usize;
            let end = start + len;
            if end > self.data.len() {
                return Err(crate::error::IoError::RangeOutOfBounds {
                    offset,
                    requested: len as u64,
                    size: self.data.len() as u64,
                });
            }
            Ok(self.data.slice(start..end))
        }
        fn size(&self) -> u64 {
            self.data.len() as u64
        }
        fn identifier(&self) -> &str {
            "mock://ets"
        }
    }

    #[tokio::test]
    async fn ets_container_open_end_to_end() {
        let tile_dir_offset = 64 + ETS_HEADER_SIZE as u64;
        let mut file = build_sis_header(1, tile_dir_offset);
        file.extend(build_ets_header(512, 512, 2));
        let tile_data_offset = tile_dir_offset + TILE_DIR_ENTRY_SIZE as u64;
        file.extend(build_tile_entry(0, 0, 0, 0, tile_data_offset, 10));
        file.extend(vec![0xFFu8; 10]); // fake tile payload

        let reader = MockReader { data: Bytes::from(file) };
        let container = EtsContainer::open(&reader).await.unwrap();
        assert_eq!(container.entries.len(), 1);
        assert_eq!(container.entries[0].bytes, 10);
    }

    #[tokio::test]
    async fn ets_container_rejects_tile_past_eof() {
        let tile_dir_offset = 64 + ETS_HEADER_SIZE as u64;
        let mut file = build_sis_header(1, tile_dir_offset);
        file.extend(build_ets_header(512, 512, 2));
        // offset + bytes exceeds file length.
        file.extend(build_tile_entry(0, 0, 0, 0, 100_000, 10));

        let reader = MockReader { data: Bytes::from(file) };
        let result = EtsContainer::open(&reader).await;
        assert!(matches!(result, Err(HeaderError::CorruptHeader { .. })));
    }
}
