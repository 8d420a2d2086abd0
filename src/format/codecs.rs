//! Pixel-decoder collaborators.
//!
//! These are the "external interfaces" the core dispatches to by ETS
//! compression code: the `image` crate for JPEG, `jpeg2k` for JPEG 2000.
//! Each decode function takes encoded bytes plus the expected tile
//! dimensions and returns a fixed-size RGBA8 buffer; the core never sees a
//! crate-specific image type across the tile-store boundary.

use bytes::Bytes;
use std::io::Cursor;

use crate::error::TileError;
use crate::format::sis_ets::EtsCompression;
use crate::format::tiff::Compression as TiffCompression;

/// A decoded tile: packed RGBA8, always `width * height * 4` bytes.
#[derive(Debug, Clone)]
pub struct DecodedTile {
    pub rgba: Bytes,
    pub width: u32,
    pub height: u32,
}

impl DecodedTile {
    fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }
}

/// Decode `data` using the codec named by `compression`, expecting a tile
/// of exactly `tile_width` x `tile_height` pixels.
///
/// `fluorescence` selects the JP2 output convention: brightfield yields
/// packed RGBA, fluorescence yields a single scalar channel broadcast
/// across RGB with full alpha so downstream compositing stays uniform.
pub fn decode_tile(
    compression: EtsCompression,
    data: &[u8],
    tile_width: u32,
    tile_height: u32,
    fluorescence: bool,
) -> Result<DecodedTile, TileError> {
    match compression {
        EtsCompression::Jpeg => decode_jpeg(data, tile_width, tile_height),
        EtsCompression::Jp2 => decode_jp2(data, tile_width, tile_height, fluorescence),
        EtsCompression::Png => Err(TileError::UnsupportedCodec { code: EtsCompression::Png.code() }),
        EtsCompression::Bmp => Err(TileError::UnsupportedCodec { code: EtsCompression::Bmp.code() }),
    }
}

/// Decode an 8-bit baseline JPEG tile to RGBA8.
fn decode_jpeg(data: &[u8], tile_width: u32, tile_height: u32) -> Result<DecodedTile, TileError> {
    let cursor = Cursor::new(data);
    let reader = image::ImageReader::with_format(cursor, image::ImageFormat::Jpeg);
    let img = reader
        .decode()
        .map_err(|e| TileError::DecodeFailed { reason: e.to_string() })?;

    let (width, height) = (img.width(), img.height());
    if width != tile_width || height != tile_height {
        return Err(TileError::DecodeFailed {
            reason: format!(
                "decoded JPEG tile is {width}x{height}, expected {tile_width}x{tile_height}"
            ),
        });
    }

    let rgba = img.to_rgba8().into_raw();
    debug_assert_eq!(rgba.len(), DecodedTile::expected_len(width, height));

    Ok(DecodedTile {
        rgba: Bytes::from(rgba),
        width,
        height,
    })
}

/// Decode a JPEG 2000 tile. Brightfield tiles are packed RGB(A); fluorescence
/// tiles carry a single scalar component per plane, broadcast to greyscale
/// RGBA so the cache's buffer shape is uniform across both colourspaces.
fn decode_jp2(
    data: &[u8],
    tile_width: u32,
    tile_height: u32,
    fluorescence: bool,
) -> Result<DecodedTile, TileError> {
    let image = jpeg2k::Image::from_bytes(data)
        .map_err(|e| TileError::DecodeFailed { reason: e.to_string() })?;

    let width = image.width();
    let height = image.height();
    if width != tile_width || height != tile_height {
        return Err(TileError::DecodeFailed {
            reason: format!("decoded JP2 tile is {width}x{height}, expected {tile_width}x{tile_height}"),
        });
    }

    let components = image
        .get_pixels(None)
        .map_err(|e| TileError::DecodeFailed { reason: e.to_string() })?;

    let rgba = if fluorescence {
        broadcast_scalar_to_rgba(&components.data, width, height, components.num_components as usize)
    } else {
        pack_rgb_to_rgba(&components.data, width, height, components.num_components as usize)
    };

    Ok(DecodedTile {
        rgba: Bytes::from(rgba),
        width,
        height,
    })
}

/// Decode an OME-TIFF tile, dispatching by the TIFF `Compression` tag rather
/// than the ETS compression enum. Only `Jpeg` is wired to a decoder, matching
/// [`TiffCompression::is_supported`]; any other value is `UnsupportedCodec`.
pub fn decode_ome_tile(
    compression: TiffCompression,
    data: &[u8],
    tile_width: u32,
    tile_height: u32,
) -> Result<DecodedTile, TileError> {
    match compression {
        TiffCompression::Jpeg => decode_jpeg(data, tile_width, tile_height),
        other => Err(TileError::UnsupportedCodec { code: other as u32 }),
    }
}

fn pack_rgb_to_rgba(samples: &[u8], width: u32, height: u32, num_components: usize) -> Vec<u8> {
    let pixel_count = width as usize * height as usize;
    let mut out = vec![0u8; pixel_count * 4];
    for i in 0..pixel_count {
        let (r, g, b) = match num_components {
            1 => {
                let v = samples[i];
                (v, v, v)
            }
            3 | 4 => (
                samples[i * num_components],
                samples[i * num_components + 1],
                samples[i * num_components + 2],
            ),
            _ => (0, 0, 0),
        };
        out[i * 4] = r;
        out[i * 4 + 1] = g;
        out[i * 4 + 2] = b;
        out[i * 4 + 3] = 255;
    }
    out
}

fn broadcast_scalar_to_rgba(samples: &[u8], width: u32, height: u32, num_components: usize) -> Vec<u8> {
    let pixel_count = width as usize * height as usize;
    let mut out = vec![0u8; pixel_count * 4];
    for i in 0..pixel_count {
        let v = samples[i * num_components];
        out[i * 4] = v;
        out[i * 4 + 1] = v;
        out[i * 4 + 2] = v;
        out[i * 4 + 3] = 255;
    }
    out
}
