//! Byte-accurate fixture builders for end-to-end tests.
//!
//! These build real, fully valid `.ets` and OME-TIFF files in a temp
//! directory and hand back a path `Slide::open` can read directly off
//! disk, exercising the real filesystem-backed `RangeReader` rather than
//! the in-memory mocks the unit tests use. The byte layouts mirror
//! `format::sis_ets` and `format::tiff` exactly; see those modules for the
//! field-by-field reference.

use std::path::PathBuf;

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

/// Encode a small, deterministic JPEG tile. `seed` varies the pixel pattern
/// across tiles so distinct tiles decode to distinct content.
pub fn encode_test_jpeg(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x as u8).wrapping_add(seed), (y as u8).wrapping_mul(2).wrapping_add(seed), seed])
    });
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, 90);
    encoder.encode_image(&img).unwrap();
    buf
}

fn ceil_half(v: u32) -> u32 {
    v.div_ceil(2).max(1)
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn push_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Which acquisition colourspace an ETS fixture should declare.
#[derive(Clone, Copy)]
pub enum FixtureColorspace {
    Brightfield,
    Fluorescence,
}

fn build_sis_header(ndim: u32, tile_count: u32, tile_dir_offset: u64) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(b"SIS0");
    push_u32(&mut b, 64);
    push_u32(&mut b, 1);
    push_u32(&mut b, ndim);
    push_u64(&mut b, 64);
    push_u32(&mut b, 228);
    push_u32(&mut b, 0);
    push_u64(&mut b, tile_dir_offset);
    push_u32(&mut b, tile_count);
    push_u32(&mut b, 0);
    push_u32(&mut b, 0);
    push_u32(&mut b, 0);
    push_u32(&mut b, 0);
    b.resize(64, 0);
    b
}

fn build_ets_header(tile_width: u32, tile_height: u32, colorspace: FixtureColorspace) -> Vec<u8> {
    let (channel_kind, colorspace_code, bg): (u32, u32, &[u8]) = match colorspace {
        FixtureColorspace::Brightfield => (3, 4, &[10, 20, 30]),
        FixtureColorspace::Fluorescence => (1, 1, &[40]),
    };

    let mut b = Vec::new();
    b.extend_from_slice(b"ETS0");
    push_u32(&mut b, 1); // version
    push_u32(&mut b, 2); // pixelType UInt8
    push_u32(&mut b, channel_kind);
    push_u32(&mut b, colorspace_code);
    push_u32(&mut b, 2); // compression: JPEG
    push_u32(&mut b, 90); // quality
    push_u32(&mut b, tile_width);
    push_u32(&mut b, tile_height);
    push_u32(&mut b, 1); // tileDepth
    b.extend_from_slice(&[0u8; 68]);
    b.extend_from_slice(bg);
    b.resize(108 + 40, 0);
    push_u32(&mut b, 0); // component order
    push_u32(&mut b, 1); // usePyramid
    b.resize(228, 0);
    b
}

fn build_tile_entry(col: u32, row: u32, channel: u32, level: u32, offset: u64, bytes: u32) -> Vec<u8> {
    let mut b = Vec::new();
    push_u32(&mut b, 0);
    push_u32(&mut b, col);
    push_u32(&mut b, row);
    push_u32(&mut b, channel);
    push_u32(&mut b, level);
    push_u64(&mut b, offset);
    push_u32(&mut b, bytes);
    push_u32(&mut b, 0);
    b
}

/// Build a complete, valid `.ets` file: a multi-level pyramid, optionally
/// multi-plane, with real JPEG tile payloads at every grid cell.
///
/// `cols0`/`rows0` are the level-0 tile grid extent, so level-0 pixel
/// dimensions come out to an exact multiple of `tile_edge` (the shape
/// `build_pyramid` expects); later levels halve via `ceil_half` like the
/// real format and may leave a partial edge tile, still encoded at the
/// full `tile_edge` like every other tile.
pub fn build_ets_bytes(
    tile_edge: u32,
    num_levels: u32,
    cols0: u32,
    rows0: u32,
    plane_count: u32,
    colorspace: FixtureColorspace,
) -> Vec<u8> {
    let ndim = if plane_count > 1 { 6 } else { 4 };

    let mut grid = Vec::new();
    let mut width = tile_edge * cols0;
    let mut height = tile_edge * rows0;
    for level in 0..num_levels {
        if level > 0 {
            width = ceil_half(width);
            height = ceil_half(height);
        }
        let tiles_across = width.div_ceil(tile_edge);
        let tiles_down = height.div_ceil(tile_edge);
        grid.push((tiles_across, tiles_down));
    }

    let tile_count: u32 = grid.iter().map(|&(c, r)| c * r * plane_count).sum();

    let tile_dir_offset: u64 = 64 + 228;
    let tile_data_start: u64 = tile_dir_offset + tile_count as u64 * 32;

    let mut payloads = Vec::new();
    let mut entries = Vec::new();
    let mut cursor = tile_data_start;
    let mut seed = 1u8;
    for (level, &(tiles_across, tiles_down)) in grid.iter().enumerate() {
        for channel in 0..plane_count {
            for row in 0..tiles_down {
                for col in 0..tiles_across {
                    let payload = encode_test_jpeg(tile_edge, tile_edge, seed);
                    seed = seed.wrapping_add(1);
                    entries.push(build_tile_entry(
                        col,
                        row,
                        channel,
                        level as u32,
                        cursor,
                        payload.len() as u32,
                    ));
                    cursor += payload.len() as u64;
                    payloads.push(payload);
                }
            }
        }
    }

    let mut file = build_sis_header(ndim, tile_count, tile_dir_offset);
    file.extend(build_ets_header(tile_edge, tile_edge, colorspace));
    for e in &entries {
        file.extend(e);
    }
    for p in &payloads {
        file.extend(p);
    }
    file
}

/// Write `bytes` to a fresh temp file with `extension` and return its path.
pub fn write_temp_file(bytes: &[u8], extension: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "olympus-wsi-integration-{}-{}.{extension}",
        std::process::id(),
        unique_suffix(),
    ));
    std::fs::write(&path, bytes).unwrap();
    path
}

fn unique_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// OME XML carrying the Olympus experimenter sentinel plus enough
/// `Pixels`/`Channel` metadata for property extraction.
pub fn sample_ome_xml(size_x: u32, size_y: u32, channel_count: u32) -> String {
    let mut channels = String::new();
    for i in 0..channel_count {
        channels.push_str(&format!(r#"<Channel ID="Channel:{i}" Name="ch{i}"/>"#));
    }
    format!(
        r#"<OME>
  <Experimenter ID="Experimenter:0" UserName="olympus"/>
  <Instrument><Microscope Manufacturer="Olympus" Model="VS200"/></Instrument>
  <Image ID="Image:0" AcquisitionDate="2024-01-01T00:00:00">
    <Pixels SizeX="{size_x}" SizeY="{size_y}" PhysicalSizeX="0.25" PhysicalSizeY="0.25">
      {channels}
      <Plane TheC="0" TheZ="0" TheT="0" ExposureTime="12.5"/>
    </Pixels>
  </Image>
</OME>"#
    )
}

struct OmeDir {
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    tiles_across: u32,
    tiles_down: u32,
    tiles: Vec<Vec<u8>>,
    carries_xml: bool,
}

/// Build a complete, valid classic-TIFF OME container: one IFD per
/// (level, plane), grouped `plane_count` at a time as `OmeContainer::open`
/// expects, with the OME XML embedded in the first IFD's `ImageDescription`
/// tag and mandatory tile tags on every IFD.
pub fn build_ome_tiff_bytes(levels: &[(u32, u32)], plane_count: u32, tile_edge: u32, xml: &str) -> Vec<u8> {
    let mut dirs = Vec::new();
    let mut seed = 1u8;
    for (level_idx, &(width, height)) in levels.iter().enumerate() {
        let tiles_across = width.div_ceil(tile_edge);
        let tiles_down = height.div_ceil(tile_edge);
        for plane in 0..plane_count {
            let mut tiles = Vec::new();
            for _ in 0..(tiles_across * tiles_down) {
                tiles.push(encode_test_jpeg(tile_edge, tile_edge, seed));
                seed = seed.wrapping_add(1);
            }
            dirs.push(OmeDir {
                width,
                height,
                tile_width: tile_edge,
                tile_height: tile_edge,
                tiles_across,
                tiles_down,
                tiles,
                carries_xml: level_idx == 0 && plane == 0,
            });
        }
    }
    build_ome_tiff_from_dirs(dirs, xml)
}

/// Lower-level builder taking explicit per-directory width/height, so tests
/// can construct directories that disagree within a level (for
/// channel-agreement rejection tests) rather than deriving them uniformly
/// from a level list.
pub fn build_ome_tiff_custom(
    dir_dims: &[(u32, u32)],
    tile_edge: u32,
    xml: &str,
) -> Vec<u8> {
    let mut dirs = Vec::new();
    let mut seed = 1u8;
    for (i, &(width, height)) in dir_dims.iter().enumerate() {
        let tiles_across = width.div_ceil(tile_edge);
        let tiles_down = height.div_ceil(tile_edge);
        let mut tiles = Vec::new();
        for _ in 0..(tiles_across * tiles_down) {
            tiles.push(encode_test_jpeg(tile_edge, tile_edge, seed));
            seed = seed.wrapping_add(1);
        }
        dirs.push(OmeDir {
            width,
            height,
            tile_width: tile_edge,
            tile_height: tile_edge,
            tiles_across,
            tiles_down,
            tiles,
            carries_xml: i == 0,
        });
    }
    build_ome_tiff_from_dirs(dirs, xml)
}

fn build_ome_tiff_from_dirs(dirs: Vec<OmeDir>, xml: &str) -> Vec<u8> {
    const HEADER_SIZE: u64 = 8;
    const ENTRY_SIZE: u64 = 12;
    const COUNT_SIZE: u64 = 2;
    const NEXT_OFFSET_SIZE: u64 = 4;

    let entries_per_dir: Vec<u64> = dirs.iter().map(|d| if d.carries_xml { 8 } else { 7 }).collect();
    let ifd_sizes: Vec<u64> = entries_per_dir.iter().map(|&n| COUNT_SIZE + n * ENTRY_SIZE + NEXT_OFFSET_SIZE).collect();

    let mut ifd_offsets = Vec::with_capacity(dirs.len());
    let mut cursor = HEADER_SIZE;
    for &size in &ifd_sizes {
        ifd_offsets.push(cursor);
        cursor += size;
    }

    let mut xml_bytes = xml.as_bytes().to_vec();
    xml_bytes.push(0);
    let xml_offset = cursor;
    cursor += xml_bytes.len() as u64;

    let mut tile_offsets_array_offset = Vec::with_capacity(dirs.len());
    let mut tile_bytecounts_array_offset = Vec::with_capacity(dirs.len());
    for d in &dirs {
        let count = (d.tiles_across * d.tiles_down) as u64;
        if count > 1 {
            tile_offsets_array_offset.push(Some(cursor));
            cursor += count * 4;
            tile_bytecounts_array_offset.push(Some(cursor));
            cursor += count * 4;
        } else {
            tile_offsets_array_offset.push(None);
            tile_bytecounts_array_offset.push(None);
        }
    }

    let mut dir_tile_offsets: Vec<Vec<u64>> = Vec::with_capacity(dirs.len());
    for d in &dirs {
        let mut offs = Vec::with_capacity(d.tiles.len());
        for t in &d.tiles {
            offs.push(cursor);
            cursor += t.len() as u64;
        }
        dir_tile_offsets.push(offs);
    }

    let mut out = vec![0u8; cursor as usize];
    out[0] = b'I';
    out[1] = b'I';
    out[2..4].copy_from_slice(&42u16.to_le_bytes());
    out[4..8].copy_from_slice(&(ifd_offsets[0] as u32).to_le_bytes());

    for (i, d) in dirs.iter().enumerate() {
        let mut entries: Vec<(u16, u16, u32, [u8; 4])> = Vec::new();
        entries.push((256, 4, 1, d.width.to_le_bytes())); // ImageWidth
        entries.push((257, 4, 1, d.height.to_le_bytes())); // ImageLength
        entries.push((322, 4, 1, d.tile_width.to_le_bytes())); // TileWidth
        entries.push((323, 4, 1, d.tile_height.to_le_bytes())); // TileLength
        entries.push((259, 4, 1, 7u32.to_le_bytes())); // Compression = JPEG

        let count = (d.tiles_across * d.tiles_down) as u32;
        let offsets_value = match tile_offsets_array_offset[i] {
            Some(off) => off as u32,
            None => dir_tile_offsets[i][0] as u32,
        };
        entries.push((324, 4, count, offsets_value.to_le_bytes()));
        let bytecounts_value = match tile_bytecounts_array_offset[i] {
            Some(off) => off as u32,
            None => d.tiles[0].len() as u32,
        };
        entries.push((325, 4, count, bytecounts_value.to_le_bytes()));

        if d.carries_xml {
            entries.push((270, 2, xml_bytes.len() as u32, (xml_offset as u32).to_le_bytes()));
        }

        entries.sort_by_key(|e| e.0);

        let ifd_off = ifd_offsets[i] as usize;
        let mut pos = ifd_off;
        out[pos..pos + 2].copy_from_slice(&(entries.len() as u16).to_le_bytes());
        pos += 2;
        for (tag, ftype, cnt, value) in &entries {
            out[pos..pos + 2].copy_from_slice(&tag.to_le_bytes());
            out[pos + 2..pos + 4].copy_from_slice(&ftype.to_le_bytes());
            out[pos + 4..pos + 8].copy_from_slice(&cnt.to_le_bytes());
            out[pos + 8..pos + 12].copy_from_slice(value);
            pos += 12;
        }
        let next_offset = if i + 1 < dirs.len() { ifd_offsets[i + 1] as u32 } else { 0 };
        out[pos..pos + 4].copy_from_slice(&next_offset.to_le_bytes());
    }

    let xo = xml_offset as usize;
    out[xo..xo + xml_bytes.len()].copy_from_slice(&xml_bytes);

    for (i, d) in dirs.iter().enumerate() {
        if let Some(off) = tile_offsets_array_offset[i] {
            let mut pos = off as usize;
            for &to in &dir_tile_offsets[i] {
                out[pos..pos + 4].copy_from_slice(&(to as u32).to_le_bytes());
                pos += 4;
            }
        }
        if let Some(off) = tile_bytecounts_array_offset[i] {
            let mut pos = off as usize;
            for t in &d.tiles {
                out[pos..pos + 4].copy_from_slice(&(t.len() as u32).to_le_bytes());
                pos += 4;
            }
        }
        for (t, &to) in d.tiles.iter().zip(&dir_tile_offsets[i]) {
            let pos = to as usize;
            out[pos..pos + t.len()].copy_from_slice(t);
        }
    }

    out
}

