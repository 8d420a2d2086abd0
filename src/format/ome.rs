//! OME-TIFF sidecar path.
//!
//! Structurally parallel to [`crate::format::sis_ets`] but populated from a
//! TIFF directory chain instead of SIS/ETS headers: each TIFF directory
//! (IFD) represents one level x channel combination, grouped by level then
//! channel in file order. The pyramid is not assumed to be exactly 2x;
//! per-level downsample is computed from observed widths.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::{OmeError, TiffError};
use crate::io::RangeReader;
use crate::pyramid::LevelDescriptor;

use super::tiff::{Compression, Ifd, TiffHeader, TiffTag, ValueReader};

/// One `Channel` node under an OME `Pixels` element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OmeChannel {
    pub name: Option<String>,
    pub emission_wavelength: Option<f64>,
    pub color: Option<i32>,
}

/// Metadata extracted from one OME `Image` node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OmeImageMeta {
    pub acquisition_date: Option<String>,
    pub size_x: u32,
    pub size_y: u32,
    pub physical_size_x: Option<f64>,
    pub physical_size_y: Option<f64>,
    pub channels: Vec<OmeChannel>,
    pub plane_exposure_time: Option<f64>,
}

/// Everything extracted from the OME XML document carried in a TIFF's
/// `ImageDescription` tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OmeMetadata {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    /// Count of `/OME/Instrument/LightSource` nodes, per §4.5's "enumerate
    /// ... into a channel count estimate". Informational only: the
    /// authoritative plane count is [`OmeMetadata::plane_count`], the number
    /// of `Channel` nodes under the first `Image`, which is what the rest of
    /// this crate's pyramid reconstruction actually relies on.
    pub light_source_count: u32,
    pub images: Vec<OmeImageMeta>,
}

impl OmeMetadata {
    pub fn plane_count(&self) -> u32 {
        self.images.first().map(|i| i.channels.len() as u32).max(Some(1)).unwrap_or(1)
    }

    pub fn level_count(&self) -> u32 {
        self.images.len() as u32
    }
}

fn attr_string(e: &quick_xml::events::BytesStart, key: &[u8]) -> Option<String> {
    e.attributes().flatten().find(|a| a.key.as_ref() == key).map(|a| {
        String::from_utf8_lossy(a.value.as_ref()).into_owned()
    })
}

fn attr_u32(e: &quick_xml::events::BytesStart, key: &[u8]) -> Option<u32> {
    attr_string(e, key).and_then(|s| s.parse().ok())
}

fn attr_f64(e: &quick_xml::events::BytesStart, key: &[u8]) -> Option<f64> {
    attr_string(e, key).and_then(|s| s.parse().ok())
}

fn attr_i32(e: &quick_xml::events::BytesStart, key: &[u8]) -> Option<i32> {
    attr_string(e, key).and_then(|s| s.parse().ok())
}

/// Parse the OME XML document embedded in a TIFF's `ImageDescription` tag.
///
/// Missing optional attributes default to `None`; missing `SizeX`/`SizeY`
/// fail with `MissingMetadata`, since every downstream pyramid computation
/// depends on them.
pub fn parse_ome_xml(xml: &str) -> Result<OmeMetadata, OmeError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut metadata = OmeMetadata::default();
    let mut current_image: Option<OmeImageMeta> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| OmeError::MalformedXml { reason: e.to_string() })? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                let local = local_name(&e);
                match local.as_str() {
                    "Microscope" => {
                        metadata.manufacturer = attr_string(&e, b"Manufacturer");
                        metadata.model = attr_string(&e, b"Model");
                    }
                    "LightSource" => {
                        metadata.light_source_count += 1;
                    }
                    "Image" => {
                        if let Some(img) = current_image.take() {
                            metadata.images.push(img);
                        }
                        current_image = Some(OmeImageMeta {
                            acquisition_date: attr_string(&e, b"AcquisitionDate"),
                            ..Default::default()
                        });
                    }
                    "Pixels" => {
                        let Some(img) = current_image.as_mut() else { continue };
                        img.size_x = attr_u32(&e, b"SizeX").ok_or(OmeError::MissingMetadata { attribute: "SizeX" })?;
                        img.size_y = attr_u32(&e, b"SizeY").ok_or(OmeError::MissingMetadata { attribute: "SizeY" })?;
                        img.physical_size_x = attr_f64(&e, b"PhysicalSizeX");
                        img.physical_size_y = attr_f64(&e, b"PhysicalSizeY");
                    }
                    "Channel" => {
                        let Some(img) = current_image.as_mut() else { continue };
                        img.channels.push(OmeChannel {
                            name: attr_string(&e, b"Name"),
                            emission_wavelength: attr_f64(&e, b"EmissionWavelength"),
                            color: attr_i32(&e, b"Color"),
                        });
                    }
                    "Plane" => {
                        let Some(img) = current_image.as_mut() else { continue };
                        if img.plane_exposure_time.is_none() {
                            img.plane_exposure_time = attr_f64(&e, b"ExposureTime");
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        buf.clear();
    }

    if let Some(img) = current_image.take() {
        metadata.images.push(img);
    }

    if metadata.images.is_empty() {
        return Err(OmeError::MissingMetadata { attribute: "Image" });
    }

    Ok(metadata)
}

fn local_name(e: &quick_xml::events::BytesStart) -> String {
    let name = e.name();
    let full = String::from_utf8_lossy(name.as_ref());
    full.rsplit(':').next().unwrap_or(&full).to_string()
}

/// Scan an XML document for the first `Experimenter` node's `UserName`
/// attribute, without requiring the document to parse as full OME metadata.
///
/// Used by container discovery to identify vendor-authored OME-TIFF files by
/// a sentinel username before committing to the full [`parse_ome_xml`] pass.
pub fn experimenter_username(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).ok()? {
            Event::Eof => return None,
            Event::Start(e) | Event::Empty(e) => {
                if local_name(&e) == "Experimenter" {
                    return attr_string(&e, b"UserName");
                }
            }
            _ => {}
        }
        buf.clear();
    }
}

/// One TIFF directory's structural fields, resolved from its IFD tags.
#[derive(Debug, Clone)]
pub struct DirectoryInfo {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub compression: Compression,
    pub tile_offsets: Vec<u64>,
    pub tile_byte_counts: Vec<u64>,
}

async fn read_directory_info<R: RangeReader>(
    reader: &R,
    header: &TiffHeader,
    ifd: &Ifd,
) -> Result<DirectoryInfo, TiffError> {
    let vr = ValueReader::new(reader, header);

    let width_entry = ifd.find(TiffTag::ImageWidth).ok_or(TiffError::MissingTag("ImageWidth"))?;
    let width = vr.read_u32(width_entry).await?;

    let height_entry = ifd.find(TiffTag::ImageLength).ok_or(TiffError::MissingTag("ImageLength"))?;
    let height = vr.read_u32(height_entry).await?;

    let tile_width_entry = ifd.find(TiffTag::TileWidth).ok_or(TiffError::MissingTag("TileWidth"))?;
    let tile_width = vr.read_u32(tile_width_entry).await?;

    let tile_height_entry = ifd.find(TiffTag::TileLength).ok_or(TiffError::MissingTag("TileLength"))?;
    let tile_height = vr.read_u32(tile_height_entry).await?;

    let compression_entry = ifd.find(TiffTag::Compression).ok_or(TiffError::MissingTag("Compression"))?;
    let compression_code = vr.read_u32(compression_entry).await? as u16;
    let compression = Compression::from_u16(compression_code).ok_or(TiffError::InvalidTagValue {
        tag: "Compression",
        message: format!("unrecognized compression code {compression_code}"),
    })?;

    let tile_offsets_entry = ifd.find(TiffTag::TileOffsets).ok_or(TiffError::MissingTag("TileOffsets"))?;
    let tile_offsets = vr.read_u64_array(tile_offsets_entry).await?;

    let tile_byte_counts_entry = ifd.find(TiffTag::TileByteCounts).ok_or(TiffError::MissingTag("TileByteCounts"))?;
    let tile_byte_counts = vr.read_u64_array(tile_byte_counts_entry).await?;

    Ok(DirectoryInfo {
        width,
        height,
        tile_width,
        tile_height,
        compression,
        tile_offsets,
        tile_byte_counts,
    })
}

async fn read_ifd_chain<R: RangeReader>(reader: &R, header: &TiffHeader) -> Result<Vec<Ifd>, TiffError> {
    let mut ifds = Vec::new();
    let mut offset = header.first_ifd_offset;
    let count_size = header.ifd_count_size();
    let entry_size = header.ifd_entry_size();
    let next_offset_size = header.ifd_next_offset_size();

    while offset != 0 {
        let count_bytes = reader.read_exact_at(offset, count_size).await?;
        let entry_count = if header.is_bigtiff {
            header.byte_order.read_u64(&count_bytes)
        } else {
            header.byte_order.read_u16(&count_bytes) as u64
        };

        let total_len = count_size + entry_count as usize * entry_size + next_offset_size;
        let bytes = reader.read_exact_at(offset, total_len).await?;
        let ifd = Ifd::parse(&bytes, header)?;
        offset = ifd.next_ifd_offset;
        ifds.push(ifd);
    }

    Ok(ifds)
}

/// A fully parsed OME-TIFF container: directory chain grouped by level and
/// channel, plus the OME XML metadata.
pub struct OmeContainer {
    pub metadata: OmeMetadata,
    /// `directories[level][channel]`.
    pub directories: Vec<Vec<DirectoryInfo>>,
    pub levels: Vec<LevelDescriptor>,
}

impl OmeContainer {
    /// Open an OME-TIFF file: parse the TIFF header, walk the IFD chain,
    /// extract OME XML from the first directory's `ImageDescription`, group
    /// directories into level x channel, validate per-level channel
    /// agreement, and derive the per-level downsample.
    pub async fn open<R: RangeReader>(reader: &R) -> Result<Self, OmeError> {
        let file_size = reader.size();
        let header_bytes = reader.read_exact_at(0, crate::format::tiff::BIGTIFF_HEADER_SIZE.min(file_size as usize)).await?;
        let header = TiffHeader::parse(&header_bytes, file_size)?;

        let ifds = read_ifd_chain(reader, &header).await?;
        if ifds.is_empty() {
            return Err(OmeError::MissingMetadata { attribute: "IFD" });
        }

        let vr = ValueReader::new(reader, &header);
        let description_entry = ifds[0]
            .find(TiffTag::ImageDescription)
            .ok_or(TiffError::MissingTag("ImageDescription"))?;
        let xml = vr.read_string(description_entry).await?;
        let metadata = parse_ome_xml(&xml)?;

        let plane_count = metadata.plane_count().max(1) as usize;
        if ifds.len() % plane_count != 0 {
            return Err(OmeError::ChannelDisagreement {
                level: 0,
                field: "directory count not a multiple of plane_count",
            });
        }

        let mut directory_infos = Vec::with_capacity(ifds.len());
        for ifd in &ifds {
            directory_infos.push(read_directory_info(reader, &header, ifd).await?);
        }

        let mut directories: Vec<Vec<DirectoryInfo>> = Vec::new();
        for chunk in directory_infos.chunks(plane_count) {
            directories.push(chunk.to_vec());
        }

        let mut levels = Vec::with_capacity(directories.len());
        let mut width0 = None;
        for (level, channels) in directories.iter().enumerate() {
            let first = &channels[0];
            for (ch_idx, ch) in channels.iter().enumerate().skip(1) {
                if ch.width != first.width || ch.height != first.height {
                    return Err(OmeError::ChannelDisagreement { level, field: "width/height" });
                }
                if ch.tile_width != first.tile_width || ch.tile_height != first.tile_height {
                    return Err(OmeError::ChannelDisagreement { level, field: "tile_width/tile_height" });
                }
                let _ = ch_idx;
            }

            let width0 = *width0.get_or_insert(first.width);
            let downsample = width0 as f64 / first.width as f64;

            levels.push(LevelDescriptor::new(
                first.width,
                first.height,
                first.tile_width,
                first.tile_height,
                downsample,
                plane_count as u32,
            ));
        }

        Ok(OmeContainer { metadata, directories, levels })
    }

    /// Locate the tile-offset/byte-count pair plus compression for
    /// `(level, col, row, plane)`, for dispatch into the decoder.
    pub fn tile_location(&self, level: u32, col: u32, row: u32, plane: u32) -> Option<(u64, u64, Compression)> {
        let channels = self.directories.get(level as usize)?;
        let dir = channels.get(plane as usize)?;
        let lvl = self.levels.get(level as usize)?;
        let index = (row * lvl.tiles_across + col) as usize;
        let offset = *dir.tile_offsets.get(index)?;
        let bytes = *dir.tile_byte_counts.get(index)?;
        Some((offset, bytes, dir.compression))
    }
}

/// Extract the property-table keys OME metadata can supply, keyed by the
/// string names the outer property table uses.
pub fn ome_properties(metadata: &OmeMetadata) -> HashMap<&'static str, String> {
    let mut props = HashMap::new();
    if let Some(m) = &metadata.manufacturer {
        props.insert("openmicroscopy.manufacturer", m.clone());
    }
    if let Some(m) = &metadata.model {
        props.insert("openmicroscopy.model", m.clone());
    }
    if let Some(image) = metadata.images.first() {
        if let Some(x) = image.physical_size_x {
            props.insert("mpp-x", x.to_string());
        }
        if let Some(y) = image.physical_size_y {
            props.insert("mpp-y", y.to_string());
        }
    }
    props
}
