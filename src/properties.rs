//! Vendor property table (§4.7).
//!
//! A plain string→string map exposed to the outer host, built once at open
//! time and never mutated afterward. Neither container format carries every
//! key this table can hold; a key simply stays absent when its source
//! datum isn't present, mirroring `ome::ome_properties`'s `Option`-driven
//! extraction but collecting into the single map `Slide` hands out.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::format::ome::OmeMetadata;
use crate::format::sis_ets::EtsContainer;
use crate::pyramid::LevelDescriptor;

/// Fixed vendor sentinel every slide this crate opens carries.
pub const VENDOR: &str = "olympus";

/// A fast, non-cryptographic-strength structural fingerprint of the opened
/// pyramid, used for the `quickhash-1` key.
///
/// Hashing every compressed tile byte would defeat the point of a "quick"
/// hash on multi-gigabyte slides, so this hashes the structural fields that
/// identify the pyramid instead: per-level dimensions, tile size, plane
/// count and compression code. Two slides with identical structure but
/// different pixel data will collide here; `quickhash-1` is a cheap
/// identity check, not a content hash.
fn quickhash1(levels: &[LevelDescriptor], extra: &[u8]) -> String {
    let mut hasher = Sha256::new();
    for level in levels {
        hasher.update(level.width.to_le_bytes());
        hasher.update(level.height.to_le_bytes());
        hasher.update(level.tile_width.to_le_bytes());
        hasher.update(level.tile_height.to_le_bytes());
        hasher.update(level.plane_count.to_le_bytes());
    }
    hasher.update(extra);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Build the property table for an open ETS container.
pub fn ets_properties(container: &EtsContainer, levels: &[LevelDescriptor]) -> HashMap<String, String> {
    let mut props = HashMap::new();
    props.insert("vendor".to_string(), VENDOR.to_string());

    let mut extra = Vec::new();
    extra.extend_from_slice(&container.ets.compression.code().to_le_bytes());
    extra.extend_from_slice(&container.sis.tile_count.to_le_bytes());
    props.insert("quickhash-1".to_string(), quickhash1(levels, &extra));

    if !container.ets.background_color.is_empty() {
        let hex: String = container
            .ets
            .background_color
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        props.insert("background-color".to_string(), hex);
    }

    props
}

/// Build the property table for an open OME-TIFF container.
pub fn ome_properties(metadata: &OmeMetadata, levels: &[LevelDescriptor]) -> HashMap<String, String> {
    let mut props: HashMap<String, String> = crate::format::ome::ome_properties(metadata)
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

    props.insert("vendor".to_string(), VENDOR.to_string());

    let mut extra = Vec::new();
    if let Some(image) = metadata.images.first() {
        extra.extend_from_slice(&image.size_x.to_le_bytes());
        extra.extend_from_slice(&image.size_y.to_le_bytes());
        if let Some(date) = &image.acquisition_date {
            extra.extend_from_slice(date.as_bytes());
        }
    }
    props.insert("quickhash-1".to_string(), quickhash1(levels, &extra));

    if let Some(image) = metadata.images.first() {
        if let Some(exposure) = image.plane_exposure_time {
            props.insert("comment".to_string(), format!("exposure-time={exposure}"));
        }
    }

    props
}
