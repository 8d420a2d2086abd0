//! Pyramid reconstruction from a flat, unsorted tile index.
//!
//! Neither container format ships an authoritative per-level dimension
//! table. The ETS tile directory gives only scattered `(level, col, row,
//! channel)` coordinates; this module infers `level_count`, `plane_count`,
//! and each level's pixel dimensions from the coordinates actually observed.
//! [`crate::format::ome`] builds [`LevelDescriptor`]s by a parallel route
//! (one IFD per level×channel) but shares this module's result type.

use crate::error::PyramidError;

/// One entry of the ETS tile directory, after header parsing.
///
/// Immutable once loaded; the inference pass below only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileDirectoryEntry {
    pub col: u32,
    pub row: u32,
    pub channel: u32,
    pub level: u32,
    pub offset: u64,
    pub bytes: u32,
}

/// A single pyramid level's immutable description.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelDescriptor {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_across: u32,
    pub tiles_down: u32,
    /// Downsample relative to level 0. Exactly `2^level` for the ETS path;
    /// derived from observed widths for OME-TIFF, so this is a float.
    pub downsample: f64,
    pub plane_count: u32,
}

impl LevelDescriptor {
    fn tiles_spanning(extent: u32, tile_extent: u32) -> u32 {
        extent.div_ceil(tile_extent)
    }

    /// Build a descriptor from pixel dimensions, deriving tiles-across/down.
    pub fn new(
        width: u32,
        height: u32,
        tile_width: u32,
        tile_height: u32,
        downsample: f64,
        plane_count: u32,
    ) -> Self {
        Self {
            width,
            height,
            tile_width,
            tile_height,
            tiles_across: Self::tiles_spanning(width, tile_width),
            tiles_down: Self::tiles_spanning(height, tile_height),
            downsample,
            plane_count,
        }
    }
}

fn ceil_half(v: u32) -> u32 {
    v.div_ceil(2).max(1)
}

/// Infer `level_count`, `plane_count`, and every [`LevelDescriptor`] from a
/// flat ETS tile directory.
///
/// `tile_width`/`tile_height` come from the ETS header (equal across
/// levels). Returns [`PyramidError::InconsistentPyramid`] if any tile's
/// coordinates fall outside the bounds implied by the sorted per-level
/// maxima, or if the directory is empty.
pub fn build_pyramid(
    entries: &[TileDirectoryEntry],
    tile_width: u32,
    tile_height: u32,
) -> Result<Vec<LevelDescriptor>, PyramidError> {
    if entries.is_empty() {
        return Err(PyramidError::InconsistentPyramid {
            reason: "tile directory is empty".to_string(),
        });
    }

    // Step 1: level_count = max(level) + 1.
    let level_count = entries.iter().map(|e| e.level).max().unwrap() + 1;

    // Step 2: plane_count = max(channel) + 1.
    let plane_count = entries.iter().map(|e| e.channel).max().unwrap() + 1;

    // Step 3: per-level max col/row.
    let mut max_col = vec![0u32; level_count as usize];
    let mut max_row = vec![0u32; level_count as usize];
    let mut seen = vec![false; level_count as usize];
    for e in entries {
        if e.level >= level_count {
            return Err(PyramidError::InconsistentPyramid {
                reason: format!("tile level {} exceeds inferred level_count {}", e.level, level_count),
            });
        }
        let idx = e.level as usize;
        max_col[idx] = max_col[idx].max(e.col);
        max_row[idx] = max_row[idx].max(e.row);
        seen[idx] = true;
    }
    if let Some(missing) = seen.iter().position(|s| !s) {
        return Err(PyramidError::InconsistentPyramid {
            reason: format!("no tiles observed for level {missing}"),
        });
    }

    // Step 4: sort maxCol/maxRow independently in descending order, then
    // take index 0 as the highest-resolution level. For a directory whose
    // levels already run highest-resolution-first (the common case), this
    // sort is a no-op: the per-level maxima of a 2x pyramid are already
    // monotonically non-increasing.
    let mut sorted_col = max_col.clone();
    let mut sorted_row = max_row.clone();
    sorted_col.sort_unstable_by(|a, b| b.cmp(a));
    sorted_row.sort_unstable_by(|a, b| b.cmp(a));

    // Step 5: level 0 dimensions from the sorted maxima, then halve-ceiling.
    let width0 = tile_width.saturating_mul(sorted_col[0] + 1);
    let height0 = tile_height.saturating_mul(sorted_row[0] + 1);

    let mut levels = Vec::with_capacity(level_count as usize);
    let mut width = width0;
    let mut height = height0;
    for level in 0..level_count {
        if level > 0 {
            width = ceil_half(width);
            height = ceil_half(height);
        }
        let downsample = 2f64.powi(level as i32);
        levels.push(LevelDescriptor::new(
            width,
            height,
            tile_width,
            tile_height,
            downsample,
            plane_count,
        ));
    }

    // Step 6 / fails clause: verify every tile's coordinate is within the
    // tiles-across/tiles-down implied by its level's descriptor.
    for e in entries {
        let lvl = &levels[e.level as usize];
        if e.col >= lvl.tiles_across || e.row >= lvl.tiles_down {
            return Err(PyramidError::InconsistentPyramid {
                reason: format!(
                    "tile ({}, {}) at level {} exceeds bounds ({}, {})",
                    e.col, e.row, e.level, lvl.tiles_across, lvl.tiles_down
                ),
            });
        }
    }

    Ok(levels)
}
