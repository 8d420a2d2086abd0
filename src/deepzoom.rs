//! DeepZoom coordinate adapter (§4.6).
//!
//! Maps DeepZoom `(level, col, row)` tile requests onto physical slide
//! reads: a native-pyramid level, a pixel offset and size, and the size the
//! caller should resize the decoded region down to. The arithmetic follows
//! the teacher's `server::dzi` helpers (`calculate_max_dzi_level`,
//! `dzi_level_dimensions`, `find_best_wsi_level`), generalized from the
//! teacher's free functions into one adapter that holds its derived state,
//! since this crate's DeepZoom layer sits in front of a single `Slide`
//! rather than per-request helper calls from an HTTP handler.

use crate::error::DeepZoomError;

/// Anything that can answer the native pyramid-geometry questions the
/// adapter needs. Implemented by [`crate::slide::Slide`]; kept as a trait
/// so the adapter's arithmetic can be tested without opening a real file.
pub trait DeepZoomSource {
    /// Number of native pyramid levels.
    fn level_count(&self) -> u32;

    /// Pixel dimensions of native `level`, or `None` if out of range.
    fn level_dimensions(&self, level: u32) -> Option<(u32, u32)>;

    /// Downsample of native `level` relative to level 0, or `None` if out of range.
    fn level_downsample(&self, level: u32) -> Option<f64>;

    /// The native level whose downsample best matches `downsample`: the
    /// largest downsample that does not exceed it (never upsamples).
    fn best_level_for_downsample(&self, downsample: f64) -> u32;

    /// A property value, for `BoundsX`/`BoundsY`/`BoundsWidth`/`BoundsHeight`.
    fn property(&self, key: &str) -> Option<&str>;
}

fn ceil_half_f64((w, h): (f64, f64)) -> (f64, f64) {
    (((w / 2.0).ceil()).max(1.0), ((h / 2.0).ceil()).max(1.0))
}

fn to_u32_dims((w, h): (f64, f64)) -> (u32, u32) {
    (w.round() as u32, h.round() as u32)
}

/// A physical read request emitted by [`DeepZoomAdapter::get_tile`].
///
/// `final_scale` is the size the caller should resize the decoded
/// `(width, height)` region down to, if it differs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRequest {
    pub slide_level: u32,
    pub plane: u32,
    pub x: u64,
    pub y: u64,
    pub width: u32,
    pub height: u32,
    pub final_scale: (u32, u32),
}

/// Derived DeepZoom state computed once at open, per §4.6.
#[derive(Debug, Clone)]
pub struct DeepZoomAdapter {
    tile_edge: u32,
    overlap: u32,
    l0_offset: (f64, f64),
    /// Per native level, possibly bounds-scaled.
    l_dimensions: Vec<(f64, f64)>,
    dz_levels: u32,
    z_dimensions: Vec<(u32, u32)>,
    t_dimensions: Vec<(u32, u32)>,
    slide_from_dz: Vec<u32>,
    l0_l_downsamples: Vec<f64>,
    l_z_downsamples: Vec<f64>,
}

impl DeepZoomAdapter {
    /// Build the adapter's derived state from a slide's native geometry and
    /// the host's DeepZoom options.
    pub fn new<S: DeepZoomSource>(
        slide: &S,
        tile_edge: u32,
        overlap: u32,
        limit_bounds: bool,
    ) -> Result<Self, DeepZoomError> {
        let level_count = slide.level_count();
        let level0 = slide
            .level_dimensions(0)
            .ok_or(DeepZoomError::InvalidLevel { level: 0, dz_levels: 0 })?;

        let bounds_x = limit_bounds
            .then(|| slide.property("bounds-x").and_then(|v| v.parse().ok()))
            .flatten()
            .unwrap_or(0.0);
        let bounds_y = limit_bounds
            .then(|| slide.property("bounds-y").and_then(|v| v.parse().ok()))
            .flatten()
            .unwrap_or(0.0);
        let l0_offset = (bounds_x, bounds_y);

        let bounds_width = limit_bounds
            .then(|| slide.property("bounds-width").and_then(|v| v.parse().ok()))
            .flatten()
            .unwrap_or(level0.0 as f64);
        let bounds_height = limit_bounds
            .then(|| slide.property("bounds-height").and_then(|v| v.parse().ok()))
            .flatten()
            .unwrap_or(level0.1 as f64);

        let scale_x = bounds_width / level0.0 as f64;
        let scale_y = bounds_height / level0.1 as f64;

        let mut l_dimensions = Vec::with_capacity(level_count as usize);
        let mut l0_l_downsamples = Vec::with_capacity(level_count as usize);
        for level in 0..level_count {
            let (w, h) = slide
                .level_dimensions(level)
                .ok_or(DeepZoomError::InvalidLevel { level, dz_levels: level_count })?;
            let (w, h) = if limit_bounds {
                (w as f64 * scale_x, h as f64 * scale_y)
            } else {
                (w as f64, h as f64)
            };
            l_dimensions.push((w, h));
            l0_l_downsamples.push(slide.level_downsample(level).unwrap_or(1.0));
        }

        let max_dim = l_dimensions[0].0.max(l_dimensions[0].1);
        let dz_levels = if max_dim <= 1.0 {
            1
        } else {
            max_dim.log2().ceil() as u32 + 1
        };

        let mut z_dimensions = vec![(0u32, 0u32); dz_levels as usize];
        let mut cur = l_dimensions[0];
        z_dimensions[dz_levels as usize - 1] = to_u32_dims(cur);
        for d in (0..dz_levels as usize - 1).rev() {
            cur = ceil_half_f64(cur);
            z_dimensions[d] = to_u32_dims(cur);
        }

        let t_dimensions: Vec<(u32, u32)> = z_dimensions
            .iter()
            .map(|&(w, h)| (w.div_ceil(tile_edge), h.div_ceil(tile_edge)))
            .collect();

        let mut slide_from_dz = Vec::with_capacity(dz_levels as usize);
        let mut l_z_downsamples = Vec::with_capacity(dz_levels as usize);
        for d in 0..dz_levels {
            let dz_downsample = 2f64.powi((dz_levels - 1 - d) as i32);
            let slide_level = slide.best_level_for_downsample(dz_downsample);
            slide_from_dz.push(slide_level);
            l_z_downsamples.push(dz_downsample / l0_l_downsamples[slide_level as usize]);
        }

        Ok(Self {
            tile_edge,
            overlap,
            l0_offset,
            l_dimensions,
            dz_levels,
            z_dimensions,
            t_dimensions,
            slide_from_dz,
            l0_l_downsamples,
            l_z_downsamples,
        })
    }

    /// Number of DeepZoom levels (index `dz_levels - 1` is full resolution).
    pub fn dz_levels(&self) -> u32 {
        self.dz_levels
    }

    /// Tile grid dimensions at DeepZoom `level`.
    pub fn tile_count(&self, level: u32) -> Option<(u32, u32)> {
        self.t_dimensions.get(level as usize).copied()
    }

    /// Pixel dimensions of DeepZoom `level`.
    pub fn level_dimensions(&self, level: u32) -> Option<(u32, u32)> {
        self.z_dimensions.get(level as usize).copied()
    }

    /// Map a DeepZoom tile request to a physical slide read, per the §4.6 algorithm.
    ///
    /// `plane` passes straight through to the emitted [`TileRequest`]; it
    /// plays no part in the coordinate arithmetic, only in which native
    /// plane the caller should read once it has the physical location.
    pub fn get_tile(&self, dz_level: u32, col: u32, row: u32, plane: u32) -> Result<TileRequest, DeepZoomError> {
        if dz_level >= self.dz_levels {
            return Err(DeepZoomError::InvalidLevel {
                level: dz_level,
                dz_levels: self.dz_levels,
            });
        }
        let (max_col, max_row) = self.t_dimensions[dz_level as usize];
        if col >= max_col || row >= max_row {
            return Err(DeepZoomError::OutOfRange {
                level: dz_level,
                col,
                row,
                max_col,
                max_row,
            });
        }

        let overlap = self.overlap;
        let overlap_tl = (if col > 0 { overlap } else { 0 }, if row > 0 { overlap } else { 0 });
        let overlap_br = (
            if col < max_col - 1 { overlap } else { 0 },
            if row < max_row - 1 { overlap } else { 0 },
        );

        let (z_w, z_h) = self.z_dimensions[dz_level as usize];
        let z_size_x = (self.tile_edge as i64).min(z_w as i64 - (self.tile_edge * col) as i64).max(0) as u32
            + overlap_tl.0
            + overlap_br.0;
        let z_size_y = (self.tile_edge as i64).min(z_h as i64 - (self.tile_edge * row) as i64).max(0) as u32
            + overlap_tl.1
            + overlap_br.1;

        let z_location = (self.tile_edge * col, self.tile_edge * row);

        let l_z_downsample = self.l_z_downsamples[dz_level as usize];
        let l_location_x = (z_location.0 as i64 - overlap_tl.0 as i64) as f64 * l_z_downsample;
        let l_location_y = (z_location.1 as i64 - overlap_tl.1 as i64) as f64 * l_z_downsample;

        let slide_level = self.slide_from_dz[dz_level as usize];
        let l0_downsample = self.l0_l_downsamples[slide_level as usize];
        let l0_x = l_location_x * l0_downsample + self.l0_offset.0;
        let l0_y = l_location_y * l0_downsample + self.l0_offset.1;

        let l_dim = self.l_dimensions[slide_level as usize];
        let l_size_x_raw = (l_z_downsample * z_size_x as f64).ceil();
        let l_size_y_raw = (l_z_downsample * z_size_y as f64).ceil();
        let l_remaining_x = (l_dim.0 - l_location_x).max(0.0);
        let l_remaining_y = (l_dim.1 - l_location_y).max(0.0);
        let l_size_x = l_size_x_raw.min(l_remaining_x).max(1.0) as u32;
        let l_size_y = l_size_y_raw.min(l_remaining_y).max(1.0) as u32;

        Ok(TileRequest {
            slide_level,
            plane,
            x: l0_x.max(0.0) as u64,
            y: l0_y.max(0.0) as u64,
            width: l_size_x,
            height: l_size_y,
            final_scale: (z_size_x, z_size_y),
        })
    }
}
