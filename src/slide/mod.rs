//! The unified slide abstraction.
//!
//! [`Slide`] is the single entry point this crate hands to a host
//! application: open a path, get back pyramid geometry, a property table,
//! and decoded tiles, regardless of whether the path resolved to a raw
//! `.ets` container or an OME-TIFF sidecar. Structurally this plays the
//! role of the teacher's `SlideReader` trait plus `SlideRegistry`, but
//! collapsed into one concrete type: this crate opens exactly one slide at
//! a time rather than caching a fleet of remote slides behind a registry,
//! so the trait-object indirection and the S3-backed source abstraction
//! the teacher needed don't apply here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::SlideOptions;
use crate::deepzoom::{DeepZoomAdapter, DeepZoomSource, TileRequest};
use crate::discovery::{self, ContainerKind};
use crate::error::{DiscoveryError, SlideError, TileError};
use crate::format::codecs::{decode_ome_tile, decode_tile};
use crate::format::ome::{self, OmeContainer};
use crate::format::sis_ets::{Colorspace, EtsContainer};
use crate::io::{HandlePool, LocalFileReader};
use crate::properties;
use crate::pyramid::LevelDescriptor;
use crate::tile::{PinnedTile, TileCache, TileKey};

/// Per-backend state that differs between the ETS and OME-TIFF read paths.
enum Backend {
    Ets {
        container: EtsContainer,
        /// `(level, col, row, plane)` -> index into `container.entries`,
        /// built once at open since the tile directory arrives unsorted.
        index: HashMap<(u32, u32, u32, u32), usize>,
        fluorescence: bool,
    },
    Ome {
        container: OmeContainer,
    },
}

/// An open Olympus whole-slide-image archive: a reconstructed pyramid, a
/// property table, and a decoded-tile cache, backed by one container file
/// on local disk.
pub struct Slide {
    backend: Backend,
    levels: Vec<LevelDescriptor>,
    properties: HashMap<String, String>,
    cache: TileCache,
    handle_pool: Arc<HandlePool>,
    deepzoom: DeepZoomAdapter,
    path: PathBuf,
}

/// A geometry-only view used to bootstrap [`DeepZoomAdapter`] before the
/// owning [`Slide`] exists. [`Slide`] itself answers the same questions
/// directly (see [`Slide::level_dimensions`] etc.) once constructed.
struct GeometrySource<'a> {
    levels: &'a [LevelDescriptor],
    properties: &'a HashMap<String, String>,
}

impl DeepZoomSource for GeometrySource<'_> {
    fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    fn level_dimensions(&self, level: u32) -> Option<(u32, u32)> {
        self.levels.get(level as usize).map(|l| (l.width, l.height))
    }

    fn level_downsample(&self, level: u32) -> Option<f64> {
        self.levels.get(level as usize).map(|l| l.downsample)
    }

    fn best_level_for_downsample(&self, downsample: f64) -> u32 {
        best_level_for_downsample(self.levels, downsample)
    }

    fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// The native level whose downsample best matches `downsample`: the
/// largest downsample that does not exceed it, so the caller never reads a
/// coarser tile than it asked for and upscales. Mirrors the teacher's
/// `find_best_wsi_level` in `server/dzi.rs`.
fn best_level_for_downsample(levels: &[LevelDescriptor], downsample: f64) -> u32 {
    let mut best = 0u32;
    for (i, level) in levels.iter().enumerate() {
        if level.downsample <= downsample {
            best = i as u32;
        }
    }
    best
}

fn build_ets_index(entries: &[crate::pyramid::TileDirectoryEntry]) -> HashMap<(u32, u32, u32, u32), usize> {
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| ((e.level, e.col, e.row, e.channel), i))
        .collect()
}

type OpenFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Arc<Slide>, SlideError>> + Send>>;

impl Slide {
    /// Open `path`, classifying it via [`discovery::classify`] and
    /// dispatching to the ETS or OME-TIFF backend. Returns an `Arc` since a
    /// slide is meant to be shared across concurrent readers.
    pub async fn open(path: impl AsRef<Path>, options: SlideOptions) -> Result<Arc<Self>, SlideError> {
        options.validate()?;
        let path = path.as_ref();
        let kind = discovery::classify(path).await?;
        let slide = Self::open_classified(kind, options).await?;
        info!(
            path = %slide.path.display(),
            level_count = slide.level_count(),
            plane_count = slide.plane_count(),
            "opened slide"
        );
        Ok(slide)
    }

    /// Boxed so a `.vsi` marker can recurse into its resolved sidecar kind
    /// without an `async fn` calling itself directly (unsized recursion).
    fn open_classified(kind: ContainerKind, options: SlideOptions) -> OpenFuture {
        Box::pin(async move {
            match kind {
                ContainerKind::Ets(path) => Self::open_ets(path, options).await,
                ContainerKind::Tif(path) => Self::open_ome(path, options).await,
                ContainerKind::Vsi { sidecar_kind, .. } => Self::open_classified(*sidecar_kind, options).await,
                ContainerKind::Rejected => Err(SlideError::Discovery(DiscoveryError::Unsupported {
                    reason: "path does not resolve to a recognized container".to_string(),
                })),
            }
        })
    }

    async fn open_ets(path: PathBuf, options: SlideOptions) -> Result<Arc<Self>, SlideError> {
        let reader = LocalFileReader::open(&path).await?;
        let container = EtsContainer::open(&reader).await?;
        let levels = crate::pyramid::build_pyramid(
            &container.entries,
            container.ets.tile_width,
            container.ets.tile_height,
        )?;
        let properties = properties::ets_properties(&container, &levels);
        let index = build_ets_index(&container.entries);
        let fluorescence = matches!(container.ets.colorspace, Colorspace::Fluorescence);

        let deepzoom = {
            let source = GeometrySource {
                levels: &levels,
                properties: &properties,
            };
            DeepZoomAdapter::new(&source, options.dzi_tile_edge, options.dzi_overlap, options.dzi_limit_bounds)?
        };

        Ok(Arc::new(Self {
            backend: Backend::Ets {
                container,
                index,
                fluorescence,
            },
            levels,
            properties,
            cache: TileCache::new(options.cache_budget_bytes),
            handle_pool: HandlePool::new(&path, options.handle_pool_size),
            deepzoom,
            path,
        }))
    }

    async fn open_ome(path: PathBuf, options: SlideOptions) -> Result<Arc<Self>, SlideError> {
        let reader = LocalFileReader::open(&path).await?;
        let container = OmeContainer::open(&reader).await?;
        let levels = container.levels.clone();
        let properties = properties::ome_properties(&container.metadata, &levels);

        let deepzoom = {
            let source = GeometrySource {
                levels: &levels,
                properties: &properties,
            };
            DeepZoomAdapter::new(&source, options.dzi_tile_edge, options.dzi_overlap, options.dzi_limit_bounds)?
        };

        Ok(Arc::new(Self {
            backend: Backend::Ome { container },
            levels,
            properties,
            cache: TileCache::new(options.cache_budget_bytes),
            handle_pool: HandlePool::new(&path, options.handle_pool_size),
            deepzoom,
            path,
        }))
    }

    /// Number of native pyramid levels.
    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Number of planes (channels) per tile; 1 for brightfield, N for fluorescence.
    pub fn plane_count(&self) -> u32 {
        self.levels.first().map(|l| l.plane_count).unwrap_or(1)
    }

    /// Pixel dimensions of `level`, or `None` if out of range.
    pub fn level_dimensions(&self, level: u32) -> Option<(u32, u32)> {
        self.levels.get(level as usize).map(|l| (l.width, l.height))
    }

    /// Downsample of `level` relative to level 0, or `None` if out of range.
    pub fn level_downsample(&self, level: u32) -> Option<f64> {
        self.levels.get(level as usize).map(|l| l.downsample)
    }

    /// The native level whose downsample best matches `downsample`.
    pub fn best_level_for_downsample(&self, downsample: f64) -> u32 {
        best_level_for_downsample(&self.levels, downsample)
    }

    /// The vendor property table built at open time.
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// Look up a single property by key.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Path to the container file this slide was opened from (for `.vsi`,
    /// the resolved sidecar, not the marker file).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Map a DeepZoom `(dz_level, col, row, plane)` request to a physical
    /// slide read. Does not itself read or decode pixels; callers use the
    /// returned [`TileRequest`] to drive [`Self::read_tile`].
    pub fn map_dz_tile(&self, dz_level: u32, col: u32, row: u32, plane: u32) -> Result<TileRequest, SlideError> {
        Ok(self.deepzoom.get_tile(dz_level, col, row, plane)?)
    }

    /// Number of DeepZoom levels.
    pub fn dz_level_count(&self) -> u32 {
        self.deepzoom.dz_levels()
    }

    /// DeepZoom tile grid dimensions at `dz_level`.
    pub fn dz_tile_count(&self, dz_level: u32) -> Option<(u32, u32)> {
        self.deepzoom.tile_count(dz_level)
    }

    /// Read and decode the tile at `(level, col, row, plane)`, going through
    /// the cache: a hit returns the cached decode, a miss decodes via the
    /// backend's codec, with every concurrent miss for the same key joining
    /// one decode.
    pub async fn read_tile(&self, level: u32, col: u32, row: u32, plane: u32) -> Result<PinnedTile, SlideError> {
        let max_levels = self.level_count();
        if level >= max_levels {
            let err = TileError::InvalidLevel { level, max_levels };
            tracing::error!(error = %err, "read_tile rejected: invalid level");
            return Err(err.into());
        }
        let descriptor = &self.levels[level as usize];
        if col >= descriptor.tiles_across || row >= descriptor.tiles_down {
            let err = TileError::TileOutOfBounds {
                level,
                col,
                row,
                max_col: descriptor.tiles_across,
                max_row: descriptor.tiles_down,
            };
            tracing::error!(error = %err, "read_tile rejected: tile out of bounds");
            return Err(err.into());
        }

        let key = TileKey { level, col, row, plane };
        let tile_width = descriptor.tile_width;
        let tile_height = descriptor.tile_height;

        debug!(?key, "tile lookup");

        let result = match &self.backend {
            Backend::Ets { container, index, fluorescence } => {
                let Some(&entry_idx) = index.get(&(level, col, row, plane)) else {
                    let err = TileError::MissingTile { level, col, row, plane };
                    tracing::error!(error = %err, "read_tile rejected: no directory entry");
                    return Err(err.into());
                };
                let entry = container.entries[entry_idx];
                let compression = container.ets.compression;
                let fluorescence = *fluorescence;
                let handle_pool = self.handle_pool.clone();

                self.cache
                    .get_or_decode(key, || async move {
                        let data = handle_pool
                            .read_exact_at(entry.offset, entry.bytes as usize)
                            .await
                            .map_err(TileError::Io)?;
                        decode_tile(compression, &data, tile_width, tile_height, fluorescence)
                    })
                    .await
            }
            Backend::Ome { container } => {
                let Some((offset, byte_count, compression)) = container.tile_location(level, col, row, plane) else {
                    let err = TileError::MissingTile { level, col, row, plane };
                    tracing::error!(error = %err, "read_tile rejected: no directory entry");
                    return Err(err.into());
                };
                let handle_pool = self.handle_pool.clone();

                self.cache
                    .get_or_decode(key, || async move {
                        let data = handle_pool
                            .read_exact_at(offset, byte_count as usize)
                            .await
                            .map_err(TileError::Io)?;
                        decode_ome_tile(compression, &data, tile_width, tile_height)
                    })
                    .await
            }
        };

        match result {
            Ok(pinned) => Ok(pinned),
            Err(err) => {
                tracing::error!(error = %err, ?key, "tile decode failed");
                Err(err.into())
            }
        }
    }
}

pub use ome::OmeMetadata;
