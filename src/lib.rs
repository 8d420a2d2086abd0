//! # olympus-wsi
//!
//! A reader for Olympus whole-slide-image archives: the proprietary SIS/ETS
//! container and its OME-TIFF sidecar variant. Opens a container, reconstructs
//! its multi-resolution pyramid from a flat tile index, and serves decoded
//! RGBA tiles through a content-addressed cache and a DeepZoom coordinate
//! adapter, for an external rasterizer to pull from.
//!
//! This is a library with no CLI, network I/O, or bundled server: every
//! container lives on local disk, and the host application drives tile
//! requests itself.
//!
//! ## Architecture
//!
//! - [`discovery`] - classify a path into a container kind (`.ets`/`.tif`/`.vsi`)
//! - [`format`] - binary header parsing (SIS/ETS, OME-TIFF) and tile decoders
//! - [`pyramid`] - multi-resolution level reconstruction from a flat tile index
//! - [`io`] - local-file range reads and a handle pool
//! - [`tile`] - content-addressed, refcounted decoded-tile cache
//! - [`deepzoom`] - DeepZoom coordinate adapter
//! - [`properties`] - vendor property table
//! - [`slide`] - [`Slide`], the unified entry point tying the above together
//! - [`config`] - open-time options
//! - [`error`] - the layered error taxonomy
//!
//! ## Example
//!
//! ```rust,no_run
//! use olympus_wsi::{Slide, SlideOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), olympus_wsi::SlideError> {
//!     let slide = Slide::open("sample.ets", SlideOptions::default()).await?;
//!     let tile = slide.read_tile(0, 0, 0, 0).await?;
//!     println!("level count: {}, tile bytes: {}", slide.level_count(), tile.rgba.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod deepzoom;
pub mod discovery;
pub mod error;
pub mod format;
pub mod io;
pub mod properties;
pub mod pyramid;
pub mod slide;
pub mod tile;

pub use config::SlideOptions;
pub use deepzoom::{DeepZoomAdapter, DeepZoomSource, TileRequest};
pub use discovery::ContainerKind;
pub use error::{
    ConfigError, DeepZoomError, DiscoveryError, HeaderError, IoError, OmeError, PyramidError,
    SlideError, TiffError, TileError,
};
pub use io::RangeReader;
pub use pyramid::{LevelDescriptor, TileDirectoryEntry};
pub use slide::{OmeMetadata, Slide};
pub use tile::{PinnedTile, TileCache, TileKey};
