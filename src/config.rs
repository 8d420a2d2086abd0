//! Open-time configuration for a [`crate::Slide`].
//!
//! The host application supplies these programmatically; there is no CLI or
//! environment-variable layer (the crate is library-only).

use crate::error::ConfigError;

/// Default tile cache byte budget: 256 MiB.
pub const DEFAULT_CACHE_BUDGET_BYTES: usize = 256 * 1024 * 1024;

/// Default size of the per-container file handle pool.
pub const DEFAULT_HANDLE_POOL_SIZE: usize = 4;

/// Default DeepZoom tile edge length, matching common viewer defaults.
pub const DEFAULT_DZI_TILE_EDGE: u32 = 254;

/// Default DeepZoom interior tile overlap.
pub const DEFAULT_DZI_OVERLAP: u32 = 1;

/// Validated options controlling how a [`crate::Slide`] is opened.
///
/// Construct with [`SlideOptions::default`] and override only the fields
/// that matter, then call [`SlideOptions::validate`] (also done
/// automatically by [`crate::Slide::open`]).
#[derive(Debug, Clone, PartialEq)]
pub struct SlideOptions {
    /// Soft byte budget for the decoded-tile cache.
    pub cache_budget_bytes: usize,

    /// Maximum number of concurrently checked-out file handles per container.
    pub handle_pool_size: usize,

    /// DeepZoom desired tile edge length.
    pub dzi_tile_edge: u32,

    /// DeepZoom interior tile overlap in pixels.
    pub dzi_overlap: u32,

    /// Whether DeepZoom dimensions are scaled to the slide's bounds properties.
    pub dzi_limit_bounds: bool,
}

impl Default for SlideOptions {
    fn default() -> Self {
        Self {
            cache_budget_bytes: DEFAULT_CACHE_BUDGET_BYTES,
            handle_pool_size: DEFAULT_HANDLE_POOL_SIZE,
            dzi_tile_edge: DEFAULT_DZI_TILE_EDGE,
            dzi_overlap: DEFAULT_DZI_OVERLAP,
            dzi_limit_bounds: false,
        }
    }
}

impl SlideOptions {
    /// Reject configurations that cannot produce a usable slide.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_budget_bytes == 0 {
            return Err(ConfigError::ZeroValue {
                field: "cache_budget_bytes",
            });
        }
        if self.handle_pool_size == 0 {
            return Err(ConfigError::ZeroValue {
                field: "handle_pool_size",
            });
        }
        if self.dzi_tile_edge == 0 {
            return Err(ConfigError::ZeroValue {
                field: "dzi_tile_edge",
            });
        }
        Ok(())
    }
}
