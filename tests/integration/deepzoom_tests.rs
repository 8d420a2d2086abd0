//! End-to-end coverage mapping DeepZoom tile requests onto physical reads
//! through the real `Slide` pyramid geometry.

use olympus_wsi::{Slide, SlideOptions};

use super::test_utils::{build_ets_bytes, write_temp_file, FixtureColorspace};

/// With `dzi_tile_edge` set equal to the native tile edge and no overlap,
/// the top DeepZoom level's tile grid lines up one-to-one with native
/// level 0's tile grid, so DZ tile (col, row) maps to the same physical
/// tile coordinates.
#[tokio::test]
async fn top_dz_level_aligns_with_native_level_zero() {
    let bytes = build_ets_bytes(64, 2, 4, 3, 1, FixtureColorspace::Brightfield);
    let path = write_temp_file(&bytes, "ets");

    let options = SlideOptions {
        dzi_tile_edge: 64,
        dzi_overlap: 0,
        ..SlideOptions::default()
    };
    let slide = Slide::open(&path, options).await.unwrap();

    let top = slide.dz_level_count() - 1;
    assert_eq!(slide.dz_tile_count(top), Some((4, 3)));

    for row in 0..3u32 {
        for col in 0..4u32 {
            let req = slide.map_dz_tile(top, col, row, 0).unwrap();
            assert_eq!(req.slide_level, 0);
            assert_eq!(req.x, (col * 64) as u64);
            assert_eq!(req.y, (row * 64) as u64);
            assert_eq!(req.final_scale, (64, 64));

            let physical_col = (req.x / 64) as u32;
            let physical_row = (req.y / 64) as u32;
            let tile = slide.read_tile(req.slide_level, physical_col, physical_row, req.plane).await.unwrap();
            assert_eq!(tile.width, 64);
            assert_eq!(tile.height, 64);
        }
    }

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn out_of_range_dz_tile_is_rejected() {
    let bytes = build_ets_bytes(64, 1, 2, 2, 1, FixtureColorspace::Brightfield);
    let path = write_temp_file(&bytes, "ets");
    let slide = Slide::open(&path, SlideOptions::default()).await.unwrap();

    let top = slide.dz_level_count() - 1;
    let (max_col, max_row) = slide.dz_tile_count(top).unwrap();
    let result = slide.map_dz_tile(top, max_col, max_row, 0);
    assert!(result.is_err());

    let result = slide.map_dz_tile(slide.dz_level_count(), 0, 0, 0);
    assert!(result.is_err());

    std::fs::remove_file(&path).ok();
}
