//! End-to-end coverage of the ETS read path: open, pyramid geometry,
//! tile decode, bounds rejection.

use olympus_wsi::{Slide, SlideError, SlideOptions, TileError};

use super::test_utils::{build_ets_bytes, write_temp_file, FixtureColorspace};

#[tokio::test]
async fn opens_brightfield_pyramid_and_reads_tiles() {
    let bytes = build_ets_bytes(64, 3, 3, 2, 1, FixtureColorspace::Brightfield);
    let path = write_temp_file(&bytes, "ets");

    let slide = Slide::open(&path, SlideOptions::default()).await.unwrap();

    assert_eq!(slide.level_count(), 3);
    assert_eq!(slide.plane_count(), 1);
    assert_eq!(slide.level_dimensions(0), Some((192, 128)));
    // ceil_half(192) = 96, ceil_half(128) = 64
    assert_eq!(slide.level_dimensions(1), Some((96, 64)));
    assert_eq!(slide.level_dimensions(2), Some((48, 32)));
    assert_eq!(slide.properties().get("vendor").map(String::as_str), Some("olympus"));

    let tile = slide.read_tile(0, 0, 0, 0).await.unwrap();
    assert_eq!(tile.width, 64);
    assert_eq!(tile.height, 64);
    assert_eq!(tile.rgba.len(), 64 * 64 * 4);

    // Boundary tile at level 0's max col/row (3x2 grid -> col 2, row 1).
    let boundary = slide.read_tile(0, 2, 1, 0).await.unwrap();
    assert_eq!(boundary.width, 64);
    assert_eq!(boundary.height, 64);

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn rejects_out_of_bounds_reads() {
    let bytes = build_ets_bytes(32, 1, 2, 2, 1, FixtureColorspace::Brightfield);
    let path = write_temp_file(&bytes, "ets");
    let slide = Slide::open(&path, SlideOptions::default()).await.unwrap();

    let err = slide.read_tile(5, 0, 0, 0).await.unwrap_err();
    assert!(matches!(err, SlideError::Tile(TileError::InvalidLevel { .. })));

    let err = slide.read_tile(0, 99, 0, 0).await.unwrap_err();
    assert!(matches!(err, SlideError::Tile(TileError::TileOutOfBounds { .. })));

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn fluorescence_planes_decode_independently() {
    let bytes = build_ets_bytes(32, 1, 2, 2, 2, FixtureColorspace::Fluorescence);
    let path = write_temp_file(&bytes, "ets");
    let slide = Slide::open(&path, SlideOptions::default()).await.unwrap();

    assert_eq!(slide.plane_count(), 2);

    let plane0 = slide.read_tile(0, 0, 0, 0).await.unwrap();
    let plane1 = slide.read_tile(0, 0, 0, 1).await.unwrap();
    assert_eq!(plane0.rgba.len(), 32 * 32 * 4);
    assert_eq!(plane1.rgba.len(), 32 * 32 * 4);
    assert_ne!(plane0.rgba, plane1.rgba, "distinct planes must decode to distinct content");

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn missing_plane_is_rejected_as_missing_tile() {
    let bytes = build_ets_bytes(32, 1, 1, 1, 1, FixtureColorspace::Brightfield);
    let path = write_temp_file(&bytes, "ets");
    let slide = Slide::open(&path, SlideOptions::default()).await.unwrap();

    let err = slide.read_tile(0, 0, 0, 7).await.unwrap_err();
    assert!(matches!(err, SlideError::Tile(TileError::MissingTile { .. })));

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn concurrent_reads_of_the_same_tile_agree() {
    let bytes = build_ets_bytes(48, 2, 4, 3, 1, FixtureColorspace::Brightfield);
    let path = write_temp_file(&bytes, "ets");
    let slide = std::sync::Arc::new(Slide::open(&path, SlideOptions::default()).await.unwrap());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let slide = slide.clone();
        handles.push(tokio::spawn(async move { slide.read_tile(0, 1, 1, 0).await.unwrap() }));
    }

    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }
    for r in &results {
        assert_eq!(r.rgba, results[0].rgba);
    }

    std::fs::remove_file(&path).ok();
}
