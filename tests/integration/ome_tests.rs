//! End-to-end coverage of the OME-TIFF read path: discovery sentinel,
//! metadata-derived properties, tile decode, channel-agreement rejection.

use olympus_wsi::{OmeError, Slide, SlideError, SlideOptions};

use super::test_utils::{build_ome_tiff_bytes, build_ome_tiff_custom, sample_ome_xml, write_temp_file};

#[tokio::test]
async fn opens_two_level_brightfield_ome_tiff() {
    let xml = sample_ome_xml(256, 192, 1);
    let bytes = build_ome_tiff_bytes(&[(256, 192), (128, 96)], 1, 64, &xml);
    let path = write_temp_file(&bytes, "tif");

    let slide = Slide::open(&path, SlideOptions::default()).await.unwrap();

    assert_eq!(slide.level_count(), 2);
    assert_eq!(slide.plane_count(), 1);
    assert_eq!(slide.level_dimensions(0), Some((256, 192)));
    assert_eq!(slide.level_dimensions(1), Some((128, 96)));
    assert!((slide.level_downsample(1).unwrap() - 2.0).abs() < 1e-9);

    assert_eq!(slide.property("vendor"), Some("olympus"));
    assert_eq!(slide.property("openmicroscopy.manufacturer"), Some("Olympus"));
    assert!(slide.property("mpp-x").is_some());
    assert!(slide.property("comment").unwrap().contains("exposure-time"));

    let tile = slide.read_tile(0, 0, 0, 0).await.unwrap();
    assert_eq!(tile.width, 64);
    assert_eq!(tile.height, 64);

    // Level 0 is 256x192 at tile edge 64 -> a 4x3 grid; read the far corner.
    let corner = slide.read_tile(0, 3, 2, 0).await.unwrap();
    assert_eq!(corner.width, 64);

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn rejects_tif_without_olympus_sentinel() {
    let xml = r#"<OME>
  <Experimenter ID="Experimenter:0" UserName="someone-else"/>
  <Image ID="Image:0"><Pixels SizeX="64" SizeY="64"/></Image>
</OME>"#;
    let bytes = build_ome_tiff_bytes(&[(64, 64)], 1, 64, xml);
    let path = write_temp_file(&bytes, "tif");

    let result = Slide::open(&path, SlideOptions::default()).await;
    assert!(matches!(result, Err(SlideError::Discovery(_))));

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn multi_channel_level_decodes_each_plane() {
    let xml = sample_ome_xml(64, 64, 2);
    let bytes = build_ome_tiff_bytes(&[(64, 64)], 2, 32, &xml);
    let path = write_temp_file(&bytes, "tif");

    let slide = Slide::open(&path, SlideOptions::default()).await.unwrap();
    assert_eq!(slide.plane_count(), 2);

    let ch0 = slide.read_tile(0, 0, 0, 0).await.unwrap();
    let ch1 = slide.read_tile(0, 0, 0, 1).await.unwrap();
    assert_ne!(ch0.rgba, ch1.rgba);

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn rejects_channel_dimension_disagreement() {
    // Two channels for one level, with the OME XML declaring 2 channels, but
    // the second directory's width disagrees with the first's.
    let xml = sample_ome_xml(100, 100, 2);
    let bytes = build_ome_tiff_custom(&[(100, 100), (90, 100)], 50, &xml);
    let path = write_temp_file(&bytes, "tif");

    let result = Slide::open(&path, SlideOptions::default()).await;
    match result {
        Err(SlideError::Ome(OmeError::ChannelDisagreement { level: 0, .. })) => {}
        other => panic!("expected ChannelDisagreement at level 0, got {other:?}"),
    }

    std::fs::remove_file(&path).ok();
}
