use image::RgbImage;
use tch::IndexOp;

use histo_feature_extraction::features::HandcraftedFeatureExtractor;
use histo_feature_extraction::instance_map::InstanceMap;
use histo_feature_extraction::merge::{compute_translator, AverageFeatureMerger};
use histo_feature_extraction::regions::region_properties;

/// 256x256 image with three labeled regions of known extents.
fn fixture() -> (RgbImage, InstanceMap) {
    let image = RgbImage::from_fn(256, 256, |x, y| {
        image::Rgb([(x / 2) as u8, (y / 2) as u8, ((x + y) / 4) as u8])
    });
    let mut labels = vec![0u32; 256 * 256];
    for r in 20..60 {
        for c in 20..60 {
            labels[r * 256 + c] = 1;
        }
    }
    for r in 20..60 {
        for c in 100..150 {
            labels[r * 256 + c] = 2;
        }
    }
    for r in 150..220 {
        for c in 40..90 {
            labels[r * 256 + c] = 3;
        }
    }
    (image, InstanceMap::new(256, 256, labels).unwrap())
}

/// Merged map: regions 1 and 2 collapse into one coarse instance, region 3
/// keeps its own.
fn merged_fixture() -> InstanceMap {
    let mut labels = vec![0u32; 256 * 256];
    for r in 20..60 {
        for c in 20..60 {
            labels[r * 256 + c] = 1;
        }
        for c in 100..150 {
            labels[r * 256 + c] = 1;
        }
    }
    for r in 150..220 {
        for c in 40..90 {
            labels[r * 256 + c] = 2;
        }
    }
    InstanceMap::new(256, 256, labels).unwrap()
}

#[test]
fn handcrafted_extraction_and_merge_end_to_end() {
    let (image, instance_map) = fixture();

    let regions = region_properties(&instance_map).unwrap();
    assert_eq!(regions.len(), 3);

    let features = HandcraftedFeatureExtractor
        .extract(&image, &instance_map)
        .unwrap();
    assert_eq!(features.size(), vec![3, 72]);

    let merged_map = merged_fixture();
    let translator = compute_translator(&instance_map, &merged_map).unwrap();
    assert_eq!(translator[&1], vec![1, 2]);
    assert_eq!(translator[&2], vec![3]);

    let merged = AverageFeatureMerger.merge(&features, &translator).unwrap();
    assert_eq!(merged.size(), vec![2, 72]);

    // First merged row is the elementwise mean of original rows 0 and 1.
    let expected_first = (features.i((0, ..)) + features.i((1, ..))) / 2.0;
    assert!(f64::from((merged.i((0, ..)) - expected_first).abs().max()) < 1e-5);
    // Second merged row is original row 2, exactly.
    assert!(f64::from((merged.i((1, ..)) - features.i((2, ..))).abs().max()) == 0.0);
}

#[test]
fn identity_merge_is_idempotent() {
    let (image, instance_map) = fixture();
    let features = HandcraftedFeatureExtractor
        .extract(&image, &instance_map)
        .unwrap();

    let translator = compute_translator(&instance_map, &instance_map).unwrap();
    assert_eq!(translator.len(), 3);
    let merged = AverageFeatureMerger.merge(&features, &translator).unwrap();
    assert!(f64::from((merged - &features).abs().max()) < 1e-12);
}

#[test]
fn feature_rows_match_instance_count_for_sparse_labels() {
    // Labels with gaps: 2, 40, 41.
    let image = RgbImage::from_pixel(64, 64, image::Rgb([90, 120, 60]));
    let mut labels = vec![0u32; 64 * 64];
    for c in 0..10 {
        labels[10 * 64 + c] = 40;
        labels[30 * 64 + c] = 2;
        labels[50 * 64 + c] = 41;
    }
    let map = InstanceMap::new(64, 64, labels).unwrap();
    let features = HandcraftedFeatureExtractor.extract(&image, &map).unwrap();
    assert_eq!(features.size(), vec![3, 72]);
    // Ascending label order: rows for 2, 40, 41 all uniform-color rows.
    let spread = f64::from(
        (features.i((0, ..)) - features.i((2, ..)))
            .abs()
            .max(),
    );
    assert!(spread < 1e-5);
}
