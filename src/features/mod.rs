mod color;
mod shape;
mod texture;

use image::RgbImage;
use rayon::prelude::*;
use tch::{Kind, Tensor};

pub use color::{NUM_COLOR_FEATURES_PER_CHANNEL, NUM_HISTOGRAM_BINS};
pub use shape::NUM_SHAPE_FEATURES;
pub use texture::NUM_TEXTURE_FEATURES;

use crate::error::Result;
use crate::instance_map::InstanceMap;
use crate::regions::{region_properties, RegionProperties};
use crate::utils::rgb_to_gray;

/// Total handcrafted descriptor width: 12 shape + 3x18 color + 6 texture.
pub const NUM_HANDCRAFTED_FEATURES: usize =
    NUM_SHAPE_FEATURES + 3 * NUM_COLOR_FEATURES_PER_CHANNEL + NUM_TEXTURE_FEATURES;

const ENTROPY_DISK_RADIUS: i32 = 3;

/// Column names matching the layout produced by
/// [`HandcraftedFeatureExtractor::extract`].
pub fn feature_names() -> Vec<String> {
    let mut names: Vec<String> = shape::SHAPE_FEATURE_NAMES
        .iter()
        .map(|s| s.to_string())
        .collect();
    for channel in ["r", "g", "b"] {
        names.extend(color::color_feature_names(channel));
    }
    names.extend(
        texture::TEXTURE_FEATURE_NAMES
            .iter()
            .map(|s| s.to_string()),
    );
    debug_assert_eq!(names.len(), NUM_HANDCRAFTED_FEATURES);
    names
}

/// Closed-form shape/color/texture descriptors per instance; no learned model
/// involved.
pub struct HandcraftedFeatureExtractor;

impl HandcraftedFeatureExtractor {
    /// Returns `[n_instances, 72]`, rows in ascending label order.
    pub fn extract(&self, image: &RgbImage, instance_map: &InstanceMap) -> Result<Tensor> {
        let regions = region_properties(instance_map)?;
        let gray = rgb_to_gray(image);
        let entropy = texture::local_entropy(&gray, ENTROPY_DISK_RADIUS);

        let rows: Vec<Vec<f64>> = regions
            .par_iter()
            .map(|region| instance_features(image, &gray, &entropy, instance_map, region))
            .collect();

        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Ok(Tensor::of_slice(&flat)
            .view((regions.len() as i64, NUM_HANDCRAFTED_FEATURES as i64))
            .to_kind(Kind::Float))
    }
}

fn instance_features(
    image: &RgbImage,
    gray: &image::GrayImage,
    entropy: &[f64],
    map: &InstanceMap,
    region: &RegionProperties,
) -> Vec<f64> {
    let mut features = Vec::with_capacity(NUM_HANDCRAFTED_FEATURES);
    features.extend_from_slice(&shape::shape_features(region));

    let mut channels: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for r in region.bbox.min_row..region.bbox.max_row {
        for c in region.bbox.min_col..region.bbox.max_col {
            if map.label_at(r, c) == region.label {
                let pixel = image.get_pixel(c, r);
                channels[0].push(pixel.0[0]);
                channels[1].push(pixel.0[1]);
                channels[2].push(pixel.0[2]);
            }
        }
    }
    for channel in &channels {
        features.extend_from_slice(&color::channel_features(channel));
    }

    features.push(texture::mean_entropy(entropy, map, region));
    features.extend_from_slice(&texture::glcm_features(gray, map, region));
    debug_assert_eq!(features.len(), NUM_HANDCRAFTED_FEATURES);
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::IndexOp;

    fn fixture() -> (RgbImage, InstanceMap) {
        let image = RgbImage::from_fn(256, 256, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut labels = vec![0u32; 256 * 256];
        for r in 10..30 {
            for c in 10..30 {
                labels[r * 256 + c] = 1;
            }
        }
        for r in 100..140 {
            for c in 50..80 {
                labels[r * 256 + c] = 2;
            }
        }
        for r in 200..210 {
            for c in 200..230 {
                labels[r * 256 + c] = 3;
            }
        }
        (image, InstanceMap::new(256, 256, labels).unwrap())
    }

    #[test]
    fn feature_vector_is_always_72_wide() {
        assert_eq!(NUM_HANDCRAFTED_FEATURES, 72);
        assert_eq!(feature_names().len(), 72);
        let (image, map) = fixture();
        let features = HandcraftedFeatureExtractor.extract(&image, &map).unwrap();
        assert_eq!(features.size(), vec![3, 72]);
    }

    #[test]
    fn first_shape_column_is_area() {
        let (image, map) = fixture();
        let features = HandcraftedFeatureExtractor.extract(&image, &map).unwrap();
        assert_eq!(f64::from(features.i((0, 0))), 400.0);
        assert_eq!(f64::from(features.i((1, 0))), 1200.0);
        assert_eq!(f64::from(features.i((2, 0))), 300.0);
    }

    #[test]
    fn single_pixel_instance_is_still_72_wide() {
        let image = RgbImage::from_pixel(16, 16, image::Rgb([50, 100, 150]));
        let mut labels = vec![0u32; 256];
        labels[5 * 16 + 5] = 1;
        let map = InstanceMap::new(16, 16, labels).unwrap();
        let features = HandcraftedFeatureExtractor.extract(&image, &map).unwrap();
        assert_eq!(features.size(), vec![1, 72]);
        // Mean of the red channel over the single pixel.
        assert_eq!(f64::from(features.i((0, 20))), 50.0);
    }
}
