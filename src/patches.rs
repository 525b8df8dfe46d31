use image::RgbImage;
use tch::{Kind, Tensor};

use crate::error::{ExtractError, Result};
use crate::instance_map::InstanceMap;
use crate::regions::{region_properties, RegionProperties};

/// Serves fixed-size patches centered on the instances of an image.
///
/// When `fill_value` is set, the patch is tightly cropped around the instance
/// bounding box and pixels belonging to other instances are overwritten with
/// the fill value; without it the crop is centered on the instance centroid
/// over a white canvas. Instances larger than the patch are center-cropped.
pub struct InstanceMapPatchDataset<'a> {
    image: &'a RgbImage,
    instance_map: &'a InstanceMap,
    regions: Vec<RegionProperties>,
    patch_size: u32,
    fill_value: Option<u8>,
}

impl<'a> InstanceMapPatchDataset<'a> {
    pub fn new(
        image: &'a RgbImage,
        instance_map: &'a InstanceMap,
        patch_size: u32,
        fill_value: Option<u8>,
    ) -> Result<Self> {
        if image.width() != instance_map.width() || image.height() != instance_map.height() {
            return Err(ExtractError::DataIntegrity(format!(
                "image is {}x{} but instance map is {}x{}",
                image.width(),
                image.height(),
                instance_map.width(),
                instance_map.height()
            )));
        }
        let regions = region_properties(instance_map)?;
        Ok(Self {
            image,
            instance_map,
            regions,
            patch_size,
            fill_value,
        })
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn regions(&self) -> &[RegionProperties] {
        &self.regions
    }

    /// Extracts the `(size, size, 3)` patch for instance `index`.
    pub fn patch(&self, index: usize) -> RgbImage {
        let region = &self.regions[index];
        let size = self.patch_size as i64;
        let fill = self.fill_value.unwrap_or(255);
        let mut output = RgbImage::from_pixel(
            self.patch_size,
            self.patch_size,
            image::Rgb([fill, fill, fill]),
        );

        let center_row = region.centroid.0.round() as i64;
        let center_col = region.centroid.1.round() as i64;

        let mut min_row = region.bbox.min_row as i64;
        let mut max_row = region.bbox.max_row as i64;
        let mut min_col = region.bbox.min_col as i64;
        let mut max_col = region.bbox.max_col as i64;

        // Without background suppression, or for oversized instances, crop
        // centered on the centroid instead of the bounding box.
        if self.fill_value.is_none() || max_row - min_row > size {
            min_row = center_row - size / 2;
            max_row = center_row + size / 2;
        }
        if self.fill_value.is_none() || max_col - min_col > size {
            min_col = center_col - size / 2;
            max_col = center_col + size / 2;
        }

        min_row = min_row.max(0);
        min_col = min_col.max(0);
        max_row = max_row.min(self.image.height() as i64);
        max_col = max_col.min(self.image.width() as i64);
        let row_length = max_row - min_row;
        let col_length = max_col - min_col;
        debug_assert!(row_length <= size && col_length <= size);

        // Center the cropped window inside the output patch.
        let top = (size - row_length) / 2;
        let left = (size - col_length) / 2;
        for r in 0..row_length {
            for c in 0..col_length {
                let src_row = (min_row + r) as u32;
                let src_col = (min_col + c) as u32;
                let mut pixel = *self.image.get_pixel(src_col, src_row);
                if self.fill_value.is_some()
                    && self.instance_map.label_at(src_row, src_col) != region.label
                {
                    pixel = image::Rgb([fill, fill, fill]);
                }
                output.put_pixel((left + c) as u32, (top + r) as u32, pixel);
            }
        }
        output
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flip {
    None,
    Horizontal,
    Vertical,
}

impl std::str::FromStr for Flip {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "n" => Ok(Flip::None),
            "h" => Ok(Flip::Horizontal),
            "v" => Ok(Flip::Vertical),
            _ => Err(format!("{} is not a valid flip (expected n, h or v)", s)),
        }
    }
}

/// A geometric augmentation applied between resize and normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Augmentation {
    rotation: u32,
    flip: Flip,
}

impl Augmentation {
    pub fn new(rotation: u32, flip: Flip) -> Result<Self> {
        if rotation % 90 != 0 || rotation >= 360 {
            return Err(ExtractError::Config(format!(
                "rotation must be one of 0, 90, 180, 270 degrees, got {}",
                rotation
            )));
        }
        Ok(Self { rotation, flip })
    }

    fn apply(&self, patch: &Tensor) -> Tensor {
        // CHW layout: dim 1 is rows, dim 2 is columns.
        let mut out = match self.rotation {
            0 => patch.shallow_clone(),
            quarter_turns => patch.rot90((quarter_turns / 90) as i64, &[1, 2]),
        };
        out = match self.flip {
            Flip::None => out,
            Flip::Horizontal => out.flip(&[2]),
            Flip::Vertical => out.flip(&[1]),
        };
        out
    }
}

/// Deterministic patch-to-tensor transform: resize, optional augmentation,
/// scale to [0, 1] and optional per-channel normalization.
#[derive(Debug, Clone)]
pub struct PatchTransform {
    pub resize_to: i64,
    pub normalize: Option<([f64; 3], [f64; 3])>,
    pub augmentation: Option<Augmentation>,
}

impl PatchTransform {
    pub fn new(resize_to: i64, normalize: Option<([f64; 3], [f64; 3])>) -> Self {
        Self {
            resize_to,
            normalize,
            augmentation: None,
        }
    }

    pub fn with_augmentation(&self, augmentation: Augmentation) -> Self {
        Self {
            augmentation: Some(augmentation),
            ..self.clone()
        }
    }

    /// Produces a `[3, resize_to, resize_to]` float tensor.
    pub fn apply(&self, patch: &RgbImage) -> Result<Tensor> {
        let (width, height) = patch.dimensions();
        let tensor = Tensor::of_slice(patch.as_raw())
            .view((height as i64, width as i64, 3))
            .permute(&[2, 0, 1])
            .contiguous();
        let tensor = tch::vision::image::resize(&tensor, self.resize_to, self.resize_to)?;
        let tensor = match &self.augmentation {
            Some(augmentation) => augmentation.apply(&tensor),
            None => tensor,
        };
        let mut tensor = tensor.to_kind(Kind::Float) / 255.0;
        if let Some((mean, std)) = &self.normalize {
            let mean = Tensor::of_slice(mean).to_kind(Kind::Float).view((3, 1, 1));
            let std = Tensor::of_slice(std).to_kind(Kind::Float).view((3, 1, 1));
            tensor = (tensor - mean) / std;
        }
        Ok(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::IndexOp;

    fn checker_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 16) as u8, (y * 16) as u8, 100])
        })
    }

    fn three_region_map() -> InstanceMap {
        // 16x16: label 1 is a 4x4 block, label 2 a 2x2 block at the border,
        // label 3 a single pixel.
        let mut labels = vec![0u32; 256];
        for r in 4..8 {
            for c in 4..8 {
                labels[r * 16 + c] = 1;
            }
        }
        for r in 0..2 {
            for c in 14..16 {
                labels[r * 16 + c] = 2;
            }
        }
        labels[15 * 16] = 3;
        InstanceMap::new(16, 16, labels).unwrap()
    }

    #[test]
    fn patch_shape_is_invariant() {
        let image = checker_image(16, 16);
        let map = three_region_map();
        for fill in [None, Some(0u8)] {
            let dataset = InstanceMapPatchDataset::new(&image, &map, 8, fill).unwrap();
            assert_eq!(dataset.len(), 3);
            for i in 0..dataset.len() {
                assert_eq!(dataset.patch(i).dimensions(), (8, 8));
            }
        }
    }

    #[test]
    fn border_instance_is_padded_not_clipped() {
        let image = checker_image(16, 16);
        let map = three_region_map();
        // Unmasked crop around the corner pixel of label 3 runs over the
        // image border; the patch must still be full-size, white-padded.
        let dataset = InstanceMapPatchDataset::new(&image, &map, 8, None).unwrap();
        let patch = dataset.patch(2);
        assert_eq!(patch.dimensions(), (8, 8));
        assert_eq!(patch.get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[test]
    fn fill_value_suppresses_other_instances() {
        let mut image = checker_image(16, 16);
        // Label 1 spans cols 4..8 of row 5 with a label-2 pixel wedged inside
        // its bounding box; that pixel is distinctively colored.
        let mut labels = vec![0u32; 256];
        for c in [4usize, 5, 7] {
            labels[5 * 16 + c] = 1;
        }
        labels[5 * 16 + 6] = 2;
        image.put_pixel(6, 5, image::Rgb([9, 9, 9]));
        let map = InstanceMap::new(16, 16, labels).unwrap();
        let dataset = InstanceMapPatchDataset::new(&image, &map, 6, Some(0)).unwrap();
        let patch = dataset.patch(0);
        // The wedged pixel is inside the crop window but must be overwritten.
        assert!(patch.pixels().all(|p| p.0 != [9, 9, 9]));
        assert!(patch.pixels().any(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn oversized_instance_is_center_cropped() {
        let image = checker_image(32, 32);
        let mut labels = vec![0u32; 32 * 32];
        for r in 2..30 {
            for c in 2..30 {
                labels[r * 32 + c] = 1;
            }
        }
        let map = InstanceMap::new(32, 32, labels).unwrap();
        let dataset = InstanceMapPatchDataset::new(&image, &map, 8, Some(255)).unwrap();
        let patch = dataset.patch(0);
        assert_eq!(patch.dimensions(), (8, 8));
        // Center crop around the centroid (row 15.5 -> 16): rows 12..20.
        assert_eq!(patch.get_pixel(0, 0).0, image.get_pixel(12, 12).0);
    }

    #[test]
    fn transform_produces_normalized_chw_tensor() {
        let image = checker_image(16, 16);
        let transform = PatchTransform::new(32, Some(([0.5; 3], [0.5; 3])));
        let tensor = transform.apply(&image).unwrap();
        assert_eq!(tensor.size(), vec![3, 32, 32]);
        let max = f64::from(tensor.max());
        let min = f64::from(tensor.min());
        assert!(max <= 1.0 + 1e-6 && min >= -1.0 - 1e-6);
    }

    #[test]
    fn rotation_moves_pixels_quarter_turn() {
        let mut image = RgbImage::from_pixel(4, 4, image::Rgb([0, 0, 0]));
        image.put_pixel(3, 0, image::Rgb([255, 255, 255]));
        let transform = PatchTransform::new(4, None)
            .with_augmentation(Augmentation::new(90, Flip::None).unwrap());
        let tensor = transform.apply(&image).unwrap();
        // rot90 is counter-clockwise: top-right corner lands top-left.
        let v = f64::from(tensor.i((0, 0, 0)));
        assert!(v > 0.9);
    }
}
