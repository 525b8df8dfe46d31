use std::path::Path;

use image::DynamicImage;

use crate::error::{ExtractError, Result};

/// Integer label image partitioning pixels into instances (cells or
/// superpixels). Label 0 is background; positive labels need not be
/// contiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMap {
    width: u32,
    height: u32,
    labels: Vec<u32>,
}

impl InstanceMap {
    pub fn new(width: u32, height: u32, labels: Vec<u32>) -> Result<Self> {
        if labels.len() != (width as usize) * (height as usize) {
            return Err(ExtractError::DataIntegrity(format!(
                "instance map buffer has {} entries for a {}x{} image",
                labels.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            labels,
        })
    }

    /// Loads a map from an 8- or 16-bit single channel image.
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)?;
        Ok(Self::from_image(&image))
    }

    pub fn from_image(image: &DynamicImage) -> Self {
        let (width, height, labels) = match image {
            DynamicImage::ImageLuma16(buf) => (
                buf.width(),
                buf.height(),
                buf.pixels().map(|p| p.0[0] as u32).collect(),
            ),
            other => {
                let buf = other.to_luma8();
                (
                    buf.width(),
                    buf.height(),
                    buf.pixels().map(|p| p.0[0] as u32).collect(),
                )
            }
        };
        Self {
            width,
            height,
            labels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn label_at(&self, row: u32, col: u32) -> u32 {
        self.labels[row as usize * self.width as usize + col as usize]
    }

    pub fn pixels(&self) -> &[u32] {
        &self.labels
    }

    /// Distinct nonzero labels in ascending order. This is the canonical
    /// instance ordering: feature matrix row `i` belongs to `labels()[i]`.
    pub fn labels(&self) -> Vec<u32> {
        let mut seen = std::collections::BTreeSet::new();
        for &l in &self.labels {
            if l != 0 {
                seen.insert(l);
            }
        }
        seen.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_sorted_and_skip_background() {
        let map = InstanceMap::new(2, 2, vec![0, 7, 3, 3]).unwrap();
        assert_eq!(map.labels(), vec![3, 7]);
        assert_eq!(map.label_at(0, 1), 7);
        assert_eq!(map.label_at(1, 0), 3);
    }

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(InstanceMap::new(2, 2, vec![0, 1]).is_err());
    }
}
