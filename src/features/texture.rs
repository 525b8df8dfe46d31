use image::GrayImage;

use crate::instance_map::InstanceMap;
use crate::regions::RegionProperties;

pub const NUM_TEXTURE_FEATURES: usize = 6;

pub const TEXTURE_FEATURE_NAMES: [&str; NUM_TEXTURE_FEATURES] = [
    "entropy",
    "glcm_contrast",
    "glcm_dissimilarity",
    "glcm_homogeneity",
    "glcm_energy",
    "glcm_asm",
];

/// Local Shannon entropy (base 2) of the 8-bit image over a disk
/// neighborhood, computed once per image and averaged per instance later.
/// Neighborhoods are clipped at the image border.
pub fn local_entropy(gray: &GrayImage, radius: i32) -> Vec<f64> {
    let width = gray.width() as i32;
    let height = gray.height() as i32;

    let mut offsets = Vec::new();
    for dr in -radius..=radius {
        for dc in -radius..=radius {
            if dr * dr + dc * dc <= radius * radius {
                offsets.push((dr, dc));
            }
        }
    }

    let mut entropy = vec![0.0f64; (width * height) as usize];
    let mut counts = [0u32; 256];
    let mut touched: Vec<u8> = Vec::with_capacity(offsets.len());
    for row in 0..height {
        for col in 0..width {
            let mut total = 0u32;
            for &(dr, dc) in &offsets {
                let (r, c) = (row + dr, col + dc);
                if r < 0 || c < 0 || r >= height || c >= width {
                    continue;
                }
                let v = gray.get_pixel(c as u32, r as u32).0[0];
                if counts[v as usize] == 0 {
                    touched.push(v);
                }
                counts[v as usize] += 1;
                total += 1;
            }
            let mut h = 0.0f64;
            for &v in &touched {
                let p = counts[v as usize] as f64 / total as f64;
                h -= p * p.log2();
                counts[v as usize] = 0;
            }
            touched.clear();
            entropy[(row * width + col) as usize] = h;
        }
    }
    entropy
}

/// Mean of the precomputed entropy image over one instance mask.
pub fn mean_entropy(entropy: &[f64], map: &InstanceMap, region: &RegionProperties) -> f64 {
    let width = map.width() as usize;
    let mut sum = 0.0;
    let mut count = 0u64;
    for r in region.bbox.min_row..region.bbox.max_row {
        for c in region.bbox.min_col..region.bbox.max_col {
            if map.label_at(r, c) == region.label {
                sum += entropy[r as usize * width + c as usize];
                count += 1;
            }
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Gray-level co-occurrence statistics at offset (0, 1): contrast,
/// dissimilarity, homogeneity, energy and ASM.
///
/// The co-occurrence matrix is built over the background-zeroed gray image, so
/// any pair touching intensity 0 lands in the zero row/column; that row and
/// column are removed before normalization so the background bin cannot
/// dominate the statistics.
pub fn glcm_features(
    gray: &GrayImage,
    map: &InstanceMap,
    region: &RegionProperties,
) -> [f64; NUM_TEXTURE_FEATURES - 1] {
    let mut counts = vec![0u64; 256 * 256];
    let mut total = 0u64;
    for r in region.bbox.min_row..region.bbox.max_row {
        for c in region.bbox.min_col..region.bbox.max_col {
            if c + 1 >= map.width() {
                continue;
            }
            let v1 = masked_value(gray, map, region.label, r, c);
            let v2 = masked_value(gray, map, region.label, r, c + 1);
            // Zero row/column removal: skip pairs touching intensity 0.
            if v1 == 0 || v2 == 0 {
                continue;
            }
            counts[v1 as usize * 256 + v2 as usize] += 1;
            total += 1;
        }
    }

    let mut contrast = 0.0f64;
    let mut dissimilarity = 0.0f64;
    let mut homogeneity = 0.0f64;
    let mut asm = 0.0f64;
    if total > 0 {
        for i in 1..256usize {
            for j in 1..256usize {
                let count = counts[i * 256 + j];
                if count == 0 {
                    continue;
                }
                let p = count as f64 / total as f64;
                let d = i as f64 - j as f64;
                contrast += p * d * d;
                dissimilarity += p * d.abs();
                homogeneity += p / (1.0 + d * d);
                asm += p * p;
            }
        }
    }
    [contrast, dissimilarity, homogeneity, asm.sqrt(), asm]
}

#[inline]
fn masked_value(gray: &GrayImage, map: &InstanceMap, label: u32, row: u32, col: u32) -> u8 {
    if map.label_at(row, col) == label {
        gray.get_pixel(col, row).0[0]
    } else {
        0
    }
}
