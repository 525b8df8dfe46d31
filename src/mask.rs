use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use imageproc::region_labelling::{connected_components, Connectivity};
use log::{error, info};

use crate::error::Result;
use crate::utils::rgb_to_gray;

pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Otsu threshold over the nonzero pixels of a grayscale image.
///
/// Returns 0 when every pixel is zero (degenerate input, not an error).
pub fn otsu_threshold_nonzero(image: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    let mut total = 0u64;
    for p in image.pixels() {
        let v = p.0[0];
        if v > 0 {
            histogram[v as usize] += 1;
            total += 1;
        }
    }
    if total == 0 {
        return 0;
    }

    let weighted_sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(v, &c)| v as f64 * c as f64)
        .sum();

    let mut best_threshold = 0u8;
    let mut best_variance = f64::MIN;
    let mut background_count = 0u64;
    let mut background_sum = 0.0f64;
    for t in 0..256usize {
        background_count += histogram[t];
        background_sum += t as f64 * histogram[t] as f64;
        let foreground_count = total - background_count;
        if background_count == 0 {
            continue;
        }
        if foreground_count == 0 {
            break;
        }
        let mean_bg = background_sum / background_count as f64;
        let mean_fg = (weighted_sum - background_sum) / foreground_count as f64;
        let variance = background_count as f64 * foreground_count as f64
            * (mean_bg - mean_fg)
            * (mean_bg - mean_fg);
        if variance > best_variance {
            best_variance = variance;
            best_threshold = t as u8;
        }
    }
    best_threshold
}

/// Binary tissue segmentation of a thumbnail.
///
/// RGB inputs are converted to an inverted grayscale thumbnail so tissue
/// brightens against the (usually white) slide background. Each thresholding
/// step optionally blurs the thumbnail, takes an Otsu threshold over the
/// nonzero pixels and zeroes everything below it. The surviving pixels are
/// labeled with 4-connectivity, components smaller than `min_size` are
/// discarded, and the largest remaining component is returned next to the full
/// label image.
pub fn get_tissue_mask(
    image: &RgbImage,
    n_thresholding_steps: u32,
    sigma: f32,
    min_size: usize,
) -> (LabelImage, GrayImage) {
    let gray = rgb_to_gray(image);
    let mut thumbnail = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([255 - gray.get_pixel(x, y).0[0]])
    });
    get_tissue_mask_gray(&mut thumbnail, n_thresholding_steps, sigma, min_size)
}

/// Same as [`get_tissue_mask`] for an already inverted grayscale thumbnail.
pub fn get_tissue_mask_gray(
    thumbnail: &mut GrayImage,
    n_thresholding_steps: u32,
    sigma: f32,
    min_size: usize,
) -> (LabelImage, GrayImage) {
    for _ in 0..n_thresholding_steps {
        if sigma > 0.0 {
            *thumbnail = gaussian_blur_f32(thumbnail, sigma);
        }
        let threshold = otsu_threshold_nonzero(thumbnail);
        for p in thumbnail.pixels_mut() {
            if p.0[0] < threshold {
                p.0[0] = 0;
            }
        }
    }

    let binary = GrayImage::from_fn(thumbnail.width(), thumbnail.height(), |x, y| {
        Luma([if thumbnail.get_pixel(x, y).0[0] > 0 {
            255
        } else {
            0
        }])
    });
    let mut labeled = connected_components(&binary, Connectivity::Four, Luma([0u8]));

    let mut counts = std::collections::BTreeMap::<u32, usize>::new();
    for p in labeled.pixels() {
        if p.0[0] != 0 {
            *counts.entry(p.0[0]).or_default() += 1;
        }
    }

    let largest = counts
        .iter()
        .max_by_key(|(_, &count)| count)
        .map(|(&label, _)| label);

    for p in labeled.pixels_mut() {
        let label = p.0[0];
        if label != 0 && counts[&label] < min_size {
            p.0[0] = 0;
        }
    }

    let largest_mask = match largest {
        Some(label) => GrayImage::from_fn(labeled.width(), labeled.height(), |x, y| {
            Luma([if labeled.get_pixel(x, y).0[0] == label {
                255
            } else {
                0
            }])
        }),
        // All-zero input: no components at all, return an all-false mask.
        None => GrayImage::new(labeled.width(), labeled.height()),
    };
    (labeled, largest_mask)
}

/// Adaptive tissue masking over a downsampled image.
///
/// Repeatedly segments the darkest remaining regions, dilates them and folds
/// them into a running tissue mask while the mean gray value under the
/// candidate mask stays below `background_gray_value`; accepted pixels are
/// whitened so the next Otsu pass targets the next-darkest structure. The
/// final mask is upsampled back to the original resolution with
/// nearest-neighbor interpolation.
pub struct GaussianTissueMask {
    pub n_thresholding_steps: u32,
    pub sigma: f32,
    pub min_size: usize,
    pub kernel_size: u8,
    pub dilation_steps: u32,
    pub background_gray_value: u8,
    pub downsampling_factor: u32,
}

impl Default for GaussianTissueMask {
    fn default() -> Self {
        Self {
            n_thresholding_steps: 1,
            sigma: 20.0,
            min_size: 10,
            kernel_size: 20,
            dilation_steps: 1,
            background_gray_value: 228,
            downsampling_factor: 4,
        }
    }
}

impl GaussianTissueMask {
    /// Returns a 0/255 tissue mask with the spatial extent of `image`.
    pub fn process(&self, image: &RgbImage) -> GrayImage {
        let (original_width, original_height) = image.dimensions();
        let mut working = if self.downsampling_factor > 1 {
            imageops::resize(
                image,
                original_width / self.downsampling_factor,
                original_height / self.downsampling_factor,
                FilterType::Nearest,
            )
        } else {
            image.clone()
        };

        let gray = rgb_to_gray(&working);
        let mut tissue_mask = GrayImage::new(working.width(), working.height());

        loop {
            let (_, mask) = get_tissue_mask(
                &working,
                self.n_thresholding_steps,
                self.sigma,
                self.min_size,
            );
            let mut mask = mask;
            for _ in 0..self.dilation_steps {
                mask = dilate(&mask, Norm::LInf, self.kernel_size / 2);
            }

            // Mean gray value of the masked-in region; an empty region means
            // nothing tissue-like is left and terminates the loop.
            let mut sum = 0u64;
            let mut count = 0u64;
            for (m, g) in mask.pixels().zip(gray.pixels()) {
                if m.0[0] != 0 && g.0[0] > 0 {
                    sum += g.0[0] as u64;
                    count += 1;
                }
            }
            if count == 0 || (sum as f64 / count as f64) >= self.background_gray_value as f64 {
                break;
            }

            for (x, y, m) in mask.enumerate_pixels() {
                if m.0[0] != 0 {
                    tissue_mask.put_pixel(x, y, Luma([255]));
                    working.put_pixel(x, y, image::Rgb([255, 255, 255]));
                }
            }
        }

        imageops::resize(
            &tissue_mask,
            original_width,
            original_height,
            FilterType::Nearest,
        )
    }

    /// Memoized variant: if `<output_dir>/<name>.png` exists it is loaded
    /// instead of recomputed, otherwise the mask is computed and saved there.
    pub fn process_and_save(
        &self,
        output_dir: &Path,
        name: &str,
        image: &RgbImage,
    ) -> Result<GrayImage> {
        let output_path: PathBuf = output_dir.join(format!("{name}.png"));
        if output_path.exists() {
            info!(
                "tissue mask for {} already exists, using it instead of recomputing",
                name
            );
            return match image::open(&output_path) {
                Ok(cached) => Ok(cached.to_luma8()),
                Err(source) => {
                    error!("could not open cached tissue mask {:?}", output_path);
                    Err(crate::error::ExtractError::Cache {
                        path: output_path,
                        source,
                    })
                }
            };
        }
        std::fs::create_dir_all(output_dir)?;
        let mask = self.process(image);
        mask.save(&output_path)?;
        Ok(mask)
    }
}
