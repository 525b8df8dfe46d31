use std::path::Path;

use image::RgbImage;
use rayon::prelude::*;
use tch::{Device, Kind, Tensor};

use crate::backbone::{BackboneSource, EmbeddingBackbone};
use crate::error::{ExtractError, Result};
use crate::instance_map::InstanceMap;
use crate::patches::{Augmentation, Flip, InstanceMapPatchDataset, PatchTransform};

pub const RESIZE_TO: i64 = 224;

/// Per-channel normalization applied after scaling patches to [0, 1].
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NormalizerConfig {
    pub mean: [f64; 3],
    pub std: [f64; 3],
}

/// Extracts one embedding per instance with a frozen pretrained backbone.
///
/// Patches are produced in parallel, inference runs batch by batch, and every
/// embedding is written into a pre-sized buffer at its explicit instance
/// index, so result ordering never depends on batch arrival order.
pub struct DeepFeatureExtractor {
    backbone: Box<dyn EmbeddingBackbone>,
    patch_size: u32,
    fill_value: Option<u8>,
    batch_size: usize,
    transform: PatchTransform,
    device: Device,
}

impl DeepFeatureExtractor {
    pub fn new(
        source: &BackboneSource,
        device: Device,
        zoo_weights: Option<&Path>,
        mask_background: bool,
        patch_size: u32,
        batch_size: usize,
        normalizer: Option<&NormalizerConfig>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(ExtractError::Config("batch size must be positive".into()));
        }
        let backbone = source.load(device, zoo_weights)?;
        let normalize = normalizer.map(|n| (n.mean, n.std));
        Ok(Self {
            backbone,
            patch_size,
            fill_value: if mask_background { Some(255) } else { None },
            batch_size,
            transform: PatchTransform::new(RESIZE_TO, normalize),
            device,
        })
    }

    pub fn num_features(&self) -> i64 {
        self.backbone.num_features()
    }

    /// Returns `[n_instances, num_features]`, rows in ascending label order.
    pub fn extract(&self, image: &RgbImage, instance_map: &InstanceMap) -> Result<Tensor> {
        let dataset =
            InstanceMapPatchDataset::new(image, instance_map, self.patch_size, self.fill_value)?;
        let mut features = Tensor::zeros(
            &[dataset.len() as i64, self.backbone.num_features()],
            (Kind::Float, self.device),
        );
        let written = self.run_pass(&dataset, &self.transform, &mut features)?;
        check_coverage(&written)?;
        Ok(features.to_device(Device::Cpu))
    }

    /// One full pass over the dataset with one transform, writing embeddings
    /// into `features` (shape `[n, C]`) by explicit instance index.
    fn run_pass(
        &self,
        dataset: &InstanceMapPatchDataset,
        transform: &PatchTransform,
        features: &mut Tensor,
    ) -> Result<Vec<bool>> {
        let indices: Vec<usize> = (0..dataset.len()).collect();
        let mut written = vec![false; dataset.len()];
        for chunk in indices.chunks(self.batch_size) {
            let patches: Vec<Tensor> = chunk
                .par_iter()
                .map(|&i| transform.apply(&dataset.patch(i)))
                .collect::<Result<_>>()?;
            let batch = Tensor::stack(&patches, 0).to_device(self.device);
            let embeddings = self.backbone.embed(&batch)?;
            let expected = vec![chunk.len() as i64, self.backbone.num_features()];
            if embeddings.size() != expected {
                return Err(ExtractError::UnsupportedShape(embeddings.size()));
            }
            let index = Tensor::of_slice(&chunk.iter().map(|&i| i as i64).collect::<Vec<_>>())
                .to_device(features.device());
            features.index_copy_(0, &index, &embeddings);
            for &i in chunk {
                written[i] = true;
            }
        }
        Ok(written)
    }
}

fn check_coverage(written: &[bool]) -> Result<()> {
    if let Some(missing) = written.iter().position(|&w| !w) {
        return Err(ExtractError::DataIntegrity(format!(
            "no embedding was written for instance index {}",
            missing
        )));
    }
    Ok(())
}

/// Deep feature extraction repeated over a grid of geometric augmentations.
pub struct AugmentedDeepFeatureExtractor {
    inner: DeepFeatureExtractor,
    augmentations: Vec<Augmentation>,
}

impl AugmentedDeepFeatureExtractor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: &BackboneSource,
        device: Device,
        zoo_weights: Option<&Path>,
        mask_background: bool,
        patch_size: u32,
        batch_size: usize,
        normalizer: Option<&NormalizerConfig>,
        rotations: Option<Vec<u32>>,
        flips: Option<Vec<Flip>>,
    ) -> Result<Self> {
        let inner = DeepFeatureExtractor::new(
            source,
            device,
            zoo_weights,
            mask_background,
            patch_size,
            batch_size,
            normalizer,
        )?;
        let rotations = rotations.unwrap_or_else(|| vec![0]);
        let flips = flips.unwrap_or_else(|| vec![Flip::None]);
        let mut augmentations = Vec::with_capacity(rotations.len() * flips.len());
        for &rotation in &rotations {
            for &flip in &flips {
                augmentations.push(Augmentation::new(rotation, flip)?);
            }
        }
        Ok(Self {
            inner,
            augmentations,
        })
    }

    pub fn num_augmentations(&self) -> usize {
        self.augmentations.len()
    }

    /// Returns `[n_instances, n_augmentations, num_features]`.
    pub fn extract(&self, image: &RgbImage, instance_map: &InstanceMap) -> Result<Tensor> {
        let dataset = InstanceMapPatchDataset::new(
            image,
            instance_map,
            self.inner.patch_size,
            self.inner.fill_value,
        )?;
        let features = Tensor::zeros(
            &[
                dataset.len() as i64,
                self.augmentations.len() as i64,
                self.inner.backbone.num_features(),
            ],
            (Kind::Float, self.inner.device),
        );
        for (augmentation_index, augmentation) in self.augmentations.iter().enumerate() {
            let transform = self.inner.transform.with_augmentation(*augmentation);
            let mut slot = features.select(1, augmentation_index as i64);
            let written = self.inner.run_pass(&dataset, &transform, &mut slot)?;
            check_coverage(&written)?;
        }
        Ok(features.to_device(Device::Cpu))
    }
}
