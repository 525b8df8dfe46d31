use std::process::exit;

use log::{debug, info};
use tch::Tensor;

use histo_feature_extraction::args::{Mode, ARGS};
use histo_feature_extraction::backbone::BackboneSource;
use histo_feature_extraction::deep::{
    AugmentedDeepFeatureExtractor, DeepFeatureExtractor, NormalizerConfig,
};
use histo_feature_extraction::error::Result;
use histo_feature_extraction::features::{feature_names, HandcraftedFeatureExtractor};
use histo_feature_extraction::instance_map::InstanceMap;
use histo_feature_extraction::mask::GaussianTissueMask;
use histo_feature_extraction::merge::{compute_translator, AverageFeatureMerger};
use histo_feature_extraction::output;

fn main() {
    pretty_env_logger::init();
    ARGS.handle_verbose();
    ARGS.validate_paths();
    ARGS.validate_gpu();
    ARGS.handle_thread_count();

    if let Err(err) = run() {
        log::error!("{}", err);
        exit(1);
    }
}

fn run() -> Result<()> {
    let image = image::open(&ARGS.image)?.to_rgb8();
    let instance_map = InstanceMap::open(&ARGS.instance_map)?;
    info!(
        "loaded {:?} ({}x{}) with {} instances",
        ARGS.image,
        image.width(),
        image.height(),
        instance_map.labels().len()
    );

    if let Some(tissue_mask_dir) = &ARGS.tissue_mask_dir {
        let name = ARGS
            .image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let mask = GaussianTissueMask::default().process_and_save(tissue_mask_dir, &name, &image)?;
        let tissue_pixels = mask.pixels().filter(|p| p.0[0] != 0).count();
        debug!(
            "tissue mask covers {:.1}% of the image",
            100.0 * tissue_pixels as f64 / (mask.width() * mask.height()) as f64
        );
    }

    let normalizer = match &ARGS.normalizer {
        Some(path) => {
            let file = std::fs::File::open(path)?;
            Some(serde_json::from_reader::<_, NormalizerConfig>(file)?)
        }
        None => None,
    };

    let (features, names): (Tensor, Option<Vec<String>>) = match ARGS.mode {
        Mode::Handcrafted => {
            let features = HandcraftedFeatureExtractor.extract(&image, &instance_map)?;
            (features, Some(feature_names()))
        }
        Mode::Deep => {
            let source = BackboneSource::parse(&ARGS.backbone);
            info!("backbone: {}", source.cache_tag());
            let extractor = DeepFeatureExtractor::new(
                &source,
                ARGS.device(),
                ARGS.zoo_weights.as_deref(),
                ARGS.mask_background,
                ARGS.patch_size,
                ARGS.batch_size,
                normalizer.as_ref(),
            )?;
            (extractor.extract(&image, &instance_map)?, None)
        }
        Mode::AugmentedDeep => {
            let source = BackboneSource::parse(&ARGS.backbone);
            info!("backbone: {}", source.cache_tag());
            let extractor = AugmentedDeepFeatureExtractor::new(
                &source,
                ARGS.device(),
                ARGS.zoo_weights.as_deref(),
                ARGS.mask_background,
                ARGS.patch_size,
                ARGS.batch_size,
                normalizer.as_ref(),
                ARGS.rotations.clone(),
                ARGS.flips.clone(),
            )?;
            (extractor.extract(&image, &instance_map)?, None)
        }
    };

    let (features, labels) = match &ARGS.merged_map {
        Some(merged_path) => {
            let merged_map = InstanceMap::open(merged_path)?;
            let translator = compute_translator(&instance_map, &merged_map)?;
            info!(
                "merging {} instances into {}",
                instance_map.labels().len(),
                translator.len()
            );
            let merged = AverageFeatureMerger.merge(&features, &translator)?;
            (merged, merged_map.labels())
        }
        None => (features, instance_map.labels()),
    };

    let flat = output::flatten_augmentations(&features)?;
    let mut df = output::features_to_dataframe(&flat, &labels, names.as_deref())?;
    output::write_dataframe(&mut df, &ARGS.output)?;
    info!("wrote {} feature rows to {:?}", df.height(), ARGS.output);
    Ok(())
}
