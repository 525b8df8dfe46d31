/*!
Feature extraction for computational pathology: turns an RGB image and an
instance map (cells or superpixels) into per-instance feature matrices, with
tissue masking and coarse-map feature merging on the side.
*/

pub mod args;
pub mod backbone;
pub mod deep;
pub mod error;
pub mod features;
pub mod instance_map;
pub mod mask;
pub mod merge;
pub mod output;
pub mod patches;
pub mod regions;
pub mod utils;
