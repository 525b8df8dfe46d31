use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use log::error;

use crate::patches::Flip;

#[derive(Clone, Debug)]
pub enum Mode {
    Handcrafted,
    Deep,
    AugmentedDeep,
}

impl std::str::FromStr for Mode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "handcrafted" => Ok(Mode::Handcrafted),
            "deep" => Ok(Mode::Deep),
            "augmented-deep" => Ok(Mode::AugmentedDeep),
            _ => Err(format!("{} is not a valid extraction mode", s)),
        }
    }
}

#[derive(Debug, Parser, Clone)]
pub struct Args {
    /// Extraction mode: handcrafted, deep or augmented-deep
    pub mode: Mode,
    /// Input RGB image (.png)
    pub image: PathBuf,
    /// Input instance map (8/16-bit single channel .png, 0 = background)
    pub instance_map: PathBuf,
    /// Output file; format chosen by extension (.csv, .parquet, .ipc)
    pub output: PathBuf,
    /// Merged instance map :
    /// if specified, features are averaged onto this coarser map
    #[clap(long)]
    pub merged_map: Option<PathBuf>,
    /// Overwrite :
    /// if specified, will overwrite the output file if it already exists
    #[clap(short, long)]
    pub overwrite: bool,
    /// Backbone architecture (deep modes) :
    /// a registry url (s3://mlflow/...), a TorchScript file (*.pt) or a zoo
    /// name (resnet18, resnet34)
    #[clap(long, default_value = "resnet18")]
    pub backbone: String,
    /// Weights file (.ot) for zoo architectures
    #[clap(long)]
    pub zoo_weights: Option<PathBuf>,
    /// Patch size :
    /// the size of the patch extracted around each instance (in pixels)
    #[clap(short, long, default_value = "224")]
    pub patch_size: u32,
    /// Mask background :
    /// if specified, pixels outside the instance are filled with white
    #[clap(short, long)]
    pub mask_background: bool,
    /// Batch size :
    /// the number of patches to run through the backbone at once
    #[clap(short, long, default_value = "32")]
    pub batch_size: usize,
    /// Normalizer config (JSON file with per-channel "mean" and "std")
    #[clap(long)]
    pub normalizer: Option<PathBuf>,
    /// Rotations (degrees, multiples of 90) for augmented-deep mode
    #[clap(long)]
    pub rotations: Option<Vec<u32>>,
    /// Flips for augmented-deep mode, in {n, h, v}
    #[clap(long)]
    pub flips: Option<Vec<Flip>>,
    /// Tissue mask directory :
    /// if specified, a tissue mask is computed for the image and cached there
    #[clap(long)]
    pub tissue_mask_dir: Option<PathBuf>,
    /// Thread count :
    /// the number of threads used by rayon
    /// if not specified, rayon will use the number of cores available on the machine
    #[clap(short, long)]
    pub thread_count: Option<usize>,
    /// GPU :
    /// if specified, will run backbone inference on the given CUDA device
    /// if not specified, will use the cpu
    #[clap(short, long)]
    pub gpu: Option<usize>,
    /// Verbose :
    /// if specified, will print more information
    #[clap(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn handle_verbose(&self) {
        if !self.verbose {
            return;
        }
        println!("Called Args :");
        println!("{:#?}", self);
        log::set_max_level(log::LevelFilter::Debug);
    }

    pub fn handle_thread_count(&self) {
        if let Some(thread_count) = self.thread_count {
            rayon::ThreadPoolBuilder::new()
                .num_threads(thread_count)
                .build_global()
                .unwrap();
        }
    }

    pub fn validate_paths(&self) {
        if !self.image.exists() {
            error!("Image file does not exist : {:?}", self.image);
            exit(1);
        }
        if !self.instance_map.exists() {
            error!("Instance map file does not exist : {:?}", self.instance_map);
            exit(1);
        }
        if let Some(merged_map) = &self.merged_map {
            if !merged_map.exists() {
                error!("Merged map file does not exist : {:?}", merged_map);
                exit(1);
            }
        }
        if self.output.exists() && !self.overwrite {
            error!(
                "Output file already exists : {:?}\nUse --overwrite to overwrite it",
                self.output
            );
            exit(1);
        }
    }

    pub fn validate_gpu(&self) {
        if let Some(gpu) = self.gpu {
            if !tch::Cuda::is_available() {
                error!("No GPU available\nCheck that CUDA is installed and that your GPU is compatible with CUDA\nCheck that you specified the right version of libtorch in LIBTORCH and LD_LIBRARY_PATH");
                exit(1);
            }
            if gpu >= tch::Cuda::device_count() as usize {
                error!("GPU {} does not exist", gpu);
                exit(1);
            }
        }
    }

    pub fn device(&self) -> tch::Device {
        match self.gpu {
            Some(gpu) => tch::Device::Cuda(gpu),
            None => tch::Device::Cpu,
        }
    }
}

lazy_static::lazy_static! {
    pub static ref ARGS: Args = Args::parse();
}
