use std::path::{Path, PathBuf};

use tch::nn::ModuleT;
use tch::{nn, CModule, Device, Kind, Tensor};

use crate::error::{ExtractError, Result};

/// Where a pretrained backbone comes from.
///
/// Parsed once from the architecture string with the legacy policy (registry
/// URL prefix, file-extension suffix, else zoo name) and resolved at
/// construction into a uniform [`EmbeddingBackbone`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackboneSource {
    LocalFile(PathBuf),
    RegistryRef(String),
    ZooName(String),
}

pub const REGISTRY_PREFIX: &str = "s3://mlflow";
pub const MODEL_REGISTRY_ROOT_VAR: &str = "MODEL_REGISTRY_ROOT";

impl BackboneSource {
    pub fn parse(architecture: &str) -> Self {
        if architecture.starts_with(REGISTRY_PREFIX) {
            BackboneSource::RegistryRef(architecture.to_string())
        } else if architecture.ends_with(".pt") {
            BackboneSource::LocalFile(PathBuf::from(architecture))
        } else {
            BackboneSource::ZooName(architecture.to_string())
        }
    }

    /// Filesystem-safe tag used to key cached artifacts per backbone.
    pub fn cache_tag(&self) -> String {
        match self {
            BackboneSource::RegistryRef(url) => {
                let parts: Vec<&str> = url[REGISTRY_PREFIX.len()..]
                    .trim_start_matches('/')
                    .split('/')
                    .collect();
                match parts.as_slice() {
                    [experiment, run, _, metric] => {
                        format!("MLflow({experiment},{run},{metric})")
                    }
                    _ => format!("MLflow({})", parts.join(",")),
                }
            }
            BackboneSource::LocalFile(path) => {
                format!("Local({})", path.to_string_lossy().replace('/', "_"))
            }
            BackboneSource::ZooName(name) => name.clone(),
        }
    }

    /// Resolves the source into an embedding backbone on the given device.
    ///
    /// `zoo_weights` points at a serialized variable store and is only
    /// consulted for zoo architectures.
    pub fn load(
        &self,
        device: Device,
        zoo_weights: Option<&Path>,
    ) -> Result<Box<dyn EmbeddingBackbone>> {
        match self {
            BackboneSource::LocalFile(path) => {
                Ok(Box::new(ScriptedBackbone::load(path, device)?))
            }
            BackboneSource::RegistryRef(url) => {
                let path = resolve_registry_ref(url)?;
                Ok(Box::new(ScriptedBackbone::load(&path, device)?))
            }
            BackboneSource::ZooName(name) => {
                Ok(Box::new(ZooBackbone::load(name, device, zoo_weights)?))
            }
        }
    }
}

/// Maps a registry URL onto the local registry mirror.
///
/// `s3://mlflow/<experiment>/<run>/artifacts/<metric>` resolves to
/// `$MODEL_REGISTRY_ROOT/<experiment>/<run>/<metric>.pt`.
fn resolve_registry_ref(url: &str) -> Result<PathBuf> {
    let root = std::env::var(MODEL_REGISTRY_ROOT_VAR).map_err(|_| {
        ExtractError::Config(format!(
            "{} must be set to resolve registry reference {}",
            MODEL_REGISTRY_ROOT_VAR, url
        ))
    })?;
    let parts: Vec<&str> = url[REGISTRY_PREFIX.len()..]
        .trim_start_matches('/')
        .split('/')
        .collect();
    let (experiment, run, metric) = match parts.as_slice() {
        [experiment, run, _, metric] => (*experiment, *run, *metric),
        _ => {
            return Err(ExtractError::Config(format!(
                "malformed registry reference: {}",
                url
            )))
        }
    };
    let path = PathBuf::from(root)
        .join(experiment)
        .join(run)
        .join(format!("{metric}.pt"));
    if !path.exists() {
        return Err(ExtractError::Config(format!(
            "registry reference {} resolves to missing file {:?}",
            url, path
        )));
    }
    Ok(path)
}

/// A frozen feature-producing network: a pretrained classifier with its head
/// removed. One implementation per backbone family.
pub trait EmbeddingBackbone {
    fn num_features(&self) -> i64;

    /// Embeds a `[N, 3, H, W]` float batch into `[N, num_features]`.
    fn embed(&self, batch: &Tensor) -> Result<Tensor>;
}

/// TorchScript modules (local files and registry artifacts). The module is
/// expected to already expose embeddings; its output width is probed with a
/// zero batch at construction and anything that does not squeeze to
/// `[N, C]` fails fast.
pub struct ScriptedBackbone {
    module: CModule,
    num_features: i64,
    device: Device,
}

impl ScriptedBackbone {
    pub fn load(path: &Path, device: Device) -> Result<Self> {
        let mut module = CModule::load_on_device(path, device)?;
        module.set_eval();
        let probe = Tensor::zeros(&[1, 3, 224, 224], (Kind::Float, device));
        let output = tch::no_grad(|| module.forward_ts(&[probe]))?;
        let num_features = match normalize_embedding(&output) {
            Some(embedding) => embedding.size()[1],
            None => {
                return Err(ExtractError::Config(format!(
                    "backbone {:?} does not produce flat embeddings (output shape {:?})",
                    path,
                    output.size()
                )))
            }
        };
        Ok(Self {
            module,
            num_features,
            device,
        })
    }
}

/// Squeezes trailing singleton spatial dims, returning `None` for anything
/// that is not `[N, C]`-shaped afterwards.
fn normalize_embedding(output: &Tensor) -> Option<Tensor> {
    let mut out = output.shallow_clone();
    while out.dim() > 2 && out.size()[out.dim() - 1] == 1 {
        out = out.squeeze_dim(out.dim() as i64 - 1);
    }
    if out.dim() == 2 {
        Some(out)
    } else {
        None
    }
}

impl EmbeddingBackbone for ScriptedBackbone {
    fn num_features(&self) -> i64 {
        self.num_features
    }

    fn embed(&self, batch: &Tensor) -> Result<Tensor> {
        let batch = batch.to_device(self.device);
        let output = tch::no_grad(|| self.module.forward_ts(&[batch]))?;
        match normalize_embedding(&output) {
            Some(embedding) if embedding.size()[1] == self.num_features => Ok(embedding),
            _ => Err(ExtractError::UnsupportedShape(output.size())),
        }
    }
}

/// Residual-network zoo family, built headless from the start instead of
/// stripping a classifier at runtime.
pub struct ZooBackbone {
    // Keeps the weights alive for `net`.
    _vs: nn::VarStore,
    net: nn::FuncT<'static>,
    num_features: i64,
    device: Device,
}

impl std::fmt::Debug for ZooBackbone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZooBackbone")
            .field("num_features", &self.num_features)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl ZooBackbone {
    pub fn load(name: &str, device: Device, weights: Option<&Path>) -> Result<Self> {
        let mut vs = nn::VarStore::new(device);
        let (net, num_features) = match name {
            "resnet18" => (tch::vision::resnet::resnet18_no_final_layer(&vs.root()), 512),
            "resnet34" => (tch::vision::resnet::resnet34_no_final_layer(&vs.root()), 512),
            _ => {
                return Err(ExtractError::Config(format!(
                    "unrecognized zoo architecture: {} (supported: resnet18, resnet34)",
                    name
                )))
            }
        };
        let weights = weights.ok_or_else(|| {
            ExtractError::Config(format!(
                "zoo architecture {} requires a pretrained weights file",
                name
            ))
        })?;
        vs.load(weights)?;
        vs.freeze();
        Ok(Self {
            _vs: vs,
            net,
            num_features,
            device,
        })
    }
}

impl EmbeddingBackbone for ZooBackbone {
    fn num_features(&self) -> i64 {
        self.num_features
    }

    fn embed(&self, batch: &Tensor) -> Result<Tensor> {
        let batch = batch.to_device(self.device);
        let output = tch::no_grad(|| self.net.forward_t(&batch, false));
        match normalize_embedding(&output) {
            Some(embedding) if embedding.size()[1] == self.num_features => Ok(embedding),
            _ => Err(ExtractError::UnsupportedShape(output.size())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_parsing_policy() {
        assert_eq!(
            BackboneSource::parse("s3://mlflow/12/abc/artifacts/loss"),
            BackboneSource::RegistryRef("s3://mlflow/12/abc/artifacts/loss".into())
        );
        assert_eq!(
            BackboneSource::parse("models/encoder.pt"),
            BackboneSource::LocalFile(PathBuf::from("models/encoder.pt"))
        );
        assert_eq!(
            BackboneSource::parse("resnet18"),
            BackboneSource::ZooName("resnet18".into())
        );
    }

    #[test]
    fn cache_tags_are_path_safe() {
        assert_eq!(
            BackboneSource::parse("s3://mlflow/12/abc/artifacts/loss").cache_tag(),
            "MLflow(12,abc,loss)"
        );
        assert_eq!(
            BackboneSource::parse("models/encoder.pt").cache_tag(),
            "Local(models_encoder.pt)"
        );
        assert_eq!(BackboneSource::parse("resnet18").cache_tag(), "resnet18");
    }

    #[test]
    fn unknown_zoo_name_fails_fast() {
        let err = ZooBackbone::load("alexnet", Device::Cpu, None).unwrap_err();
        assert!(matches!(err, ExtractError::Config(_)));
    }

    #[test]
    fn embedding_normalization_rejects_feature_maps() {
        let flat = Tensor::zeros(&[4, 512], (Kind::Float, Device::Cpu));
        assert!(normalize_embedding(&flat).is_some());
        let spatial = Tensor::zeros(&[4, 512, 1, 1], (Kind::Float, Device::Cpu));
        assert_eq!(normalize_embedding(&spatial).unwrap().size(), vec![4, 512]);
        let conv = Tensor::zeros(&[4, 512, 7, 7], (Kind::Float, Device::Cpu));
        assert!(normalize_embedding(&conv).is_none());
    }
}
