use std::path::PathBuf;

/// Errors surfaced by the extraction pipeline.
///
/// Configuration and data-integrity problems are non-recoverable and abort the
/// current image; degenerate inputs (all-zero thresholds, empty masked regions)
/// are handled as fallback branches in the algorithms and never reach here.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("data integrity error: {0}")]
    DataIntegrity(String),
    #[error("unsupported feature tensor shape: {0:?}")]
    UnsupportedShape(Vec<i64>),
    #[error("could not read cached artifact {path:?}: {source}")]
    Cache {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Tch(#[from] tch::TchError),
    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExtractError>;
