use std::fs::File;
use std::path::Path;

use polars::prelude::*;
use tch::Tensor;

use crate::error::{ExtractError, Result};

/// Builds a DataFrame from a `[n, F]` feature tensor, one column per
/// descriptor. `names` must match the feature width when given; otherwise
/// columns are named `f0..f{F-1}`.
pub fn features_to_dataframe(
    features: &Tensor,
    labels: &[u32],
    names: Option<&[String]>,
) -> Result<DataFrame> {
    let size = features.size();
    let (rows, cols) = match size.as_slice() {
        [rows, cols] => (*rows, *cols),
        _ => return Err(ExtractError::UnsupportedShape(size)),
    };
    if labels.len() as i64 != rows {
        return Err(ExtractError::DataIntegrity(format!(
            "{} labels for {} feature rows",
            labels.len(),
            rows
        )));
    }
    if let Some(names) = names {
        if names.len() as i64 != cols {
            return Err(ExtractError::Config(format!(
                "{} column names for {} feature columns",
                names.len(),
                cols
            )));
        }
    }

    let mut series = Vec::with_capacity(cols as usize + 1);
    series.push(Series::new(
        "instance_id",
        labels.iter().map(|&l| l as u64).collect::<Vec<_>>(),
    ));
    for col in 0..cols {
        let name = match names {
            Some(names) => names[col as usize].clone(),
            None => format!("f{col}"),
        };
        let values = Vec::<f32>::from(&features.select(1, col).contiguous());
        series.push(Series::new(&name, values));
    }
    Ok(DataFrame::new(series)?)
}

/// Flattens an augmented `[n, A, F]` tensor to `[n, A * F]` so it can be
/// written with [`write_dataframe`]; rank-2 tensors pass through unchanged.
pub fn flatten_augmentations(features: &Tensor) -> Result<Tensor> {
    match features.size().as_slice() {
        [_, _] => Ok(features.shallow_clone()),
        [rows, augmentations, cols] => Ok(features.reshape(&[*rows, augmentations * cols])),
        _ => Err(ExtractError::UnsupportedShape(features.size())),
    }
}

/// Writes the frame in the format implied by the output extension
/// (csv, parquet or ipc/arrow).
pub fn write_dataframe(df: &mut DataFrame, path: &Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        "csv" => {
            let mut file = File::create(path)?;
            CsvWriter::new(&mut file).include_header(true).finish(df)?;
        }
        "parquet" => {
            let file = File::create(path)?;
            ParquetWriter::new(file).finish(df)?;
        }
        "ipc" | "arrow" => {
            let file = File::create(path)?;
            IpcWriter::new(file).finish(df)?;
        }
        other => {
            return Err(ExtractError::Config(format!(
                "unsupported output format: .{other} (expected csv, parquet or ipc)"
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataframe_layout() {
        let features = Tensor::of_slice(&[1.0f32, 2.0, 3.0, 4.0]).view((2, 2));
        let names = vec!["area".to_string(), "perimeter".to_string()];
        let df = features_to_dataframe(&features, &[3, 9], Some(&names)).unwrap();
        assert_eq!(df.shape(), (2, 3));
        assert_eq!(df.get_column_names(), vec!["instance_id", "area", "perimeter"]);
    }

    #[test]
    fn label_count_mismatch_is_rejected() {
        let features = Tensor::of_slice(&[1.0f32, 2.0]).view((1, 2));
        assert!(features_to_dataframe(&features, &[1, 2], None).is_err());
    }

    #[test]
    fn augmented_features_flatten() {
        let features = Tensor::arange(12, (tch::Kind::Float, tch::Device::Cpu)).view((2, 3, 2));
        let flat = flatten_augmentations(&features).unwrap();
        assert_eq!(flat.size(), vec![2, 6]);
    }
}
