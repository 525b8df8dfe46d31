use std::collections::{BTreeMap, BTreeSet, HashMap};

use tch::{Kind, Tensor};

use crate::error::{ExtractError, Result};
use crate::instance_map::InstanceMap;

/// Correspondence from a merged-map instance id to the ordered set of
/// original-map instance ids it subsumes.
pub type Translator = BTreeMap<u32, Vec<u32>>;

/// Assigns every original instance to the merged instance covering the
/// plurality of its pixels; coverage ties go to the lowest merged label.
///
/// The result is validated: the assigned ids must exactly partition the set of
/// original labels, and every merged label must receive at least one original
/// instance. A violation is a data-integrity error from the upstream
/// segmentation, not a recoverable condition.
pub fn compute_translator(original: &InstanceMap, merged: &InstanceMap) -> Result<Translator> {
    if original.width() != merged.width() || original.height() != merged.height() {
        return Err(ExtractError::DataIntegrity(format!(
            "instance maps disagree in size: {}x{} vs {}x{}",
            original.width(),
            original.height(),
            merged.width(),
            merged.height()
        )));
    }

    // Pixel overlap counts per (original label, merged label).
    let mut overlaps: BTreeMap<u32, BTreeMap<u32, u64>> = BTreeMap::new();
    for (&orig, &merg) in original.pixels().iter().zip(merged.pixels()) {
        if orig == 0 {
            continue;
        }
        *overlaps.entry(orig).or_default().entry(merg).or_default() += 1;
    }

    let mut translator: Translator = BTreeMap::new();
    for (orig, counts) in &overlaps {
        // BTreeMap iterates labels in ascending order, so keeping a strict
        // maximum makes ties resolve to the lowest merged label.
        let (assignment, _) = counts
            .iter()
            .fold((0u32, 0u64), |(best_label, best_count), (&label, &count)| {
                if count > best_count {
                    (label, count)
                } else {
                    (best_label, best_count)
                }
            });
        if assignment == 0 {
            return Err(ExtractError::DataIntegrity(format!(
                "original instance {} is covered mostly by background in the merged map",
                orig
            )));
        }
        translator.entry(assignment).or_default().push(*orig);
    }

    check_translator_consistency(original, merged, &translator)?;
    Ok(translator)
}

fn check_translator_consistency(
    original: &InstanceMap,
    merged: &InstanceMap,
    translator: &Translator,
) -> Result<()> {
    for merged_label in merged.labels() {
        match translator.get(&merged_label) {
            Some(ids) if !ids.is_empty() => {}
            _ => {
                return Err(ExtractError::DataIntegrity(format!(
                    "merged instance {} is not mapped to any original instance",
                    merged_label
                )))
            }
        }
    }

    let mut seen = BTreeSet::new();
    for ids in translator.values() {
        for &id in ids {
            if !seen.insert(id) {
                return Err(ExtractError::DataIntegrity(format!(
                    "original instance {} is assigned to multiple merged instances",
                    id
                )));
            }
        }
    }
    let original_labels: BTreeSet<u32> = original.labels().into_iter().collect();
    if seen != original_labels {
        return Err(ExtractError::DataIntegrity(
            "assigned original ids do not match the original instance map".into(),
        ));
    }
    Ok(())
}

/// Averages feature rows of original instances into one row per merged
/// instance.
pub struct AverageFeatureMerger;

impl AverageFeatureMerger {
    /// `features` is `[n, F]` or `[n, A, F]`, rows in ascending original label
    /// order; the output keeps that convention over merged labels. Any other
    /// rank is an unsupported-shape error.
    pub fn merge(&self, features: &Tensor, translator: &Translator) -> Result<Tensor> {
        match features.size().as_slice() {
            [_, _] | [_, _, _] => {}
            _ => return Err(ExtractError::UnsupportedShape(features.size())),
        }

        // Feature row index of each original label: rank within the sorted
        // union of assigned ids.
        let mut all_ids: Vec<u32> = translator.values().flatten().copied().collect();
        all_ids.sort_unstable();
        if all_ids.len() as i64 != features.size()[0] {
            return Err(ExtractError::DataIntegrity(format!(
                "feature matrix has {} rows but the translator assigns {} instances",
                features.size()[0],
                all_ids.len()
            )));
        }
        let row_of: HashMap<u32, i64> = all_ids
            .iter()
            .enumerate()
            .map(|(row, &id)| (id, row as i64))
            .collect();

        let mut merged_rows = Vec::with_capacity(translator.len());
        for ids in translator.values() {
            let rows: Vec<i64> = ids.iter().map(|id| row_of[id]).collect();
            let index = Tensor::of_slice(&rows);
            let selected = features.index_select(0, &index);
            merged_rows.push(selected.mean_dim(Some(&[0i64][..]), false, Kind::Float));
        }
        Ok(Tensor::stack(&merged_rows, 0))
    }
}
