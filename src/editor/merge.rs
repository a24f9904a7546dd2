//! Locality-preserving merge of a model proposal into the original plan.
//!
//! Only the resolved target subtrees are read from the proposal. Everything
//! else in the result is the original plan, value for value.

use std::collections::BTreeSet;

use cadplan_core::{Feature, Plan};

use super::target::Target;
use crate::error::{CadError, CadResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    pub plan: Plan,
    /// Features (indices into `plan`) whose placement was set by this edit.
    pub moved: BTreeSet<usize>,
}

pub fn merge(original: &Plan, proposal: &Plan, targets: &[Target]) -> CadResult<Merge> {
    let removed: BTreeSet<usize> = targets
        .iter()
        .filter_map(|t| match t {
            Target::RemoveFeature { index } => Some(*index),
            _ => None,
        })
        .collect();
    let additions = targets.iter().filter(|t| **t == Target::NewFeature).count();
    // Index of an original feature in the proposal, once removals are applied.
    let shifted = |index: usize| index - removed.range(..index).count();

    let mut plan = original.clone();
    let mut moved = BTreeSet::new();

    for target in targets {
        match *target {
            Target::Sketch => plan.sketch = proposal.sketch.clone(),
            Target::Extrude => {
                let height = proposal.extrude.height.or(original.extrude.height);
                plan.extrude = proposal.extrude.clone();
                plan.extrude.height = height;
            }
            Target::Feature { index } => {
                let old = &original.features[index];
                let new = proposal.features.get(shifted(index)).ok_or_else(|| {
                    CadError::SchemaViolation(format!(
                        "response dropped features[{}] ({})",
                        index,
                        old.describe()
                    ))
                })?;
                if merge_feature(&mut plan.features[index], old, new) {
                    moved.insert(index);
                }
            }
            Target::NewFeature | Target::RemoveFeature { .. } => {}
        }
    }

    for index in removed.iter().rev() {
        plan.features.remove(*index);
    }
    let mut moved: BTreeSet<usize> = moved
        .into_iter()
        .filter(|i| !removed.contains(i))
        .map(shifted)
        .collect();

    if additions > 0 {
        let kept = original.features.len() - removed.len();
        let appended: Vec<&Feature> = proposal.features.iter().skip(kept).collect();
        if appended.is_empty() {
            return Err(CadError::SchemaViolation(
                "response does not append the requested feature".to_string(),
            ));
        }
        for feature in appended {
            if feature.position() != [0.0, 0.0] {
                moved.insert(plan.features.len());
            }
            plan.features.push(feature.clone());
        }
    }

    Ok(Merge { plan, moved })
}

/// Applies the proposal for one feature. A kind or shape change replaces the
/// feature; otherwise only changed values are copied. Returns whether the
/// placement changed.
fn merge_feature(slot: &mut Feature, old: &Feature, new: &Feature) -> bool {
    if new.kind != old.kind || new.shape != old.shape {
        *slot = new.clone();
        return new.position() != old.position() || new.face != old.face;
    }

    let mut moved = false;
    for (key, value) in &new.dimensions {
        if old.dim(key) != Some(*value) {
            slot.dimensions.insert(key.clone(), *value);
            moved |= Feature::is_placement_key(key);
        }
    }
    if new.face != old.face {
        slot.face = new.face;
        moved = true;
    }
    moved
}
