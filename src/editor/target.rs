//! Resolving which part of a plan a request is about.
//!
//! Candidates are scored, highest wins, ties go to the earliest feature:
//! ordinal match 1000, kind match 100, shape match 10, placement match 3,
//! plus `1 / (1 + d)` where `d` is the distance between the closest mentioned
//! number and any of the feature's size dimensions.

use std::fmt;

use cadplan_core::{Feature, Plan};
use serde::Serialize;

use super::request::{Action, Clause, EditRequest, Ordinal};
use crate::error::{CadError, CadResult};

const ORDINAL_SCORE: f64 = 1000.0;
const KIND_SCORE: f64 = 100.0;
const SHAPE_SCORE: f64 = 10.0;
const PLACEMENT_SCORE: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Target {
    Sketch,
    Extrude,
    Feature { index: usize },
    NewFeature,
    RemoveFeature { index: usize },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Sketch => f.write_str("sketch"),
            Target::Extrude => f.write_str("extrude"),
            Target::Feature { index } => write!(f, "features[{}]", index),
            Target::NewFeature => f.write_str("new feature"),
            Target::RemoveFeature { index } => write!(f, "remove features[{}]", index),
        }
    }
}

/// Resolves one target per clause that names something, deduplicated in
/// request order. A request that names nothing falls back to the closest
/// match for its numbers and placement, then to the base sketch.
pub fn resolve(plan: &Plan, request: &EditRequest) -> CadResult<Vec<Target>> {
    let mut targets: Vec<Target> = Vec::new();
    for clause in &request.clauses {
        let target = if clause.action() == Action::Add {
            Target::NewFeature
        } else if clause.names_anything() {
            resolve_clause(plan, clause)?
        } else {
            continue;
        };
        if target == Target::NewFeature || !targets.contains(&target) {
            targets.push(target);
        }
    }

    if targets.is_empty() {
        targets.push(fallback(plan, request));
    }
    Ok(targets)
}

fn resolve_clause(plan: &Plan, clause: &Clause) -> CadResult<Target> {
    let remove = clause.action() == Action::Remove;
    if clause.names_feature() {
        let index = best_feature(plan, clause)?;
        return Ok(if remove {
            Target::RemoveFeature { index }
        } else {
            Target::Feature { index }
        });
    }
    if remove {
        return Err(CadError::UnresolvedTarget(format!(
            "\"{}\" does not name a feature to remove",
            clause.text
        )));
    }
    // "make the plate thicker" names the plate but is about the extrusion.
    if clause.mentions_extrude {
        return Ok(Target::Extrude);
    }
    Ok(Target::Sketch)
}

fn ordinal_index(plan: &Plan, ordinal: Ordinal) -> Option<usize> {
    match ordinal {
        Ordinal::Nth(n) if n < plan.features.len() => Some(n),
        Ordinal::Nth(_) => None,
        Ordinal::Last => plan.features.len().checked_sub(1),
    }
}

fn best_feature(plan: &Plan, clause: &Clause) -> CadResult<usize> {
    if plan.features.is_empty() {
        return Err(CadError::UnresolvedTarget(format!(
            "\"{}\" names a feature but the plan has none",
            clause.text
        )));
    }

    // A kind or shape that appears nowhere in the plan cannot be matched in
    // any form.
    let kind_exists = clause.kinds.is_empty()
        || plan.features.iter().any(|f| clause.kinds.contains(&f.kind));
    let shape_exists = clause.shapes.is_empty()
        || plan.features.iter().any(|f| clause.shapes.contains(&f.shape));
    if !clause.kinds.is_empty() && !kind_exists && (clause.shapes.is_empty() || !shape_exists) {
        return Err(CadError::UnresolvedTarget(format!(
            "no {} in the plan",
            clause
                .kinds
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(" or ")
        )));
    }
    if clause.kinds.is_empty() && clause.ordinal.is_none() && !shape_exists {
        return Err(CadError::UnresolvedTarget(format!(
            "no {} feature in the plan",
            clause
                .shapes
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" or ")
        )));
    }

    let ordinal = match clause.ordinal {
        Some(ordinal) => Some(ordinal_index(plan, ordinal).ok_or_else(|| {
            CadError::UnresolvedTarget(format!(
                "the plan has only {} feature(s)",
                plan.features.len()
            ))
        })?),
        None => None,
    };

    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;
    for (index, feature) in plan.features.iter().enumerate() {
        let score = score(feature, index, clause, ordinal);
        if score > best_score {
            best = index;
            best_score = score;
        }
    }
    Ok(best)
}

/// Score of `feature` at `index` for `clause`.
pub fn score(feature: &Feature, index: usize, clause: &Clause, ordinal: Option<usize>) -> f64 {
    let mut score = 0.0;
    if ordinal == Some(index) {
        score += ORDINAL_SCORE;
    }
    if clause.kinds.contains(&feature.kind) {
        score += KIND_SCORE;
    }
    if clause.shapes.contains(&feature.shape) {
        score += SHAPE_SCORE;
    }
    let at = feature.position();
    if clause.placements.iter().any(|p| p.matches(at)) {
        score += PLACEMENT_SCORE;
    }
    if clause.face == Some(feature.face) {
        score += PLACEMENT_SCORE;
    }
    if let Some(d) = number_distance(feature, &clause.numbers) {
        score += 1.0 / (1.0 + d);
    }
    score
}

fn number_distance(feature: &Feature, numbers: &[f64]) -> Option<f64> {
    let sizes: Vec<f64> = feature
        .shape
        .size_keys()
        .iter()
        .filter_map(|key| feature.dim(key))
        .collect();
    numbers
        .iter()
        .flat_map(|n| sizes.iter().map(move |s| (n - s).abs()))
        .min_by(f64::total_cmp)
}

fn fallback(plan: &Plan, request: &EditRequest) -> Target {
    let hints: Vec<&Clause> = request
        .clauses
        .iter()
        .filter(|c| !c.numbers.is_empty() || !c.placements.is_empty())
        .collect();
    if plan.features.is_empty() || hints.is_empty() {
        return Target::Sketch;
    }

    let mut best = None;
    let mut best_score = 0.0;
    for (index, feature) in plan.features.iter().enumerate() {
        let total: f64 = hints.iter().map(|c| score(feature, index, c, None)).sum();
        if total > best_score {
            best = Some(index);
            best_score = total;
        }
    }
    match best {
        // Only a placement hit, or a number within a millimetre, is a match.
        Some(index) if best_score >= 0.5 => Target::Feature { index },
        _ => Target::Sketch,
    }
}
