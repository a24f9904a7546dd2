//! Minimal grammar repair after an edit.
//!
//! Each offending feature gets the smallest change that makes it valid: a
//! size shrinks to the largest valid value, a moved feature is pulled back
//! toward the face center, a cut too deep is reduced.

use std::collections::BTreeSet;

use cadplan_core::geometry::MIN_DIMENSION;
use cadplan_core::grammar::check_feature;
use cadplan_core::plan::keys;
use cadplan_core::{Feature, Plan, Rule};
use serde::Serialize;

/// Share of the thickness a repaired cut depth is set to.
const REPAIRED_DEPTH_RATIO: f64 = 0.8;

const MAX_PASSES: usize = 4;

/// A value the editor changed to keep the plan valid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Adjustment {
    pub location: String,
    pub key: String,
    pub rule: Rule,
    pub from: f64,
    pub to: f64,
}

pub fn repair(plan: &mut Plan, moved: &BTreeSet<usize>) -> Vec<Adjustment> {
    let mut adjustments = Vec::new();
    repair_base(plan, &mut adjustments);

    for index in 0..plan.features.len() {
        for _ in 0..MAX_PASSES {
            let violation = match check_feature(plan, &plan.features[index]) {
                Ok(()) => break,
                Err(violation) => violation,
            };
            let fixed = match violation.rule {
                Rule::DimensionFloor => raise_to_floor(plan, index, &mut adjustments),
                Rule::CutDepth => reduce_depth(plan, index, &mut adjustments),
                Rule::FaceClearance if moved.contains(&index) => {
                    pull_toward_center(plan, index, &mut adjustments)
                        || shrink(plan, index, &mut adjustments)
                }
                Rule::HalfSize | Rule::FaceClearance => {
                    shrink(plan, index, &mut adjustments)
                        || pull_toward_center(plan, index, &mut adjustments)
                }
                _ => false,
            };
            if !fixed {
                break;
            }
        }
    }
    adjustments
}

fn repair_base(plan: &mut Plan, adjustments: &mut Vec<Adjustment>) {
    let names: Vec<&'static str> = plan.sketch.dimensions().iter().map(|(n, _)| *n).collect();
    for name in names {
        if let Some(value) = plan.sketch.dimension_mut(name) {
            if !(*value >= MIN_DIMENSION) {
                adjustments.push(Adjustment {
                    location: "sketch".to_string(),
                    key: name.to_string(),
                    rule: Rule::DimensionFloor,
                    from: *value,
                    to: MIN_DIMENSION,
                });
                *value = MIN_DIMENSION;
            }
        }
    }
    let height = plan.thickness();
    if !(height >= MIN_DIMENSION) {
        adjustments.push(Adjustment {
            location: "extrude".to_string(),
            key: keys::HEIGHT.to_string(),
            rule: Rule::DimensionFloor,
            from: height,
            to: MIN_DIMENSION,
        });
        plan.extrude.height = Some(MIN_DIMENSION);
    }
}

fn set(
    plan: &mut Plan,
    index: usize,
    key: &str,
    to: f64,
    rule: Rule,
    adjustments: &mut Vec<Adjustment>,
) {
    let feature = &mut plan.features[index];
    let from = feature.dim(key).unwrap_or(f64::NAN);
    feature.dimensions.insert(key.to_string(), to);
    adjustments.push(Adjustment {
        location: format!("features[{}]", index),
        key: key.to_string(),
        rule,
        from,
        to,
    });
}

fn raise_to_floor(plan: &mut Plan, index: usize, adjustments: &mut Vec<Adjustment>) -> bool {
    let low: Vec<&'static str> = plan.features[index]
        .required_keys()
        .into_iter()
        .filter(|key| !(plan.features[index].dim(key).unwrap_or(0.0) >= MIN_DIMENSION))
        .collect();
    for key in &low {
        set(plan, index, key, MIN_DIMENSION, Rule::DimensionFloor, adjustments);
    }
    !low.is_empty()
}

fn reduce_depth(plan: &mut Plan, index: usize, adjustments: &mut Vec<Adjustment>) -> bool {
    let depth = round2(plan.thickness() * REPAIRED_DEPTH_RATIO).max(MIN_DIMENSION);
    if depth >= plan.thickness() {
        return false;
    }
    set(plan, index, keys::DEPTH, depth, Rule::CutDepth, adjustments);
    true
}

/// Whether the feature no longer breaks a footprint rule.
fn footprint_ok(plan: &Plan, feature: &Feature) -> bool {
    match check_feature(plan, feature) {
        Ok(()) => true,
        Err(v) => !matches!(v.rule, Rule::HalfSize | Rule::FaceClearance),
    }
}

/// Shrinks one size key to the largest valid value, in 0.01 mm steps.
fn shrink(plan: &mut Plan, index: usize, adjustments: &mut Vec<Adjustment>) -> bool {
    let feature = plan.features[index].clone();
    let rule = rule_for(plan, &feature);
    for key in feature.shape.size_keys() {
        let Some(current) = feature.dim(key) else {
            continue;
        };
        let mut trial = feature.clone();
        let mut step = (current * 100.0).floor() as i64;
        let floor = (MIN_DIMENSION * 100.0).round() as i64;
        while step >= floor {
            let candidate = step as f64 / 100.0;
            trial.dimensions.insert(key.to_string(), candidate);
            if footprint_ok(plan, &trial) {
                if candidate != current {
                    set(plan, index, key, candidate, rule, adjustments);
                    return true;
                }
                return false;
            }
            step -= 1;
        }
    }
    false
}

/// Moves the feature toward the face center until it fits, keeping direction.
fn pull_toward_center(plan: &mut Plan, index: usize, adjustments: &mut Vec<Adjustment>) -> bool {
    let feature = plan.features[index].clone();
    let [x, y] = feature.position();
    if x == 0.0 && y == 0.0 {
        return false;
    }
    let mut trial = feature.clone();
    for permille in (0..1000).rev() {
        let scale = permille as f64 / 1000.0;
        let (nx, ny) = (round2(x * scale), round2(y * scale));
        trial.dimensions.insert(keys::POS_X.to_string(), nx);
        trial.dimensions.insert(keys::POS_Y.to_string(), ny);
        if footprint_ok(plan, &trial) {
            if nx != x {
                set(plan, index, keys::POS_X, nx, Rule::FaceClearance, adjustments);
            }
            if ny != y {
                set(plan, index, keys::POS_Y, ny, Rule::FaceClearance, adjustments);
            }
            return true;
        }
    }
    false
}

/// The footprint rule the unrepaired feature broke.
fn rule_for(plan: &Plan, feature: &Feature) -> Rule {
    match check_feature(plan, feature) {
        Err(v) => v.rule,
        Ok(()) => Rule::FaceClearance,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadplan_core::grammar::validate_plan;
    use cadplan_core::{ExportFormat, Extrude, FeatureKind, FeatureShape, Sketch};

    fn plate(feature: Feature) -> Plan {
        Plan {
            sketch: Sketch::Square { size: 50.0 },
            extrude: Extrude::new(5.0),
            features: vec![feature],
            export_format: ExportFormat::Stl,
        }
    }

    #[test]
    fn test_oversized_hole_shrinks_to_largest_valid_radius() {
        let mut plan = plate(
            Feature::new(FeatureKind::Hole, FeatureShape::Circle)
                .with(keys::RADIUS, 30.0)
                .with(keys::POS_X, 0.0)
                .with(keys::POS_Y, 0.0),
        );
        let adjustments = repair(&mut plan, &BTreeSet::new());
        assert_eq!(plan.features[0].dim(keys::RADIUS), Some(24.9));
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].from, 30.0);
        assert_eq!(adjustments[0].rule, Rule::HalfSize);
        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn test_moved_feature_is_pulled_back() {
        let mut plan = plate(
            Feature::new(FeatureKind::Hole, FeatureShape::Circle)
                .with(keys::RADIUS, 5.0)
                .with(keys::POS_X, 22.0)
                .with(keys::POS_Y, 0.0),
        );
        let adjustments = repair(&mut plan, &BTreeSet::from([0]));
        assert_eq!(plan.features[0].dim(keys::RADIUS), Some(5.0));
        assert_eq!(plan.features[0].dim(keys::POS_X), Some(19.89));
        assert_eq!(adjustments[0].key, keys::POS_X);
        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn test_unmoved_feature_shrinks_instead() {
        let mut plan = plate(
            Feature::new(FeatureKind::Hole, FeatureShape::Circle)
                .with(keys::RADIUS, 5.0)
                .with(keys::POS_X, 22.0)
                .with(keys::POS_Y, 0.0),
        );
        repair(&mut plan, &BTreeSet::new());
        assert_eq!(plan.features[0].dim(keys::POS_X), Some(22.0));
        assert_eq!(plan.features[0].dim(keys::RADIUS), Some(2.9));
    }

    #[test]
    fn test_deep_cut_is_reduced() {
        let mut plan = plate(
            Feature::new(FeatureKind::Cut, FeatureShape::Square)
                .with(keys::SIZE, 10.0)
                .with(keys::DEPTH, 7.0)
                .with(keys::POS_X, 0.0)
                .with(keys::POS_Y, 0.0),
        );
        let adjustments = repair(&mut plan, &BTreeSet::new());
        assert_eq!(plan.features[0].dim(keys::DEPTH), Some(4.0));
        assert_eq!(adjustments[0].rule, Rule::CutDepth);
    }
}
