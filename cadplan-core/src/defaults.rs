//! Explicit defaults for dimensions a request leaves unstated.

use serde::Serialize;

use crate::geometry::MIN_DIMENSION;
use crate::plan::{keys, FeatureShape, Plan};

pub const DEFAULT_THICKNESS: f64 = 5.0;

/// Cut depth as a share of the base thickness.
pub const DEPTH_RATIO: f64 = 0.6;

/// Boss height as a share of the base thickness.
pub const BOSS_RATIO: f64 = 0.5;

/// Hole radius as a share of the smallest face dimension.
pub const HOLE_RADIUS_RATIO: f64 = 0.075;

/// Dome radius as a share of the smallest face dimension.
pub const DOME_RADIUS_RATIO: f64 = 0.2;

/// Rectangular footprint extent as a share of the matching face extent.
pub const RECT_RATIO: f64 = 0.2;

/// A dimension filled in by inference rather than stated in the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferredDimension {
    /// Index into the plan's features; `None` for the base extrusion.
    pub feature: Option<usize>,
    pub key: String,
    pub value: f64,
}

/// Clamps a size to the dimension floor. NaN clamps to the floor as well.
pub fn clamp(value: f64) -> f64 {
    if value >= MIN_DIMENSION {
        value
    } else {
        MIN_DIMENSION
    }
}

fn round(value: f64) -> f64 {
    clamp((value * 100.0).round() / 100.0)
}

/// Fills every missing feature dimension with an explicit value and reports
/// what was filled.
///
/// A rectangle with one side stated takes the other side from it; everything
/// else is proportional to the base.
pub fn complete(plan: &mut Plan) -> Vec<InferredDimension> {
    let mut inferred = Vec::new();
    if plan.extrude.height.is_none() {
        plan.extrude.height = Some(DEFAULT_THICKNESS);
        inferred.push(InferredDimension {
            feature: None,
            key: keys::HEIGHT.to_string(),
            value: DEFAULT_THICKNESS,
        });
    }

    let face = plan.face_outline();
    let [face_x, face_y] = face.extents();
    let smallest = face.min_dimension();
    let thickness = plan.thickness();

    for (index, feature) in plan.features.iter_mut().enumerate() {
        let mut wanted: Vec<&'static str> = feature.required_keys();
        wanted.extend([keys::POS_X, keys::POS_Y]);
        for key in wanted {
            if feature.dimensions.contains_key(key) {
                continue;
            }
            let value = match key {
                keys::POS_X | keys::POS_Y => 0.0,
                keys::DEPTH => round(thickness * DEPTH_RATIO),
                keys::HEIGHT => round(thickness * BOSS_RATIO),
                keys::RADIUS if feature.shape == FeatureShape::Dome => {
                    round(smallest * DOME_RADIUS_RATIO)
                }
                keys::RADIUS => round(smallest * HOLE_RADIUS_RATIO),
                keys::WIDTH => match feature.dim(keys::LENGTH) {
                    Some(length) => length,
                    None => round(face_x * RECT_RATIO),
                },
                keys::LENGTH => match feature.dim(keys::WIDTH) {
                    Some(width) => width,
                    None => round(face_y * RECT_RATIO),
                },
                _ => round(smallest * RECT_RATIO),
            };
            feature.dimensions.insert(key.to_string(), value);
            inferred.push(InferredDimension {
                feature: Some(index),
                key: key.to_string(),
                value,
            });
        }
    }
    inferred
}
