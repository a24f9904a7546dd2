//! The design plan: the persisted, structured representation every stage
//! reads and the editor rewrites.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::defaults::DEFAULT_THICKNESS;
use crate::geometry::{Face, FaceOutline, Footprint};

/// Dimension keys used in `Feature::dimensions`.
pub mod keys {
    pub const RADIUS: &str = "radius";
    pub const WIDTH: &str = "width";
    pub const LENGTH: &str = "length";
    pub const SIZE: &str = "size";
    pub const DEPTH: &str = "depth";
    pub const HEIGHT: &str = "height";
    pub const POS_X: &str = "pos_x";
    pub const POS_Y: &str = "pos_y";
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("response is empty")]
    Empty,

    #[error("response must be a bare JSON object, found {0:?}")]
    NotBareObject(String),

    #[error("plan does not match the schema: {0}")]
    Schema(#[from] serde_json::Error),
}

/// Structured design: one base sketch, one extrusion, ordered features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub sketch: Sketch,
    pub extrude: Extrude,
    pub features: Vec<Feature>,
    pub export_format: ExportFormat,
}

impl Plan {
    /// Strictly parses a model response or stored document.
    ///
    /// The text must be the JSON object alone: leading prose, markdown fences
    /// and unknown keys are all rejected rather than stripped.
    pub fn from_json(text: &str) -> Result<Self, PlanError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PlanError::Empty);
        }
        if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
            let preview: String = trimmed.chars().take(24).collect();
            return Err(PlanError::NotBareObject(preview));
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    pub fn to_json_pretty(&self) -> String {
        // Plans hold only strings, finite numbers and maps with string keys.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// JSON schema of the plan document, embedded in model instructions.
    pub fn json_schema() -> String {
        let schema = schemars::schema_for!(Plan);
        serde_json::to_string_pretty(&schema).unwrap_or_default()
    }

    pub fn thickness(&self) -> f64 {
        self.extrude.height.unwrap_or(DEFAULT_THICKNESS)
    }

    /// Outline of the planar faces of the base solid.
    pub fn face_outline(&self) -> FaceOutline {
        self.sketch.outline()
    }
}

/// Base profile, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Sketch {
    Square { size: f64 },
    Rectangle { width: f64, height: f64 },
    Circle { radius: f64 },
}

impl Sketch {
    pub fn outline(&self) -> FaceOutline {
        match *self {
            Sketch::Square { size } => FaceOutline::Rect {
                width: size,
                height: size,
            },
            Sketch::Rectangle { width, height } => FaceOutline::Rect { width, height },
            Sketch::Circle { radius } => FaceOutline::Circle { radius },
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Sketch::Square { .. } => "square",
            Sketch::Rectangle { .. } => "rectangle",
            Sketch::Circle { .. } => "circle",
        }
    }

    /// Named numeric fields, in declaration order.
    pub fn dimensions(&self) -> Vec<(&'static str, f64)> {
        match *self {
            Sketch::Square { size } => vec![("size", size)],
            Sketch::Rectangle { width, height } => vec![("width", width), ("height", height)],
            Sketch::Circle { radius } => vec![("radius", radius)],
        }
    }

    /// Mutable access to a named numeric field.
    pub fn dimension_mut(&mut self, name: &str) -> Option<&mut f64> {
        match (self, name) {
            (Sketch::Square { size }, "size") => Some(size),
            (Sketch::Rectangle { width, .. }, "width") => Some(width),
            (Sketch::Rectangle { height, .. }, "height") => Some(height),
            (Sketch::Circle { radius }, "radius") => Some(radius),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum ExtrudeDirection {
    #[default]
    #[serde(rename = "+Z")]
    Up,
    #[serde(rename = "-Z")]
    Down,
}

impl ExtrudeDirection {
    fn is_default(&self) -> bool {
        matches!(self, ExtrudeDirection::Up)
    }
}

fn default_solid() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Extrude {
    /// Absent until [`crate::defaults::complete`] fills it in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "ExtrudeDirection::is_default")]
    pub direction: ExtrudeDirection,
    #[serde(default = "default_solid", skip_serializing_if = "is_true")]
    pub solid: bool,
}

impl Extrude {
    pub fn new(height: f64) -> Self {
        Self {
            height: Some(height),
            direction: ExtrudeDirection::Up,
            solid: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Cut,
    Hole,
    #[serde(alias = "add")]
    Boss,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 3] = [FeatureKind::Cut, FeatureKind::Hole, FeatureKind::Boss];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::Cut => "cut",
            FeatureKind::Hole => "hole",
            FeatureKind::Boss => "boss",
        }
    }

    /// Dimension key holding the extent along the extrusion axis, if any.
    pub fn depth_key(&self) -> Option<&'static str> {
        match self {
            FeatureKind::Cut => Some(keys::DEPTH),
            FeatureKind::Boss => Some(keys::HEIGHT),
            FeatureKind::Hole => None,
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cut" => Ok(FeatureKind::Cut),
            "hole" => Ok(FeatureKind::Hole),
            "boss" | "add" => Ok(FeatureKind::Boss),
            _ => Err(format!("Invalid feature kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FeatureShape {
    Circle,
    Rectangle,
    Square,
    Semicircle,
    Dome,
}

impl FeatureShape {
    pub const ALL: [FeatureShape; 5] = [
        FeatureShape::Circle,
        FeatureShape::Rectangle,
        FeatureShape::Square,
        FeatureShape::Semicircle,
        FeatureShape::Dome,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureShape::Circle => "circle",
            FeatureShape::Rectangle => "rectangle",
            FeatureShape::Square => "square",
            FeatureShape::Semicircle => "semicircle",
            FeatureShape::Dome => "dome",
        }
    }

    /// Keys that size the footprint.
    pub fn size_keys(&self) -> &'static [&'static str] {
        match self {
            FeatureShape::Circle | FeatureShape::Semicircle | FeatureShape::Dome => &[keys::RADIUS],
            FeatureShape::Rectangle => &[keys::WIDTH, keys::LENGTH],
            FeatureShape::Square => &[keys::SIZE],
        }
    }
}

impl fmt::Display for FeatureShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureShape::ALL
            .into_iter()
            .find(|shape| shape.as_str() == s)
            .ok_or_else(|| format!("Invalid feature shape: {}", s))
    }
}

/// A modification applied to a face of the base solid, in construction order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: FeatureKind,
    pub shape: FeatureShape,
    pub dimensions: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Face::is_top")]
    pub face: Face,
}

impl Feature {
    pub fn new(kind: FeatureKind, shape: FeatureShape) -> Self {
        Self {
            kind,
            shape,
            dimensions: BTreeMap::new(),
            face: Face::Top,
        }
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.dimensions.insert(key.to_string(), value);
        self
    }

    pub fn dim(&self, key: &str) -> Option<f64> {
        self.dimensions.get(key).copied()
    }

    /// Placement offset from the face center; absent keys mean centered.
    pub fn position(&self) -> [f64; 2] {
        [
            self.dim(keys::POS_X).unwrap_or(0.0),
            self.dim(keys::POS_Y).unwrap_or(0.0),
        ]
    }

    /// Size keys plus the depth key for this kind, excluding placement.
    pub fn required_keys(&self) -> Vec<&'static str> {
        let mut required = self.shape.size_keys().to_vec();
        if self.shape != FeatureShape::Dome {
            if let Some(depth) = self.kind.depth_key() {
                required.push(depth);
            }
        }
        required
    }

    pub fn is_placement_key(key: &str) -> bool {
        key == keys::POS_X || key == keys::POS_Y
    }

    /// Footprint on the face, or `None` while a size key is missing.
    pub fn footprint(&self) -> Option<Footprint> {
        Some(match self.shape {
            FeatureShape::Circle | FeatureShape::Dome => Footprint::Circle {
                radius: self.dim(keys::RADIUS)?,
            },
            FeatureShape::Semicircle => Footprint::Semicircle {
                radius: self.dim(keys::RADIUS)?,
            },
            FeatureShape::Rectangle => Footprint::Rect {
                width: self.dim(keys::WIDTH)?,
                length: self.dim(keys::LENGTH)?,
            },
            FeatureShape::Square => {
                let size = self.dim(keys::SIZE)?;
                Footprint::Rect {
                    width: size,
                    length: size,
                }
            }
        })
    }

    pub fn describe(&self) -> String {
        format!("{} {} on {}", self.shape, self.kind, self.face)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Stl,
    Obj,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Stl => "stl",
            ExportFormat::Obj => "obj",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stl" => Ok(ExportFormat::Stl),
            "obj" => Ok(ExportFormat::Obj),
            _ => Err(format!("Invalid export format: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLATE: &str = r#"{
        "sketch": {"type": "square", "size": 50},
        "extrude": {"height": 5},
        "features": [
            {"type": "hole", "shape": "circle",
             "dimensions": {"radius": 5, "pos_x": 0, "pos_y": 0}}
        ],
        "export_format": "stl"
    }"#;

    #[test]
    fn test_parses_square_plate() {
        let plan = Plan::from_json(PLATE).unwrap();
        assert_eq!(plan.sketch, Sketch::Square { size: 50.0 });
        assert_eq!(plan.extrude, Extrude::new(5.0));
        assert_eq!(plan.features.len(), 1);
        assert_eq!(plan.features[0].kind, FeatureKind::Hole);
        assert_eq!(plan.features[0].dim("radius"), Some(5.0));
        assert_eq!(plan.features[0].face, Face::Top);
    }

    #[test]
    fn test_rejects_fenced_response() {
        let fenced = format!("```json\n{}\n```", PLATE);
        assert!(matches!(
            Plan::from_json(&fenced),
            Err(PlanError::NotBareObject(_))
        ));
    }

    #[test]
    fn test_rejects_prose_prefix() {
        let chatty = format!("Here is the plan: {}", PLATE);
        assert!(Plan::from_json(&chatty).is_err());
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let extra = PLATE.replacen("\"export_format\"", "\"material\": \"steel\", \"export_format\"", 1);
        assert!(matches!(Plan::from_json(&extra), Err(PlanError::Schema(_))));
    }

    #[test]
    fn test_add_is_alias_for_boss() {
        let text = PLATE.replace("\"hole\"", "\"add\"");
        let plan = Plan::from_json(&text).unwrap();
        assert_eq!(plan.features[0].kind, FeatureKind::Boss);
    }

    #[test]
    fn test_defaults_are_omitted_on_write() {
        let plan = Plan::from_json(PLATE).unwrap();
        let json = plan.to_json_pretty();
        assert!(!json.contains("direction"));
        assert!(!json.contains("\"solid\""));
        assert!(!json.contains("\"face\""));
        assert_eq!(Plan::from_json(&json).unwrap(), plan);
    }

    #[test]
    fn test_schema_names_the_sketch_kinds() {
        let schema = Plan::json_schema();
        assert!(schema.contains("square"));
        assert!(schema.contains("export_format"));
    }
}
