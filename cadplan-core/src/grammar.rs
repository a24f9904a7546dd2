//! The canonical feature grammar: the closed set of construction rules every
//! plan and program must satisfy.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{check_footprint, MIN_DIMENSION};
use crate::plan::{keys, Feature, FeatureKind, FeatureShape, Plan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    SingleBaseSolid,
    BaseKind,
    SolidBase,
    FeatureOnSolid,
    FeaturePattern,
    FaceClearance,
    HalfSize,
    FaceOverload,
    PlanarFaceOnly,
    DomeConstruction,
    UnionOverlap,
    DimensionFloor,
    ThreePointArcOnly,
    ClosedProfile,
    InlineSketch,
    CutDepth,
}

impl Rule {
    pub const ALL: [Rule; 16] = [
        Rule::SingleBaseSolid,
        Rule::BaseKind,
        Rule::SolidBase,
        Rule::FeatureOnSolid,
        Rule::FeaturePattern,
        Rule::FaceClearance,
        Rule::HalfSize,
        Rule::FaceOverload,
        Rule::PlanarFaceOnly,
        Rule::DomeConstruction,
        Rule::UnionOverlap,
        Rule::DimensionFloor,
        Rule::ThreePointArcOnly,
        Rule::ClosedProfile,
        Rule::InlineSketch,
        Rule::CutDepth,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Rule::SingleBaseSolid => "single-base-solid",
            Rule::BaseKind => "base-kind",
            Rule::SolidBase => "solid-base",
            Rule::FeatureOnSolid => "feature-on-solid",
            Rule::FeaturePattern => "feature-pattern",
            Rule::FaceClearance => "face-clearance",
            Rule::HalfSize => "half-size",
            Rule::FaceOverload => "face-overload",
            Rule::PlanarFaceOnly => "planar-face-only",
            Rule::DomeConstruction => "dome-construction",
            Rule::UnionOverlap => "union-overlap",
            Rule::DimensionFloor => "dimension-floor",
            Rule::ThreePointArcOnly => "three-point-arc-only",
            Rule::ClosedProfile => "closed-profile",
            Rule::InlineSketch => "inline-sketch",
            Rule::CutDepth => "cut-depth",
        }
    }

    /// One-line statement of the rule, as given to the language model.
    pub fn statement(&self) -> &'static str {
        match self {
            Rule::SingleBaseSolid => "Build exactly one base solid from one sketch and one extrusion.",
            Rule::BaseKind => "The base sketch is a rectangle (or square) or a circle.",
            Rule::SolidBase => "The base extrusion is a solid, never a shell or surface.",
            Rule::FeatureOnSolid => "Apply every cut, hole and boss to a face of an existing solid, never to a bare sketch.",
            Rule::FeaturePattern => "Features are through-holes, depth-limited cuts, boss extrusions or trimmed domes; never subtract separately built solids.",
            Rule::FaceClearance => "Every feature footprint stays inside its face with at least 0.1 mm of margin.",
            Rule::HalfSize => "Twice a feature's size must be smaller than the face dimension it sits on.",
            Rule::FaceOverload => "Place at most 5 features on one face per construction chain; split longer lists into stages.",
            Rule::PlanarFaceOnly => "Sketch only on the planar top (>Z) or bottom (<Z) face of the base solid.",
            Rule::DomeConstruction => "Build domes as a full sphere trimmed by intersecting a block; never split or revolve.",
            Rule::UnionOverlap => "Solids joined by union overlap by at least 0.1 mm; touching is not enough.",
            Rule::DimensionFloor => "Every size is at least 0.1 mm; emit sizes as max(0.1, value).",
            Rule::ThreePointArcOnly => "Curved edges use three_point_arc with an explicit closing segment.",
            Rule::ClosedProfile => "Path profiles finish with close().",
            Rule::InlineSketch => "Pass profiles directly to the operation that consumes them; never bind them to names.",
            Rule::CutDepth => "A depth-limited cut is shallower than the solid it cuts.",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A rejected plan or program, naming the rule it breaks.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{rule} violated{}: {detail}", location_suffix(.location))]
pub struct Violation {
    pub rule: Rule,
    pub detail: String,
    pub location: Option<String>,
}

fn location_suffix(location: &Option<String>) -> String {
    location
        .as_deref()
        .map(|l| format!(" at {}", l))
        .unwrap_or_default()
}

impl Violation {
    pub fn new(rule: Rule, detail: impl Into<String>) -> Self {
        Self {
            rule,
            detail: detail.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Accepts a plan or returns the first violated rule.
pub fn validate_plan(plan: &Plan) -> Result<(), Violation> {
    match plan_violations(plan).into_iter().next() {
        Some(violation) => Err(violation),
        None => Ok(()),
    }
}

/// Every violation in the plan, at most one per feature, in construction order.
pub fn plan_violations(plan: &Plan) -> Vec<Violation> {
    let mut violations = Vec::new();

    if !plan.extrude.solid {
        violations.push(Violation::new(Rule::SolidBase, "extrusion must be solid").at("extrude"));
    }
    for (name, value) in plan.sketch.dimensions() {
        if !(value >= MIN_DIMENSION) {
            violations.push(
                Violation::new(
                    Rule::DimensionFloor,
                    format!("sketch {} is {}, minimum is {}", name, value, MIN_DIMENSION),
                )
                .at(format!("sketch.{}", name)),
            );
        }
    }
    if !(plan.thickness() >= MIN_DIMENSION) {
        violations.push(
            Violation::new(
                Rule::DimensionFloor,
                format!(
                    "extrusion height is {}, minimum is {}",
                    plan.thickness(), MIN_DIMENSION
                ),
            )
            .at("extrude.height"),
        );
    }
    if !violations.is_empty() {
        return violations;
    }

    for (index, feature) in plan.features.iter().enumerate() {
        if let Err(violation) = check_feature(plan, feature) {
            violations.push(violation.at(format!("features[{}]", index)));
        }
    }
    violations
}

/// Validates one feature against the base solid of `plan`.
pub fn check_feature(plan: &Plan, feature: &Feature) -> Result<(), Violation> {
    if feature.shape == FeatureShape::Dome && feature.kind != FeatureKind::Boss {
        return Err(Violation::new(
            Rule::FeaturePattern,
            format!("a dome is additive, it cannot be a {}", feature.kind),
        ));
    }

    for key in feature.required_keys() {
        match feature.dim(key) {
            Some(value) if value >= MIN_DIMENSION => {}
            Some(value) => {
                return Err(Violation::new(
                    Rule::DimensionFloor,
                    format!("{} is {}, minimum is {}", key, value, MIN_DIMENSION),
                ))
            }
            None => {
                return Err(Violation::new(
                    Rule::DimensionFloor,
                    format!("{} is missing; every dimension must be explicit", key),
                ))
            }
        }
    }
    for (key, value) in &feature.dimensions {
        if !value.is_finite() {
            return Err(Violation::new(
                Rule::DimensionFloor,
                format!("{} is not a finite number", key),
            ));
        }
    }

    let footprint = feature.footprint().ok_or_else(|| {
        Violation::new(Rule::DimensionFloor, "footprint dimensions are missing")
    })?;
    check_footprint(&plan.face_outline(), &footprint, feature.position())?;

    if feature.kind == FeatureKind::Cut {
        let depth = feature.dim(keys::DEPTH).unwrap_or(0.0);
        if depth >= plan.thickness() {
            return Err(Violation::new(
                Rule::CutDepth,
                format!(
                    "cut depth {} is not shallower than the {} mm base",
                    depth,
                    plan.thickness()
                ),
            ));
        }
    }
    Ok(())
}

/// Instruction block listing every rule, for model prompts.
pub fn rules_text() -> String {
    Rule::ALL
        .iter()
        .map(|rule| format!("- [{}] {}", rule.id(), rule.statement()))
        .collect::<Vec<_>>()
        .join("\n")
}
