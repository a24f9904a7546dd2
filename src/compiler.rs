//! Plan-to-program compilation.
//!
//! The model strategy asks the language model for a program and accepts it
//! only after it parses and passes the static checker. The direct strategy
//! lowers the plan deterministically; its output is also the worked example
//! shown to the model.

use std::fmt::Write as _;

use cadplan_core::defaults::complete;
use cadplan_core::geometry::{MAX_FEATURES_PER_CHAIN, MIN_CLEARANCE, MIN_DIMENSION};
use cadplan_core::grammar::validate_plan;
use cadplan_core::plan::keys;
use cadplan_core::program::{check, parse, Program, ProgramError};
use cadplan_core::{ExtrudeDirection, Feature, FeatureKind, FeatureShape, Plan, Sketch};
use tracing::info;

use crate::config::{CompileStrategy, Config};
use crate::error::{CadError, CadResult};
use crate::llm::{negotiate, prompts, LanguageModel};

#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub program: Program,
    /// Canonical source, as persisted.
    pub source: String,
    pub result_name: String,
    pub strategy: CompileStrategy,
    pub attempts: u32,
}

pub struct Compiler<'a, M: LanguageModel + ?Sized> {
    model: &'a M,
    config: &'a Config,
}

impl<'a, M: LanguageModel + ?Sized> Compiler<'a, M> {
    pub fn new(model: &'a M, config: &'a Config) -> Self {
        Self { model, config }
    }

    pub async fn compile(&self, plan: &Plan) -> CadResult<CompiledProgram> {
        validate_plan(plan).map_err(CadError::GrammarViolation)?;

        let compiled = match self.config.compile_strategy {
            CompileStrategy::Direct => compile_direct(plan)?,
            CompileStrategy::Model => {
                let system = prompts::compile_system();
                let input = plan.to_json_pretty();
                let accepted =
                    negotiate(self.model, self.config, &system, &input, accept_program).await?;
                let (program, result_name) = accepted.value;
                CompiledProgram {
                    source: program.to_source(),
                    program,
                    result_name,
                    strategy: CompileStrategy::Model,
                    attempts: accepted.attempts,
                }
            }
        };

        info!(
            strategy = ?compiled.strategy,
            statements = compiled.program.statements.len(),
            result = %compiled.result_name,
            "Compiled plan into program"
        );
        Ok(compiled)
    }
}

/// Deterministic compilation, no model involved.
pub fn compile_direct(plan: &Plan) -> CadResult<CompiledProgram> {
    let program = lower(plan).map_err(CadError::invalid_program)?;
    let result_name = check(&program).map_err(CadError::invalid_program)?;
    Ok(CompiledProgram {
        source: program.to_source(),
        program,
        result_name,
        strategy: CompileStrategy::Direct,
        attempts: 0,
    })
}

fn accept_program(text: &str) -> CadResult<(Program, String)> {
    let program = parse(text).map_err(CadError::invalid_program)?;
    let result_name = check(&program).map_err(CadError::invalid_program)?;
    Ok((program, result_name))
}

/// Lowers a plan into a program.
///
/// Face features are applied in plan order in chains of at most
/// `MAX_FEATURES_PER_CHAIN`; domes are built as trimmed spheres afterwards and
/// joined by union, since the joined solid no longer has provably planar faces.
pub fn lower(plan: &Plan) -> Result<Program, ProgramError> {
    parse(&lower_source(plan))
}

fn lower_source(plan: &Plan) -> String {
    let mut plan = plan.clone();
    complete(&mut plan);

    let mut out = String::new();
    let thickness = plan.thickness();
    let _ = writeln!(out, "thickness = {}", size(thickness));

    let extruded = format!("extrude({}, thickness)", base_profile(&plan.sketch));
    let (base, top, bottom) = match plan.extrude.direction {
        ExtrudeDirection::Up => (extruded, thickness, 0.0),
        ExtrudeDirection::Down => (
            format!("translate({}, 0, 0, -thickness)", extruded),
            0.0,
            -thickness,
        ),
    };

    // Face features keep their list order but all run before any dome:
    // after a union the part has no planar frame left (`planar-face-only`),
    // so a feature listed after a dome could not be placed.
    let (domes, face_features): (Vec<&Feature>, Vec<&Feature>) = plan
        .features
        .iter()
        .partition(|f| f.shape == FeatureShape::Dome);

    let mut chains = face_features.chunks(MAX_FEATURES_PER_CHAIN);
    let _ = write!(out, "part = {}", base);
    if let Some(first) = chains.next() {
        for feature in first {
            let _ = write!(out, "\n    |> {}", feature_call(feature));
        }
    }
    out.push('\n');
    for chain in chains {
        out.push_str("part = part");
        for feature in chain {
            let _ = write!(out, "\n    |> {}", feature_call(feature));
        }
        out.push('\n');
    }

    for (n, dome) in domes.iter().enumerate() {
        let name = format!("dome_{}", n + 1);
        let radius = dome.dim(keys::RADIUS).unwrap_or(MIN_DIMENSION);
        let [x, y] = dome.position();
        // Sphere center sits inside the face so the union overlaps the base.
        let (z0, zc) = if dome.face.is_top() {
            let z0 = top - MIN_CLEARANCE;
            (z0, z0 + (radius + MIN_CLEARANCE) / 2.0)
        } else {
            let z0 = bottom + MIN_CLEARANCE;
            (z0, z0 - (radius + MIN_CLEARANCE) / 2.0)
        };
        let span = 2.0 * radius + 2.0 * MIN_CLEARANCE;
        let _ = writeln!(
            out,
            "{name} = sphere({r}, {x}, {y}, {z0})\n    |> intersect(block({w}, {w}, {h}, {x}, {y}, {zc}))",
            name = name,
            r = size(radius),
            x = num(x),
            y = num(y),
            z0 = num(z0),
            w = size(span),
            h = size(radius + MIN_CLEARANCE),
            zc = num(zc),
        );
        let _ = writeln!(out, "part = union(part, {})", name);
    }

    out.push_str("assembly = part\n");
    out
}

fn base_profile(sketch: &Sketch) -> String {
    match *sketch {
        Sketch::Square { size: side } => format!("rect({}, {})", size(side), size(side)),
        Sketch::Rectangle { width, height } => format!("rect({}, {})", size(width), size(height)),
        Sketch::Circle { radius } => format!("circle({})", size(radius)),
    }
}

fn feature_profile(feature: &Feature) -> String {
    let dim = |key: &str| feature.dim(key).unwrap_or(MIN_DIMENSION);
    match feature.shape {
        FeatureShape::Circle | FeatureShape::Dome => format!("circle({})", size(dim(keys::RADIUS))),
        FeatureShape::Rectangle => format!(
            "rect({}, {})",
            size(dim(keys::WIDTH)),
            size(dim(keys::LENGTH))
        ),
        FeatureShape::Square => {
            let side = size(dim(keys::SIZE));
            format!("rect({}, {})", side, side)
        }
        FeatureShape::Semicircle => {
            let r = num(dim(keys::RADIUS).max(MIN_DIMENSION));
            format!(
                "path(start(-{r}, 0), three_point_arc(0, {r}, {r}, 0), line_to(-{r}, 0), close())",
                r = r
            )
        }
    }
}

fn feature_call(feature: &Feature) -> String {
    let [x, y] = feature.position();
    let face = feature.face.selector();
    let profile = feature_profile(feature);
    match feature.kind {
        FeatureKind::Hole => format!("hole(\"{}\", {}, {}, {})", face, profile, num(x), num(y)),
        FeatureKind::Cut => format!(
            "cut(\"{}\", {}, {}, {}, {})",
            face,
            profile,
            size(feature.dim(keys::DEPTH).unwrap_or(MIN_DIMENSION)),
            num(x),
            num(y)
        ),
        FeatureKind::Boss => format!(
            "boss(\"{}\", {}, {}, {}, {})",
            face,
            profile,
            size(feature.dim(keys::HEIGHT).unwrap_or(MIN_DIMENSION)),
            num(x),
            num(y)
        ),
    }
}

fn num(value: f64) -> String {
    let rounded = (value * 1e6).round() / 1e6;
    if rounded == 0.0 {
        "0".to_string()
    } else {
        format!("{}", rounded)
    }
}

fn size(value: f64) -> String {
    format!("max({}, {})", MIN_DIMENSION, num(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadplan_core::{ExportFormat, Extrude, Face, Rule};

    fn plate(features: Vec<Feature>) -> Plan {
        Plan {
            sketch: Sketch::Square { size: 60.0 },
            extrude: Extrude::new(5.0),
            features,
            export_format: ExportFormat::Stl,
        }
    }

    fn hole(x: f64) -> Feature {
        Feature::new(FeatureKind::Hole, FeatureShape::Circle)
            .with(keys::RADIUS, 2.0)
            .with(keys::POS_X, x)
            .with(keys::POS_Y, 0.0)
    }

    #[test]
    fn test_lowers_center_hole() {
        let compiled = compile_direct(&plate(vec![hole(0.0)])).unwrap();
        assert_eq!(
            compiled.source,
            "thickness = max(0.1, 5)\n\
             part = extrude(rect(max(0.1, 60), max(0.1, 60)), thickness)\n    \
             |> hole(\">Z\", circle(max(0.1, 2)), 0, 0)\n\
             assembly = part\n"
        );
        assert_eq!(compiled.result_name, "assembly");
    }

    #[test]
    fn test_long_feature_lists_are_staged() {
        let holes = (0..7).map(|i| hole(-18.0 + 6.0 * i as f64)).collect();
        let compiled = compile_direct(&plate(holes)).unwrap();
        let statements: Vec<&str> = compiled
            .program
            .statements
            .iter()
            .map(|s| s.target.as_str())
            .collect();
        assert_eq!(statements, vec!["thickness", "part", "part", "assembly"]);
    }

    #[test]
    fn test_dome_is_trimmed_sphere_joined_by_union() {
        let dome = Feature::new(FeatureKind::Boss, FeatureShape::Dome)
            .with(keys::RADIUS, 8.0)
            .with(keys::POS_X, 0.0)
            .with(keys::POS_Y, 0.0);
        let compiled = compile_direct(&plate(vec![dome, hole(20.0)])).unwrap();
        assert!(compiled.source.contains("dome_1 = sphere(max(0.1, 8), 0, 0, 4.9)"));
        assert!(compiled.source.contains("part = union(part, dome_1)"));
        // The hole is applied before the union.
        let hole_at = compiled.source.find("hole(").unwrap();
        let union_at = compiled.source.find("union(").unwrap();
        assert!(hole_at < union_at);
    }

    #[test]
    fn test_semicircle_uses_three_point_arc() {
        let cut = Feature::new(FeatureKind::Cut, FeatureShape::Semicircle)
            .with(keys::RADIUS, 6.0)
            .with(keys::DEPTH, 2.0);
        let compiled = compile_direct(&plate(vec![cut])).unwrap();
        assert!(compiled.source.contains("three_point_arc(0, 6, 6, 0)"));
        assert!(compiled.source.contains("close()"));
    }

    #[test]
    fn test_downward_extrusion_and_bottom_face() {
        let mut plan = plate(vec![hole(0.0)]);
        plan.extrude.direction = ExtrudeDirection::Down;
        plan.features[0].face = Face::Bottom;
        let compiled = compile_direct(&plan).unwrap();
        assert!(compiled.source.contains("translate("));
        assert!(compiled.source.contains("hole(\"<Z\""));
    }

    #[test]
    fn test_accept_program_rejects_forbidden_arc() {
        let err = accept_program(
            "part = extrude(rect(20, 20), 4) |> cut(\">Z\", path(start(0, 0), radius_arc(5, 5, 3), close()), 1, 0, 0)\nassembly = part",
        )
        .unwrap_err();
        assert_eq!(err.rule(), Some(Rule::ThreePointArcOnly));
    }
}
