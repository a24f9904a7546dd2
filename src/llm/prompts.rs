//! Instruction contexts for the three model-backed stages.
//!
//! Each context is fixed for a given stage: the rule list and the plan schema
//! are generated from the same definitions the validators use, so the model
//! is told exactly what will be checked.

use cadplan_core::grammar::rules_text;
use cadplan_core::plan::keys;
use cadplan_core::{ExportFormat, Extrude, Feature, FeatureKind, FeatureShape, Plan, Sketch};
use serde_json::json;

use crate::compiler;
use crate::error::CadError;

const TRANSLATE_PREAMBLE: &str = "\
You turn a short description of a mechanical part into a design plan.

The part is always one base sketch extruded into a plate, followed by an
ordered list of features applied to its top (\">Z\") or bottom (\"<Z\") face.
Features are built in list order.

Units are millimetres. Every dimension must be explicit in the plan:
- base thickness defaults to 5 when not stated
- a cut depth defaults to 60% of the thickness; a boss height to 50%
- a hole radius defaults to 7.5% of the smallest face dimension
- features sit at the face center (pos_x = 0, pos_y = 0) unless placed
- pos_x and pos_y are offsets from the face center and may be negative
- a diameter in the request becomes a radius of half that value

When the request is vague or ambiguous, choose the most practical CAD
interpretation. Prefer a stable, manufacturable part over literal reading of
unclear wording. Never invent features the request does not ask for.";

const EDIT_PREAMBLE: &str = "\
You modify an existing design plan according to a change request.

Identify the element the request is about by its type, shape, placement and
key dimensions. The targets already resolved for this request are listed in
the input; change those and nothing else.

- If the request changes a feature's shape, replace that feature with one of
  the new shape at the same placement.
- If the request changes a size or a position, change only those values.
- Keep every other feature, key and value exactly as it is, in the same order.
- New features go at the end of the feature list.
- If the requested change would break a rule below, make the smallest
  adjustment that keeps the plan valid.

Units are millimetres.";

const COMPILE_PREAMBLE: &str = "\
You translate a design plan into a cadplan program.

A program is a list of `name = expression` statements. The language has
these operations and nothing else:
- rect(width, height), circle(radius): closed profiles centered on the origin
- path(start(x, y), line_to(x, y), three_point_arc(mx, my, x, y), ..., close())
- extrude(profile, height): the base solid, from z = 0 upward
- hole(solid, face, profile, x, y): through cut
- cut(solid, face, profile, depth, x, y): depth-limited cut
- boss(solid, face, profile, height, x, y): boss extrusion
- sphere(radius, x, y, z), block(width, depth, height, x, y, z)
- union(a, b), intersect(a, b), translate(solid, dx, dy, dz)
- max(a, b), min(a, b) and the arithmetic operators + - * /

`a |> f(b, c)` means `f(a, b, c)`. Faces are \">Z\" (top) and \"<Z\" (bottom);
x and y are offsets from the face center. Bind the finished part to
`assembly`.

Follow the plan exactly: sketch, then extrude, then every feature in order.
Emit every size as max(0.1, value).";

const RESPONSE_RULES_JSON: &str = "\
Respond with the JSON object only. No prose before or after it, no markdown
code fences, no comments. Unknown keys are rejected.";

const RESPONSE_RULES_PROGRAM: &str = "\
Respond with the program source only. No prose, no markdown code fences.";

/// Plan used for worked examples in the instructions.
pub fn example_plan() -> Plan {
    Plan {
        sketch: Sketch::Square { size: 50.0 },
        extrude: Extrude::new(5.0),
        features: vec![
            Feature::new(FeatureKind::Hole, FeatureShape::Circle)
                .with(keys::RADIUS, 5.0)
                .with(keys::POS_X, 0.0)
                .with(keys::POS_Y, 0.0),
            Feature::new(FeatureKind::Cut, FeatureShape::Rectangle)
                .with(keys::WIDTH, 10.0)
                .with(keys::LENGTH, 6.0)
                .with(keys::DEPTH, 2.0)
                .with(keys::POS_X, 15.0)
                .with(keys::POS_Y, -15.0),
        ],
        export_format: ExportFormat::Stl,
    }
}

pub fn translate_system(default_format: ExportFormat) -> String {
    format!(
        "{preamble}\n\nRules every plan must satisfy:\n{rules}\n\n\
         Use export_format \"{format}\" unless the request names another format.\n\n\
         Plan JSON schema:\n{schema}\n\n\
         Example for \"a 50 mm square plate with a 10 mm hole in the middle and a \
         small pocket near one corner\":\n{example}\n\n{response}",
        preamble = TRANSLATE_PREAMBLE,
        rules = rules_text(),
        format = default_format,
        schema = Plan::json_schema(),
        example = example_plan().to_json_pretty(),
        response = RESPONSE_RULES_JSON,
    )
}

pub fn edit_system() -> String {
    format!(
        "{}\n\nRules the updated plan must satisfy:\n{}\n\nPlan JSON schema:\n{}\n\n\
         Return the complete updated plan. {}",
        EDIT_PREAMBLE,
        rules_text(),
        Plan::json_schema(),
        RESPONSE_RULES_JSON,
    )
}

/// Input document for an edit: current plan, request and resolved targets.
pub fn edit_input(plan: &Plan, request: &str, targets: &[String]) -> String {
    let doc = json!({
        "plan": plan,
        "request": request,
        "targets": targets,
    });
    serde_json::to_string_pretty(&doc).unwrap_or_default()
}

pub fn compile_system() -> String {
    let plan = example_plan();
    let example = compiler::lower(&plan)
        .map(|program| program.to_source())
        .unwrap_or_default();
    format!(
        "{}\n\nRules the program must satisfy:\n{}\n\nExample plan:\n{}\n\nIts program:\n{}\n\n{}",
        COMPILE_PREAMBLE,
        rules_text(),
        plan.to_json_pretty(),
        example,
        RESPONSE_RULES_PROGRAM,
    )
}

/// Appends rejection feedback to an instruction context.
pub fn with_feedback(system: &str, feedback: &str) -> String {
    format!("{}\n\n{}", system, feedback)
}

/// Feedback naming what was wrong with the previous response.
pub fn rejection_feedback(err: &CadError) -> String {
    let mut feedback = format!("Your previous response was rejected: {}.", err);
    if let Some(rule) = err.rule() {
        feedback.push_str(&format!(
            "\nIt broke rule [{}]: {}",
            rule.id(),
            rule.statement()
        ));
    }
    feedback.push_str("\nCorrect that and respond again, following every instruction above.");
    feedback
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadplan_core::grammar::validate_plan;
    use cadplan_core::{Rule, Violation};

    #[test]
    fn test_example_plan_is_valid() {
        assert!(validate_plan(&example_plan()).is_ok());
    }

    #[test]
    fn test_compile_context_embeds_worked_program() {
        let system = compile_system();
        assert!(system.contains("assembly = part"));
        assert!(system.contains("[three-point-arc-only]"));
    }

    #[test]
    fn test_feedback_names_the_rule() {
        let err = CadError::GrammarViolation(Violation::new(Rule::HalfSize, "radius 30"));
        let feedback = rejection_feedback(&err);
        assert!(feedback.contains("[half-size]"));
        assert!(feedback.contains("radius 30"));
    }
}
