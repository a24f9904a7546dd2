use cadplan_core::program::{check, parse, ProgramError};
use cadplan_core::Rule;
use speculate2::speculate;

fn checked(source: &str) -> Result<String, ProgramError> {
    check(&parse(source)?)
}

fn rule_of(source: &str) -> Option<Rule> {
    checked(source).expect_err("program should be rejected").rule()
}

const PLATE: &str = r#"
# square plate with a center hole
base_size = max(0.1, 50)
part = extrude(rect(base_size, base_size), max(0.1, 5))
    |> hole(">Z", circle(max(0.1, 5)), 0, 0)
assembly = part
"#;

speculate! {
    describe "accepted programs" {
        it "binds the plate to assembly" {
            assert_eq!(checked(PLATE).expect("plate should check"), "assembly");
        }

        it "falls back to the solid binding" {
            assert_eq!(checked("solid = extrude(circle(10), 4)").expect("should check"), "solid");
        }

        it "prefers assembly when both are bound" {
            let source = "solid = extrude(circle(10), 4)\nassembly = solid |> translate(0, 0, 1)";
            assert_eq!(checked(source).expect("should check"), "assembly");
        }

        it "accepts a trimmed dome joined by union" {
            let source = r#"
part = extrude(rect(60, 40), 6)
    |> cut(">Z", path(start(-5, 0), three_point_arc(0, 5, 5, 0), line_to(-5, 0), close()), 2, 10, 0)
dome = sphere(8, -10, 0, 5.9)
    |> intersect(block(16.2, 16.2, 8.1, -10, 0, 5.9 + 8.1 / 2))
assembly = union(part, dome)
"#;
            checked(source).expect("dome program should check");
        }

        it "allows more than five features on a face across statements" {
            let source = r#"
part = extrude(rect(60, 60), 5)
    |> hole(">Z", circle(1), -20, 0)
    |> hole(">Z", circle(1), -10, 0)
    |> hole(">Z", circle(1), 0, 0)
    |> hole(">Z", circle(1), 10, 0)
    |> hole(">Z", circle(1), 20, 0)
part = part
    |> hole(">Z", circle(1), 0, 10)
assembly = part
"#;
            checked(source).expect("staged program should check");
        }
    }

    describe "rejected programs" {
        it "rejects single-parameter arcs" {
            let source = r#"part = extrude(rect(50, 50), 5) |> cut(">Z", path(start(0, 0), radius_arc(4, 0, 2), close()), 1, 0, 0)
assembly = part"#;
            assert_eq!(rule_of(source), Some(Rule::ThreePointArcOnly));
        }

        it "rejects split domes" {
            assert_eq!(rule_of("dome = sphere(5, 0, 0, 0) |> split(\">Z\")"), Some(Rule::DomeConstruction));
        }

        it "rejects subtracting separate solids" {
            let source = "a = extrude(rect(10, 10), 2)\nassembly = subtract(a, sphere(1, 0, 0, 0))";
            assert_eq!(rule_of(source), Some(Rule::FeaturePattern));
        }

        it "rejects named profiles" {
            assert_eq!(rule_of("outline = rect(10, 10)"), Some(Rule::InlineSketch));
        }

        it "rejects features on a bare sketch" {
            let source = "assembly = rect(50, 50) |> hole(\">Z\", circle(2), 0, 0)";
            assert_eq!(rule_of(source), Some(Rule::FeatureOnSolid));
        }

        it "rejects side faces" {
            let source = "assembly = extrude(rect(50, 50), 5) |> hole(\">X\", circle(2), 0, 0)";
            assert_eq!(rule_of(source), Some(Rule::PlanarFaceOnly));
        }

        it "rejects features on curved solids" {
            let source = "ball = sphere(5, 0, 0, 0)\nassembly = ball |> hole(\">Z\", circle(1), 0, 0)";
            assert_eq!(rule_of(source), Some(Rule::PlanarFaceOnly));
        }

        it "rejects six features on one face in one chain" {
            let source = r#"
assembly = extrude(rect(60, 60), 5)
    |> hole(">Z", circle(1), -20, 0)
    |> hole(">Z", circle(1), -10, 0)
    |> hole(">Z", circle(1), 0, 0)
    |> hole(">Z", circle(1), 10, 0)
    |> hole(">Z", circle(1), 20, 0)
    |> hole(">Z", circle(1), 0, 10)
"#;
            assert_eq!(rule_of(source), Some(Rule::FaceOverload));
        }

        it "rejects a second base solid" {
            let source = "a = extrude(rect(10, 10), 2)\nb = extrude(circle(3), 2)\nassembly = union(a, b)";
            assert_eq!(rule_of(source), Some(Rule::SingleBaseSolid));
        }

        it "rejects a program without a base extrusion" {
            assert_eq!(rule_of("assembly = sphere(5, 0, 0, 0)"), Some(Rule::SingleBaseSolid));
            assert_eq!(rule_of("assembly = block(10, 10, 10, 0, 0, 0)"), Some(Rule::SingleBaseSolid));
        }

        it "rejects a block standing in for the base" {
            let source = "part = block(50, 50, 5, 0, 0, 2.5) |> hole(\">Z\", circle(5), 0, 0)\nassembly = part";
            assert_eq!(rule_of(source), Some(Rule::SingleBaseSolid));
        }

        it "rejects a path as the base profile" {
            let source = "assembly = extrude(path(start(0, 0), line_to(4, 0), line_to(0, 4), close()), 2)";
            assert_eq!(rule_of(source), Some(Rule::BaseKind));
        }

        it "rejects open paths" {
            let source = "assembly = extrude(rect(50, 50), 5) |> cut(\">Z\", path(start(0, 0), line_to(5, 0), line_to(5, 5)), 1, 0, 0)";
            assert_eq!(rule_of(source), Some(Rule::ClosedProfile));
        }

        it "rejects a hole of exactly half the face" {
            let source = "assembly = extrude(rect(50, 50), 5) |> hole(\">Z\", circle(25), 0, 0)";
            assert_eq!(rule_of(source), Some(Rule::HalfSize));
            checked(&source.replace("circle(25)", "circle(24)")).expect("just under half should check");
        }

        it "rejects a cut through the whole base" {
            let source = "assembly = extrude(rect(50, 50), 5) |> cut(\">Z\", circle(4), 5, 0, 0)";
            assert_eq!(rule_of(source), Some(Rule::CutDepth));
        }

        it "rejects sizes under the floor" {
            assert_eq!(rule_of("assembly = extrude(rect(0.05, 10), 2)"), Some(Rule::DimensionFloor));
        }

        it "reports a missing result without a rule" {
            let err = checked("part = extrude(rect(10, 10), 2)").unwrap_err();
            assert!(matches!(err, ProgramError::MissingResult(_)));
            assert_eq!(err.rule(), None);
        }

        it "reports unknown operations" {
            let err = checked("assembly = extrude(rect(10, 10), 2) |> fillet(1)").unwrap_err();
            assert!(matches!(err, ProgramError::Semantic { line: 1, .. }));
        }

        it "rejects markdown fencing as a syntax error" {
            let err = checked("```\nassembly = extrude(rect(10, 10), 2)\n```").unwrap_err();
            assert!(matches!(err, ProgramError::Syntax { line: 1, column: 1, .. }));
        }
    }
}
