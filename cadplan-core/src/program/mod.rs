//! The cadplan program language.
//!
//! A program is a list of `name = expression` statements over a fixed set of
//! geometry operations. Feature operations are usually written as pipe chains:
//!
//! ```text
//! part = extrude(rect(50, 50), 5)
//!     |> hole(">Z", circle(max(0.1, 5)), 0, 0)
//! assembly = part
//! ```
//!
//! `a |> f(b)` is sugar for `f(a, b)`. The language has no I/O of any kind;
//! the only effects are the geometry operations of a [`Backend`].

use std::fmt;

use thiserror::Error;

use crate::geometry::{flatten_arc, polygon_area, Footprint};
use crate::grammar::{Rule, Violation};

mod check;
mod interp;
mod lexer;
mod parser;

pub use check::{check, SolidShape, StaticChecker};
pub use interp::{evaluate, Backend, BackendError, Evaluation, FeatureOp, Pattern, Value};
pub use parser::parse;

/// Names the executor accepts as the final result, in order of preference.
pub const RESULT_NAMES: [&str; 2] = ["assembly", "solid"];

/// Segments used when a full circle profile is flattened.
pub const CIRCLE_SEGMENTS: usize = 48;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProgramError {
    #[error("{message} at line {line}, column {column}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("line {line}: {message}")]
    Semantic { message: String, line: usize },

    #[error("line {line}: {violation}")]
    Rule { violation: Violation, line: usize },

    #[error("line {line}: geometry operation failed: {message}")]
    Backend { message: String, line: usize },

    #[error("no solid bound to `assembly` or `solid`{}", detail_suffix(.0))]
    MissingResult(String),
}

fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(" ({})", detail)
    }
}

impl ProgramError {
    /// The grammar rule behind this error, when it is a structural violation.
    pub fn rule(&self) -> Option<Rule> {
        match self {
            ProgramError::Rule { violation, .. } => Some(violation.rule),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Variable(String),
    Neg(Box<Expr>),
    Binary {
        lhs: Box<Expr>,
        op: BinaryOp,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        /// Written as `args[0] |> name(rest)`.
        piped: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub target: String,
    pub expr: Expr,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn to_source(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            writeln!(f, "{} = {}", statement.target, statement.expr)?;
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(value) => write_number(f, *value),
            Expr::Str(text) => write!(f, "\"{}\"", text),
            Expr::Variable(name) => f.write_str(name),
            Expr::Neg(expr) => write!(f, "(-{})", expr),
            Expr::Binary { lhs, op, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            Expr::Call { name, args, piped } => {
                let rest = if *piped && !args.is_empty() {
                    write!(f, "{}\n    |> ", args[0])?;
                    &args[1..]
                } else {
                    &args[..]
                };
                write!(f, "{}(", name)?;
                for (index, arg) in rest.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
        }
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        write!(f, "{}", value as i64)
    } else {
        write!(f, "{}", value)
    }
}

/// One step of a path profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment {
    Start([f64; 2]),
    LineTo([f64; 2]),
    ThreePointArc { mid: [f64; 2], end: [f64; 2] },
    Close,
}

/// A closed planar profile, always consumed inline by the operation using it.
#[derive(Debug, Clone, PartialEq)]
pub enum Profile {
    Rect { width: f64, height: f64 },
    Circle { radius: f64 },
    Path(Vec<Segment>),
}

impl Profile {
    /// Builds a path profile, enforcing the start/close structure.
    pub fn path(segments: Vec<Segment>) -> Result<Self, Violation> {
        if !matches!(segments.first(), Some(Segment::Start(_))) {
            return Err(Violation::new(
                Rule::ClosedProfile,
                "a path must begin with start(x, y)",
            ));
        }
        if segments.last() != Some(&Segment::Close) {
            return Err(Violation::new(
                Rule::ClosedProfile,
                "a path must finish with close()",
            ));
        }
        let inner = &segments[1..segments.len() - 1];
        if inner
            .iter()
            .any(|s| matches!(s, Segment::Start(_) | Segment::Close))
        {
            return Err(Violation::new(
                Rule::ClosedProfile,
                "start() and close() may only open and finish a path",
            ));
        }
        let profile = Profile::Path(segments);
        if polygon_area(&profile.outline()).abs() < 1e-9 {
            return Err(Violation::new(
                Rule::ClosedProfile,
                "path encloses no area",
            ));
        }
        Ok(profile)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Profile::Rect { .. } => "rect",
            Profile::Circle { .. } => "circle",
            Profile::Path(_) => "path",
        }
    }

    /// Closed outline as points, without repeating the first point.
    pub fn outline(&self) -> Vec<[f64; 2]> {
        match self {
            Profile::Rect { width, height } => {
                let (x, y) = (width / 2.0, height / 2.0);
                vec![[-x, -y], [x, -y], [x, y], [-x, y]]
            }
            Profile::Circle { radius } => (0..CIRCLE_SEGMENTS)
                .map(|i| {
                    let t = std::f64::consts::TAU * i as f64 / CIRCLE_SEGMENTS as f64;
                    [radius * t.cos(), radius * t.sin()]
                })
                .collect(),
            Profile::Path(segments) => {
                let mut points: Vec<[f64; 2]> = Vec::new();
                for segment in segments {
                    match *segment {
                        Segment::Start(p) | Segment::LineTo(p) => points.push(p),
                        Segment::ThreePointArc { mid, end } => {
                            let start = points.last().copied().unwrap_or([0.0, 0.0]);
                            points.extend(flatten_arc(start, mid, end));
                        }
                        Segment::Close => {}
                    }
                }
                if points.len() > 1 && points.first() == points.last() {
                    points.pop();
                }
                points
            }
        }
    }

    pub fn footprint(&self) -> Footprint {
        match *self {
            Profile::Rect { width, height } => Footprint::Rect {
                width,
                length: height,
            },
            Profile::Circle { radius } => Footprint::Circle { radius },
            Profile::Path(_) => Footprint::Polygon {
                points: self.outline(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printer_output_parses_back() {
        let source = "part = extrude(rect(50, 50), 5) |> hole(\">Z\", circle(max(0.1, 2.5)), -3, 0)\nassembly = part\n";
        let program = parse(source).unwrap();
        let printed = program.to_source();
        assert!(printed.contains("|> hole(\">Z\""));
        assert_eq!(parse(&printed).unwrap().to_source(), printed);
    }

    #[test]
    fn test_semicircle_path_has_area() {
        let profile = Profile::path(vec![
            Segment::Start([-5.0, 0.0]),
            Segment::ThreePointArc {
                mid: [0.0, 5.0],
                end: [5.0, 0.0],
            },
            Segment::LineTo([-5.0, 0.0]),
            Segment::Close,
        ])
        .unwrap();
        let area = polygon_area(&profile.outline()).abs();
        let half_disc = std::f64::consts::PI * 25.0 / 2.0;
        assert!((area - half_disc).abs() / half_disc < 0.02);
    }

    #[test]
    fn test_open_path_is_rejected() {
        let err = Profile::path(vec![
            Segment::Start([0.0, 0.0]),
            Segment::LineTo([1.0, 0.0]),
            Segment::LineTo([1.0, 1.0]),
        ])
        .unwrap_err();
        assert_eq!(err.rule, Rule::ClosedProfile);
    }
}
