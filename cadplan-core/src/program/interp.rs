use std::collections::HashMap;

use thiserror::Error;

use super::{BinaryOp, Expr, Profile, Program, ProgramError, Segment, RESULT_NAMES};
use crate::geometry::{Face, MIN_DIMENSION};
use crate::grammar::{Rule, Violation};

/// How a feature operation changes the solid it is applied to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pattern {
    Through,
    Depth(f64),
    Boss(f64),
}

/// A cut, hole or boss sketched on a face of a solid, offset from the face center.
#[derive(Debug, Clone)]
pub struct FeatureOp<'a> {
    pub pattern: Pattern,
    pub face: Face,
    pub profile: &'a Profile,
    pub at: [f64; 2],
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Violation(#[from] Violation),

    #[error("{0}")]
    Failed(String),
}

/// Geometry semantics plugged into the interpreter.
///
/// The interpreter owns names, typing and the syntactic grammar rules; a
/// backend decides what each geometry operation produces.
pub trait Backend {
    type Solid: Clone;

    fn extrude(&mut self, profile: &Profile, height: f64) -> Result<Self::Solid, BackendError>;

    fn feature(
        &mut self,
        target: &Self::Solid,
        op: &FeatureOp<'_>,
    ) -> Result<Self::Solid, BackendError>;

    fn sphere(&mut self, radius: f64, center: [f64; 3]) -> Result<Self::Solid, BackendError>;

    fn block(&mut self, size: [f64; 3], center: [f64; 3]) -> Result<Self::Solid, BackendError>;

    fn union(&mut self, a: &Self::Solid, b: &Self::Solid) -> Result<Self::Solid, BackendError>;

    fn intersect(&mut self, a: &Self::Solid, b: &Self::Solid)
        -> Result<Self::Solid, BackendError>;

    fn translate(
        &mut self,
        solid: &Self::Solid,
        offset: [f64; 3],
    ) -> Result<Self::Solid, BackendError>;

    /// Called whenever a bound solid is read back by name.
    fn recall(&mut self, solid: &Self::Solid) -> Self::Solid {
        solid.clone()
    }
}

#[derive(Debug, Clone)]
pub enum Value<S> {
    Number(f64),
    Text(String),
    Segment(Segment),
    Profile(Profile),
    Solid(S),
}

impl<S> Value<S> {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Text(_) => "string",
            Value::Segment(_) => "path segment",
            Value::Profile(_) => "profile",
            Value::Solid(_) => "solid",
        }
    }
}

/// Outcome of running a program: the solid bound to the preferred result name.
#[derive(Debug, Clone)]
pub struct Evaluation<S> {
    pub result_name: String,
    pub result: S,
}

/// Runs `program` against `backend`.
pub fn evaluate<B: Backend>(
    program: &Program,
    backend: &mut B,
) -> Result<Evaluation<B::Solid>, ProgramError> {
    let mut interp = Interpreter {
        backend,
        env: HashMap::new(),
        extrudes: 0,
        line: 0,
    };

    for statement in &program.statements {
        interp.line = statement.line;
        let value = interp.eval(&statement.expr)?;
        match value {
            Value::Profile(_) | Value::Segment(_) => {
                return Err(interp.violation(Violation::new(
                    Rule::InlineSketch,
                    format!(
                        "`{}` binds a {}; pass it directly to the operation that consumes it",
                        statement.target,
                        value.type_name()
                    ),
                )));
            }
            Value::Text(_) => {
                return Err(interp.semantic(format!(
                    "`{}` binds a string; strings are only used as face selectors",
                    statement.target
                )));
            }
            Value::Number(_) | Value::Solid(_) => {}
        }
        interp.env.insert(statement.target.clone(), value);
    }

    if interp.extrudes == 0 {
        return Err(interp.violation(Violation::new(
            Rule::SingleBaseSolid,
            "a program extrudes exactly one base solid; none was extruded",
        )));
    }

    for name in RESULT_NAMES {
        match interp.env.remove(name) {
            Some(Value::Solid(result)) => {
                return Ok(Evaluation {
                    result_name: name.to_string(),
                    result,
                })
            }
            Some(other) => {
                return Err(ProgramError::MissingResult(format!(
                    "`{}` holds a {}",
                    name,
                    other.type_name()
                )))
            }
            None => {}
        }
    }
    Err(ProgramError::MissingResult(String::new()))
}

fn forbidden(name: &str) -> Option<(Rule, &'static str)> {
    match name {
        "radius_arc" | "sagitta_arc" | "tangent_arc" | "arc" => Some((
            Rule::ThreePointArcOnly,
            "use three_point_arc followed by an explicit closing segment",
        )),
        "split" | "revolve" | "hemisphere" => Some((
            Rule::DomeConstruction,
            "build domes as sphere(...) |> intersect(block(...))",
        )),
        "subtract" | "difference" | "cut_solid" => Some((
            Rule::FeaturePattern,
            "remove material with hole or cut on a face of the solid",
        )),
        _ => None,
    }
}

struct Interpreter<'b, B: Backend> {
    backend: &'b mut B,
    env: HashMap<String, Value<B::Solid>>,
    extrudes: usize,
    line: usize,
}

impl<'b, B: Backend> Interpreter<'b, B> {
    fn eval(&mut self, expr: &Expr) -> Result<Value<B::Solid>, ProgramError> {
        match expr {
            Expr::Number(value) => Ok(Value::Number(*value)),
            Expr::Str(text) => Ok(Value::Text(text.clone())),
            Expr::Variable(name) => match self.env.get(name) {
                Some(Value::Solid(solid)) => {
                    let solid = solid.clone();
                    Ok(Value::Solid(self.backend.recall(&solid)))
                }
                Some(value) => Ok(value.clone()),
                None => Err(self.semantic(format!("unknown name `{}`", name))),
            },
            Expr::Neg(inner) => {
                let value = self.eval(inner)?;
                Ok(Value::Number(-self.number(&value, "negation")?))
            }
            Expr::Binary { lhs, op, rhs } => {
                let lhs = self.eval(lhs)?;
                let lhs = self.number(&lhs, "arithmetic")?;
                let rhs = self.eval(rhs)?;
                let rhs = self.number(&rhs, "arithmetic")?;
                let value = match op {
                    BinaryOp::Add => lhs + rhs,
                    BinaryOp::Sub => lhs - rhs,
                    BinaryOp::Mul => lhs * rhs,
                    BinaryOp::Div => {
                        if rhs == 0.0 {
                            return Err(self.semantic("division by zero"));
                        }
                        lhs / rhs
                    }
                };
                Ok(Value::Number(value))
            }
            Expr::Call { name, args, .. } => self.call(name, args),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> Result<Value<B::Solid>, ProgramError> {
        if let Some((rule, hint)) = forbidden(name) {
            return Err(self.violation(Violation::new(
                rule,
                format!("`{}` is not allowed; {}", name, hint),
            )));
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        let v = &values[..];

        match name {
            "max" | "min" => {
                self.arity(name, v, 2)?;
                let a = self.number(&v[0], name)?;
                let b = self.number(&v[1], name)?;
                Ok(Value::Number(if name == "max" { a.max(b) } else { a.min(b) }))
            }
            "rect" => {
                self.arity(name, v, 2)?;
                Ok(Value::Profile(Profile::Rect {
                    width: self.size(&v[0], name, "width")?,
                    height: self.size(&v[1], name, "height")?,
                }))
            }
            "circle" => {
                self.arity(name, v, 1)?;
                Ok(Value::Profile(Profile::Circle {
                    radius: self.size(&v[0], name, "radius")?,
                }))
            }
            "start" | "line_to" => {
                self.arity(name, v, 2)?;
                let p = [self.number(&v[0], name)?, self.number(&v[1], name)?];
                Ok(Value::Segment(if name == "start" {
                    Segment::Start(p)
                } else {
                    Segment::LineTo(p)
                }))
            }
            "three_point_arc" => {
                self.arity(name, v, 4)?;
                Ok(Value::Segment(Segment::ThreePointArc {
                    mid: [self.number(&v[0], name)?, self.number(&v[1], name)?],
                    end: [self.number(&v[2], name)?, self.number(&v[3], name)?],
                }))
            }
            "close" => {
                self.arity(name, v, 0)?;
                Ok(Value::Segment(Segment::Close))
            }
            "path" => {
                let mut segments = Vec::with_capacity(v.len());
                for value in v {
                    match value {
                        Value::Segment(segment) => segments.push(*segment),
                        other => {
                            return Err(self.semantic(format!(
                                "`path` takes path segments, found a {}",
                                other.type_name()
                            )))
                        }
                    }
                }
                Profile::path(segments)
                    .map(Value::Profile)
                    .map_err(|violation| self.violation(violation))
            }
            "extrude" => {
                self.arity(name, v, 2)?;
                let profile = self.profile(&v[0], name)?;
                if matches!(profile, Profile::Path(_)) {
                    return Err(self.violation(Violation::new(
                        Rule::BaseKind,
                        "the base solid is extruded from rect(...) or circle(...)",
                    )));
                }
                let height = self.size(&v[1], name, "height")?;
                self.extrudes += 1;
                if self.extrudes > 1 {
                    return Err(self.violation(Violation::new(
                        Rule::SingleBaseSolid,
                        "a program extrudes exactly one base solid",
                    )));
                }
                let solid = self.backend.extrude(profile, height);
                self.solid_result(solid)
            }
            "hole" | "cut" | "boss" => {
                let expected = if name == "hole" { 5 } else { 6 };
                self.arity(name, v, expected)?;
                let target = self.target(&v[0], name)?;
                let face = self.face(&v[1])?;
                let profile = self.profile(&v[2], name)?;
                let pattern = match name {
                    "hole" => Pattern::Through,
                    "cut" => Pattern::Depth(self.size(&v[3], name, "depth")?),
                    _ => Pattern::Boss(self.size(&v[3], name, "height")?),
                };
                let at = [
                    self.number(&v[expected - 2], name)?,
                    self.number(&v[expected - 1], name)?,
                ];
                let op = FeatureOp {
                    pattern,
                    face,
                    profile,
                    at,
                };
                let solid = self.backend.feature(target, &op);
                self.solid_result(solid)
            }
            "sphere" => {
                self.arity(name, v, 4)?;
                let radius = self.size(&v[0], name, "radius")?;
                let center = self.point(&v[1..4], name)?;
                let solid = self.backend.sphere(radius, center);
                self.solid_result(solid)
            }
            "block" => {
                self.arity(name, v, 6)?;
                let size = [
                    self.size(&v[0], name, "width")?,
                    self.size(&v[1], name, "depth")?,
                    self.size(&v[2], name, "height")?,
                ];
                let center = self.point(&v[3..6], name)?;
                let solid = self.backend.block(size, center);
                self.solid_result(solid)
            }
            "union" | "intersect" => {
                self.arity(name, v, 2)?;
                let a = self.solid(&v[0], name)?;
                let b = self.solid(&v[1], name)?;
                let solid = if name == "union" {
                    self.backend.union(a, b)
                } else {
                    self.backend.intersect(a, b)
                };
                self.solid_result(solid)
            }
            "translate" => {
                self.arity(name, v, 4)?;
                let solid = self.solid(&v[0], name)?;
                let offset = self.point(&v[1..4], name)?;
                let moved = self.backend.translate(solid, offset);
                self.solid_result(moved)
            }
            _ => Err(self.semantic(format!("unknown operation `{}`", name))),
        }
    }

    fn solid_result(
        &self,
        result: Result<B::Solid, BackendError>,
    ) -> Result<Value<B::Solid>, ProgramError> {
        match result {
            Ok(solid) => Ok(Value::Solid(solid)),
            Err(BackendError::Violation(violation)) => Err(self.violation(violation)),
            Err(BackendError::Failed(message)) => Err(ProgramError::Backend {
                message,
                line: self.line,
            }),
        }
    }

    fn arity(&self, name: &str, values: &[Value<B::Solid>], expected: usize) -> Result<(), ProgramError> {
        if values.len() == expected {
            Ok(())
        } else {
            Err(self.semantic(format!(
                "`{}` takes {} argument(s), got {}",
                name,
                expected,
                values.len()
            )))
        }
    }

    fn number(&self, value: &Value<B::Solid>, context: &str) -> Result<f64, ProgramError> {
        match value {
            Value::Number(n) if n.is_finite() => Ok(*n),
            Value::Number(_) => Err(self.semantic(format!("non-finite number in {}", context))),
            other => Err(self.semantic(format!(
                "{} expects a number, found a {}",
                context,
                other.type_name()
            ))),
        }
    }

    fn size(&self, value: &Value<B::Solid>, op: &str, what: &str) -> Result<f64, ProgramError> {
        let size = self.number(value, op)?;
        if size < MIN_DIMENSION {
            return Err(self.violation(Violation::new(
                Rule::DimensionFloor,
                format!(
                    "`{}` {} is {}, minimum is {}",
                    op, what, size, MIN_DIMENSION
                ),
            )));
        }
        Ok(size)
    }

    fn point(&self, values: &[Value<B::Solid>], op: &str) -> Result<[f64; 3], ProgramError> {
        Ok([
            self.number(&values[0], op)?,
            self.number(&values[1], op)?,
            self.number(&values[2], op)?,
        ])
    }

    fn profile<'v>(&self, value: &'v Value<B::Solid>, op: &str) -> Result<&'v Profile, ProgramError> {
        match value {
            Value::Profile(profile) => Ok(profile),
            other => Err(self.semantic(format!(
                "`{}` expects a profile, found a {}",
                op,
                other.type_name()
            ))),
        }
    }

    fn solid<'v>(&self, value: &'v Value<B::Solid>, op: &str) -> Result<&'v B::Solid, ProgramError> {
        match value {
            Value::Solid(solid) => Ok(solid),
            other => Err(self.semantic(format!(
                "`{}` expects a solid, found a {}",
                op,
                other.type_name()
            ))),
        }
    }

    /// Like `solid`, but a bare profile is a grammar violation.
    fn target<'v>(&self, value: &'v Value<B::Solid>, op: &str) -> Result<&'v B::Solid, ProgramError> {
        if let Value::Profile(profile) = value {
            return Err(self.violation(Violation::new(
                Rule::FeatureOnSolid,
                format!(
                    "`{}` applied to a bare {} profile; apply it to a face of the extruded solid",
                    op,
                    profile.kind_name()
                ),
            )));
        }
        self.solid(value, op)
    }

    fn face(&self, value: &Value<B::Solid>) -> Result<Face, ProgramError> {
        match value {
            Value::Text(selector) => Face::from_selector(selector).ok_or_else(|| {
                self.violation(Violation::new(
                    Rule::PlanarFaceOnly,
                    format!(
                        "face `{}` is not a planar face along the extrusion axis; use \">Z\" or \"<Z\"",
                        selector
                    ),
                ))
            }),
            other => Err(self.semantic(format!(
                "face selector must be a string, found a {}",
                other.type_name()
            ))),
        }
    }

    fn semantic(&self, message: impl Into<String>) -> ProgramError {
        ProgramError::Semantic {
            message: message.into(),
            line: self.line,
        }
    }

    fn violation(&self, violation: Violation) -> ProgramError {
        ProgramError::Rule {
            violation,
            line: self.line,
        }
    }
}
