use super::interp::{evaluate, Backend, BackendError, FeatureOp, Pattern};
use super::{Profile, Program, ProgramError};
use crate::geometry::{check_footprint, FaceOutline, MAX_FEATURES_PER_CHAIN};
use crate::grammar::{Rule, Violation};

/// What the static checker knows about a solid without building it.
#[derive(Debug, Clone, PartialEq)]
pub struct SolidShape {
    /// Outline of the `>Z`/`<Z` faces, `None` when they are not provably planar.
    pub outline: Option<FaceOutline>,
    pub thickness: f64,
    /// Features placed on `[>Z, <Z]` since the solid was last read by name.
    chain: [usize; 2],
}

impl SolidShape {
    fn new(outline: Option<FaceOutline>, thickness: f64) -> Self {
        Self {
            outline,
            thickness,
            chain: [0, 0],
        }
    }
}

/// Backend that checks the structural grammar rules without a kernel.
#[derive(Debug, Default)]
pub struct StaticChecker;

impl Backend for StaticChecker {
    type Solid = SolidShape;

    fn extrude(&mut self, profile: &Profile, height: f64) -> Result<SolidShape, BackendError> {
        let outline = match *profile {
            Profile::Rect { width, height } => FaceOutline::Rect { width, height },
            Profile::Circle { radius } => FaceOutline::Circle { radius },
            Profile::Path(_) => {
                return Err(Violation::new(Rule::BaseKind, "base profile must be rect or circle").into())
            }
        };
        Ok(SolidShape::new(Some(outline), height))
    }

    fn feature(&mut self, target: &SolidShape, op: &FeatureOp<'_>) -> Result<SolidShape, BackendError> {
        let outline = target.outline.ok_or_else(|| {
            Violation::new(
                Rule::PlanarFaceOnly,
                format!(
                    "face {} of this solid is not provably planar; place features on the base before joining other solids",
                    op.face
                ),
            )
        })?;

        let mut next = target.clone();
        let slot = if op.face.is_top() { 0 } else { 1 };
        next.chain[slot] += 1;
        if next.chain[slot] > MAX_FEATURES_PER_CHAIN {
            return Err(Violation::new(
                Rule::FaceOverload,
                format!(
                    "more than {} features on face {} in one chain; bind the solid and continue in a new statement",
                    MAX_FEATURES_PER_CHAIN, op.face
                ),
            )
            .into());
        }

        check_footprint(&outline, &op.profile.footprint(), op.at)?;

        if let Pattern::Depth(depth) = op.pattern {
            if depth >= target.thickness {
                return Err(Violation::new(
                    Rule::CutDepth,
                    format!(
                        "cut depth {} is not shallower than the {} mm solid",
                        depth, target.thickness
                    ),
                )
                .into());
            }
        }
        Ok(next)
    }

    fn sphere(&mut self, radius: f64, _center: [f64; 3]) -> Result<SolidShape, BackendError> {
        Ok(SolidShape::new(None, 2.0 * radius))
    }

    fn block(&mut self, size: [f64; 3], _center: [f64; 3]) -> Result<SolidShape, BackendError> {
        Ok(SolidShape::new(
            Some(FaceOutline::Rect {
                width: size[0],
                height: size[1],
            }),
            size[2],
        ))
    }

    fn union(&mut self, a: &SolidShape, b: &SolidShape) -> Result<SolidShape, BackendError> {
        Ok(SolidShape::new(None, a.thickness.max(b.thickness)))
    }

    fn intersect(&mut self, a: &SolidShape, b: &SolidShape) -> Result<SolidShape, BackendError> {
        Ok(SolidShape::new(None, a.thickness.min(b.thickness)))
    }

    fn translate(&mut self, solid: &SolidShape, _offset: [f64; 3]) -> Result<SolidShape, BackendError> {
        Ok(solid.clone())
    }

    fn recall(&mut self, solid: &SolidShape) -> SolidShape {
        SolidShape {
            chain: [0, 0],
            ..solid.clone()
        }
    }
}

/// Statically checks a program and returns the name its result is bound to.
pub fn check(program: &Program) -> Result<String, ProgramError> {
    Ok(evaluate(program, &mut StaticChecker)?.result_name)
}
