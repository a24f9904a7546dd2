//! Program execution against a solid kernel.
//!
//! A program runs in a fresh interpreter whose only effects are kernel
//! operations. The result must be a solid of finite, non-zero volume; its mesh
//! is produced in memory and written by the caller with [`persist_mesh`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cadplan_core::geometry::{EPSILON, MIN_CLEARANCE};
use cadplan_core::program::{
    check, evaluate, parse, Backend, BackendError, FeatureOp, Pattern, Profile, ProgramError,
};
use cadplan_core::{ExportFormat, Face, Rule, Violation};
use serde::Serialize;
use tracing::debug;

use crate::error::{CadError, CadResult};
use crate::kernel::{Aabb, SolidKernel};
use crate::store::write_atomic;

/// Extra reach of a through cut beyond the solid's bounds.
const THROUGH_MARGIN: f64 = 1.0;

/// A kernel solid plus the planar faces features are placed on.
#[derive(Debug, Clone)]
pub struct Placed<S> {
    pub solid: S,
    frame: Option<Frame>,
}

/// The `<Z`/`>Z` planes and face center of a base solid.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Frame {
    bottom: f64,
    top: f64,
    center: [f64; 2],
}

impl Frame {
    fn shifted(&self, offset: [f64; 3]) -> Frame {
        Frame {
            bottom: self.bottom + offset[2],
            top: self.top + offset[2],
            center: [self.center[0] + offset[0], self.center[1] + offset[1]],
        }
    }
}

/// Adapts a [`SolidKernel`] to the interpreter.
struct KernelBackend<'k, K: SolidKernel> {
    kernel: &'k K,
}

fn failed(err: impl std::fmt::Display) -> BackendError {
    BackendError::Failed(err.to_string())
}

impl<K: SolidKernel> KernelBackend<'_, K> {
    fn placed(&self, solid: K::Solid, frame: Option<Frame>) -> Placed<K::Solid> {
        Placed { solid, frame }
    }
}

impl<K: SolidKernel> Backend for KernelBackend<'_, K> {
    type Solid = Placed<K::Solid>;

    fn extrude(&mut self, profile: &Profile, height: f64) -> Result<Self::Solid, BackendError> {
        let solid = self.kernel.extrude(&profile.outline(), height).map_err(failed)?;
        Ok(self.placed(
            solid,
            Some(Frame {
                bottom: 0.0,
                top: height,
                center: [0.0, 0.0],
            }),
        ))
    }

    fn feature(&mut self, target: &Self::Solid, op: &FeatureOp<'_>) -> Result<Self::Solid, BackendError> {
        let frame = target.frame.ok_or_else(|| {
            Violation::new(
                Rule::PlanarFaceOnly,
                format!("face {} of this solid is not provably planar", op.face),
            )
        })?;
        let (dx, dy) = (frame.center[0] + op.at[0], frame.center[1] + op.at[1]);
        let outline: Vec<[f64; 2]> = op
            .profile
            .outline()
            .into_iter()
            .map(|p| [p[0] + dx, p[1] + dy])
            .collect();

        let bounds = self.kernel.bounds(&target.solid);
        let top = op.face == Face::Top;
        let solid = match op.pattern {
            Pattern::Through => self.kernel.cut(
                &target.solid,
                &outline,
                [bounds.min[2] - THROUGH_MARGIN, bounds.max[2] + THROUGH_MARGIN],
            ),
            Pattern::Depth(depth) => {
                let range = if top {
                    [frame.top - depth, bounds.max[2] + THROUGH_MARGIN]
                } else {
                    [bounds.min[2] - THROUGH_MARGIN, frame.bottom + depth]
                };
                self.kernel.cut(&target.solid, &outline, range)
            }
            // Bosses reach into the body so the union is volumetric.
            Pattern::Boss(height) => {
                let range = if top {
                    [frame.top - MIN_CLEARANCE, frame.top + height]
                } else {
                    [frame.bottom - height, frame.bottom + MIN_CLEARANCE]
                };
                self.kernel.boss(&target.solid, &outline, range)
            }
        }
        .map_err(failed)?;
        Ok(self.placed(solid, Some(frame)))
    }

    fn sphere(&mut self, radius: f64, center: [f64; 3]) -> Result<Self::Solid, BackendError> {
        let solid = self.kernel.sphere(radius, center).map_err(failed)?;
        Ok(self.placed(solid, None))
    }

    fn block(&mut self, size: [f64; 3], center: [f64; 3]) -> Result<Self::Solid, BackendError> {
        let solid = self.kernel.block(size, center).map_err(failed)?;
        let frame = Frame {
            bottom: center[2] - size[2] / 2.0,
            top: center[2] + size[2] / 2.0,
            center: [center[0], center[1]],
        };
        Ok(self.placed(solid, Some(frame)))
    }

    fn union(&mut self, a: &Self::Solid, b: &Self::Solid) -> Result<Self::Solid, BackendError> {
        for (side, operand) in [("left", a), ("right", b)] {
            let volume = self.kernel.volume(&operand.solid);
            if !volume.is_finite() || volume <= 0.0 {
                return Err(BackendError::Failed(format!(
                    "{} union operand has volume {}",
                    side, volume
                )));
            }
        }
        check_overlap(&self.kernel.bounds(&a.solid), &self.kernel.bounds(&b.solid))?;
        let solid = self.kernel.union(&a.solid, &b.solid).map_err(failed)?;
        Ok(self.placed(solid, None))
    }

    fn intersect(&mut self, a: &Self::Solid, b: &Self::Solid) -> Result<Self::Solid, BackendError> {
        let solid = self.kernel.intersect(&a.solid, &b.solid).map_err(failed)?;
        Ok(self.placed(solid, None))
    }

    fn translate(&mut self, solid: &Self::Solid, offset: [f64; 3]) -> Result<Self::Solid, BackendError> {
        let moved = self.kernel.translate(&solid.solid, offset).map_err(failed)?;
        Ok(self.placed(moved, solid.frame.map(|f| f.shifted(offset))))
    }
}

/// Union operands must overlap by the clearance along every axis; touching
/// boxes are rejected.
fn check_overlap(a: &Aabb, b: &Aabb) -> Result<(), Violation> {
    let overlap = a.overlap(b);
    if overlap.iter().all(|o| *o + EPSILON >= MIN_CLEARANCE) {
        return Ok(());
    }
    Err(Violation::new(
        Rule::UnionOverlap,
        format!(
            "union operands overlap by [{:.3}, {:.3}, {:.3}] mm, need {} on every axis",
            overlap[0], overlap[1], overlap[2], MIN_CLEARANCE
        ),
    ))
}

/// A program that ran and produced a mesh, not yet written anywhere.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub result_name: String,
    pub volume: f64,
    pub bounds: Aabb,
    pub format: ExportFormat,
    pub mesh: Vec<u8>,
}

/// Where a mesh was written and what it holds.
#[derive(Debug, Clone, Serialize)]
pub struct MeshReport {
    pub path: PathBuf,
    pub result_name: String,
    pub volume: f64,
    pub bounds: Aabb,
    pub bytes: usize,
}

pub struct Executor<K: SolidKernel> {
    kernel: Arc<K>,
}

impl<K: SolidKernel> Clone for Executor<K> {
    fn clone(&self) -> Self {
        Self {
            kernel: Arc::clone(&self.kernel),
        }
    }
}

impl<K: SolidKernel> Executor<K> {
    pub fn new(kernel: Arc<K>) -> Self {
        Self { kernel }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Parses, checks and runs `source`, then meshes the result.
    ///
    /// `cancel` is polled between phases; a set flag abandons the run before
    /// any output exists.
    pub fn render(
        &self,
        source: &str,
        format: ExportFormat,
        name: &str,
        cancel: &AtomicBool,
    ) -> CadResult<Rendered> {
        let program = parse(source).map_err(CadError::invalid_program)?;
        check(&program).map_err(execution_error)?;

        let mut backend = KernelBackend {
            kernel: self.kernel.as_ref(),
        };
        let evaluation = evaluate(&program, &mut backend).map_err(execution_error)?;
        if cancel.load(Ordering::SeqCst) {
            return Err(cancelled());
        }

        let solid = &evaluation.result.solid;
        let volume = self.kernel.volume(solid);
        if !volume.is_finite() || volume <= 0.0 {
            return Err(CadError::ValidationFailed(format!(
                "`{}` has volume {}",
                evaluation.result_name, volume
            )));
        }
        let bounds = self.kernel.bounds(solid);
        debug!(result = %evaluation.result_name, volume, "Program produced a solid");

        if cancel.load(Ordering::SeqCst) {
            return Err(cancelled());
        }
        let mesh = self
            .kernel
            .export(solid, format, name)
            .map_err(|e| CadError::ValidationFailed(e.to_string()))?;

        Ok(Rendered {
            result_name: evaluation.result_name,
            volume,
            bounds,
            format,
            mesh,
        })
    }
}

fn execution_error(err: ProgramError) -> CadError {
    match err {
        ProgramError::MissingResult(_) | ProgramError::Backend { .. } => {
            CadError::ValidationFailed(err.to_string())
        }
        other => CadError::invalid_program(other),
    }
}

fn cancelled() -> CadError {
    CadError::UpstreamUnavailable("kernel run was cancelled".to_string())
}

/// Writes a rendered mesh via temp file and atomic rename.
pub fn persist_mesh(rendered: &Rendered, path: &Path) -> CadResult<MeshReport> {
    write_atomic(path, &rendered.mesh)?;
    Ok(MeshReport {
        path: path.to_path_buf(),
        result_name: rendered.result_name.clone(),
        volume: rendered.volume,
        bounds: rendered.bounds,
        bytes: rendered.mesh.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::VoxelKernel;

    fn executor() -> Executor<VoxelKernel> {
        Executor::new(Arc::new(VoxelKernel::new(48)))
    }

    fn render(source: &str) -> CadResult<Rendered> {
        executor().render(source, ExportFormat::Stl, "test", &AtomicBool::new(false))
    }

    const PLATE: &str = "part = extrude(rect(50, 50), 5)\n    |> hole(\">Z\", circle(5), 0, 0)\nassembly = part\n";

    #[test]
    fn test_plate_with_hole_has_volume() {
        let rendered = render(PLATE).unwrap();
        assert_eq!(rendered.result_name, "assembly");
        assert!(rendered.volume > 11_000.0 && rendered.volume < 12_500.0);
        assert_eq!(rendered.bounds.max[2], 5.0);
    }

    #[test]
    fn test_rendering_twice_is_byte_identical() {
        assert_eq!(render(PLATE).unwrap().mesh, render(PLATE).unwrap().mesh);
    }

    #[test]
    fn test_unbound_result_fails_validation() {
        let err = render("part = extrude(rect(50, 50), 5)").unwrap_err();
        assert!(matches!(err, CadError::ValidationFailed(_)));
    }

    #[test]
    fn test_result_that_is_not_a_solid_fails_validation() {
        let err = render("part = extrude(rect(50, 50), 5)\nassembly = 3\n").unwrap_err();
        assert!(matches!(err, CadError::ValidationFailed(_)));
    }

    #[test]
    fn test_touching_union_is_rejected() {
        let err = render(
            "a = extrude(rect(10, 10), 10)\nb = block(10, 10, 10, 10, 0, 5)\nassembly = union(a, b)",
        )
        .unwrap_err();
        assert_eq!(err.rule(), Some(Rule::UnionOverlap));
    }

    #[test]
    fn test_union_with_empty_operand_is_rejected() {
        let err = render(
            "part = extrude(rect(20, 20), 5)\n\
             dome = sphere(4, 0, 0, 4.9) |> intersect(block(2, 2, 2, 4.5, 4.5, 5.5))\n\
             assembly = union(part, dome)\n",
        )
        .unwrap_err();
        assert!(matches!(err, CadError::ValidationFailed(_)));
        assert!(err.to_string().contains("right union operand"));
    }

    #[test]
    fn test_cancelled_run_produces_nothing() {
        let err = executor()
            .render(PLATE, ExportFormat::Stl, "test", &AtomicBool::new(true))
            .unwrap_err();
        assert!(matches!(err, CadError::UpstreamUnavailable(_)));
    }

    #[test]
    fn test_persist_writes_mesh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.stl");
        let report = persist_mesh(&render(PLATE).unwrap(), &path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, report.bytes);
    }
}
