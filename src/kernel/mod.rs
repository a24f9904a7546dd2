//! Solid-modeling kernel seam.
//!
//! The executor drives a [`SolidKernel`] through the operations a program is
//! allowed to use. Profiles arrive as closed polygons already placed in the
//! XY plane; the kernel never sees program text.

mod mesh;
mod voxel;

use cadplan_core::ExportFormat;
use serde::Serialize;
use thiserror::Error;

pub use mesh::Mesh;
pub use voxel::{VoxelKernel, VoxelSolid};

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("invalid geometry: {0}")]
    Geometry(String),

    #[error("operation produced an empty solid")]
    EmptySolid,

    #[error("mesh export failed: {0}")]
    Export(String),
}

pub type KernelResult<T> = Result<T, KernelError>;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Aabb {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Aabb {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    pub fn size(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.size().iter().any(|s| !(*s > 0.0))
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        let mut out = *self;
        for axis in 0..3 {
            out.min[axis] = out.min[axis].min(other.min[axis]);
            out.max[axis] = out.max[axis].max(other.max[axis]);
        }
        out
    }

    pub fn intersection(&self, other: &Aabb) -> Aabb {
        let mut out = *self;
        for axis in 0..3 {
            out.min[axis] = out.min[axis].max(other.min[axis]);
            out.max[axis] = out.max[axis].min(other.max[axis]);
        }
        out
    }

    /// Overlap along each axis; negative when the boxes are apart.
    pub fn overlap(&self, other: &Aabb) -> [f64; 3] {
        self.intersection(other).size()
    }

    pub fn translated(&self, offset: [f64; 3]) -> Aabb {
        let mut out = *self;
        for axis in 0..3 {
            out.min[axis] += offset[axis];
            out.max[axis] += offset[axis];
        }
        out
    }
}

/// Geometry operations available to programs.
///
/// Implementations must be deterministic: the same calls produce the same
/// solid and byte-identical exports.
pub trait SolidKernel: Send + Sync + 'static {
    type Solid: Clone + Send + Sync;

    /// Prism of `outline` from z = 0 to z = `height`.
    fn extrude(&self, outline: &[[f64; 2]], height: f64) -> KernelResult<Self::Solid>;

    /// Removes the prism of `outline` between `z_range[0]` and `z_range[1]`.
    fn cut(&self, solid: &Self::Solid, outline: &[[f64; 2]], z_range: [f64; 2])
        -> KernelResult<Self::Solid>;

    /// Adds the prism of `outline` between `z_range[0]` and `z_range[1]`.
    fn boss(&self, solid: &Self::Solid, outline: &[[f64; 2]], z_range: [f64; 2])
        -> KernelResult<Self::Solid>;

    fn sphere(&self, radius: f64, center: [f64; 3]) -> KernelResult<Self::Solid>;

    fn block(&self, size: [f64; 3], center: [f64; 3]) -> KernelResult<Self::Solid>;

    fn union(&self, a: &Self::Solid, b: &Self::Solid) -> KernelResult<Self::Solid>;

    fn intersect(&self, a: &Self::Solid, b: &Self::Solid) -> KernelResult<Self::Solid>;

    fn translate(&self, solid: &Self::Solid, offset: [f64; 3]) -> KernelResult<Self::Solid>;

    fn bounds(&self, solid: &Self::Solid) -> Aabb;

    fn volume(&self, solid: &Self::Solid) -> f64;

    /// Encodes the solid's surface in `format`.
    fn export(&self, solid: &Self::Solid, format: ExportFormat, name: &str) -> KernelResult<Vec<u8>>;
}
