//! Deterministic reference kernel.
//!
//! Solids are kept as a CSG tree of primitives and only sampled on a voxel
//! grid when a volume or a mesh is requested. Good enough to validate and
//! preview a part; not a B-rep.

use std::collections::HashMap;
use std::sync::Arc;

use cadplan_core::geometry::polygon_contains;
use cadplan_core::ExportFormat;

use super::mesh::Mesh;
use super::{Aabb, KernelError, KernelResult, SolidKernel};

pub const DEFAULT_RESOLUTION: usize = 96;

#[derive(Debug)]
enum Node {
    Prism { outline: Vec<[f64; 2]>, z: [f64; 2] },
    Sphere { center: [f64; 3], radius: f64 },
    Cuboid { min: [f64; 3], max: [f64; 3] },
    Union(Arc<Node>, Arc<Node>),
    Intersect(Arc<Node>, Arc<Node>),
    Difference(Arc<Node>, Arc<Node>),
    Translate(Arc<Node>, [f64; 3]),
}

impl Node {
    fn contains(&self, p: [f64; 3]) -> bool {
        match self {
            Node::Prism { outline, z } => {
                p[2] >= z[0] && p[2] <= z[1] && polygon_contains(outline, [p[0], p[1]])
            }
            Node::Sphere { center, radius } => {
                let d = [p[0] - center[0], p[1] - center[1], p[2] - center[2]];
                d[0] * d[0] + d[1] * d[1] + d[2] * d[2] <= radius * radius
            }
            Node::Cuboid { min, max } => (0..3).all(|a| p[a] >= min[a] && p[a] <= max[a]),
            Node::Union(a, b) => a.contains(p) || b.contains(p),
            Node::Intersect(a, b) => a.contains(p) && b.contains(p),
            Node::Difference(a, b) => a.contains(p) && !b.contains(p),
            Node::Translate(node, o) => node.contains([p[0] - o[0], p[1] - o[1], p[2] - o[2]]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoxelSolid {
    node: Arc<Node>,
    bounds: Aabb,
}

#[derive(Debug, Clone)]
pub struct VoxelKernel {
    /// Cells along the longest axis of a solid's bounds.
    resolution: usize,
}

impl Default for VoxelKernel {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLUTION)
    }
}

impl VoxelKernel {
    pub fn new(resolution: usize) -> Self {
        Self {
            resolution: resolution.max(8),
        }
    }

    fn grid(&self, solid: &VoxelSolid) -> Grid {
        Grid::sample(solid, self.resolution)
    }
}

/// Offsets of the neighbour across each cell face, with the face's corners in
/// counter-clockwise order seen from outside.
const FACES: [([isize; 3], [[usize; 3]; 4]); 6] = [
    ([1, 0, 0], [[1, 0, 0], [1, 1, 0], [1, 1, 1], [1, 0, 1]]),
    ([-1, 0, 0], [[0, 0, 0], [0, 0, 1], [0, 1, 1], [0, 1, 0]]),
    ([0, 1, 0], [[0, 1, 0], [0, 1, 1], [1, 1, 1], [1, 1, 0]]),
    ([0, -1, 0], [[0, 0, 0], [1, 0, 0], [1, 0, 1], [0, 0, 1]]),
    ([0, 0, 1], [[0, 0, 1], [1, 0, 1], [1, 1, 1], [0, 1, 1]]),
    ([0, 0, -1], [[0, 0, 0], [0, 1, 0], [1, 1, 0], [1, 0, 0]]),
];

struct Grid {
    origin: [f64; 3],
    cell: [f64; 3],
    dims: [usize; 3],
    filled: Vec<bool>,
}

impl Grid {
    fn sample(solid: &VoxelSolid, resolution: usize) -> Grid {
        let size = solid.bounds.size();
        let longest = size.iter().cloned().fold(0.0, f64::max);
        let target = longest / resolution as f64;
        let mut dims = [1usize; 3];
        let mut cell = [0.0; 3];
        for axis in 0..3 {
            dims[axis] = ((size[axis] / target).round() as usize).max(1);
            cell[axis] = size[axis] / dims[axis] as f64;
        }

        let origin = solid.bounds.min;
        let mut filled = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    let p = [
                        origin[0] + (i as f64 + 0.5) * cell[0],
                        origin[1] + (j as f64 + 0.5) * cell[1],
                        origin[2] + (k as f64 + 0.5) * cell[2],
                    ];
                    filled.push(solid.node.contains(p));
                }
            }
        }
        Grid {
            origin,
            cell,
            dims,
            filled,
        }
    }

    fn get(&self, i: isize, j: isize, k: isize) -> bool {
        let [nx, ny, nz] = self.dims;
        if i < 0 || j < 0 || k < 0 {
            return false;
        }
        let (i, j, k) = (i as usize, j as usize, k as usize);
        if i >= nx || j >= ny || k >= nz {
            return false;
        }
        self.filled[(k * ny + j) * nx + i]
    }

    fn count(&self) -> usize {
        self.filled.iter().filter(|f| **f).count()
    }

    fn cell_volume(&self) -> f64 {
        self.cell[0] * self.cell[1] * self.cell[2]
    }

    /// Boundary faces of the filled cells, with shared vertices.
    fn surface(&self) -> Mesh {
        let mut mesh = Mesh::default();
        let mut index: HashMap<[usize; 3], u32> = HashMap::new();
        let [nx, ny, nz] = self.dims;

        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let (si, sj, sk) = (i as isize, j as isize, k as isize);
                    if !self.get(si, sj, sk) {
                        continue;
                    }
                    for (offset, corners) in &FACES {
                        if self.get(si + offset[0], sj + offset[1], sk + offset[2]) {
                            continue;
                        }
                        let ids = corners.map(|c| {
                            let key = [i + c[0], j + c[1], k + c[2]];
                            *index.entry(key).or_insert_with(|| {
                                mesh.vertices.push(self.point(key));
                                (mesh.vertices.len() - 1) as u32
                            })
                        });
                        mesh.triangles.push([ids[0], ids[1], ids[2]]);
                        mesh.triangles.push([ids[0], ids[2], ids[3]]);
                    }
                }
            }
        }
        mesh
    }

    fn point(&self, corner: [usize; 3]) -> [f64; 3] {
        [
            self.origin[0] + corner[0] as f64 * self.cell[0],
            self.origin[1] + corner[1] as f64 * self.cell[1],
            self.origin[2] + corner[2] as f64 * self.cell[2],
        ]
    }
}

fn outline_bounds(outline: &[[f64; 2]], z: [f64; 2]) -> KernelResult<Aabb> {
    if outline.len() < 3 {
        return Err(KernelError::Geometry(format!(
            "profile has {} points, needs at least 3",
            outline.len()
        )));
    }
    let mut min = [f64::INFINITY, f64::INFINITY, z[0]];
    let mut max = [f64::NEG_INFINITY, f64::NEG_INFINITY, z[1]];
    for p in outline {
        if !p[0].is_finite() || !p[1].is_finite() {
            return Err(KernelError::Geometry("profile point is not finite".to_string()));
        }
        for axis in 0..2 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }
    let bounds = Aabb::new(min, max);
    if bounds.is_empty() {
        return Err(KernelError::Geometry("profile encloses no area".to_string()));
    }
    Ok(bounds)
}

fn prism(outline: &[[f64; 2]], z: [f64; 2]) -> KernelResult<VoxelSolid> {
    if !(z[1] > z[0]) {
        return Err(KernelError::Geometry(format!(
            "extrusion from z = {} to z = {} has no height",
            z[0], z[1]
        )));
    }
    let bounds = outline_bounds(outline, z)?;
    Ok(VoxelSolid {
        node: Arc::new(Node::Prism {
            outline: outline.to_vec(),
            z,
        }),
        bounds,
    })
}

impl SolidKernel for VoxelKernel {
    type Solid = VoxelSolid;

    fn extrude(&self, outline: &[[f64; 2]], height: f64) -> KernelResult<VoxelSolid> {
        prism(outline, [0.0, height])
    }

    fn cut(&self, solid: &VoxelSolid, outline: &[[f64; 2]], z_range: [f64; 2]) -> KernelResult<VoxelSolid> {
        let tool = prism(outline, z_range)?;
        Ok(VoxelSolid {
            node: Arc::new(Node::Difference(solid.node.clone(), tool.node)),
            bounds: solid.bounds,
        })
    }

    fn boss(&self, solid: &VoxelSolid, outline: &[[f64; 2]], z_range: [f64; 2]) -> KernelResult<VoxelSolid> {
        let added = prism(outline, z_range)?;
        Ok(VoxelSolid {
            node: Arc::new(Node::Union(solid.node.clone(), added.node)),
            bounds: solid.bounds.union(&added.bounds),
        })
    }

    fn sphere(&self, radius: f64, center: [f64; 3]) -> KernelResult<VoxelSolid> {
        if !(radius > 0.0) {
            return Err(KernelError::Geometry(format!("sphere radius {}", radius)));
        }
        Ok(VoxelSolid {
            node: Arc::new(Node::Sphere { center, radius }),
            bounds: Aabb::new(
                [center[0] - radius, center[1] - radius, center[2] - radius],
                [center[0] + radius, center[1] + radius, center[2] + radius],
            ),
        })
    }

    fn block(&self, size: [f64; 3], center: [f64; 3]) -> KernelResult<VoxelSolid> {
        let half = size.map(|s| s / 2.0);
        let bounds = Aabb::new(
            [center[0] - half[0], center[1] - half[1], center[2] - half[2]],
            [center[0] + half[0], center[1] + half[1], center[2] + half[2]],
        );
        if bounds.is_empty() {
            return Err(KernelError::Geometry(format!("block of size {:?}", size)));
        }
        Ok(VoxelSolid {
            node: Arc::new(Node::Cuboid {
                min: bounds.min,
                max: bounds.max,
            }),
            bounds,
        })
    }

    fn union(&self, a: &VoxelSolid, b: &VoxelSolid) -> KernelResult<VoxelSolid> {
        Ok(VoxelSolid {
            node: Arc::new(Node::Union(a.node.clone(), b.node.clone())),
            bounds: a.bounds.union(&b.bounds),
        })
    }

    fn intersect(&self, a: &VoxelSolid, b: &VoxelSolid) -> KernelResult<VoxelSolid> {
        let bounds = a.bounds.intersection(&b.bounds);
        if bounds.is_empty() {
            return Err(KernelError::EmptySolid);
        }
        Ok(VoxelSolid {
            node: Arc::new(Node::Intersect(a.node.clone(), b.node.clone())),
            bounds,
        })
    }

    fn translate(&self, solid: &VoxelSolid, offset: [f64; 3]) -> KernelResult<VoxelSolid> {
        Ok(VoxelSolid {
            node: Arc::new(Node::Translate(solid.node.clone(), offset)),
            bounds: solid.bounds.translated(offset),
        })
    }

    fn bounds(&self, solid: &VoxelSolid) -> Aabb {
        solid.bounds
    }

    fn volume(&self, solid: &VoxelSolid) -> f64 {
        let grid = self.grid(solid);
        grid.count() as f64 * grid.cell_volume()
    }

    fn export(&self, solid: &VoxelSolid, format: ExportFormat, name: &str) -> KernelResult<Vec<u8>> {
        let mesh = self.grid(solid).surface();
        if mesh.triangles.is_empty() {
            return Err(KernelError::EmptySolid);
        }
        Ok(mesh.encode(format, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(side: f64) -> Vec<[f64; 2]> {
        let h = side / 2.0;
        vec![[-h, -h], [h, -h], [h, h], [-h, h]]
    }

    fn circle(radius: f64) -> Vec<[f64; 2]> {
        (0..48)
            .map(|i| {
                let t = std::f64::consts::TAU * i as f64 / 48.0;
                [radius * t.cos(), radius * t.sin()]
            })
            .collect()
    }

    #[test]
    fn test_box_volume_is_exact() {
        let kernel = VoxelKernel::default();
        let plate = kernel.extrude(&square(50.0), 5.0).unwrap();
        assert!((kernel.volume(&plate) - 12_500.0).abs() < 1e-6);
    }

    #[test]
    fn test_through_hole_removes_material() {
        let kernel = VoxelKernel::default();
        let plate = kernel.extrude(&square(50.0), 5.0).unwrap();
        let holed = kernel.cut(&plate, &circle(5.0), [-1.0, 6.0]).unwrap();
        let volume = kernel.volume(&holed);
        let expected = 12_500.0 - std::f64::consts::PI * 25.0 * 5.0;
        assert!((volume - expected).abs() / expected < 0.02, "volume {}", volume);
    }

    #[test]
    fn test_export_is_deterministic() {
        let kernel = VoxelKernel::new(24);
        let plate = kernel.extrude(&square(10.0), 2.0).unwrap();
        let a = kernel.export(&plate, ExportFormat::Stl, "p").unwrap();
        let b = kernel.export(&plate, ExportFormat::Stl, "p").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_box_surface_is_closed() {
        let kernel = VoxelKernel::new(8);
        let cube = kernel.block([1.0, 1.0, 1.0], [0.0, 0.0, 0.0]).unwrap();
        let mesh = kernel.grid(&cube).surface();
        // 8x8 cells per side, two triangles each, six sides.
        assert_eq!(mesh.triangles.len(), 6 * 8 * 8 * 2);
        assert_eq!(mesh.vertices.len(), 9 * 9 * 9 - 7 * 7 * 7);
    }

    #[test]
    fn test_disjoint_intersection_is_empty() {
        let kernel = VoxelKernel::default();
        let a = kernel.sphere(1.0, [0.0, 0.0, 0.0]).unwrap();
        let b = kernel.sphere(1.0, [5.0, 0.0, 0.0]).unwrap();
        assert!(matches!(kernel.intersect(&a, &b), Err(KernelError::EmptySolid)));
    }
}
