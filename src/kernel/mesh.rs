//! Indexed triangle meshes and their STL/OBJ encodings.

use std::fmt::Write as _;

use cadplan_core::ExportFormat;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<[f64; 3]>,
    /// Counter-clockwise seen from outside.
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn encode(&self, format: ExportFormat, name: &str) -> Vec<u8> {
        match format {
            ExportFormat::Stl => to_binary_stl(self, name),
            ExportFormat::Obj => to_obj(self, name).into_bytes(),
        }
    }
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn triangle_normal(a: [f64; 3], b: [f64; 3], c: [f64; 3]) -> [f64; 3] {
    let n = cross(
        [b[0] - a[0], b[1] - a[1], b[2] - a[2]],
        [c[0] - a[0], c[1] - a[1], c[2] - a[2]],
    );
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if len <= f64::EPSILON {
        [0.0, 0.0, 0.0]
    } else {
        [n[0] / len, n[1] / len, n[2] / len]
    }
}

fn push_f32_triplet(bytes: &mut Vec<u8>, value: [f64; 3]) {
    for component in value {
        bytes.extend_from_slice(&(component as f32).to_le_bytes());
    }
}

/// Binary STL: 80-byte header, triangle count, 50 bytes per triangle.
pub fn to_binary_stl(mesh: &Mesh, name: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(84 + mesh.triangles.len() * 50);

    let mut header = [0u8; 80];
    let label = format!("cadplan {}", name);
    let len = label.len().min(80);
    header[..len].copy_from_slice(&label.as_bytes()[..len]);
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(&(mesh.triangles.len() as u32).to_le_bytes());

    for tri in &mesh.triangles {
        let a = mesh.vertices[tri[0] as usize];
        let b = mesh.vertices[tri[1] as usize];
        let c = mesh.vertices[tri[2] as usize];
        push_f32_triplet(&mut bytes, triangle_normal(a, b, c));
        push_f32_triplet(&mut bytes, a);
        push_f32_triplet(&mut bytes, b);
        push_f32_triplet(&mut bytes, c);
        bytes.extend_from_slice(&0u16.to_le_bytes());
    }
    bytes
}

pub fn to_obj(mesh: &Mesh, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# cadplan {}", name);
    let _ = writeln!(out, "o {}", name);
    for v in &mesh.vertices {
        let _ = writeln!(out, "v {} {} {}", v[0], v[1], v[2]);
    }
    for t in &mesh.triangles {
        let _ = writeln!(out, "f {} {} {}", t[0] + 1, t[1] + 1, t[2] + 1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Mesh {
        Mesh {
            vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            triangles: vec![[0, 1, 2], [0, 2, 3]],
        }
    }

    #[test]
    fn test_stl_layout() {
        let bytes = to_binary_stl(&square(), "plate");
        assert_eq!(bytes.len(), 84 + 2 * 50);
        assert!(bytes.starts_with(b"cadplan plate"));
        assert_eq!(u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]), 2);
        // Normal of the first facet points up.
        assert_eq!(f32::from_le_bytes([bytes[92], bytes[93], bytes[94], bytes[95]]), 1.0);
    }

    #[test]
    fn test_obj_is_one_based() {
        let obj = to_obj(&square(), "plate");
        assert!(obj.starts_with("# cadplan plate\no plate\n"));
        assert!(obj.contains("f 1 2 3\nf 1 3 4\n"));
    }
}
