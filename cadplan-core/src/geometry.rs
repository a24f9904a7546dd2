//! Planar geometry shared by plan validation and the program checker.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::grammar::{Rule, Violation};

/// Smallest size any dimension may take, and the smallest margin between a
/// feature footprint and the edge of its face.
pub const MIN_DIMENSION: f64 = 0.1;

/// Margin a footprint must keep from its face boundary.
pub const MIN_CLEARANCE: f64 = 0.1;

/// Maximum number of features placed on one face within a single chain.
pub const MAX_FEATURES_PER_CHAIN: usize = 5;

/// Segments used when a three-point arc is flattened.
pub const ARC_SEGMENTS: usize = 24;

pub const EPSILON: f64 = 1e-9;

/// One of the two planar faces along the extrusion axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub enum Face {
    #[default]
    #[serde(rename = ">Z")]
    Top,
    #[serde(rename = "<Z")]
    Bottom,
}

impl Face {
    pub fn selector(&self) -> &'static str {
        match self {
            Face::Top => ">Z",
            Face::Bottom => "<Z",
        }
    }

    pub fn from_selector(s: &str) -> Option<Self> {
        match s.trim() {
            ">Z" => Some(Face::Top),
            "<Z" => Some(Face::Bottom),
            _ => None,
        }
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Face::Top)
    }
}

impl fmt::Display for Face {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.selector())
    }
}

impl FromStr for Face {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Face::from_selector(s).ok_or_else(|| format!("unsupported face selector: {}", s))
    }
}

/// Outline of a planar face, centered on the origin of its workplane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FaceOutline {
    Rect { width: f64, height: f64 },
    Circle { radius: f64 },
}

impl FaceOutline {
    /// Full extents along the workplane x and y axes.
    pub fn extents(&self) -> [f64; 2] {
        match *self {
            FaceOutline::Rect { width, height } => [width, height],
            FaceOutline::Circle { radius } => [2.0 * radius, 2.0 * radius],
        }
    }

    pub fn min_dimension(&self) -> f64 {
        let [x, y] = self.extents();
        x.min(y)
    }
}

impl fmt::Display for FaceOutline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaceOutline::Rect { width, height } => write!(f, "{} x {} rectangle", width, height),
            FaceOutline::Circle { radius } => write!(f, "circle of radius {}", radius),
        }
    }
}

/// Which face extent a size dimension is compared against by the half-size rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeAxis {
    X,
    Y,
    Smallest,
}

/// Planar footprint of a feature profile, centered on its placement point.
#[derive(Debug, Clone, PartialEq)]
pub enum Footprint {
    Circle { radius: f64 },
    Rect { width: f64, length: f64 },
    /// Flat side on the local x axis, bulging toward +y.
    Semicircle { radius: f64 },
    Polygon { points: Vec<[f64; 2]> },
}

impl Footprint {
    /// Axis-aligned bounds relative to the placement point.
    pub fn local_bounds(&self) -> [[f64; 2]; 2] {
        match self {
            Footprint::Circle { radius } => [[-radius, -radius], [*radius, *radius]],
            Footprint::Rect { width, length } => {
                [[-width / 2.0, -length / 2.0], [width / 2.0, length / 2.0]]
            }
            Footprint::Semicircle { radius } => [[-radius, 0.0], [*radius, *radius]],
            Footprint::Polygon { points } => {
                let mut lo = [f64::INFINITY; 2];
                let mut hi = [f64::NEG_INFINITY; 2];
                for p in points {
                    for axis in 0..2 {
                        lo[axis] = lo[axis].min(p[axis]);
                        hi[axis] = hi[axis].max(p[axis]);
                    }
                }
                [lo, hi]
            }
        }
    }

    /// Largest distance from the face center reached by the footprint placed at `at`.
    pub fn reach(&self, at: [f64; 2]) -> f64 {
        match self {
            Footprint::Circle { radius } | Footprint::Semicircle { radius } => {
                at[0].hypot(at[1]) + radius
            }
            Footprint::Rect { width, length } => {
                let dx = at[0].abs() + width / 2.0;
                let dy = at[1].abs() + length / 2.0;
                dx.hypot(dy)
            }
            Footprint::Polygon { points } => points
                .iter()
                .map(|p| (p[0] + at[0]).hypot(p[1] + at[1]))
                .fold(0.0, f64::max),
        }
    }

    /// Size values checked by the half-size rule, labelled by dimension name.
    pub fn sizes(&self) -> Vec<(&'static str, f64, SizeAxis)> {
        match self {
            Footprint::Circle { radius } | Footprint::Semicircle { radius } => {
                vec![("radius", *radius, SizeAxis::Smallest)]
            }
            Footprint::Rect { width, length } => vec![
                ("width", *width, SizeAxis::X),
                ("length", *length, SizeAxis::Y),
            ],
            Footprint::Polygon { .. } => {
                let [lo, hi] = self.local_bounds();
                vec![
                    ("half-width", (hi[0] - lo[0]) / 2.0, SizeAxis::X),
                    ("half-length", (hi[1] - lo[1]) / 2.0, SizeAxis::Y),
                ]
            }
        }
    }
}

/// Checks the half-size and face-clearance rules for a footprint placed at
/// `at` (offset from the face center).
pub fn check_footprint(
    face: &FaceOutline,
    footprint: &Footprint,
    at: [f64; 2],
) -> Result<(), Violation> {
    let extents = face.extents();
    for (name, size, axis) in footprint.sizes() {
        let limit = match axis {
            SizeAxis::X => extents[0],
            SizeAxis::Y => extents[1],
            SizeAxis::Smallest => face.min_dimension(),
        };
        if 2.0 * size >= limit {
            return Err(Violation::new(
                Rule::HalfSize,
                format!(
                    "{} {} is not under half of the face dimension {} ({})",
                    name, size, limit, face
                ),
            ));
        }
    }

    match *face {
        FaceOutline::Rect { width, height } => {
            let [lo, hi] = footprint.local_bounds();
            let half = [width / 2.0, height / 2.0];
            for axis in 0..2 {
                let low_margin = (lo[axis] + at[axis]) + half[axis];
                let high_margin = half[axis] - (hi[axis] + at[axis]);
                let margin = low_margin.min(high_margin);
                if margin + EPSILON < MIN_CLEARANCE {
                    return Err(Violation::new(
                        Rule::FaceClearance,
                        format!(
                            "footprint at ({}, {}) leaves {:.3} mm to the edge of the {}, needs {}",
                            at[0], at[1], margin, face, MIN_CLEARANCE
                        ),
                    ));
                }
            }
        }
        FaceOutline::Circle { radius } => {
            let margin = radius - footprint.reach(at);
            if margin + EPSILON < MIN_CLEARANCE {
                return Err(Violation::new(
                    Rule::FaceClearance,
                    format!(
                        "footprint at ({}, {}) leaves {:.3} mm to the edge of the {}, needs {}",
                        at[0], at[1], margin, face, MIN_CLEARANCE
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Circle through three points, as `(center, radius)`. `None` when collinear.
pub fn circumcircle(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> Option<([f64; 2], f64)> {
    let d = 2.0 * (a[0] * (b[1] - c[1]) + b[0] * (c[1] - a[1]) + c[0] * (a[1] - b[1]));
    if d.abs() < EPSILON {
        return None;
    }
    let a2 = a[0] * a[0] + a[1] * a[1];
    let b2 = b[0] * b[0] + b[1] * b[1];
    let c2 = c[0] * c[0] + c[1] * c[1];
    let ux = (a2 * (b[1] - c[1]) + b2 * (c[1] - a[1]) + c2 * (a[1] - b[1])) / d;
    let uy = (a2 * (c[0] - b[0]) + b2 * (a[0] - c[0]) + c2 * (b[0] - a[0])) / d;
    let center = [ux, uy];
    Some((center, (a[0] - ux).hypot(a[1] - uy)))
}

/// Flattens the arc from `start` through `mid` to `end` into points after
/// `start`, ending exactly at `end`.
pub fn flatten_arc(start: [f64; 2], mid: [f64; 2], end: [f64; 2]) -> Vec<[f64; 2]> {
    let Some((center, radius)) = circumcircle(start, mid, end) else {
        return vec![mid, end];
    };
    let angle = |p: [f64; 2]| (p[1] - center[1]).atan2(p[0] - center[0]);
    let tau = std::f64::consts::TAU;
    let a0 = angle(start);
    let sweep_to = |p: [f64; 2]| (angle(p) - a0).rem_euclid(tau);
    let mut sweep = sweep_to(end);
    // Counter-clockwise unless the midpoint lies outside that sweep.
    if sweep_to(mid) > sweep {
        sweep -= tau;
    }
    let mut points: Vec<[f64; 2]> = (1..ARC_SEGMENTS)
        .map(|i| {
            let t = a0 + sweep * i as f64 / ARC_SEGMENTS as f64;
            [center[0] + radius * t.cos(), center[1] + radius * t.sin()]
        })
        .collect();
    points.push(end);
    points
}

/// Signed area of a closed polygon (counter-clockwise positive).
pub fn polygon_area(points: &[[f64; 2]]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..points.len() {
        let p = points[i];
        let q = points[(i + 1) % points.len()];
        sum += p[0] * q[1] - q[0] * p[1];
    }
    sum / 2.0
}

/// Even-odd point containment for a closed polygon.
pub fn polygon_contains(points: &[[f64; 2]], p: [f64; 2]) -> bool {
    let mut inside = false;
    let mut j = points.len().wrapping_sub(1);
    for i in 0..points.len() {
        let (a, b) = (points[i], points[j]);
        if (a[1] > p[1]) != (b[1] > p[1]) {
            let x = (b[0] - a[0]) * (p[1] - a[1]) / (b[1] - a[1]) + a[0];
            if p[0] < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLATE: FaceOutline = FaceOutline::Rect {
        width: 50.0,
        height: 50.0,
    };

    #[test]
    fn test_radius_at_half_face_is_rejected() {
        let err = check_footprint(&PLATE, &Footprint::Circle { radius: 25.0 }, [0.0, 0.0])
            .unwrap_err();
        assert_eq!(err.rule, Rule::HalfSize);
    }

    #[test]
    fn test_radius_just_under_half_is_accepted() {
        check_footprint(&PLATE, &Footprint::Circle { radius: 24.9 }, [0.0, 0.0]).unwrap();
    }

    #[test]
    fn test_offset_footprint_near_edge_is_rejected() {
        let err = check_footprint(&PLATE, &Footprint::Circle { radius: 10.0 }, [15.0, 0.0])
            .unwrap_err();
        assert_eq!(err.rule, Rule::FaceClearance);
    }

    #[test]
    fn test_circular_face_uses_reach() {
        let face = FaceOutline::Circle { radius: 20.0 };
        check_footprint(&face, &Footprint::Circle { radius: 5.0 }, [10.0, 0.0]).unwrap();
        // Reach 19.14 leaves 0.86 mm to the rim.
        check_footprint(&face, &Footprint::Circle { radius: 5.0 }, [10.0, 10.0]).unwrap();
        let err = check_footprint(&face, &Footprint::Circle { radius: 5.0 }, [11.0, 11.0])
            .unwrap_err();
        assert_eq!(err.rule, Rule::FaceClearance);
    }

    #[test]
    fn test_flatten_arc_ends_on_endpoint() {
        let points = flatten_arc([-5.0, 0.0], [0.0, 5.0], [5.0, 0.0]);
        assert_eq!(points.len(), ARC_SEGMENTS);
        assert_eq!(*points.last().unwrap(), [5.0, 0.0]);
        assert!(points.iter().all(|p| p[1] >= -1e-9));
    }

    #[test]
    fn test_polygon_area_and_containment() {
        let square = [[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]];
        assert!((polygon_area(&square) - 4.0).abs() < 1e-12);
        assert!(polygon_contains(&square, [1.0, 1.0]));
        assert!(!polygon_contains(&square, [3.0, 1.0]));
    }
}
