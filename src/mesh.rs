//! Triangle extraction and bounding boxes.
//!
//! The text geometry arrives as a flat `f32` position buffer, optionally
//! with a `u32` index buffer. [`extract_triangles`] flattens either form into
//! a list of [`Triangle`]s for the field generator.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::MeshError;

/// Three corner points of a triangle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    pub a: Vec3,
    pub b: Vec3,
    pub c: Vec3,
}

impl Triangle {
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self { a, b, c }
    }

    #[inline]
    pub fn centroid(&self) -> Vec3 {
        (self.a + self.b + self.c) / 3.0
    }

    pub fn bounds(&self) -> Aabb {
        Aabb {
            min: self.a.min(self.b).min(self.c),
            max: self.a.max(self.b).max(self.c),
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// An inverted box that any `grow` call replaces.
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    /// Tight bounds of every corner in `triangles`.
    pub fn from_triangles(triangles: &[Triangle]) -> Self {
        triangles.iter().fold(Self::empty(), |acc, t| acc.union(&t.bounds()))
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Grow by `pad` on every side.
    pub fn padded(&self, pad: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(pad),
            max: self.max + Vec3::splat(pad),
        }
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Index of the longest axis (0 = X, 1 = Y, 2 = Z).
    pub fn longest_axis(&self) -> usize {
        let s = self.size();
        if s.x >= s.y && s.x >= s.z {
            0
        } else if s.y >= s.z {
            1
        } else {
            2
        }
    }

    /// Euclidean distance from `p` to the box; zero inside.
    #[inline]
    pub fn distance_to_point(&self, p: Vec3) -> f32 {
        let d = (self.min - p).max(p - self.max).max(Vec3::ZERO);
        d.length()
    }

    /// Largest projection of the box onto `axis`.
    pub fn max_along(&self, axis: Vec3) -> f32 {
        let x = if axis.x >= 0.0 { self.max.x } else { self.min.x };
        let y = if axis.y >= 0.0 { self.max.y } else { self.min.y };
        let z = if axis.z >= 0.0 { self.max.z } else { self.min.z };
        Vec3::new(x, y, z).dot(axis)
    }

    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all() && self.min.is_finite() && self.max.is_finite()
    }
}

/// Flatten an indexed or non-indexed position buffer into triangles.
///
/// `positions` holds `x, y, z` triplets. With `indices`, every three
/// indices form a triangle; without, every nine floats do.
pub fn extract_triangles(
    positions: &[f32],
    indices: Option<&[u32]>,
) -> Result<Vec<Triangle>, MeshError> {
    if positions.len() % 3 != 0 {
        return Err(MeshError::RaggedPositions(positions.len()));
    }
    let vertices: Vec<Vec3> = positions
        .chunks_exact(3)
        .map(|v| Vec3::new(v[0], v[1], v[2]))
        .collect();

    let triangles = match indices {
        Some(indices) => {
            if indices.len() % 3 != 0 {
                return Err(MeshError::RaggedIndices(indices.len()));
            }
            let vertex = |i: u32| {
                vertices
                    .get(i as usize)
                    .copied()
                    .ok_or(MeshError::IndexOutOfRange {
                        index: i,
                        vertex_count: vertices.len(),
                    })
            };
            indices
                .chunks_exact(3)
                .map(|t| Ok(Triangle::new(vertex(t[0])?, vertex(t[1])?, vertex(t[2])?)))
                .collect::<Result<Vec<_>, MeshError>>()?
        }
        None => {
            if vertices.len() % 3 != 0 {
                return Err(MeshError::RaggedIndices(vertices.len()));
            }
            vertices
                .chunks_exact(3)
                .map(|t| Triangle::new(t[0], t[1], t[2]))
                .collect()
        }
    };

    if triangles.is_empty() {
        return Err(MeshError::Empty);
    }
    Ok(triangles)
}

/// Axis-aligned box as 12 triangles.
///
/// Used by the demo's block letters and by tests.
pub fn box_triangles(min: Vec3, max: Vec3) -> Vec<Triangle> {
    let c = |x: bool, y: bool, z: bool| {
        Vec3::new(
            if x { max.x } else { min.x },
            if y { max.y } else { min.y },
            if z { max.z } else { min.z },
        )
    };
    let quads = [
        // -X, +X
        [c(false, false, false), c(false, false, true), c(false, true, true), c(false, true, false)],
        [c(true, false, false), c(true, true, false), c(true, true, true), c(true, false, true)],
        // -Y, +Y
        [c(false, false, false), c(true, false, false), c(true, false, true), c(false, false, true)],
        [c(false, true, false), c(false, true, true), c(true, true, true), c(true, true, false)],
        // -Z, +Z
        [c(false, false, false), c(false, true, false), c(true, true, false), c(true, false, false)],
        [c(false, false, true), c(true, false, true), c(true, true, true), c(false, true, true)],
    ];
    quads
        .iter()
        .flat_map(|q| [Triangle::new(q[0], q[1], q[2]), Triangle::new(q[0], q[2], q[3])])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_flat() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let tris = extract_triangles(&positions, None).unwrap();
        assert_eq!(tris.len(), 1);
        assert_eq!(tris[0].b, Vec3::X);
    }

    #[test]
    fn test_extract_indexed() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0];
        let indices = [0, 1, 2, 2, 1, 3];
        let tris = extract_triangles(&positions, Some(&indices)).unwrap();
        assert_eq!(tris.len(), 2);
        assert_eq!(tris[1].c, Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_extract_rejects_bad_input() {
        assert!(matches!(
            extract_triangles(&[0.0, 1.0], None),
            Err(MeshError::RaggedPositions(2))
        ));
        let positions = [0.0; 9];
        assert!(matches!(
            extract_triangles(&positions, Some(&[0, 1, 7])),
            Err(MeshError::IndexOutOfRange { index: 7, .. })
        ));
        assert!(matches!(
            extract_triangles(&positions, Some(&[0, 1])),
            Err(MeshError::RaggedIndices(2))
        ));
        assert!(matches!(extract_triangles(&[], None), Err(MeshError::Empty)));
    }

    #[test]
    fn test_aabb_distance() {
        let b = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(b.distance_to_point(Vec3::splat(0.5)), 0.0);
        assert!((b.distance_to_point(Vec3::new(2.0, 0.5, 0.5)) - 1.0).abs() < 1e-6);
        assert!((b.distance_to_point(Vec3::new(2.0, 2.0, 0.5)) - 2f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_aabb_longest_axis_and_front_plane() {
        let b = Aabb::new(Vec3::new(-1.0, 0.0, -0.2), Vec3::new(3.0, 1.0, 0.3));
        assert_eq!(b.longest_axis(), 0);
        assert!((b.max_along(Vec3::Z) - 0.3).abs() < 1e-6);
        assert!((b.max_along(-Vec3::Y) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_box_triangles_bounds() {
        let tris = box_triangles(Vec3::splat(-1.0), Vec3::splat(1.0));
        assert_eq!(tris.len(), 12);
        let b = Aabb::from_triangles(&tris);
        assert_eq!(b.min, Vec3::splat(-1.0));
        assert_eq!(b.max, Vec3::splat(1.0));
    }
}
