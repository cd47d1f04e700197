//! Proxy mesh data structures and generation

use crate::error::{UlrError, UlrResult};
use glam::{Vec2, Vec3};

/// Approximate scene reconstruction used for the position pre-pass and for
/// rendering per-camera depth maps.
///
/// Triangles are counter-clockwise when seen from their front side.
#[derive(Debug, Clone)]
pub struct ProxyMesh {
    pub positions: Vec<Vec3>,
    pub normals: Option<Vec<Vec3>>,
    pub colors: Option<Vec<Vec3>>,
    pub uvs: Option<Vec<Vec2>>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl ProxyMesh {
    pub fn new(name: &str) -> Self {
        Self {
            positions: Vec::new(),
            normals: None,
            colors: None,
            uvs: None,
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    /// Triangle soup without per-vertex attributes
    pub fn from_triangles(positions: Vec<Vec3>, indices: Vec<u32>, name: &str) -> Self {
        Self {
            positions,
            indices,
            ..Self::new(name)
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Get vertex positions as bytes
    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    /// Get index data as bytes
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Corners of triangle `i`
    #[inline]
    pub fn triangle(&self, i: usize) -> [Vec3; 3] {
        let base = i * 3;
        [
            self.positions[self.indices[base] as usize],
            self.positions[self.indices[base + 1] as usize],
            self.positions[self.indices[base + 2] as usize],
        ]
    }

    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        (0..self.triangle_count()).map(move |i| self.triangle(i))
    }

    /// Axis-aligned bounds, `None` for an empty mesh
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.positions.first()?;
        Some(
            self.positions
                .iter()
                .fold((first, first), |(lo, hi), &p| (lo.min(p), hi.max(p))),
        )
    }

    /// Check that indices reference valid vertices and attributes match
    pub fn validate(&self) -> UlrResult<()> {
        let invalid = |reason: String| UlrError::InvalidMesh {
            name: self.name.clone(),
            reason,
        };

        if self.indices.len() % 3 != 0 {
            return Err(invalid(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        if let Some(&index) = self
            .indices
            .iter()
            .find(|&&i| i as usize >= self.positions.len())
        {
            return Err(invalid(format!(
                "index {} out of range for {} vertices",
                index,
                self.positions.len()
            )));
        }
        if self.positions.iter().any(|p| !p.is_finite()) {
            return Err(invalid("non-finite vertex position".into()));
        }

        let attribute_lengths = [
            ("normals", self.normals.as_ref().map(Vec::len)),
            ("colors", self.colors.as_ref().map(Vec::len)),
            ("uvs", self.uvs.as_ref().map(Vec::len)),
        ];
        for (attribute, len) in attribute_lengths {
            if let Some(len) = len {
                if len != self.positions.len() {
                    return Err(invalid(format!(
                        "{} has {} entries for {} vertices",
                        attribute,
                        len,
                        self.positions.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Append another mesh, dropping attributes the two do not share
    pub fn merge(&mut self, other: &ProxyMesh) {
        let base = self.positions.len() as u32;
        let had_vertices = !self.positions.is_empty();

        fn merge_attribute<T: Clone>(
            mine: &mut Option<Vec<T>>,
            theirs: &Option<Vec<T>>,
            had_vertices: bool,
        ) {
            match (mine.as_mut(), theirs) {
                (Some(a), Some(b)) => a.extend_from_slice(b),
                (None, Some(b)) if !had_vertices => *mine = Some(b.clone()),
                _ => *mine = None,
            }
        }
        merge_attribute(&mut self.normals, &other.normals, had_vertices);
        merge_attribute(&mut self.colors, &other.colors, had_vertices);
        merge_attribute(&mut self.uvs, &other.uvs, had_vertices);

        self.positions.extend_from_slice(&other.positions);
        self.indices.extend(other.indices.iter().map(|i| i + base));
    }

    /// Create a quad spanning `center ± half_right ± half_up`, facing `half_right × half_up`
    pub fn quad(center: Vec3, half_right: Vec3, half_up: Vec3) -> Self {
        let normal = half_right.cross(half_up).normalize();
        let mut mesh = ProxyMesh::new("quad");
        mesh.positions = vec![
            center - half_right - half_up,
            center + half_right - half_up,
            center + half_right + half_up,
            center - half_right + half_up,
        ];
        mesh.normals = Some(vec![normal; 4]);
        mesh.uvs = Some(vec![
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 0.0),
        ]);
        mesh.indices = vec![0, 1, 2, 0, 2, 3];
        mesh
    }

    /// Create an axis-aligned box centered at `center`
    pub fn cube(center: Vec3, size: f32) -> Self {
        let mut mesh = ProxyMesh::new("cube");
        let h = size * 0.5;

        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];

        for (normal, right, up) in faces {
            mesh.merge(&ProxyMesh::quad(center + normal * h, right * h, up * h));
        }
        mesh.name = "cube".to_string();
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_winding_faces_normal() {
        let mesh = ProxyMesh::quad(Vec3::ZERO, Vec3::X, Vec3::Y);
        for [a, b, c] in mesh.triangles() {
            let n = (b - a).cross(c - a);
            assert!(n.dot(Vec3::Z) > 0.0);
        }
    }

    #[test]
    fn test_cube_faces_point_outwards() {
        let mesh = ProxyMesh::cube(Vec3::new(1.0, 2.0, 3.0), 2.0);
        assert_eq!(mesh.triangle_count(), 12);
        assert!(mesh.validate().is_ok());
        for [a, b, c] in mesh.triangles() {
            let n = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(n.dot(centroid - Vec3::new(1.0, 2.0, 3.0)) > 0.0);
        }
    }

    #[test]
    fn test_validate_rejects_bad_indices() {
        let mesh = ProxyMesh::from_triangles(vec![Vec3::ZERO; 3], vec![0, 1, 3], "bad");
        assert!(matches!(mesh.validate(), Err(UlrError::InvalidMesh { .. })));

        let mesh = ProxyMesh::from_triangles(vec![Vec3::ZERO; 3], vec![0, 1], "short");
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_attribute_mismatch() {
        let mut mesh = ProxyMesh::quad(Vec3::ZERO, Vec3::X, Vec3::Y);
        mesh.colors = Some(vec![Vec3::ONE; 2]);
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_merge_offsets_indices() {
        let mut mesh = ProxyMesh::quad(Vec3::ZERO, Vec3::X, Vec3::Y);
        mesh.merge(&ProxyMesh::quad(Vec3::Z, Vec3::X, Vec3::Y));
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(&mesh.indices[6..], &[4, 5, 6, 4, 6, 7]);
        assert!(mesh.validate().is_ok());
    }
}
