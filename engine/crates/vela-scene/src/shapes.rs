//! 内置的几何体
//!
//! 坐标系：RightHand, X-Right, Y-Up；三角形绕序：CCW

use std::rc::Rc;

use vela_gfx::{GfxBackend, GfxResult, resources::vertex_layout::Vertex3D};

use crate::mesh::StaticMesh;

fn vertex(position: glam::Vec3, normal: glam::Vec3, tangent: glam::Vec3, uv: glam::Vec2) -> Vertex3D {
    Vertex3D {
        position: position.to_array(),
        normal: normal.to_array(),
        tangent: tangent.to_array(),
        uv: uv.to_array(),
    }
}

/// 位于 XY 平面上的正立三角形，法线 +Z
///
/// ```text
///          y^
///           |
///           C
///          /|\
///         / | \
///        /  |  \
///       A---+---B---->x
/// ```
pub struct TriangleShape;

impl TriangleShape {
    const POSITIONS: [glam::Vec3; 3] = [
        glam::vec3(-1.0, -1.0, 0.0), // A
        glam::vec3(1.0, -1.0, 0.0),  // B
        glam::vec3(0.0, 1.0, 0.0),   // C
    ];

    const UVS: [glam::Vec2; 3] = [glam::vec2(0.0, 1.0), glam::vec2(1.0, 1.0), glam::vec2(0.5, 0.0)];

    pub fn geometry() -> (Vec<Vertex3D>, Vec<u32>) {
        let vertices = Self::POSITIONS
            .iter()
            .zip(Self::UVS.iter())
            .map(|(pos, uv)| vertex(*pos, glam::Vec3::Z, glam::Vec3::X, *uv))
            .collect();
        (vertices, vec![0, 1, 2])
    }

    pub fn create_mesh(backend: Rc<dyn GfxBackend>) -> GfxResult<StaticMesh> {
        let (vertices, indices) = Self::geometry();
        StaticMesh::new(backend, "triangle", &vertices, &indices, vec![])
    }
}

/// 位于 XZ 平面的正方形，边长为 2，法线 +Y
pub struct PlaneShape;

impl PlaneShape {
    pub fn geometry() -> (Vec<Vertex3D>, Vec<u32>) {
        let mut vertices = Vec::with_capacity(4);
        let mut indices = Vec::with_capacity(6);
        push_quad(&mut vertices, &mut indices, glam::Vec3::ZERO, glam::Vec3::Y, glam::Vec3::X);
        (vertices, indices)
    }

    pub fn create_mesh(backend: Rc<dyn GfxBackend>) -> GfxResult<StaticMesh> {
        let (vertices, indices) = Self::geometry();
        let mut mesh = StaticMesh::new(backend, "plane", &vertices, &indices, vec![])?;
        // 地面只接收阴影
        mesh.cast_shadows = false;
        Ok(mesh)
    }
}

/// 中心在原点、边长为 2 的立方体，每个面 4 个独立顶点
pub struct CubeShape;

impl CubeShape {
    /// (法线, 切线)
    const FACES: [(glam::Vec3, glam::Vec3); 6] = [
        (glam::Vec3::X, glam::Vec3::NEG_Z),
        (glam::Vec3::NEG_X, glam::Vec3::Z),
        (glam::Vec3::Y, glam::Vec3::X),
        (glam::Vec3::NEG_Y, glam::Vec3::X),
        (glam::Vec3::Z, glam::Vec3::X),
        (glam::Vec3::NEG_Z, glam::Vec3::NEG_X),
    ];

    pub fn geometry() -> (Vec<Vertex3D>, Vec<u32>) {
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, tangent) in Self::FACES {
            push_quad(&mut vertices, &mut indices, normal, normal, tangent);
        }
        (vertices, indices)
    }

    pub fn create_mesh(backend: Rc<dyn GfxBackend>) -> GfxResult<StaticMesh> {
        let (vertices, indices) = Self::geometry();
        StaticMesh::new(backend, "cube", &vertices, &indices, vec![])
    }
}

/// 以 `center` 为中心、边长为 2 的面，从法线一侧看为 CCW
fn push_quad(
    vertices: &mut Vec<Vertex3D>,
    indices: &mut Vec<u32>,
    center: glam::Vec3,
    normal: glam::Vec3,
    tangent: glam::Vec3,
) {
    let bitangent = normal.cross(tangent);
    let base = vertices.len() as u32;

    let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
    for (u, v) in corners {
        let position = center + tangent * u + bitangent * v;
        let uv = glam::vec2((u + 1.0) * 0.5, 1.0 - (v + 1.0) * 0.5);
        vertices.push(vertex(position, normal, tangent, uv));
    }
    indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 三角形的几何法线与顶点法线同向
    fn assert_ccw(vertices: &[Vertex3D], indices: &[u32]) {
        for tri in indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| glam::Vec3::from(vertices[i as usize].position));
            let face_normal = (b - a).cross(c - a);
            let normal = glam::Vec3::from(vertices[tri[0] as usize].normal);
            assert!(face_normal.dot(normal) > 0.0);
        }
    }

    #[test]
    fn test_cube_winding() {
        let (vertices, indices) = CubeShape::geometry();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert_ccw(&vertices, &indices);
        for v in &vertices {
            assert!(v.position.iter().all(|c| c.abs() <= 1.0 + f32::EPSILON));
        }
    }

    #[test]
    fn test_plane_and_triangle_winding() {
        let (vertices, indices) = PlaneShape::geometry();
        assert_ccw(&vertices, &indices);
        assert!(vertices.iter().all(|v| v.position[1] == 0.0));

        let (vertices, indices) = TriangleShape::geometry();
        assert_ccw(&vertices, &indices);
    }
}
