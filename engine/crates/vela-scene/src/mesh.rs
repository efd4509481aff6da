use std::rc::Rc;

use ash::vk;
use vela_gfx::{
    GfxBackend, GfxResult,
    resources::{
        buffer::{BufferDesc, GfxBuffer},
        vertex_layout::Vertex3D,
    },
};

/// mesh 中的一段 index 区间，使用 registry 中的一个材质槽
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submesh {
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
    pub material_index: u32,
}

/// 已经上传到 GPU 的静态网格
pub struct StaticMesh {
    name: String,
    vertex_buffer: GfxBuffer,
    index_buffer: GfxBuffer,
    vertex_count: u32,
    index_count: u32,
    submeshes: Vec<Submesh>,
    pub cast_shadows: bool,
}
// new & init
impl StaticMesh {
    /// `submeshes` 为空时，整个 mesh 作为一个 submesh
    pub fn new(
        backend: Rc<dyn GfxBackend>,
        name: &str,
        vertices: &[Vertex3D],
        indices: &[u32],
        submeshes: Vec<Submesh>,
    ) -> GfxResult<Self> {
        let _span = vela_crate_tools::profile_span!("StaticMesh::new");

        let vertex_buffer = GfxBuffer::new(
            backend.clone(),
            BufferDesc::host_visible(size_of_val(vertices) as vk::DeviceSize, vk::BufferUsageFlags::VERTEX_BUFFER),
            &format!("{name}-vertex"),
        )?;
        vertex_buffer.write_pod(0, vertices)?;

        let index_buffer = GfxBuffer::new(
            backend,
            BufferDesc::host_visible(size_of_val(indices) as vk::DeviceSize, vk::BufferUsageFlags::INDEX_BUFFER),
            &format!("{name}-index"),
        )?;
        index_buffer.write_pod(0, indices)?;

        log::debug!("upload mesh {name}: {} vertices, {} indices", vertices.len(), indices.len());
        let submeshes = if submeshes.is_empty() {
            vec![Submesh {
                first_index: 0,
                index_count: indices.len() as u32,
                vertex_offset: 0,
                material_index: 0,
            }]
        } else {
            submeshes
        };

        Ok(Self {
            name: name.to_string(),
            vertex_buffer,
            index_buffer,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
            submeshes,
            cast_shadows: true,
        })
    }
}
// getters
impl StaticMesh {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.vk_buffer()
    }

    #[inline]
    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.vk_buffer()
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    #[inline]
    pub fn submeshes(&self) -> &[Submesh] {
        &self.submeshes
    }

    #[inline]
    pub fn submesh(&self, index: u32) -> Option<&Submesh> {
        self.submeshes.get(index as usize)
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::headless::HeadlessBackend;

    use super::*;
    use crate::shapes::CubeShape;

    #[test]
    fn test_upload_cube() {
        let backend = Rc::new(HeadlessBackend::new());
        let (vertices, indices) = CubeShape::geometry();
        let mesh = StaticMesh::new(backend.clone(), "cube", &vertices, &indices, vec![]).unwrap();

        assert_eq!(mesh.submeshes().len(), 1);
        assert_eq!(mesh.submeshes()[0].index_count, 36);
        let uploaded = backend.buffer_contents(mesh.index_buffer()).unwrap();
        assert_eq!(uploaded.len(), 36 * 4);
        assert_eq!(bytemuck::cast_slice::<u8, u32>(&uploaded), indices.as_slice());
    }
}
