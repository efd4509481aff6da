use std::mem::offset_of;

use ash::vk;

#[repr(C)]
#[derive(Clone, Debug, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex3D {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub uv: [f32; 2],
}

/// 静态网格的顶点布局
///
/// - binding 0：逐顶点的 [`Vertex3D`]，location 0..=3
/// - binding 1：逐实例的 transform，4 个 vec4 行向量，location 4..=7
pub struct StaticMeshVertexLayout;

impl StaticMeshVertexLayout {
    pub const VERTEX_BINDING: u32 = 0;
    pub const INSTANCE_BINDING: u32 = 1;
    /// 每个实例一个 row-major 的 4x4 矩阵
    pub const INSTANCE_STRIDE: u32 = 64;

    pub fn vertex_input_bindings() -> Vec<vk::VertexInputBindingDescription> {
        vec![
            vk::VertexInputBindingDescription {
                binding: Self::VERTEX_BINDING,
                stride: size_of::<Vertex3D>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            },
            vk::VertexInputBindingDescription {
                binding: Self::INSTANCE_BINDING,
                stride: Self::INSTANCE_STRIDE,
                input_rate: vk::VertexInputRate::INSTANCE,
            },
        ]
    }

    pub fn vertex_input_attributes() -> Vec<vk::VertexInputAttributeDescription> {
        let vertex_attr = |location: u32, format: vk::Format, offset: usize| vk::VertexInputAttributeDescription {
            binding: Self::VERTEX_BINDING,
            location,
            format,
            offset: offset as u32,
        };

        let mut attrs = vec![
            vertex_attr(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex3D, position)),
            vertex_attr(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex3D, normal)),
            vertex_attr(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex3D, tangent)),
            vertex_attr(3, vk::Format::R32G32_SFLOAT, offset_of!(Vertex3D, uv)),
        ];

        // transform 的 4 行
        attrs.extend((0..4).map(|row| vk::VertexInputAttributeDescription {
            binding: Self::INSTANCE_BINDING,
            location: 4 + row,
            format: vk::Format::R32G32B32A32_SFLOAT,
            offset: row * 16,
        }));
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_locations() {
        assert_eq!(size_of::<Vertex3D>(), 44);

        let attrs = StaticMeshVertexLayout::vertex_input_attributes();
        assert_eq!(attrs.len(), 8);
        // location 连续且不重复
        for (idx, attr) in attrs.iter().enumerate() {
            assert_eq!(attr.location, idx as u32);
        }
        let last = attrs.last().unwrap();
        assert_eq!(last.binding, StaticMeshVertexLayout::INSTANCE_BINDING);
        assert_eq!(last.offset, 48);
    }
}
