use ash::vk;

/// 写入 descriptor 的资源，同时作为去重时的 identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorResource {
    UniformBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    StorageBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    CombinedImageSampler {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
    StorageImage {
        view: vk::ImageView,
    },
}

impl DescriptorResource {
    /// 整个 buffer 作为 uniform buffer
    pub fn uniform(buffer: vk::Buffer) -> Self {
        Self::UniformBuffer {
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    /// 整个 buffer 作为 storage buffer
    pub fn storage(buffer: vk::Buffer) -> Self {
        Self::StorageBuffer {
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    pub fn sampled(view: vk::ImageView, sampler: vk::Sampler) -> Self {
        Self::CombinedImageSampler {
            view,
            sampler,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            DescriptorResource::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorResource::StorageBuffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorResource::CombinedImageSampler { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            DescriptorResource::StorageImage { .. } => vk::DescriptorType::STORAGE_IMAGE,
        }
    }
}

/// 一次 descriptor 写入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub resource: DescriptorResource,
}
