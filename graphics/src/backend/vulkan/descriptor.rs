//! Vulkan descriptor set layouts, pools and writes.

use ash::vk;
use ash::vk::Handle;

use crate::backend::{BackendError, DescriptorResource, DescriptorWrite};
use crate::types::{DcEntry, DcType};

use super::conversion::{convert_descriptor_type, convert_result};

/// Create a descriptor set layout. Every binding is visible to all stages.
pub fn create_descriptor_layout(
    device: &ash::Device,
    entries: &[DcEntry],
) -> Result<vk::DescriptorSetLayout, BackendError> {
    let bindings: Vec<vk::DescriptorSetLayoutBinding> = entries
        .iter()
        .map(|entry| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(entry.id)
                .descriptor_type(convert_descriptor_type(entry.kind))
                .descriptor_count(entry.count)
                .stage_flags(vk::ShaderStageFlags::ALL)
        })
        .collect();

    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    unsafe { device.create_descriptor_set_layout(&create_info, None) }
        .map_err(|e| convert_result(e, "create descriptor set layout"))
}

/// Create a pool sized for exactly `count` sets of `layout` and allocate them.
pub fn allocate_descriptor_sets(
    device: &ash::Device,
    layout: vk::DescriptorSetLayout,
    entries: &[DcEntry],
    count: u32,
) -> Result<(vk::DescriptorPool, Vec<vk::DescriptorSet>), BackendError> {
    let pool_sizes: Vec<vk::DescriptorPoolSize> = entries
        .iter()
        .map(|entry| vk::DescriptorPoolSize {
            ty: convert_descriptor_type(entry.kind),
            descriptor_count: entry.count * count,
        })
        .collect();
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(count)
        .pool_sizes(&pool_sizes);
    let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
        .map_err(|e| convert_result(e, "create descriptor pool"))?;

    let layouts = vec![layout; count as usize];
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&layouts);
    match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
        Ok(sets) => Ok((pool, sets)),
        Err(e) => {
            unsafe { device.destroy_descriptor_pool(pool, None) };
            Err(convert_result(e, "allocate descriptor sets"))
        }
    }
}

/// Write one descriptor.
pub fn write_descriptor(device: &ash::Device, write: &DescriptorWrite) {
    let base = vk::WriteDescriptorSet::default()
        .dst_set(vk::DescriptorSet::from_raw(write.set.0))
        .dst_binding(write.binding)
        .dst_array_element(write.element)
        .descriptor_type(convert_descriptor_type(write.kind));

    match write.resource {
        DescriptorResource::Buffer {
            buffer,
            offset,
            size,
        } => {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: vk::Buffer::from_raw(buffer.0),
                offset,
                range: size,
            }];
            let descriptor_write = base.buffer_info(&buffer_info);
            unsafe { device.update_descriptor_sets(&[descriptor_write], &[]) };
        }
        DescriptorResource::Image { view, sampler } => {
            let image_info = [vk::DescriptorImageInfo {
                sampler: sampler
                    .map(|s| vk::Sampler::from_raw(s.0))
                    .unwrap_or_else(vk::Sampler::null),
                image_view: vk::ImageView::from_raw(view.0),
                image_layout: vk::ImageLayout::GENERAL,
            }];
            let descriptor_write = base.image_info(&image_info);
            unsafe { device.update_descriptor_sets(&[descriptor_write], &[]) };
        }
        DescriptorResource::Sampler(sampler) => {
            let image_info = [vk::DescriptorImageInfo {
                sampler: vk::Sampler::from_raw(sampler.0),
                image_view: vk::ImageView::null(),
                image_layout: vk::ImageLayout::UNDEFINED,
            }];
            let descriptor_write = base.image_info(&image_info);
            unsafe { device.update_descriptor_sets(&[descriptor_write], &[]) };
        }
    }
}

/// Reject a write whose descriptor type disagrees with its resource.
pub fn check_write(write: &DescriptorWrite) -> Result<(), BackendError> {
    let matches = match write.resource {
        DescriptorResource::Buffer { .. } => write.kind.is_buffer(),
        DescriptorResource::Image { sampler, .. } => match write.kind {
            DcType::Image => true,
            DcType::ImgSampler => sampler.is_some(),
            _ => false,
        },
        DescriptorResource::Sampler(_) => write.kind == DcType::Sampler,
    };
    if matches {
        Ok(())
    } else {
        Err(BackendError::InvalidParameter(format!(
            "descriptor {:?} cannot hold {:?}",
            write.kind, write.resource
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferHandle, DescriptorSetHandle, ImageViewHandle, SamplerHandle};

    fn write(kind: DcType, resource: DescriptorResource) -> DescriptorWrite {
        DescriptorWrite {
            set: DescriptorSetHandle(1),
            binding: 0,
            element: 0,
            kind,
            resource,
        }
    }

    #[test]
    fn test_write_kind_must_match_resource() {
        let buffer = DescriptorResource::Buffer {
            buffer: BufferHandle(2),
            offset: 0,
            size: 64,
        };
        let view = DescriptorResource::Image {
            view: ImageViewHandle(3),
            sampler: None,
        };
        assert!(check_write(&write(DcType::Uniform, buffer)).is_ok());
        assert!(check_write(&write(DcType::Image, buffer)).is_err());
        assert!(check_write(&write(DcType::Image, view)).is_ok());
        assert!(check_write(&write(DcType::ImgSampler, view)).is_err());
        assert!(check_write(&write(DcType::Sampler, DescriptorResource::Sampler(SamplerHandle(4)))).is_ok());
    }
}
