//! Vulkan command pools, barriers and internal one-time submissions.

use ash::vk;

use crate::backend::BackendError;

use super::conversion::convert_result;

/// Create a command pool whose buffers can be reset individually.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, BackendError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&pool_info, None) }
        .map_err(|e| convert_result(e, "create command pool"))
}

/// Allocate one primary command buffer from `pool`.
pub fn allocate_command_buffer(
    device: &ash::Device,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer, BackendError> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
        .map_err(|e| convert_result(e, "allocate command buffer"))?;
    buffers.into_iter().next().ok_or_else(|| {
        BackendError::Internal("driver returned no command buffer".to_string())
    })
}

/// Stages that operate in framebuffer space, allowed in a subpass self-dependency.
pub const FRAMEBUFFER_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw(),
);

/// Writes a subpass self-dependency makes visible.
pub const FRAMEBUFFER_WRITES: vk::AccessFlags = vk::AccessFlags::from_raw(
    vk::AccessFlags::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags::SHADER_WRITE.as_raw(),
);

/// Accesses a subpass self-dependency makes them visible to.
pub const FRAMEBUFFER_ACCESSES: vk::AccessFlags = vk::AccessFlags::from_raw(
    vk::AccessFlags::INPUT_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags::SHADER_READ.as_raw()
        | vk::AccessFlags::SHADER_WRITE.as_raw()
        | vk::AccessFlags::COLOR_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
);

/// Record a global memory barrier.
///
/// Inside a render pass the barrier is limited to the subpass self-dependency
/// every render pass declares.
pub fn record_memory_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    in_render_pass: bool,
    by_region: bool,
) {
    let (stages, src_access, dst_access, flags) = if in_render_pass {
        (
            FRAMEBUFFER_STAGES,
            FRAMEBUFFER_WRITES,
            FRAMEBUFFER_ACCESSES,
            vk::DependencyFlags::BY_REGION,
        )
    } else {
        (
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::AccessFlags::MEMORY_WRITE,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            if by_region {
                vk::DependencyFlags::BY_REGION
            } else {
                vk::DependencyFlags::empty()
            },
        )
    };
    let barrier = vk::MemoryBarrier::default()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);
    unsafe {
        device.cmd_pipeline_barrier(cmd, stages, stages, flags, &[barrier], &[], &[]);
    }
}

/// Record a whole-image layout transition.
pub fn record_layout_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        })
        .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
        .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// A private command buffer for work the backend issues on its own: layout
/// transitions of new images and of acquired and presented swapchain images.
pub struct ImmediateContext {
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
}

impl ImmediateContext {
    pub fn new(device: &ash::Device, queue_family_index: u32) -> Result<Self, BackendError> {
        let pool = create_command_pool(device, queue_family_index)?;
        let cmd = match allocate_command_buffer(device, pool) {
            Ok(cmd) => cmd,
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(e);
            }
        };
        let fence = match unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(convert_result(e, "create fence"));
            }
        };
        Ok(Self { pool, cmd, fence })
    }

    /// Record with `record`, submit on `queue` and block until it completes.
    pub fn submit<F>(
        &self,
        device: &ash::Device,
        queue: vk::Queue,
        wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
        signal: Option<vk::Semaphore>,
        record: F,
    ) -> Result<(), BackendError>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .reset_command_buffer(self.cmd, vk::CommandBufferResetFlags::empty())
                .map_err(|e| convert_result(e, "reset immediate command buffer"))?;
            device
                .begin_command_buffer(self.cmd, &begin_info)
                .map_err(|e| convert_result(e, "begin immediate command buffer"))?;
        }
        record(self.cmd);
        unsafe { device.end_command_buffer(self.cmd) }
            .map_err(|e| convert_result(e, "end immediate command buffer"))?;

        let command_buffers = [self.cmd];
        let wait_semaphores: Vec<vk::Semaphore> = wait.iter().map(|(s, _)| *s).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = wait.iter().map(|(_, st)| *st).collect();
        let signal_semaphores: Vec<vk::Semaphore> = signal.into_iter().collect();
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .queue_submit(queue, &[submit_info], self.fence)
                .map_err(|e| convert_result(e, "submit immediate command buffer"))?;
            let waited = device.wait_for_fences(&[self.fence], true, u64::MAX);
            let reset = device.reset_fences(&[self.fence]);
            waited.map_err(|e| convert_result(e, "wait for immediate submission"))?;
            reset.map_err(|e| convert_result(e, "reset immediate fence"))?;
        }
        Ok(())
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_fence(self.fence, None);
            device.destroy_command_pool(self.pool, None);
        }
    }
}
