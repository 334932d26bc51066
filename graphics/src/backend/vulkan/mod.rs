//! Vulkan backend implementation using ash.
//!
//! Backend handles are the raw values of the Vulkan handles they name.
//! Images live in `GENERAL` layout from creation to destruction, so recorded
//! work never needs per-image layout tracking.

mod allocator;
mod command;
mod conversion;
mod debug;
mod descriptor;
mod device;
mod instance;
mod pipeline;
mod render_pass;
mod swapchain;

use std::collections::{HashMap, HashSet};

use ash::vk;
use ash::vk::Handle;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;

use crate::backend::{
    AcquireOutcome, BackendError, BufferCopy, BufferHandle, BufferImageCopy, CommandBufferHandle,
    CommandPoolHandle, ComputePipelineInfo, DescriptorLayoutHandle, DescriptorPoolHandle,
    DescriptorSetHandle, DescriptorWrite, FramebufferHandle, FramebufferInfo, GpuBackend,
    GraphicsPipelineInfo, ImageCopy, ImageHandle, ImageLocation, ImageViewHandle, ImageViewInfo,
    PipelineHandle, PipelineLayoutHandle, RenderPassBeginInfo, RenderPassHandle, RenderPassInfo,
    SamplerHandle, SemaphoreHandle, ShaderHandle, SubmitBatch, SwapchainHandle, SwapchainImages,
    SwapchainInfo,
};
use crate::device::DeviceParameters;
use crate::types::{
    BufferDescriptor, BufferUsage, DcEntry, DeviceLimits, ImageDescriptor, ImageDimension,
    IndexType, QueueCapabilities, SamplerDescriptor, ScissorRect, ShaderDescriptor, Viewport,
};

use self::command::ImmediateContext;
use self::conversion::{
    aspect_flags, convert_address_mode, convert_aspect, convert_buffer_usage, convert_clear_value,
    convert_compare_function, convert_filter_mode, convert_format, convert_image_usage,
    convert_index_type, convert_mipmap_filter_mode, convert_pipeline_stage, convert_result,
    convert_samples, convert_view_dimension,
};
use self::swapchain::VulkanSwapchain;

/// Vulkan-based GPU backend using ash.
///
/// This backend provides native Vulkan access with:
/// - Validation layers routed through `log` when requested
/// - gpu-allocator for memory management
/// - Classic render passes, one per load/store combination the front end asks for
/// - A single queue, guarded by a mutex, for all submissions and presents
pub struct VulkanBackend {
    /// Vulkan entry points (function loader).
    entry: ash::Entry,
    /// Vulkan instance.
    instance: ash::Instance,
    /// Debug utils extension instance.
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    /// Debug messenger for validation layer output.
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    /// Selected physical device.
    physical_device: vk::PhysicalDevice,
    /// Logical device.
    device: ash::Device,
    /// The one queue, externally synchronized.
    queue: Mutex<vk::Queue>,
    queue_family: u32,
    capabilities: QueueCapabilities,
    limits: DeviceLimits,
    sampler_anisotropy: bool,
    /// Memory allocator. Taken on drop, before the device goes away.
    allocator: Mutex<Option<Allocator>>,
    /// Memory backing each live buffer.
    buffers: Mutex<HashMap<vk::Buffer, Allocation>>,
    /// Memory backing each live image created by this backend.
    images: Mutex<HashMap<vk::Image, Allocation>>,
    swapchains: Mutex<HashMap<vk::SwapchainKHR, VulkanSwapchain>>,
    /// Command buffers currently inside a render pass.
    in_render_pass: Mutex<HashSet<vk::CommandBuffer>>,
    /// Internal command buffer for layout transitions.
    immediate: Mutex<ImmediateContext>,
    /// Surface extension.
    surface_loader: ash::khr::surface::Instance,
    /// Swapchain extension.
    swapchain_loader: ash::khr::swapchain::Device,
    validation_enabled: bool,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("queue_family", &self.queue_family)
            .field("capabilities", &self.capabilities)
            .field("validation_enabled", &self.validation_enabled)
            .finish()
    }
}

impl VulkanBackend {
    /// Create a new Vulkan backend.
    ///
    /// This initializes the Vulkan instance, selects a physical device,
    /// creates a logical device, and sets up the memory allocator.
    pub fn with_params(params: &DeviceParameters) -> Result<Self, BackendError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let validation_enabled = params.validation;
        let parts = instance::create_instance(&entry, validation_enabled)?;

        let selected = device::select_physical_device(&parts.instance).and_then(|physical| {
            device::find_queue_family(&parts.instance, physical)
                .map(|family| (physical, family))
                .ok_or_else(|| {
                    BackendError::InitializationFailed(
                        "No graphics and compute queue family found".to_string(),
                    )
                })
        });
        let (physical_device, queue_family) = match selected {
            Ok(selected) => selected,
            Err(e) => {
                destroy_instance(&parts);
                return Err(e);
            }
        };

        let device =
            match device::create_logical_device(&parts.instance, physical_device, queue_family) {
                Ok(device) => device,
                Err(e) => {
                    destroy_instance(&parts);
                    return Err(e);
                }
            };

        let setup = allocator::create_allocator(&parts.instance, physical_device, device.clone())
            .and_then(|allocator| {
                ImmediateContext::new(&device, queue_family).map(|immediate| (allocator, immediate))
            });
        let (allocator, immediate) = match setup {
            Ok(setup) => setup,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                destroy_instance(&parts);
                return Err(e);
            }
        };

        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let capabilities =
            device::queue_capabilities(&parts.instance, physical_device, queue_family);
        let limits = device::device_limits(&parts.instance, physical_device);
        let features = unsafe { parts.instance.get_physical_device_features(physical_device) };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &parts.instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(&parts.instance, &device);

        log::info!(
            "Vulkan backend initialized (queue family: {}, capabilities: {:?}, validation: {})",
            queue_family,
            capabilities,
            parts.debug_messenger.is_some()
        );

        Ok(Self {
            entry,
            instance: parts.instance,
            debug_utils: parts.debug_utils,
            debug_messenger: parts.debug_messenger,
            physical_device,
            device,
            queue: Mutex::new(queue),
            queue_family,
            capabilities,
            limits,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            allocator: Mutex::new(Some(allocator)),
            buffers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            swapchains: Mutex::new(HashMap::new()),
            in_render_pass: Mutex::new(HashSet::new()),
            immediate: Mutex::new(immediate),
            surface_loader,
            swapchain_loader,
            validation_enabled,
        })
    }

    /// Get the Vulkan device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the queue family index used for all work.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Record work into the internal command buffer and run it to completion.
    fn immediate<F>(
        &self,
        wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
        signal: Option<vk::Semaphore>,
        record: F,
    ) -> Result<(), BackendError>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let context = self.immediate.lock();
        let queue = self.queue.lock();
        context.submit(&self.device, *queue, wait, signal, |cmd| {
            record(&self.device, cmd)
        })
    }

    fn allocate_memory(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation, BackendError> {
        let mut guard = self.allocator.lock();
        let allocator = guard.as_mut().ok_or_else(|| {
            BackendError::Internal("memory allocator already destroyed".to_string())
        })?;
        allocator::allocate(allocator, name, requirements, location, linear)
    }

    fn free_memory(&self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.lock().as_mut()
            && let Err(e) = allocator.free(allocation)
        {
            log::error!("Failed to free GPU memory: {}", e);
        }
    }

    fn create_image_inner(
        &self,
        descriptor: &ImageDescriptor,
    ) -> Result<(vk::Image, Allocation), BackendError> {
        let format = convert_format(descriptor.format)?;
        let aspect = convert_aspect(descriptor.format.aspect())?;
        let (image_type, extent) = match descriptor.dimension {
            ImageDimension::D1 => (
                vk::ImageType::TYPE_1D,
                vk::Extent3D {
                    width: descriptor.size.width,
                    height: 1,
                    depth: 1,
                },
            ),
            ImageDimension::D2 => (
                vk::ImageType::TYPE_2D,
                vk::Extent3D {
                    width: descriptor.size.width,
                    height: descriptor.size.height,
                    depth: 1,
                },
            ),
            ImageDimension::D3 => (
                vk::ImageType::TYPE_3D,
                vk::Extent3D {
                    width: descriptor.size.width,
                    height: descriptor.size.height,
                    depth: descriptor.size.depth,
                },
            ),
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(image_type)
            .format(format)
            .extent(extent)
            .mip_levels(descriptor.levels)
            .array_layers(descriptor.layers)
            .samples(convert_samples(descriptor.samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_image_usage(descriptor.usage, descriptor.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| convert_result(e, "create image"))?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let name = descriptor.label.as_deref().unwrap_or("image");
        let allocation =
            match self.allocate_memory(name, requirements, MemoryLocation::GpuOnly, false) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { self.device.destroy_image(image, None) };
                    return Err(e);
                }
            };

        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(|e| convert_result(e, "bind image memory"))
        .and_then(|()| {
            self.immediate(None, None, |device, cmd| {
                command::record_layout_transition(
                    device,
                    cmd,
                    image,
                    aspect,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::GENERAL,
                );
            })
        });
        if let Err(e) = bound {
            unsafe { self.device.destroy_image(image, None) };
            self.free_memory(allocation);
            return Err(e);
        }

        Ok((image, allocation))
    }
}

fn destroy_instance(parts: &instance::InstanceParts) {
    unsafe {
        if let (Some(debug_utils), Some(messenger)) = (&parts.debug_utils, parts.debug_messenger) {
            debug_utils.destroy_debug_utils_messenger(messenger, None);
        }
        parts.instance.destroy_instance(None);
    }
}

fn cmd_handle(cmd: CommandBufferHandle) -> vk::CommandBuffer {
    vk::CommandBuffer::from_raw(cmd.0)
}

fn subresource_layers(location: &ImageLocation, layers: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: aspect_flags(location.aspect),
        mip_level: location.level,
        base_array_layer: location.base_layer,
        layer_count: layers,
    }
}

fn offset(location: &ImageLocation) -> vk::Offset3D {
    vk::Offset3D {
        x: location.origin.x as i32,
        y: location.origin.y as i32,
        z: location.origin.z as i32,
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            let swapchains = std::mem::take(&mut *self.swapchains.lock());
            for swapchain in swapchains.values() {
                swapchain.destroy(self);
            }

            let buffers = std::mem::take(&mut *self.buffers.lock());
            let images = std::mem::take(&mut *self.images.lock());
            if !buffers.is_empty() || !images.is_empty() {
                log::warn!(
                    "Vulkan backend dropped with {} buffers and {} images alive",
                    buffers.len(),
                    images.len()
                );
            }
            for (buffer, allocation) in buffers {
                self.device.destroy_buffer(buffer, None);
                self.free_memory(allocation);
            }
            for (image, allocation) in images {
                self.device.destroy_image(image, None);
                self.free_memory(allocation);
            }

            self.immediate.lock().destroy(&self.device);

            // The allocator frees its memory blocks and must go before the device.
            drop(self.allocator.lock().take());

            self.device.destroy_device(None);

            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// ============================================================================
// GpuBackend
// ============================================================================

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn queue_capabilities(&self) -> QueueCapabilities {
        self.capabilities
    }

    // --- Resources ---

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, BackendError> {
        let usage = descriptor.effective_usage();

        // Every buffer is host visible so it can be written and read back
        // directly. Pure copy targets favor reads.
        let location = if !usage.intersects(
            BufferUsage::VERTEX | BufferUsage::INDEX | BufferUsage::UNIFORM,
        ) && usage.contains(BufferUsage::COPY_DST)
        {
            MemoryLocation::GpuToCpu
        } else {
            MemoryLocation::CpuToGpu
        };

        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(convert_buffer_usage(usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| convert_result(e, "create buffer"))?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let name = descriptor.label.as_deref().unwrap_or("buffer");
        let allocation = match self.allocate_memory(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free_memory(allocation);
            return Err(convert_result(e, "bind buffer memory"));
        }

        self.buffers.lock().insert(buffer, allocation);
        Ok(BufferHandle(buffer.as_raw()))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let buffer = vk::Buffer::from_raw(buffer.0);
        let allocation = self.buffers.lock().remove(&buffer);
        unsafe { self.device.destroy_buffer(buffer, None) };
        match allocation {
            Some(allocation) => self.free_memory(allocation),
            None => log::warn!("Destroyed buffer {:?} without tracked memory", buffer),
        }
    }

    fn write_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let mut buffers = self.buffers.lock();
        let allocation = buffers
            .get_mut(&vk::Buffer::from_raw(buffer.0))
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown buffer {:?}", buffer)))?;
        let mapped = allocation.mapped_slice_mut().ok_or_else(|| {
            BackendError::Internal("Buffer is not mapped for CPU access".to_string())
        })?;
        let start = offset as usize;
        let dst = mapped
            .get_mut(start..start + data.len())
            .ok_or_else(|| {
                BackendError::InvalidParameter(format!(
                    "write of {} bytes at {} exceeds buffer memory",
                    data.len(),
                    offset
                ))
            })?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, BackendError> {
        let buffers = self.buffers.lock();
        let allocation = buffers
            .get(&vk::Buffer::from_raw(buffer.0))
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown buffer {:?}", buffer)))?;
        let mapped = allocation.mapped_slice().ok_or_else(|| {
            BackendError::Internal("Buffer is not mapped for CPU access".to_string())
        })?;
        let start = offset as usize;
        mapped
            .get(start..start + size as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                BackendError::InvalidParameter(format!(
                    "read of {} bytes at {} exceeds buffer memory",
                    size, offset
                ))
            })
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<ImageHandle, BackendError> {
        let (image, allocation) = self.create_image_inner(descriptor)?;
        self.images.lock().insert(image, allocation);
        Ok(ImageHandle(image.as_raw()))
    }

    fn destroy_image(&self, image: ImageHandle) {
        let image = vk::Image::from_raw(image.0);
        let Some(allocation) = self.images.lock().remove(&image) else {
            log::warn!("Ignoring destroy of untracked image {:?}", image);
            return;
        };
        unsafe { self.device.destroy_image(image, None) };
        self.free_memory(allocation);
    }

    fn create_image_view(&self, info: &ImageViewInfo) -> Result<ImageViewHandle, BackendError> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(vk::Image::from_raw(info.image.0))
            .view_type(convert_view_dimension(info.dimension))
            .format(convert_format(info.format)?)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: convert_aspect(info.aspect)?,
                base_mip_level: info.base_level,
                level_count: info.levels,
                base_array_layer: info.base_layer,
                layer_count: info.layers,
            });

        let view = unsafe { self.device.create_image_view(&view_info, None) }
            .map_err(|e| convert_result(e, "create image view"))?;
        Ok(ImageViewHandle(view.as_raw()))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        unsafe {
            self.device
                .destroy_image_view(vk::ImageView::from_raw(view.0), None)
        };
    }

    fn create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerHandle, BackendError> {
        let anisotropy = self.sampler_anisotropy && descriptor.anisotropy_clamp > 1;
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter_mode(descriptor.mag_filter))
            .min_filter(convert_filter_mode(descriptor.min_filter))
            .mipmap_mode(convert_mipmap_filter_mode(descriptor.mipmap_filter))
            .address_mode_u(convert_address_mode(descriptor.address_mode_u))
            .address_mode_v(convert_address_mode(descriptor.address_mode_v))
            .address_mode_w(convert_address_mode(descriptor.address_mode_w))
            .mip_lod_bias(0.0)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(descriptor.anisotropy_clamp as f32)
            .compare_enable(descriptor.compare.is_some())
            .compare_op(
                descriptor
                    .compare
                    .map(convert_compare_function)
                    .unwrap_or(vk::CompareOp::ALWAYS),
            )
            .min_lod(descriptor.lod_min_clamp)
            .max_lod(descriptor.lod_max_clamp)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
            .unnormalized_coordinates(false);

        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }
            .map_err(|e| convert_result(e, "create sampler"))?;
        Ok(SamplerHandle(sampler.as_raw()))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        unsafe {
            self.device
                .destroy_sampler(vk::Sampler::from_raw(sampler.0), None)
        };
    }

    fn create_shader(&self, descriptor: &ShaderDescriptor) -> Result<ShaderHandle, BackendError> {
        let module = pipeline::create_shader_module(&self.device, descriptor)?;
        Ok(ShaderHandle(module.as_raw()))
    }

    fn destroy_shader(&self, shader: ShaderHandle) {
        unsafe {
            self.device
                .destroy_shader_module(vk::ShaderModule::from_raw(shader.0), None)
        };
    }

    // --- Descriptor tables ---

    fn create_descriptor_layout(
        &self,
        entries: &[DcEntry],
    ) -> Result<DescriptorLayoutHandle, BackendError> {
        let layout = descriptor::create_descriptor_layout(&self.device, entries)?;
        Ok(DescriptorLayoutHandle(layout.as_raw()))
    }

    fn destroy_descriptor_layout(&self, layout: DescriptorLayoutHandle) {
        unsafe {
            self.device
                .destroy_descriptor_set_layout(vk::DescriptorSetLayout::from_raw(layout.0), None)
        };
    }

    fn allocate_descriptor_sets(
        &self,
        layout: DescriptorLayoutHandle,
        entries: &[DcEntry],
        count: u32,
    ) -> Result<(DescriptorPoolHandle, Vec<DescriptorSetHandle>), BackendError> {
        let (pool, sets) = descriptor::allocate_descriptor_sets(
            &self.device,
            vk::DescriptorSetLayout::from_raw(layout.0),
            entries,
            count,
        )?;
        Ok((
            DescriptorPoolHandle(pool.as_raw()),
            sets.into_iter()
                .map(|set| DescriptorSetHandle(set.as_raw()))
                .collect(),
        ))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        unsafe {
            self.device
                .destroy_descriptor_pool(vk::DescriptorPool::from_raw(pool.0), None)
        };
    }

    fn write_descriptor(&self, write: &DescriptorWrite) -> Result<(), BackendError> {
        descriptor::check_write(write)?;
        descriptor::write_descriptor(&self.device, write);
        Ok(())
    }

    // --- Passes and pipelines ---

    fn create_render_pass(&self, info: &RenderPassInfo) -> Result<RenderPassHandle, BackendError> {
        let render_pass = render_pass::create_render_pass(&self.device, info)?;
        Ok(RenderPassHandle(render_pass.as_raw()))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        unsafe {
            self.device
                .destroy_render_pass(vk::RenderPass::from_raw(render_pass.0), None)
        };
    }

    fn create_framebuffer(
        &self,
        info: &FramebufferInfo,
    ) -> Result<FramebufferHandle, BackendError> {
        let framebuffer = render_pass::create_framebuffer(&self.device, info)?;
        Ok(FramebufferHandle(framebuffer.as_raw()))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        unsafe {
            self.device
                .destroy_framebuffer(vk::Framebuffer::from_raw(framebuffer.0), None)
        };
    }

    fn create_pipeline_layout(
        &self,
        layouts: &[DescriptorLayoutHandle],
    ) -> Result<PipelineLayoutHandle, BackendError> {
        let layout = pipeline::create_pipeline_layout(&self.device, layouts)?;
        Ok(PipelineLayoutHandle(layout.as_raw()))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        unsafe {
            self.device
                .destroy_pipeline_layout(vk::PipelineLayout::from_raw(layout.0), None)
        };
    }

    fn create_graphics_pipeline(
        &self,
        info: &GraphicsPipelineInfo,
    ) -> Result<PipelineHandle, BackendError> {
        let pipeline = pipeline::create_graphics_pipeline(&self.device, info)?;
        Ok(PipelineHandle(pipeline.as_raw()))
    }

    fn create_compute_pipeline(
        &self,
        info: &ComputePipelineInfo,
    ) -> Result<PipelineHandle, BackendError> {
        let pipeline = pipeline::create_compute_pipeline(&self.device, info)?;
        Ok(PipelineHandle(pipeline.as_raw()))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        unsafe {
            self.device
                .destroy_pipeline(vk::Pipeline::from_raw(pipeline.0), None)
        };
    }

    // --- Command pools and buffers ---

    fn create_command_pool(&self) -> Result<CommandPoolHandle, BackendError> {
        let pool = command::create_command_pool(&self.device, self.queue_family)?;
        Ok(CommandPoolHandle(pool.as_raw()))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        unsafe {
            self.device
                .destroy_command_pool(vk::CommandPool::from_raw(pool.0), None)
        };
    }

    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
    ) -> Result<CommandBufferHandle, BackendError> {
        let cmd =
            command::allocate_command_buffer(&self.device, vk::CommandPool::from_raw(pool.0))?;
        Ok(CommandBufferHandle(cmd.as_raw()))
    }

    fn begin_command_buffer(&self, cmd: CommandBufferHandle) -> Result<(), BackendError> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd_handle(cmd), &begin_info) }
            .map_err(|e| convert_result(e, "begin command buffer"))
    }

    fn end_command_buffer(&self, cmd: CommandBufferHandle) -> Result<(), BackendError> {
        unsafe { self.device.end_command_buffer(cmd_handle(cmd)) }
            .map_err(|e| convert_result(e, "end command buffer"))
    }

    fn reset_command_buffer(&self, cmd: CommandBufferHandle) -> Result<(), BackendError> {
        let cmd = cmd_handle(cmd);
        self.in_render_pass.lock().remove(&cmd);
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(|e| convert_result(e, "reset command buffer"))
    }

    // --- Recording ---

    fn cmd_begin_render_pass(&self, cmd: CommandBufferHandle, info: &RenderPassBeginInfo) {
        let cmd = cmd_handle(cmd);
        let clear_values: Vec<vk::ClearValue> =
            info.clear_values.iter().map(convert_clear_value).collect();
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(vk::RenderPass::from_raw(info.render_pass.0))
            .framebuffer(vk::Framebuffer::from_raw(info.framebuffer.0))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: info.extent.width,
                    height: info.extent.height,
                },
            })
            .clear_values(&clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE)
        };
        self.in_render_pass.lock().insert(cmd);
    }

    fn cmd_end_render_pass(&self, cmd: CommandBufferHandle) {
        let cmd = cmd_handle(cmd);
        unsafe { self.device.cmd_end_render_pass(cmd) };
        self.in_render_pass.lock().remove(&cmd);
    }

    fn cmd_set_viewport(&self, cmd: CommandBufferHandle, viewport: &Viewport) {
        let viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { self.device.cmd_set_viewport(cmd_handle(cmd), 0, &[viewport]) };
    }

    fn cmd_set_scissor(&self, cmd: CommandBufferHandle, scissor: &ScissorRect) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x,
                y: scissor.y,
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        unsafe { self.device.cmd_set_scissor(cmd_handle(cmd), 0, &[scissor]) };
    }

    fn cmd_bind_graphics_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        unsafe {
            self.device.cmd_bind_pipeline(
                cmd_handle(cmd),
                vk::PipelineBindPoint::GRAPHICS,
                vk::Pipeline::from_raw(pipeline.0),
            )
        };
    }

    fn cmd_bind_compute_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        unsafe {
            self.device.cmd_bind_pipeline(
                cmd_handle(cmd),
                vk::PipelineBindPoint::COMPUTE,
                vk::Pipeline::from_raw(pipeline.0),
            )
        };
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: CommandBufferHandle,
        compute: bool,
        layout: PipelineLayoutHandle,
        first: u32,
        sets: &[DescriptorSetHandle],
    ) {
        let bind_point = if compute {
            vk::PipelineBindPoint::COMPUTE
        } else {
            vk::PipelineBindPoint::GRAPHICS
        };
        let sets: Vec<vk::DescriptorSet> = sets
            .iter()
            .map(|set| vk::DescriptorSet::from_raw(set.0))
            .collect();
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd_handle(cmd),
                bind_point,
                vk::PipelineLayout::from_raw(layout.0),
                first,
                &sets,
                &[],
            )
        };
    }

    fn cmd_bind_vertex_buffer(
        &self,
        cmd: CommandBufferHandle,
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    ) {
        unsafe {
            self.device.cmd_bind_vertex_buffers(
                cmd_handle(cmd),
                slot,
                &[vk::Buffer::from_raw(buffer.0)],
                &[offset],
            )
        };
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    ) {
        unsafe {
            self.device.cmd_bind_index_buffer(
                cmd_handle(cmd),
                vk::Buffer::from_raw(buffer.0),
                offset,
                convert_index_type(index_type),
            )
        };
    }

    fn cmd_draw(
        &self,
        cmd: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw(
                cmd_handle(cmd),
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        };
    }

    fn cmd_draw_indexed(
        &self,
        cmd: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                cmd_handle(cmd),
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    fn cmd_dispatch(&self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(cmd_handle(cmd), x, y, z) };
    }

    fn cmd_memory_barrier(&self, cmd: CommandBufferHandle, by_region: bool) {
        let cmd = cmd_handle(cmd);
        let in_render_pass = self.in_render_pass.lock().contains(&cmd);
        command::record_memory_barrier(&self.device, cmd, in_render_pass, by_region);
    }

    fn cmd_copy_buffer(
        &self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        region: &BufferCopy,
    ) {
        let region = vk::BufferCopy {
            src_offset: region.src_offset,
            dst_offset: region.dst_offset,
            size: region.size,
        };
        unsafe {
            self.device.cmd_copy_buffer(
                cmd_handle(cmd),
                vk::Buffer::from_raw(src.0),
                vk::Buffer::from_raw(dst.0),
                &[region],
            )
        };
    }

    fn cmd_copy_image(&self, cmd: CommandBufferHandle, region: &ImageCopy) {
        let copy = vk::ImageCopy {
            src_subresource: subresource_layers(&region.src, region.layers),
            src_offset: offset(&region.src),
            dst_subresource: subresource_layers(&region.dst, region.layers),
            dst_offset: offset(&region.dst),
            extent: vk::Extent3D {
                width: region.extent.width,
                height: region.extent.height,
                depth: region.extent.depth,
            },
        };
        unsafe {
            self.device.cmd_copy_image(
                cmd_handle(cmd),
                vk::Image::from_raw(region.src.image.0),
                vk::ImageLayout::GENERAL,
                vk::Image::from_raw(region.dst.image.0),
                vk::ImageLayout::GENERAL,
                &[copy],
            )
        };
    }

    fn cmd_copy_buffer_to_image(&self, cmd: CommandBufferHandle, region: &BufferImageCopy) {
        let copy = vk::BufferImageCopy {
            buffer_offset: region.buffer_offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: subresource_layers(&region.dst, region.layers),
            image_offset: offset(&region.dst),
            image_extent: vk::Extent3D {
                width: region.extent.width,
                height: region.extent.height,
                depth: region.extent.depth,
            },
        };
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd_handle(cmd),
                vk::Buffer::from_raw(region.buffer.0),
                vk::Image::from_raw(region.dst.image.0),
                vk::ImageLayout::GENERAL,
                &[copy],
            )
        };
    }

    // --- Submission ---

    fn create_semaphore(&self) -> Result<SemaphoreHandle, BackendError> {
        let semaphore = unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .map_err(|e| convert_result(e, "create semaphore"))?;
        Ok(SemaphoreHandle(semaphore.as_raw()))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        unsafe {
            self.device
                .destroy_semaphore(vk::Semaphore::from_raw(semaphore.0), None)
        };
    }

    fn queue_submit(&self, batches: &[SubmitBatch]) -> Result<(), BackendError> {
        struct Batch {
            command_buffers: Vec<vk::CommandBuffer>,
            wait: Vec<vk::Semaphore>,
            stages: Vec<vk::PipelineStageFlags>,
            signal: Vec<vk::Semaphore>,
        }

        let mut converted = Vec::with_capacity(batches.len());
        for batch in batches {
            converted.push(Batch {
                command_buffers: batch.command_buffers.iter().copied().map(cmd_handle).collect(),
                wait: batch
                    .wait
                    .iter()
                    .map(|(semaphore, _)| vk::Semaphore::from_raw(semaphore.0))
                    .collect(),
                stages: batch
                    .wait
                    .iter()
                    .map(|(_, stage)| convert_pipeline_stage(*stage))
                    .collect::<Result<_, _>>()?,
                signal: batch
                    .signal
                    .iter()
                    .map(|semaphore| vk::Semaphore::from_raw(semaphore.0))
                    .collect(),
            });
        }
        let submits: Vec<vk::SubmitInfo<'_>> = converted
            .iter()
            .map(|batch| {
                vk::SubmitInfo::default()
                    .command_buffers(&batch.command_buffers)
                    .wait_semaphores(&batch.wait)
                    .wait_dst_stage_mask(&batch.stages)
                    .signal_semaphores(&batch.signal)
            })
            .collect();

        let queue = self.queue.lock();
        unsafe {
            self.device
                .queue_submit(*queue, &submits, vk::Fence::null())
        }
        .map_err(|e| convert_result(e, "queue submit"))
    }

    fn queue_wait_idle(&self) -> Result<(), BackendError> {
        let queue = self.queue.lock();
        unsafe { self.device.queue_wait_idle(*queue) }
            .map_err(|e| convert_result(e, "queue wait idle"))
    }

    // --- Presentation ---

    fn create_swapchain(&self, info: &SwapchainInfo) -> Result<SwapchainImages, BackendError> {
        let swapchain = VulkanSwapchain::new(self, info)?;
        let images = swapchain.images();
        self.swapchains
            .lock()
            .insert(vk::SwapchainKHR::from_raw(images.swapchain.0), swapchain);
        Ok(images)
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        let Some(removed) = self
            .swapchains
            .lock()
            .remove(&vk::SwapchainKHR::from_raw(swapchain.0))
        else {
            log::warn!("Ignoring destroy of unknown swapchain {:?}", swapchain);
            return;
        };
        if let Err(e) = self.queue_wait_idle() {
            log::error!("Failed to drain queue before destroying swapchain: {}", e);
        }
        removed.destroy(self);
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
        non_blocking: bool,
    ) -> Result<AcquireOutcome, BackendError> {
        let swapchains = self.swapchains.lock();
        let entry = swapchains
            .get(&vk::SwapchainKHR::from_raw(swapchain.0))
            .ok_or_else(|| {
                BackendError::InvalidParameter(format!("unknown swapchain {:?}", swapchain))
            })?;
        entry.acquire(self, vk::Semaphore::from_raw(signal.0), non_blocking)
    }

    fn present(&self, swapchain: SwapchainHandle, index: u32) -> Result<bool, BackendError> {
        let swapchains = self.swapchains.lock();
        let entry = swapchains
            .get(&vk::SwapchainKHR::from_raw(swapchain.0))
            .ok_or_else(|| {
                BackendError::InvalidParameter(format!("unknown swapchain {:?}", swapchain))
            })?;
        entry.present(self, index)
    }
}

static_assertions::assert_impl_all!(VulkanBackend: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferUsage, Format, ImageUsage};

    /// Machines without a Vulkan driver skip the body.
    fn backend() -> Option<VulkanBackend> {
        let _ = env_logger::builder().is_test(true).try_init();
        match VulkanBackend::with_params(&DeviceParameters::new().with_validation(false)) {
            Ok(backend) => Some(backend),
            Err(e) => {
                log::warn!("Skipping Vulkan test: {}", e);
                None
            }
        }
    }

    #[test]
    fn test_buffer_write_read() {
        let Some(backend) = backend() else { return };
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::COPY_DST))
            .unwrap();
        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.read_buffer(buffer, 4, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(backend.read_buffer(buffer, 0, 4096).is_err());
        backend.destroy_buffer(buffer);
    }

    #[test]
    fn test_image_lifecycle() {
        let Some(backend) = backend() else { return };
        let image = backend
            .create_image(&ImageDescriptor::new_2d(
                8,
                8,
                Format::Rgba8Unorm,
                ImageUsage::ATTACHMENT | ImageUsage::COPY_DST,
            ))
            .unwrap();
        assert!(!image.is_null());
        backend.destroy_image(image);
        assert!(backend.images.lock().is_empty());
    }

    #[test]
    fn test_undefined_format_rejected() {
        let Some(backend) = backend() else { return };
        let result = backend.create_image(&ImageDescriptor::new_2d(
            8,
            8,
            Format::Undefined,
            ImageUsage::SAMPLED,
        ));
        assert!(matches!(result, Err(BackendError::InvalidParameter(_))));
    }

    #[test]
    fn test_empty_submit_and_wait() {
        let Some(backend) = backend() else { return };
        backend.queue_submit(&[]).unwrap();
        backend.queue_wait_idle().unwrap();
        assert!(backend.queue_capabilities().contains(QueueCapabilities::GRAPHICS));
    }
}
