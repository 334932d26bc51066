//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It hands out unique
//! handles, keeps buffer contents in host memory, and records every call so
//! tests can inspect what the front end issued without GPU hardware.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::types::{
    BufferDescriptor, DcEntry, DeviceLimits, Format, ImageDescriptor, IndexType,
    QueueCapabilities, SamplerDescriptor, ScissorRect, ShaderDescriptor, Viewport,
};

use super::{
    AcquireOutcome, BackendError, BufferCopy, BufferHandle, BufferImageCopy, CommandBufferHandle,
    CommandPoolHandle, ComputePipelineInfo, DescriptorLayoutHandle, DescriptorPoolHandle,
    DescriptorSetHandle, DescriptorWrite, FramebufferHandle, FramebufferInfo, GpuBackend,
    GraphicsPipelineInfo, ImageCopy, ImageHandle, ImageViewHandle, ImageViewInfo,
    PipelineHandle, PipelineLayoutHandle, RenderPassBeginInfo, RenderPassHandle, RenderPassInfo,
    SamplerHandle, SemaphoreHandle, ShaderHandle, SubmitBatch, SwapchainHandle, SwapchainImages,
    SwapchainInfo,
};

/// Call counters kept by the dummy backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    pub draws: u32,
    pub draws_indexed: u32,
    pub dispatches: u32,
    pub render_pass_begins: u32,
    pub render_passes_created: u32,
    pub render_passes_destroyed: u32,
    pub framebuffers_created: u32,
    pub pipelines_created: u32,
    pub descriptor_binds: u32,
    pub barriers: u32,
    pub copies: u32,
    pub command_buffers_begun: u32,
    pub command_buffer_resets: u32,
    pub semaphores_created: u32,
    pub submits: u32,
    pub wait_idles: u32,
    pub presents: u32,
    /// Destroy calls naming a handle that is not alive.
    pub unknown_destroys: u32,
}

/// Backend calls that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DummyFailure {
    CreateCommandPool,
    AllocateCommandBuffer,
    BeginCommandBuffer,
    EndCommandBuffer,
    CreateSemaphore,
    CreateRenderPass,
    CreateFramebuffer,
    CreatePipeline,
    Submit,
    WaitIdle,
}

/// A command recorded into a dummy command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginRenderPass(RenderPassBeginInfo),
    EndRenderPass,
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    BindPipeline {
        pipeline: PipelineHandle,
        compute: bool,
    },
    BindDescriptorSets {
        first: u32,
        sets: Vec<DescriptorSetHandle>,
    },
    BindVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch([u32; 3]),
    MemoryBarrier {
        by_region: bool,
    },
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        region: BufferCopy,
    },
    CopyImage(ImageCopy),
    CopyBufferToImage(BufferImageCopy),
}

#[derive(Debug, Default)]
struct DummyCommandBuffer {
    pool: u64,
    recording: bool,
    commands: Vec<RecordedCommand>,
}

#[derive(Debug, Default)]
struct DummySwapchain {
    images: Vec<ImageHandle>,
    next: u32,
}

#[derive(Debug, Default)]
struct DummyState {
    stats: DummyStats,
    /// Live handles and the kind of object they name.
    live: HashMap<u64, &'static str>,
    buffers: HashMap<u64, Vec<u8>>,
    render_passes: HashMap<u64, RenderPassInfo>,
    command_buffers: HashMap<u64, DummyCommandBuffer>,
    swapchains: HashMap<u64, DummySwapchain>,
    submissions: Vec<Vec<SubmitBatch>>,
    armed: HashSet<DummyFailure>,
}

impl DummyState {
    fn trip(&mut self, failure: DummyFailure) -> Result<(), BackendError> {
        if self.armed.remove(&failure) {
            log::trace!("DummyBackend: injected failure {:?}", failure);
            return Err(BackendError::Internal(format!("injected {failure:?} failure")));
        }
        Ok(())
    }

    fn release(&mut self, raw: u64, kind: &'static str) {
        match self.live.remove(&raw) {
            Some(found) if found == kind => {}
            Some(found) => {
                log::warn!("DummyBackend: destroying {kind} {raw} which is a {found}");
                self.stats.unknown_destroys += 1;
            }
            None => {
                log::warn!("DummyBackend: destroying unknown {kind} {raw}");
                self.stats.unknown_destroys += 1;
            }
        }
    }
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    limits: DeviceLimits,
    capabilities: QueueCapabilities,
    /// Overrides the number of images a new swapchain gets.
    swapchain_images: Option<u32>,
    next_id: AtomicU64,
    state: Mutex<DummyState>,
}

impl DummyBackend {
    /// Create a new dummy backend with default limits.
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    /// Create a dummy backend reporting the given limits.
    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            capabilities: QueueCapabilities::all(),
            swapchain_images: None,
            next_id: AtomicU64::new(1),
            state: Mutex::new(DummyState::default()),
        }
    }

    /// Report different queue capabilities.
    pub fn with_queue_capabilities(mut self, capabilities: QueueCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Give every new swapchain exactly `count` images.
    pub fn with_swapchain_images(mut self, count: u32) -> Self {
        self.swapchain_images = Some(count);
        self
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> DummyStats {
        self.state.lock().stats
    }

    /// Make the next call of the given kind fail.
    pub fn fail_next(&self, failure: DummyFailure) {
        self.state.lock().armed.insert(failure);
    }

    /// Returns true if `raw` names a live object.
    pub fn is_live(&self, raw: u64) -> bool {
        self.state.lock().live.contains_key(&raw)
    }

    /// Number of live objects of a kind (`"buffer"`, `"render_pass"`, ...).
    pub fn live_count(&self, kind: &str) -> usize {
        self.state
            .lock()
            .live
            .values()
            .filter(|k| **k == kind)
            .count()
    }

    /// Attachment operations a live render pass was created with.
    pub fn render_pass_info(&self, render_pass: RenderPassHandle) -> Option<RenderPassInfo> {
        self.state.lock().render_passes.get(&render_pass.0).cloned()
    }

    /// Commands recorded into a command buffer since it was last reset.
    pub fn commands(&self, cmd: CommandBufferHandle) -> Vec<RecordedCommand> {
        self.state
            .lock()
            .command_buffers
            .get(&cmd.0)
            .map(|cb| cb.commands.clone())
            .unwrap_or_default()
    }

    /// Batches of every submission so far, oldest first.
    pub fn submissions(&self) -> Vec<Vec<SubmitBatch>> {
        self.state.lock().submissions.clone()
    }

    /// Current contents of a buffer.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer.0).cloned()
    }

    fn allocate(&self, state: &mut DummyState, kind: &'static str) -> u64 {
        let raw = self.next_id.fetch_add(1, Ordering::Relaxed);
        state.live.insert(raw, kind);
        raw
    }

    fn record(&self, cmd: CommandBufferHandle, command: RecordedCommand) {
        let mut state = self.state.lock();
        let stats = &mut state.stats;
        match &command {
            RecordedCommand::Draw { .. } => stats.draws += 1,
            RecordedCommand::DrawIndexed { .. } => stats.draws_indexed += 1,
            RecordedCommand::Dispatch(_) => stats.dispatches += 1,
            RecordedCommand::BeginRenderPass(_) => stats.render_pass_begins += 1,
            RecordedCommand::BindDescriptorSets { .. } => stats.descriptor_binds += 1,
            RecordedCommand::MemoryBarrier { .. } => stats.barriers += 1,
            RecordedCommand::CopyBuffer { .. }
            | RecordedCommand::CopyImage(_)
            | RecordedCommand::CopyBufferToImage(_) => stats.copies += 1,
            _ => {}
        }
        match state.command_buffers.get_mut(&cmd.0) {
            Some(cb) if cb.recording => {
                log::trace!("DummyBackend: {:?} <- {:?}", cmd, command);
                cb.commands.push(command);
            }
            _ => log::warn!("DummyBackend: {:?} is not recording, dropping {:?}", cmd, command),
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn queue_capabilities(&self) -> QueueCapabilities {
        self.capabilities
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, BackendError> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        let mut state = self.state.lock();
        let raw = self.allocate(&mut state, "buffer");
        state
            .buffers
            .insert(raw, vec![0u8; descriptor.size as usize]);
        Ok(BufferHandle(raw))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        state.buffers.remove(&buffer.0);
        state.release(buffer.0, "buffer");
    }

    fn write_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        log::trace!(
            "DummyBackend: write_buffer offset={} len={}",
            offset,
            data.len()
        );
        let mut state = self.state.lock();
        let bytes = state
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown {buffer:?}")))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            return Err(BackendError::InvalidParameter(format!(
                "write of {} bytes at {} overflows {:?}",
                data.len(),
                offset,
                buffer
            )));
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, BackendError> {
        log::trace!("DummyBackend: read_buffer offset={} size={}", offset, size);
        let state = self.state.lock();
        let bytes = state
            .buffers
            .get(&buffer.0)
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown {buffer:?}")))?;
        bytes
            .get(offset as usize..(offset + size) as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| BackendError::InvalidParameter("read out of range".to_string()))
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<ImageHandle, BackendError> {
        log::trace!(
            "DummyBackend: creating image {:?} ({}x{}x{}, {} layers)",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth,
            descriptor.layers
        );
        let mut state = self.state.lock();
        Ok(ImageHandle(self.allocate(&mut state, "image")))
    }

    fn destroy_image(&self, image: ImageHandle) {
        self.state.lock().release(image.0, "image");
    }

    fn create_image_view(&self, info: &ImageViewInfo) -> Result<ImageViewHandle, BackendError> {
        log::trace!("DummyBackend: creating view of {:?}", info.image);
        let mut state = self.state.lock();
        Ok(ImageViewHandle(self.allocate(&mut state, "image_view")))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        self.state.lock().release(view.0, "image_view");
    }

    fn create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerHandle, BackendError> {
        log::trace!("DummyBackend: creating sampler {:?}", descriptor.label);
        let mut state = self.state.lock();
        Ok(SamplerHandle(self.allocate(&mut state, "sampler")))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.state.lock().release(sampler.0, "sampler");
    }

    fn create_shader(&self, descriptor: &ShaderDescriptor) -> Result<ShaderHandle, BackendError> {
        log::trace!(
            "DummyBackend: creating {:?} shader {:?}",
            descriptor.stage,
            descriptor.label
        );
        let mut state = self.state.lock();
        Ok(ShaderHandle(self.allocate(&mut state, "shader")))
    }

    fn destroy_shader(&self, shader: ShaderHandle) {
        self.state.lock().release(shader.0, "shader");
    }

    fn create_descriptor_layout(
        &self,
        entries: &[DcEntry],
    ) -> Result<DescriptorLayoutHandle, BackendError> {
        log::trace!("DummyBackend: creating layout with {} entries", entries.len());
        let mut state = self.state.lock();
        Ok(DescriptorLayoutHandle(
            self.allocate(&mut state, "descriptor_layout"),
        ))
    }

    fn destroy_descriptor_layout(&self, layout: DescriptorLayoutHandle) {
        self.state.lock().release(layout.0, "descriptor_layout");
    }

    fn allocate_descriptor_sets(
        &self,
        _layout: DescriptorLayoutHandle,
        _entries: &[DcEntry],
        count: u32,
    ) -> Result<(DescriptorPoolHandle, Vec<DescriptorSetHandle>), BackendError> {
        let mut state = self.state.lock();
        let pool = DescriptorPoolHandle(self.allocate(&mut state, "descriptor_pool"));
        // Sets die with their pool, so they are not tracked as live objects.
        let sets = (0..count)
            .map(|_| DescriptorSetHandle(self.next_id.fetch_add(1, Ordering::Relaxed)))
            .collect();
        Ok((pool, sets))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        self.state.lock().release(pool.0, "descriptor_pool");
    }

    fn write_descriptor(&self, write: &DescriptorWrite) -> Result<(), BackendError> {
        log::trace!(
            "DummyBackend: write {:?} binding {}[{}]",
            write.set,
            write.binding,
            write.element
        );
        Ok(())
    }

    fn create_render_pass(&self, info: &RenderPassInfo) -> Result<RenderPassHandle, BackendError> {
        let mut state = self.state.lock();
        state.trip(DummyFailure::CreateRenderPass)?;
        let raw = self.allocate(&mut state, "render_pass");
        state.render_passes.insert(raw, info.clone());
        state.stats.render_passes_created += 1;
        log::trace!("DummyBackend: created render pass {}", raw);
        Ok(RenderPassHandle(raw))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        let mut state = self.state.lock();
        state.render_passes.remove(&render_pass.0);
        state.stats.render_passes_destroyed += 1;
        state.release(render_pass.0, "render_pass");
    }

    fn create_framebuffer(
        &self,
        info: &FramebufferInfo,
    ) -> Result<FramebufferHandle, BackendError> {
        let mut state = self.state.lock();
        state.trip(DummyFailure::CreateFramebuffer)?;
        if !state.live.contains_key(&info.render_pass.0) {
            return Err(BackendError::InvalidParameter(format!(
                "framebuffer references dead {:?}",
                info.render_pass
            )));
        }
        state.stats.framebuffers_created += 1;
        Ok(FramebufferHandle(self.allocate(&mut state, "framebuffer")))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        self.state.lock().release(framebuffer.0, "framebuffer");
    }

    fn create_pipeline_layout(
        &self,
        _layouts: &[DescriptorLayoutHandle],
    ) -> Result<PipelineLayoutHandle, BackendError> {
        let mut state = self.state.lock();
        Ok(PipelineLayoutHandle(
            self.allocate(&mut state, "pipeline_layout"),
        ))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        self.state.lock().release(layout.0, "pipeline_layout");
    }

    fn create_graphics_pipeline(
        &self,
        info: &GraphicsPipelineInfo,
    ) -> Result<PipelineHandle, BackendError> {
        log::trace!(
            "DummyBackend: creating graphics pipeline with {} stages",
            info.stages.len()
        );
        let mut state = self.state.lock();
        state.trip(DummyFailure::CreatePipeline)?;
        state.stats.pipelines_created += 1;
        Ok(PipelineHandle(self.allocate(&mut state, "pipeline")))
    }

    fn create_compute_pipeline(
        &self,
        info: &ComputePipelineInfo,
    ) -> Result<PipelineHandle, BackendError> {
        log::trace!(
            "DummyBackend: creating compute pipeline {:?}",
            info.stage.entry_point
        );
        let mut state = self.state.lock();
        state.trip(DummyFailure::CreatePipeline)?;
        state.stats.pipelines_created += 1;
        Ok(PipelineHandle(self.allocate(&mut state, "pipeline")))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.state.lock().release(pipeline.0, "pipeline");
    }

    fn create_command_pool(&self) -> Result<CommandPoolHandle, BackendError> {
        let mut state = self.state.lock();
        state.trip(DummyFailure::CreateCommandPool)?;
        Ok(CommandPoolHandle(self.allocate(&mut state, "command_pool")))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        let mut state = self.state.lock();
        let freed: Vec<u64> = state
            .command_buffers
            .iter()
            .filter(|(_, cb)| cb.pool == pool.0)
            .map(|(raw, _)| *raw)
            .collect();
        for raw in freed {
            state.command_buffers.remove(&raw);
            state.live.remove(&raw);
        }
        state.release(pool.0, "command_pool");
    }

    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
    ) -> Result<CommandBufferHandle, BackendError> {
        let mut state = self.state.lock();
        state.trip(DummyFailure::AllocateCommandBuffer)?;
        if state.live.get(&pool.0) != Some(&"command_pool") {
            return Err(BackendError::InvalidParameter(format!("unknown {pool:?}")));
        }
        let raw = self.allocate(&mut state, "command_buffer");
        state.command_buffers.insert(
            raw,
            DummyCommandBuffer {
                pool: pool.0,
                ..Default::default()
            },
        );
        Ok(CommandBufferHandle(raw))
    }

    fn begin_command_buffer(&self, cmd: CommandBufferHandle) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.trip(DummyFailure::BeginCommandBuffer)?;
        let cb = state
            .command_buffers
            .get_mut(&cmd.0)
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown {cmd:?}")))?;
        cb.recording = true;
        cb.commands.clear();
        state.stats.command_buffers_begun += 1;
        Ok(())
    }

    fn end_command_buffer(&self, cmd: CommandBufferHandle) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.trip(DummyFailure::EndCommandBuffer)?;
        match state.command_buffers.get_mut(&cmd.0) {
            Some(cb) if cb.recording => {
                cb.recording = false;
                Ok(())
            }
            _ => Err(BackendError::InvalidParameter(format!(
                "{cmd:?} is not recording"
            ))),
        }
    }

    fn reset_command_buffer(&self, cmd: CommandBufferHandle) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let cb = state
            .command_buffers
            .get_mut(&cmd.0)
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown {cmd:?}")))?;
        cb.recording = false;
        cb.commands.clear();
        state.stats.command_buffer_resets += 1;
        Ok(())
    }

    fn cmd_begin_render_pass(&self, cmd: CommandBufferHandle, info: &RenderPassBeginInfo) {
        self.record(cmd, RecordedCommand::BeginRenderPass(info.clone()));
    }

    fn cmd_end_render_pass(&self, cmd: CommandBufferHandle) {
        self.record(cmd, RecordedCommand::EndRenderPass);
    }

    fn cmd_set_viewport(&self, cmd: CommandBufferHandle, viewport: &Viewport) {
        self.record(cmd, RecordedCommand::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&self, cmd: CommandBufferHandle, scissor: &ScissorRect) {
        self.record(cmd, RecordedCommand::SetScissor(*scissor));
    }

    fn cmd_bind_graphics_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        self.record(
            cmd,
            RecordedCommand::BindPipeline {
                pipeline,
                compute: false,
            },
        );
    }

    fn cmd_bind_compute_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        self.record(
            cmd,
            RecordedCommand::BindPipeline {
                pipeline,
                compute: true,
            },
        );
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: CommandBufferHandle,
        _compute: bool,
        _layout: PipelineLayoutHandle,
        first: u32,
        sets: &[DescriptorSetHandle],
    ) {
        self.record(
            cmd,
            RecordedCommand::BindDescriptorSets {
                first,
                sets: sets.to_vec(),
            },
        );
    }

    fn cmd_bind_vertex_buffer(
        &self,
        cmd: CommandBufferHandle,
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    ) {
        self.record(
            cmd,
            RecordedCommand::BindVertexBuffer {
                slot,
                buffer,
                offset,
            },
        );
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    ) {
        self.record(
            cmd,
            RecordedCommand::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            },
        );
    }

    fn cmd_draw(
        &self,
        cmd: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.record(
            cmd,
            RecordedCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
        );
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
        self.record(
            cmd,
            RecordedCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            },
        );
    }

    fn cmd_dispatch(&self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32) {
        self.record(cmd, RecordedCommand::Dispatch([x, y, z]));
    }

    fn cmd_memory_barrier(&self, cmd: CommandBufferHandle, by_region: bool) {
        self.record(cmd, RecordedCommand::MemoryBarrier { by_region });
    }

    fn cmd_copy_buffer(
        &self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        region: &BufferCopy,
    ) {
        self.record(
            cmd,
            RecordedCommand::CopyBuffer {
                src,
                dst,
                region: *region,
            },
        );
    }

    fn cmd_copy_image(&self, cmd: CommandBufferHandle, region: &ImageCopy) {
        self.record(cmd, RecordedCommand::CopyImage(*region));
    }

    fn cmd_copy_buffer_to_image(&self, cmd: CommandBufferHandle, region: &BufferImageCopy) {
        self.record(cmd, RecordedCommand::CopyBufferToImage(*region));
    }

    fn create_semaphore(&self) -> Result<SemaphoreHandle, BackendError> {
        let mut state = self.state.lock();
        state.trip(DummyFailure::CreateSemaphore)?;
        state.stats.semaphores_created += 1;
        Ok(SemaphoreHandle(self.allocate(&mut state, "semaphore")))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        self.state.lock().release(semaphore.0, "semaphore");
    }

    fn queue_submit(&self, batches: &[SubmitBatch]) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.trip(DummyFailure::Submit)?;
        for batch in batches {
            for cmd in &batch.command_buffers {
                match state.command_buffers.get(&cmd.0) {
                    Some(cb) if !cb.recording => {}
                    _ => {
                        return Err(BackendError::InvalidParameter(format!(
                            "{cmd:?} is not executable"
                        )));
                    }
                }
            }
        }
        log::trace!("DummyBackend: submitting {} batches", batches.len());

        // Execute buffer copies so transfers are observable.
        let copies: Vec<(BufferHandle, BufferHandle, BufferCopy)> = batches
            .iter()
            .flat_map(|batch| batch.command_buffers.iter())
            .filter_map(|cmd| state.command_buffers.get(&cmd.0))
            .flat_map(|cb| cb.commands.iter())
            .filter_map(|command| match command {
                RecordedCommand::CopyBuffer { src, dst, region } => Some((*src, *dst, *region)),
                _ => None,
            })
            .collect();
        for (src, dst, region) in copies {
            let start = region.src_offset as usize;
            let data = state
                .buffers
                .get(&src.0)
                .and_then(|bytes| bytes.get(start..start + region.size as usize))
                .map(<[u8]>::to_vec);
            let target = state.buffers.get_mut(&dst.0);
            if let (Some(data), Some(target)) = (data, target) {
                let start = region.dst_offset as usize;
                if let Some(slot) = target.get_mut(start..start + data.len()) {
                    slot.copy_from_slice(&data);
                }
            }
        }

        state.submissions.push(batches.to_vec());
        state.stats.submits += 1;
        Ok(())
    }

    fn queue_wait_idle(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.trip(DummyFailure::WaitIdle)?;
        state.stats.wait_idles += 1;
        Ok(())
    }

    fn create_swapchain(&self, info: &SwapchainInfo) -> Result<SwapchainImages, BackendError> {
        log::trace!(
            "DummyBackend: creating swapchain {}x{}",
            info.extent.width,
            info.extent.height
        );
        let mut state = self.state.lock();
        let swapchain = SwapchainHandle(self.allocate(&mut state, "swapchain"));
        let count = self.swapchain_images.unwrap_or(info.min_images.max(2));
        let images: Vec<ImageHandle> = (0..count)
            .map(|_| ImageHandle(self.allocate(&mut state, "swapchain_image")))
            .collect();
        state.swapchains.insert(
            swapchain.0,
            DummySwapchain {
                images: images.clone(),
                next: 0,
            },
        );
        Ok(SwapchainImages {
            swapchain,
            format: Format::Bgra8Unorm,
            extent: info.extent,
            images,
        })
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        let mut state = self.state.lock();
        if let Some(chain) = state.swapchains.remove(&swapchain.0) {
            for image in chain.images {
                state.live.remove(&image.0);
            }
        }
        state.release(swapchain.0, "swapchain");
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        _signal: SemaphoreHandle,
        _non_blocking: bool,
    ) -> Result<AcquireOutcome, BackendError> {
        let mut state = self.state.lock();
        let chain = state
            .swapchains
            .get_mut(&swapchain.0)
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown {swapchain:?}")))?;
        let index = chain.next;
        chain.next = (chain.next + 1) % chain.images.len() as u32;
        Ok(AcquireOutcome::Ready(index))
    }

    fn present(&self, swapchain: SwapchainHandle, index: u32) -> Result<bool, BackendError> {
        let mut state = self.state.lock();
        let count = state
            .swapchains
            .get(&swapchain.0)
            .map(|chain| chain.images.len() as u32)
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown {swapchain:?}")))?;
        if index >= count {
            return Err(BackendError::InvalidParameter(format!(
                "image index {index} out of range ({count})"
            )));
        }
        state.stats.presents += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique_and_tracked() {
        let backend = DummyBackend::new();
        let a = backend
            .create_buffer(&BufferDescriptor::new(4, Default::default()))
            .unwrap();
        let b = backend
            .create_buffer(&BufferDescriptor::new(4, Default::default()))
            .unwrap();
        assert_ne!(a, b);
        assert!(!a.is_null());
        assert_eq!(backend.live_count("buffer"), 2);

        backend.destroy_buffer(a);
        assert!(!backend.is_live(a.0));
        backend.destroy_buffer(a);
        assert_eq!(backend.stats().unknown_destroys, 1);
    }

    #[test]
    fn test_buffer_write_and_read() {
        let backend = DummyBackend::new();
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(8, Default::default()))
            .unwrap();
        backend.write_buffer(buffer, 2, &[1, 2, 3]).unwrap();
        assert_eq!(backend.read_buffer(buffer, 0, 6).unwrap(), vec![0, 0, 1, 2, 3, 0]);
        assert!(backend.write_buffer(buffer, 6, &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let backend = DummyBackend::new();
        backend.fail_next(DummyFailure::Submit);
        assert!(backend.queue_submit(&[]).is_err());
        assert!(backend.queue_submit(&[]).is_ok());
        assert_eq!(backend.stats().submits, 1);
    }

    #[test]
    fn test_recording_requires_begin() {
        let backend = DummyBackend::new();
        let pool = backend.create_command_pool().unwrap();
        let cmd = backend.allocate_command_buffer(pool).unwrap();

        backend.cmd_draw(cmd, 3, 1, 0, 0);
        assert!(backend.commands(cmd).is_empty());

        backend.begin_command_buffer(cmd).unwrap();
        backend.cmd_draw(cmd, 3, 1, 0, 0);
        backend.end_command_buffer(cmd).unwrap();
        assert_eq!(backend.commands(cmd).len(), 1);

        backend.destroy_command_pool(pool);
        assert!(!backend.is_live(cmd.0));
    }
}
