//! Graphics encoder and its translation.

use std::sync::Arc;

use crate::backend::{CommandBufferHandle, GpuBackend};
use crate::error::GraphicsError;
use crate::pass::{Target, TargetOp};
use crate::resources::Buffer;
use crate::state::GraphicsState;
use crate::types::{BufferUsage, IndexType, ScissorRect, Viewport};

use super::{EncodeStatus, PendingTables};

/// One graphics command.
#[derive(Debug, Clone)]
pub enum GraphicsCommand {
    SetViewport {
        index: u32,
        viewport: Viewport,
    },
    SetScissor {
        index: u32,
        scissor: ScissorRect,
    },
    SetTarget {
        target: Arc<Target>,
        op: TargetOp,
    },
    SetState(Arc<GraphicsState>),
    SetDcTable {
        table_index: u32,
        alloc_index: u32,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: Arc<Buffer>,
        offset: u64,
    },
    SetIndexBuffer {
        buffer: Arc<Buffer>,
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
    Synchronize,
}

/// Records render pass, binding and draw commands.
///
/// # Example
///
/// ```ignore
/// let mut encoder = GraphicsEncoder::new();
/// encoder
///     .set_target(&target, TargetOp::clear(1, [0.0, 0.0, 0.0, 1.0]))
///     .set_viewport(0, Viewport::from_dimensions(64, 64))
///     .set_scissor(0, ScissorRect::from_dimensions(64, 64))
///     .set_state(&state)
///     .set_vertex_buffer(0, &vertices, 0)
///     .draw(3, 1, 0, 0);
/// cmd.encode(&encoder)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct GraphicsEncoder {
    commands: Vec<GraphicsCommand>,
}

impl GraphicsEncoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the viewport. Only index 0 is supported.
    pub fn set_viewport(&mut self, index: u32, viewport: Viewport) -> &mut Self {
        self.push(GraphicsCommand::SetViewport { index, viewport })
    }

    /// Set the scissor rectangle. Only index 0 is supported.
    pub fn set_scissor(&mut self, index: u32, scissor: ScissorRect) -> &mut Self {
        self.push(GraphicsCommand::SetScissor { index, scissor })
    }

    /// End any open render pass and begin one on `target` with `op`.
    pub fn set_target(&mut self, target: &Arc<Target>, op: TargetOp) -> &mut Self {
        self.push(GraphicsCommand::SetTarget {
            target: Arc::clone(target),
            op,
        })
    }

    /// Bind a graphics state.
    pub fn set_state(&mut self, state: &Arc<GraphicsState>) -> &mut Self {
        self.push(GraphicsCommand::SetState(Arc::clone(state)))
    }

    /// Bind allocation `alloc_index` of the state's table `table_index` at the next draw.
    pub fn set_dc_table(&mut self, table_index: u32, alloc_index: u32) -> &mut Self {
        self.push(GraphicsCommand::SetDcTable {
            table_index,
            alloc_index,
        })
    }

    /// Bind a vertex buffer to an input slot.
    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: &Arc<Buffer>, offset: u64) -> &mut Self {
        self.push(GraphicsCommand::SetVertexBuffer {
            slot,
            buffer: Arc::clone(buffer),
            offset,
        })
    }

    /// Bind an index buffer.
    pub fn set_index_buffer(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: u64,
        index_type: IndexType,
    ) -> &mut Self {
        self.push(GraphicsCommand::SetIndexBuffer {
            buffer: Arc::clone(buffer),
            offset,
            index_type,
        })
    }

    /// Draw non-indexed primitives.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> &mut Self {
        self.push(GraphicsCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        })
    }

    /// Draw indexed primitives.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> &mut Self {
        self.push(GraphicsCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        })
    }

    /// Make all previous writes visible to all later reads.
    pub fn synchronize(&mut self) -> &mut Self {
        self.push(GraphicsCommand::Synchronize)
    }

    /// Get the recorded commands.
    pub fn commands(&self) -> &[GraphicsCommand] {
        &self.commands
    }

    /// Returns true if no commands were recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Remove every command.
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    fn push(&mut self, command: GraphicsCommand) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub(super) fn translate(
        &self,
        backend: &dyn GpuBackend,
        cmd: CommandBufferHandle,
    ) -> Result<(), GraphicsError> {
        let mut translator = GraphicsTranslator {
            backend,
            cmd,
            status: EncodeStatus::empty(),
            state: None,
            target: None,
            in_pass: false,
            tables: PendingTables::default(),
        };
        for command in &self.commands {
            translator.apply(command)?;
        }
        translator.finish();
        Ok(())
    }
}

struct GraphicsTranslator<'a> {
    backend: &'a dyn GpuBackend,
    cmd: CommandBufferHandle,
    status: EncodeStatus,
    state: Option<&'a Arc<GraphicsState>>,
    target: Option<&'a Arc<Target>>,
    in_pass: bool,
    tables: PendingTables,
}

impl<'a> GraphicsTranslator<'a> {
    fn apply(&mut self, command: &'a GraphicsCommand) -> Result<(), GraphicsError> {
        match command {
            GraphicsCommand::SetViewport { index, viewport } => {
                check_viewport_index(*index)?;
                self.backend.cmd_set_viewport(self.cmd, viewport);
                self.status |= EncodeStatus::VIEWPORT;
            }
            GraphicsCommand::SetScissor { index, scissor } => {
                check_viewport_index(*index)?;
                self.backend.cmd_set_scissor(self.cmd, scissor);
                self.status |= EncodeStatus::SCISSOR;
            }
            GraphicsCommand::SetTarget { target, op } => {
                let begin = target.begin_info(op)?;
                if self.in_pass {
                    self.backend.cmd_end_render_pass(self.cmd);
                }
                self.backend.cmd_begin_render_pass(self.cmd, &begin);
                self.in_pass = true;
                self.target = Some(target);
                self.status |= EncodeStatus::TARGET;
            }
            GraphicsCommand::SetState(state) => {
                if !self.state.is_some_and(|bound| Arc::ptr_eq(bound, state)) {
                    self.backend.cmd_bind_graphics_pipeline(self.cmd, state.pipeline());
                    self.state = Some(state);
                }
                self.status |= EncodeStatus::STATE;
            }
            GraphicsCommand::SetDcTable {
                table_index,
                alloc_index,
            } => self.tables.set(*table_index, *alloc_index),
            GraphicsCommand::SetVertexBuffer {
                slot,
                buffer,
                offset,
            } => {
                buffer.require_usage(BufferUsage::VERTEX, "vertex buffer")?;
                check_offset(*offset, buffer)?;
                self.backend
                    .cmd_bind_vertex_buffer(self.cmd, *slot, buffer.handle(), *offset);
                self.status |= EncodeStatus::VERTEX_BUFFER;
            }
            GraphicsCommand::SetIndexBuffer {
                buffer,
                offset,
                index_type,
            } => {
                buffer.require_usage(BufferUsage::INDEX, "index buffer")?;
                check_offset(*offset, buffer)?;
                if offset % index_type.size() != 0 {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "index buffer offset {offset} not aligned to {:?}",
                        index_type
                    )));
                }
                self.backend
                    .cmd_bind_index_buffer(self.cmd, buffer.handle(), *offset, *index_type);
                self.status |= EncodeStatus::INDEX_BUFFER;
            }
            GraphicsCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => {
                self.prepare_draw(EncodeStatus::DRAW, "draw")?;
                self.backend.cmd_draw(
                    self.cmd,
                    *vertex_count,
                    *instance_count,
                    *first_vertex,
                    *first_instance,
                );
            }
            GraphicsCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => {
                self.prepare_draw(EncodeStatus::DRAW_INDEXED, "draw_indexed")?;
                self.backend.cmd_draw_indexed(
                    self.cmd,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                );
            }
            GraphicsCommand::Synchronize => self.backend.cmd_memory_barrier(self.cmd, true),
        }
        Ok(())
    }

    fn prepare_draw(&mut self, required: EncodeStatus, operation: &str) -> Result<(), GraphicsError> {
        self.status.require(required, operation)?;
        let (Some(state), Some(target)) = (self.state, self.target) else {
            return Err(GraphicsError::Validation(format!(
                "{operation} without state or target"
            )));
        };
        if !state.pass().is_compatible(target.pass()) {
            return Err(GraphicsError::Validation(format!(
                "{operation}: state was built for a pass incompatible with the target"
            )));
        }
        self.tables.flush(
            self.backend,
            self.cmd,
            false,
            state.layout(),
            state.dc_tables(),
        )
    }

    fn finish(self) {
        if self.in_pass {
            self.backend.cmd_end_render_pass(self.cmd);
        }
    }
}

fn check_viewport_index(index: u32) -> Result<(), GraphicsError> {
    if index == 0 {
        Ok(())
    } else {
        Err(GraphicsError::Unsupported(format!(
            "viewport index {index}, only index 0 is supported"
        )))
    }
}

fn check_offset(offset: u64, buffer: &Buffer) -> Result<(), GraphicsError> {
    if offset < buffer.size() {
        Ok(())
    } else {
        Err(GraphicsError::OutOfBounds {
            offset,
            size: 0,
            limit: buffer.size(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, RecordedCommand};
    use crate::device::{GraphicsDevice, test_device};
    use crate::encoder::EncoderRef;
    use crate::pass::AttachImg;
    use crate::state::GraphicsStateConfig;
    use crate::state::tests::shader;
    use crate::types::{
        AttachmentDesc, BufferDescriptor, DcEntry, DcType, Extent2d, Format, ImageDescriptor,
        ImageUsage, ShaderStage,
    };

    struct Fixture {
        device: Arc<GraphicsDevice>,
        backend: Arc<DummyBackend>,
        target: Arc<Target>,
        state: Arc<GraphicsState>,
        vertices: Arc<Buffer>,
    }

    fn fixture() -> Fixture {
        let (device, backend) = test_device();
        let pass = device
            .create_pass(&[AttachmentDesc::single(Format::Rgba8Unorm)], &[], None)
            .unwrap();
        let image = device
            .create_image(&ImageDescriptor::new_2d(
                64,
                64,
                Format::Rgba8Unorm,
                ImageUsage::ATTACHMENT,
            ))
            .unwrap();
        let target = pass
            .target(Extent2d::new(64, 64), 1, &[AttachImg::new(image)], &[], None)
            .unwrap();
        let tables = vec![
            device.create_dc_table(&[DcEntry::new(0, DcType::Uniform, 1)]).unwrap(),
            device.create_dc_table(&[DcEntry::new(0, DcType::Uniform, 1)]).unwrap(),
            device.create_dc_table(&[DcEntry::new(0, DcType::Uniform, 1)]).unwrap(),
        ];
        for table in &tables {
            table.allocate(2).unwrap();
        }
        let state = device
            .create_graphics_state(
                GraphicsStateConfig::new(
                    pass,
                    vec![
                        shader(&device, ShaderStage::Vertex),
                        shader(&device, ShaderStage::Fragment),
                    ],
                )
                .with_dc_tables(tables),
            )
            .unwrap();
        let vertices = device
            .create_buffer(&BufferDescriptor::new(256, BufferUsage::VERTEX))
            .unwrap();
        Fixture {
            device,
            backend,
            target,
            state,
            vertices,
        }
    }

    fn record(f: &Fixture, encoder: &GraphicsEncoder) -> (CommandBufferHandle, Result<(), GraphicsError>) {
        let backend: &dyn GpuBackend = f.backend.as_ref();
        let pool = backend.create_command_pool().unwrap();
        let cmd = backend.allocate_command_buffer(pool).unwrap();
        backend.begin_command_buffer(cmd).unwrap();
        let result = EncoderRef::from(encoder).translate(backend, cmd);
        (cmd, result)
    }

    fn ready(f: &Fixture) -> GraphicsEncoder {
        let mut encoder = GraphicsEncoder::new();
        encoder
            .set_viewport(0, Viewport::from_dimensions(64, 64))
            .set_scissor(0, ScissorRect::from_dimensions(64, 64))
            .set_target(&f.target, TargetOp::clear(1, [0.0; 4]))
            .set_state(&f.state)
            .set_vertex_buffer(0, &f.vertices, 0);
        encoder
    }

    #[test]
    fn test_draw_sequence() {
        let f = fixture();
        let mut encoder = ready(&f);
        encoder.draw(3, 1, 0, 0);

        let (cmd, result) = record(&f, &encoder);
        result.unwrap();
        let commands = f.backend.commands(cmd);
        assert!(matches!(commands[0], RecordedCommand::SetViewport(_)));
        assert!(matches!(commands[2], RecordedCommand::BeginRenderPass(_)));
        assert!(matches!(commands.last(), Some(RecordedCommand::EndRenderPass)));
        assert_eq!(f.backend.stats().draws, 1);
    }

    #[test]
    fn test_missing_state_issues_no_draw() {
        let f = fixture();
        let mut encoder = GraphicsEncoder::new();
        encoder
            .set_viewport(0, Viewport::from_dimensions(64, 64))
            .set_scissor(0, ScissorRect::from_dimensions(64, 64))
            .set_target(&f.target, TargetOp::load(1))
            .set_vertex_buffer(0, &f.vertices, 0)
            .draw(3, 1, 0, 0);

        let (_cmd, result) = record(&f, &encoder);
        assert!(matches!(result, Err(GraphicsError::Validation(_))));
        assert_eq!(f.backend.stats().draws, 0);
    }

    #[test]
    fn test_indexed_draw_needs_index_buffer() {
        let f = fixture();
        let mut encoder = ready(&f);
        encoder.draw_indexed(3, 1, 0, 0, 0);
        let (_cmd, result) = record(&f, &encoder);
        assert!(result.is_err());

        let indices = f
            .device
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::INDEX))
            .unwrap();
        let mut encoder = ready(&f);
        encoder
            .set_index_buffer(&indices, 0, IndexType::U16)
            .draw_indexed(3, 1, 0, 0, 0);
        let (_cmd, result) = record(&f, &encoder);
        result.unwrap();
        assert_eq!(f.backend.stats().draws_indexed, 1);
    }

    #[test]
    fn test_state_bound_once() {
        let f = fixture();
        let mut encoder = ready(&f);
        encoder.set_state(&f.state).draw(3, 1, 0, 0).set_state(&f.state).draw(3, 1, 0, 0);

        let (cmd, result) = record(&f, &encoder);
        result.unwrap();
        let binds = f
            .backend
            .commands(cmd)
            .iter()
            .filter(|c| matches!(c, RecordedCommand::BindPipeline { .. }))
            .count();
        assert_eq!(binds, 1);
    }

    #[test]
    fn test_set_target_ends_open_pass() {
        let f = fixture();
        let mut encoder = ready(&f);
        encoder
            .draw(3, 1, 0, 0)
            .set_target(&f.target, TargetOp::load(1))
            .draw(3, 1, 0, 0);

        let (cmd, result) = record(&f, &encoder);
        result.unwrap();
        let commands = f.backend.commands(cmd);
        let begins = commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::BeginRenderPass(_)))
            .count();
        let ends = commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::EndRenderPass))
            .count();
        assert_eq!((begins, ends), (2, 2));
    }

    #[test]
    fn test_dc_tables_flushed_in_runs() {
        let f = fixture();
        let mut encoder = ready(&f);
        encoder
            .set_dc_table(2, 1)
            .set_dc_table(0, 0)
            .set_dc_table(0, 1)
            .draw(3, 1, 0, 0);

        let (cmd, result) = record(&f, &encoder);
        result.unwrap();
        let binds: Vec<(u32, usize)> = f
            .backend
            .commands(cmd)
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BindDescriptorSets { first, sets } => Some((*first, sets.len())),
                _ => None,
            })
            .collect();
        assert_eq!(binds, vec![(0, 1), (2, 1)]);

        let mut encoder = ready(&f);
        encoder.set_dc_table(0, 0).set_dc_table(1, 0).set_dc_table(2, 0).draw(3, 1, 0, 0);
        let (cmd, result) = record(&f, &encoder);
        result.unwrap();
        assert!(f.backend.commands(cmd).iter().any(|c| matches!(
            c,
            RecordedCommand::BindDescriptorSets { first: 0, sets } if sets.len() == 3
        )));
    }

    #[test]
    fn test_dc_table_index_out_of_range() {
        let f = fixture();
        for (table, alloc) in [(3, 0), (0, 2)] {
            let mut encoder = ready(&f);
            encoder.set_dc_table(table, alloc).draw(3, 1, 0, 0);
            let (_cmd, result) = record(&f, &encoder);
            assert!(matches!(result, Err(GraphicsError::Validation(_))));
        }
        assert_eq!(f.backend.stats().draws, 0);
    }

    #[test]
    fn test_viewport_index_unsupported() {
        let f = fixture();
        let mut encoder = GraphicsEncoder::new();
        encoder.set_viewport(1, Viewport::from_dimensions(64, 64));
        let (_cmd, result) = record(&f, &encoder);
        assert!(matches!(result, Err(GraphicsError::Unsupported(_))));
    }

    #[test]
    fn test_synchronize_is_by_region() {
        let f = fixture();
        let mut encoder = GraphicsEncoder::new();
        encoder.synchronize();
        let (cmd, result) = record(&f, &encoder);
        result.unwrap();
        assert_eq!(
            f.backend.commands(cmd),
            vec![RecordedCommand::MemoryBarrier { by_region: true }]
        );
    }
}
