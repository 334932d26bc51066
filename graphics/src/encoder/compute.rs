//! Compute encoder and its translation.

use std::sync::Arc;

use crate::backend::{CommandBufferHandle, GpuBackend};
use crate::error::GraphicsError;
use crate::state::ComputeState;

use super::PendingTables;

/// One compute command.
#[derive(Debug, Clone)]
pub enum ComputeCommand {
    SetState(Arc<ComputeState>),
    SetDcTable { table_index: u32, alloc_index: u32 },
    Dispatch { x: u32, y: u32, z: u32 },
    Synchronize,
}

/// Records compute dispatches.
#[derive(Debug, Clone, Default)]
pub struct ComputeEncoder {
    commands: Vec<ComputeCommand>,
}

impl ComputeEncoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a compute state.
    pub fn set_state(&mut self, state: &Arc<ComputeState>) -> &mut Self {
        self.push(ComputeCommand::SetState(Arc::clone(state)))
    }

    /// Bind allocation `alloc_index` of the state's table `table_index` at the next dispatch.
    pub fn set_dc_table(&mut self, table_index: u32, alloc_index: u32) -> &mut Self {
        self.push(ComputeCommand::SetDcTable {
            table_index,
            alloc_index,
        })
    }

    /// Dispatch `x * y * z` workgroups.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> &mut Self {
        self.push(ComputeCommand::Dispatch { x, y, z })
    }

    /// Make all previous writes visible to all later reads.
    pub fn synchronize(&mut self) -> &mut Self {
        self.push(ComputeCommand::Synchronize)
    }

    pub fn commands(&self) -> &[ComputeCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    fn push(&mut self, command: ComputeCommand) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub(super) fn translate(
        &self,
        backend: &dyn GpuBackend,
        cmd: CommandBufferHandle,
    ) -> Result<(), GraphicsError> {
        let max = backend.limits().max_dispatch_size;
        let mut state: Option<&Arc<ComputeState>> = None;
        let mut tables = PendingTables::default();

        for command in &self.commands {
            match command {
                ComputeCommand::SetState(next) => {
                    if !state.is_some_and(|bound| Arc::ptr_eq(bound, next)) {
                        backend.cmd_bind_compute_pipeline(cmd, next.pipeline());
                        state = Some(next);
                    }
                }
                ComputeCommand::SetDcTable {
                    table_index,
                    alloc_index,
                } => tables.set(*table_index, *alloc_index),
                ComputeCommand::Dispatch { x, y, z } => {
                    let Some(bound) = state else {
                        return Err(GraphicsError::Validation(
                            "dispatch without STATE".to_string(),
                        ));
                    };
                    let counts = [*x, *y, *z];
                    if counts.contains(&0) {
                        return Err(GraphicsError::InvalidParameter(format!(
                            "dispatch with zero workgroups {counts:?}"
                        )));
                    }
                    if counts.iter().zip(max).any(|(count, limit)| *count > limit) {
                        return Err(GraphicsError::InvalidParameter(format!(
                            "dispatch {counts:?} exceeds limit {max:?}"
                        )));
                    }
                    tables.flush(backend, cmd, true, bound.layout(), bound.dc_tables())?;
                    backend.cmd_dispatch(cmd, *x, *y, *z);
                }
                ComputeCommand::Synchronize => backend.cmd_memory_barrier(cmd, false),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordedCommand;
    use crate::device::test_device;
    use crate::encoder::EncoderRef;
    use crate::state::ComputeStateConfig;
    use crate::state::tests::shader;
    use crate::types::{DcEntry, DcType, ShaderStage};

    #[test]
    fn test_dispatch_rules() {
        let (device, backend) = test_device();
        let table = device
            .create_dc_table(&[DcEntry::new(0, DcType::Storage, 1)])
            .unwrap();
        table.allocate(1).unwrap();
        let state = device
            .create_compute_state(
                ComputeStateConfig::new(shader(&device, ShaderStage::Compute))
                    .with_dc_tables(vec![table]),
            )
            .unwrap();

        let dyn_backend: &dyn GpuBackend = backend.as_ref();
        let pool = dyn_backend.create_command_pool().unwrap();
        let cmd = dyn_backend.allocate_command_buffer(pool).unwrap();
        let run = |encoder: &ComputeEncoder| {
            dyn_backend.begin_command_buffer(cmd).unwrap();
            EncoderRef::from(encoder).translate(dyn_backend, cmd)
        };

        let mut no_state = ComputeEncoder::new();
        no_state.dispatch(1, 1, 1);
        assert!(matches!(run(&no_state), Err(GraphicsError::Validation(_))));

        let mut zero = ComputeEncoder::new();
        zero.set_state(&state).dispatch(4, 0, 1);
        assert!(run(&zero).is_err());

        let mut too_big = ComputeEncoder::new();
        too_big.set_state(&state).dispatch(1, 1, u32::MAX);
        assert!(run(&too_big).is_err());
        assert_eq!(backend.stats().dispatches, 0);

        let mut ok = ComputeEncoder::new();
        ok.set_state(&state).set_dc_table(0, 0).dispatch(8, 4, 1).synchronize();
        run(&ok).unwrap();
        let commands = backend.commands(cmd);
        assert!(matches!(
            commands[0],
            RecordedCommand::BindPipeline { compute: true, .. }
        ));
        assert!(matches!(commands[1], RecordedCommand::BindDescriptorSets { first: 0, .. }));
        assert_eq!(commands[2], RecordedCommand::Dispatch([8, 4, 1]));
        assert_eq!(commands[3], RecordedCommand::MemoryBarrier { by_region: false });
    }
}
