//! Encoders.
//!
//! An encoder is an in-memory list of commands built without touching the
//! backend. Encoders are replayable: the same encoder can be encoded into any
//! number of command buffers. Translation into backend calls happens in
//! [`CmdBuffer::encode`](crate::CmdBuffer::encode), which validates the
//! command sequence as it goes.
//!
//! - [`GraphicsEncoder`] - render passes, draws
//! - [`ComputeEncoder`] - dispatches
//! - [`TransferEncoder`] - buffer and image copies

mod compute;
mod graphics;
mod status;
mod transfer;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::{CommandBufferHandle, GpuBackend, PipelineLayoutHandle};
use crate::error::GraphicsError;
use crate::resources::DcTable;

pub use compute::{ComputeCommand, ComputeEncoder};
pub use graphics::{GraphicsCommand, GraphicsEncoder};
pub use status::EncodeStatus;
pub use transfer::{ImageRegion, TransferCommand, TransferEncoder};
pub(crate) use transfer::check_image_upload;

/// Kind of an encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderKind {
    Graphics,
    Compute,
    Transfer,
}

/// A borrowed encoder of any kind.
#[derive(Debug, Clone, Copy)]
pub enum EncoderRef<'a> {
    Graphics(&'a GraphicsEncoder),
    Compute(&'a ComputeEncoder),
    Transfer(&'a TransferEncoder),
}

impl EncoderRef<'_> {
    /// Kind of the referenced encoder.
    pub fn kind(&self) -> EncoderKind {
        match self {
            Self::Graphics(_) => EncoderKind::Graphics,
            Self::Compute(_) => EncoderKind::Compute,
            Self::Transfer(_) => EncoderKind::Transfer,
        }
    }

    /// Translate the commands into `cmd`, which must be recording.
    pub(crate) fn translate(
        self,
        backend: &dyn GpuBackend,
        cmd: CommandBufferHandle,
    ) -> Result<(), GraphicsError> {
        match self {
            Self::Graphics(encoder) => encoder.translate(backend, cmd),
            Self::Compute(encoder) => encoder.translate(backend, cmd),
            Self::Transfer(encoder) => encoder.translate(backend, cmd),
        }
    }
}

impl<'a> From<&'a GraphicsEncoder> for EncoderRef<'a> {
    fn from(encoder: &'a GraphicsEncoder) -> Self {
        Self::Graphics(encoder)
    }
}

impl<'a> From<&'a ComputeEncoder> for EncoderRef<'a> {
    fn from(encoder: &'a ComputeEncoder) -> Self {
        Self::Compute(encoder)
    }
}

impl<'a> From<&'a TransferEncoder> for EncoderRef<'a> {
    fn from(encoder: &'a TransferEncoder) -> Self {
        Self::Transfer(encoder)
    }
}

/// Descriptor table bindings requested since the last flush, by table index.
#[derive(Debug, Default)]
struct PendingTables(BTreeMap<u32, u32>);

impl PendingTables {
    fn set(&mut self, table_index: u32, alloc_index: u32) {
        self.0.insert(table_index, alloc_index);
    }

    /// Bind every pending table, one bind call per run of consecutive indices.
    ///
    /// All indices are checked before anything is recorded.
    fn flush(
        &mut self,
        backend: &dyn GpuBackend,
        cmd: CommandBufferHandle,
        compute: bool,
        layout: PipelineLayoutHandle,
        tables: &[Arc<DcTable>],
    ) -> Result<(), GraphicsError> {
        let mut sets = Vec::with_capacity(self.0.len());
        for (&table_index, &alloc_index) in &self.0 {
            let table = tables.get(table_index as usize).ok_or_else(|| {
                GraphicsError::Validation(format!(
                    "descriptor table index {table_index} out of range ({} tables)",
                    tables.len()
                ))
            })?;
            let set = table.set(alloc_index).ok_or_else(|| {
                GraphicsError::Validation(format!(
                    "allocation index {alloc_index} out of range for table {table_index} ({} allocations)",
                    table.allocations()
                ))
            })?;
            sets.push((table_index, set));
        }

        let mut rest = sets.as_slice();
        while let Some(&(first, _)) = rest.first() {
            let run = rest
                .iter()
                .enumerate()
                .take_while(|(i, (index, _))| *index == first + *i as u32)
                .count();
            let handles: Vec<_> = rest[..run].iter().map(|(_, set)| *set).collect();
            backend.cmd_bind_descriptor_sets(cmd, compute, layout, first, &handles);
            rest = &rest[run..];
        }
        self.0.clear();
        Ok(())
    }
}
