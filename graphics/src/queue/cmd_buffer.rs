//! Command buffers.

use crate::backend::CommandBufferHandle;
use crate::encoder::{EncoderKind, EncoderRef};
use crate::error::GraphicsError;
use crate::types::QueueCapabilities;

use super::Queue;

/// Lifecycle of a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmdBufferState {
    /// Nothing recorded.
    Fresh,
    /// Encoders have been translated into it since the last reset.
    Recording,
    /// Enqueued and waiting for the next submit.
    Pending,
    /// Executed by a submit. Encoding again starts a new recording.
    Executed,
}

/// A command buffer issued by a [`Queue`], with its own command pool.
///
/// The buffer borrows its queue and cannot outlive it. Dropping a buffer
/// while it is pending is a programming error and panics.
pub struct CmdBuffer<'q> {
    queue: &'q Queue,
    id: u64,
    cmd: CommandBufferHandle,
}

impl<'q> CmdBuffer<'q> {
    pub(super) fn new(queue: &'q Queue, id: u64, cmd: CommandBufferHandle) -> Self {
        Self { queue, id, cmd }
    }

    /// Translate an encoder into this buffer, beginning recording if needed.
    ///
    /// Encoders of any kind can be appended to the same buffer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the buffer is pending and `Unsupported` if
    /// the queue cannot run the encoder's kind of work. Translation errors
    /// reset the buffer, discarding everything recorded so far.
    pub fn encode<'e>(&mut self, encoder: impl Into<EncoderRef<'e>>) -> Result<(), GraphicsError> {
        let encoder = encoder.into();
        let required = match encoder.kind() {
            EncoderKind::Graphics => QueueCapabilities::GRAPHICS,
            EncoderKind::Compute => QueueCapabilities::COMPUTE,
            EncoderKind::Transfer => QueueCapabilities::TRANSFER,
        };
        if !self.queue.capabilities.contains(required) {
            return Err(GraphicsError::Unsupported(format!(
                "{:?} work on a queue with {:?}",
                encoder.kind(),
                self.queue.capabilities
            )));
        }

        {
            let mut state = self.queue.state.lock();
            let record = state.record_mut(self.id)?;
            match record.state {
                CmdBufferState::Pending => {
                    return Err(GraphicsError::InvalidState(
                        "cannot encode into a pending command buffer".to_string(),
                    ));
                }
                CmdBufferState::Recording => {}
                CmdBufferState::Fresh | CmdBufferState::Executed => {
                    self.queue.backend.begin_command_buffer(self.cmd)?;
                    record.state = CmdBufferState::Recording;
                }
            }
        }

        if let Err(e) = encoder.translate(self.queue.backend.as_ref(), self.cmd) {
            log::debug!("CmdBuffer {}: translation failed, resetting: {}", self.id, e);
            self.discard();
            return Err(e);
        }
        Ok(())
    }

    /// End recording and hand the buffer to the queue for the next submit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the buffer is already pending or nothing was
    /// encoded since the last reset or execution.
    pub fn enqueue(&mut self) -> Result<(), GraphicsError> {
        let mut state = self.queue.state.lock();
        let record = state.record_mut(self.id)?;
        match record.state {
            CmdBufferState::Pending => {
                return Err(GraphicsError::InvalidState(
                    "command buffer is already pending".to_string(),
                ));
            }
            CmdBufferState::Fresh | CmdBufferState::Executed => {
                return Err(GraphicsError::InvalidState(
                    "nothing encoded into command buffer".to_string(),
                ));
            }
            CmdBufferState::Recording => {}
        }

        if let Err(e) = self.queue.backend.end_command_buffer(self.cmd) {
            if let Err(reset) = self.queue.backend.reset_command_buffer(self.cmd) {
                log::warn!("CmdBuffer {}: reset after failed end failed: {}", self.id, reset);
            }
            record.state = CmdBufferState::Fresh;
            return Err(e.into());
        }
        record.state = CmdBufferState::Pending;
        state.pending.push(self.id);
        log::trace!("CmdBuffer {}: enqueued", self.id);
        Ok(())
    }

    /// Discard everything recorded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` while the buffer is pending.
    pub fn reset(&mut self) -> Result<(), GraphicsError> {
        let mut state = self.queue.state.lock();
        let record = state.record_mut(self.id)?;
        if record.state == CmdBufferState::Pending {
            return Err(GraphicsError::InvalidState(
                "cannot reset a pending command buffer".to_string(),
            ));
        }
        self.queue.backend.reset_command_buffer(self.cmd)?;
        record.state = CmdBufferState::Fresh;
        Ok(())
    }

    /// Returns true between [`enqueue`](Self::enqueue) and the next submit.
    pub fn is_pending(&self) -> bool {
        self.state() == CmdBufferState::Pending
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CmdBufferState {
        self.queue
            .state
            .lock()
            .records
            .get(&self.id)
            .map_or(CmdBufferState::Fresh, |record| record.state)
    }

    /// Number of successful submits that executed this buffer.
    pub fn executions(&self) -> u64 {
        self.queue
            .state
            .lock()
            .records
            .get(&self.id)
            .map_or(0, |record| record.executions)
    }

    /// Get the backend handle.
    pub fn handle(&self) -> CommandBufferHandle {
        self.cmd
    }

    fn discard(&mut self) {
        if let Err(e) = self.queue.backend.reset_command_buffer(self.cmd) {
            log::warn!("CmdBuffer {}: reset failed: {}", self.id, e);
        }
        if let Some(record) = self.queue.state.lock().records.get_mut(&self.id) {
            record.state = CmdBufferState::Fresh;
        }
    }
}

impl Drop for CmdBuffer<'_> {
    fn drop(&mut self) {
        let mut state = self.queue.state.lock();
        let pending = state
            .records
            .get(&self.id)
            .is_some_and(|record| record.state == CmdBufferState::Pending);
        if pending {
            log::error!("CmdBuffer {} dropped while pending", self.id);
            if std::thread::panicking() {
                return;
            }
            drop(state);
            panic!("CmdBuffer {} dropped while pending", self.id);
        }
        if let Some(record) = state.records.remove(&self.id) {
            self.queue.backend.destroy_command_pool(record.pool);
        }
    }
}

impl std::fmt::Debug for CmdBuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmdBuffer")
            .field("id", &self.id)
            .field("handle", &self.cmd)
            .field("state", &self.state())
            .finish()
    }
}

static_assertions::assert_impl_all!(CmdBuffer<'static>: Send, Sync);

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{DummyBackend, DummyFailure, GpuBackend, RecordedCommand};
    use crate::encoder::{ComputeEncoder, GraphicsEncoder, TransferEncoder};
    use crate::types::{ScissorRect, Viewport};

    fn queue(capabilities: QueueCapabilities) -> (Queue, Arc<DummyBackend>) {
        let backend = Arc::new(DummyBackend::new());
        let queue = Queue::new(Arc::clone(&backend) as Arc<dyn GpuBackend>, capabilities);
        (queue, backend)
    }

    #[test]
    fn test_lifecycle() {
        let (queue, _backend) = queue(QueueCapabilities::all());
        let mut cmd = queue.cmd_buffer().unwrap();
        assert_eq!(cmd.state(), CmdBufferState::Fresh);

        cmd.encode(&GraphicsEncoder::new()).unwrap();
        assert_eq!(cmd.state(), CmdBufferState::Recording);

        cmd.enqueue().unwrap();
        assert!(cmd.is_pending());
        assert!(cmd.enqueue().is_err());
        assert!(cmd.encode(&GraphicsEncoder::new()).is_err());
        assert!(cmd.reset().is_err());

        queue.submit().unwrap();
        assert_eq!(cmd.state(), CmdBufferState::Executed);

        cmd.encode(&GraphicsEncoder::new()).unwrap();
        cmd.enqueue().unwrap();
        queue.submit().unwrap();
        assert_eq!(cmd.executions(), 2);
    }

    #[test]
    fn test_enqueue_without_encode_fails() {
        let (queue, backend) = queue(QueueCapabilities::all());
        let mut cmd = queue.cmd_buffer().unwrap();
        assert!(matches!(cmd.enqueue(), Err(GraphicsError::InvalidState(_))));
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(backend.stats().command_buffers_begun, 0);
    }

    #[test]
    fn test_mixed_encoders_concatenate() {
        let (queue, backend) = queue(QueueCapabilities::all());
        let mut graphics = GraphicsEncoder::new();
        graphics.set_viewport(0, Viewport::from_dimensions(8, 8));
        let mut compute = ComputeEncoder::new();
        compute.synchronize();
        let mut transfer = TransferEncoder::new();
        transfer.synchronize();

        let mut cmd = queue.cmd_buffer().unwrap();
        cmd.encode(&graphics).unwrap();
        cmd.encode(&compute).unwrap();
        cmd.encode(&transfer).unwrap();
        assert_eq!(
            backend.commands(cmd.handle()),
            vec![
                RecordedCommand::SetViewport(Viewport::from_dimensions(8, 8)),
                RecordedCommand::MemoryBarrier { by_region: false },
                RecordedCommand::MemoryBarrier { by_region: false },
            ]
        );
        assert_eq!(backend.stats().command_buffers_begun, 1);
    }

    #[test]
    fn test_failed_translation_resets() {
        let (queue, backend) = queue(QueueCapabilities::all());
        let mut ok = GraphicsEncoder::new();
        ok.set_scissor(0, ScissorRect::from_dimensions(4, 4));
        let mut bad = GraphicsEncoder::new();
        bad.set_viewport(0, Viewport::from_dimensions(4, 4)).draw(3, 1, 0, 0);

        let mut cmd = queue.cmd_buffer().unwrap();
        cmd.encode(&ok).unwrap();
        assert!(cmd.encode(&bad).is_err());
        assert_eq!(cmd.state(), CmdBufferState::Fresh);
        assert!(backend.commands(cmd.handle()).is_empty());
        assert_eq!(backend.stats().draws, 0);

        // Still usable.
        cmd.encode(&ok).unwrap();
        cmd.enqueue().unwrap();
        queue.submit().unwrap();
        assert_eq!(cmd.executions(), 1);
    }

    #[test]
    fn test_failed_end_resets() {
        let (queue, backend) = queue(QueueCapabilities::all());
        let mut cmd = queue.cmd_buffer().unwrap();
        cmd.encode(&GraphicsEncoder::new()).unwrap();
        backend.fail_next(DummyFailure::EndCommandBuffer);
        assert!(cmd.enqueue().unwrap_err().is_device_error());
        assert_eq!(cmd.state(), CmdBufferState::Fresh);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_capabilities_gate_encoders() {
        let (queue, backend) = queue(QueueCapabilities::TRANSFER);
        let mut cmd = queue.cmd_buffer().unwrap();
        assert!(matches!(
            cmd.encode(&GraphicsEncoder::new()),
            Err(GraphicsError::Unsupported(_))
        ));
        assert_eq!(backend.stats().command_buffers_begun, 0);
        cmd.encode(&TransferEncoder::new()).unwrap();
    }

    #[test]
    fn test_pool_creation_failure_leaks_nothing() {
        let (queue, backend) = queue(QueueCapabilities::all());
        backend.fail_next(DummyFailure::AllocateCommandBuffer);
        assert!(queue.cmd_buffer().is_err());
        assert_eq!(backend.live_count("command_pool"), 0);
    }

    #[test]
    #[should_panic(expected = "dropped while pending")]
    fn test_drop_while_pending_panics() {
        let (queue, _backend) = queue(QueueCapabilities::all());
        let mut cmd = queue.cmd_buffer().unwrap();
        cmd.encode(&GraphicsEncoder::new()).unwrap();
        cmd.enqueue().unwrap();
        drop(cmd);
    }
}
