//! The shared priority command buffer.

use crate::backend::CommandBufferHandle;
use crate::encoder::{EncoderRef, TransferEncoder};
use crate::error::GraphicsError;

use super::Queue;

/// Access to the queue's open priority command buffer.
///
/// Valid until the next [`Queue::submit`]; encoding afterwards fails instead
/// of recording into a buffer that has already been submitted.
pub struct PriorityCmd<'q> {
    queue: &'q Queue,
    cmd: CommandBufferHandle,
    generation: u64,
}

impl<'q> PriorityCmd<'q> {
    pub(super) fn new(queue: &'q Queue, cmd: CommandBufferHandle, generation: u64) -> Self {
        Self {
            queue,
            cmd,
            generation,
        }
    }

    /// Record transfer work into the priority buffer.
    ///
    /// The encoder is checked as a whole before anything is recorded, so a
    /// rejected encoder leaves the buffer shared with other callers intact.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the priority buffer was submitted since this
    /// handle was obtained, or the encoder's validation error.
    pub fn encode(&self, encoder: &TransferEncoder) -> Result<(), GraphicsError> {
        let state = self.queue.state.lock();
        let work = &state.priority;
        if !work.open || work.generation != self.generation {
            return Err(GraphicsError::InvalidState(
                "priority command buffer was already submitted".to_string(),
            ));
        }
        EncoderRef::from(encoder).translate(self.queue.backend.as_ref(), self.cmd)
    }

    /// Get the backend handle.
    pub fn handle(&self) -> CommandBufferHandle {
        self.cmd
    }
}

impl std::fmt::Debug for PriorityCmd<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityCmd")
            .field("handle", &self.cmd)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::backend::{DummyBackend, GpuBackend};
    use crate::encoder::TransferEncoder;
    use crate::error::GraphicsError;
    use crate::queue::Queue;
    use crate::types::{PipelineStage, QueueCapabilities};

    #[test]
    fn test_stale_priority_handle_rejected() {
        let backend = Arc::new(DummyBackend::new());
        let queue = Queue::new(
            Arc::clone(&backend) as Arc<dyn GpuBackend>,
            QueueCapabilities::all(),
        );
        let first = queue
            .priority(PipelineStage::TRANSFER, Box::new(|_| {}))
            .unwrap();
        let second = queue
            .priority(PipelineStage::TRANSFER, Box::new(|_| {}))
            .unwrap();
        assert_eq!(first.handle(), second.handle());
        first.encode(&TransferEncoder::new()).unwrap();

        queue.submit().unwrap();
        assert!(matches!(
            first.encode(&TransferEncoder::new()),
            Err(GraphicsError::InvalidState(_))
        ));

        let third = queue
            .priority(PipelineStage::TRANSFER, Box::new(|_| {}))
            .unwrap();
        assert_eq!(third.handle(), first.handle());
        assert!(first.encode(&TransferEncoder::new()).is_err());
        third.encode(&TransferEncoder::new()).unwrap();
        assert_eq!(backend.stats().command_buffers_begun, 2);
    }
}
