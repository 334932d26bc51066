//! Command submission.
//!
//! A [`Queue`] hands out [`CmdBuffer`]s, collects the ones that were
//! enqueued, and submits them together with at most one priority command
//! buffer. Submission is synchronous: [`Queue::submit`] returns once the
//! backend queue has drained.
//!
//! # Priority work
//!
//! Subsystems that need work to land before the next batch (image uploads,
//! for instance) record into the shared priority command buffer obtained from
//! [`Queue::priority`]. At submit time the priority buffer goes in its own
//! batch which signals a semaphore the pending batch waits on, gated by the
//! union of the stage masks requested since the last submit.

mod cmd_buffer;
mod priority;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{
    CommandBufferHandle, CommandPoolHandle, GpuBackend, SemaphoreHandle, SubmitBatch,
};
use crate::error::GraphicsError;
use crate::types::{PipelineStage, QueueCapabilities};

pub use cmd_buffer::{CmdBuffer, CmdBufferState};
pub use priority::PriorityCmd;

/// Called once with the outcome of the submit that carried the work.
pub type CompletionHandler = Box<dyn FnOnce(bool) + Send>;

/// Backend object destruction postponed until no recorded work can use it.
pub(crate) type DeferredRelease = Box<dyn FnOnce() + Send>;

// ============================================================================
// Semaphore
// ============================================================================

/// A binary semaphore ordering work across queues or against presentation.
pub struct Semaphore {
    backend: Arc<dyn GpuBackend>,
    handle: SemaphoreHandle,
}

impl Semaphore {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>) -> Result<Self, GraphicsError> {
        let handle = backend.create_semaphore()?;
        Ok(Self { backend, handle })
    }

    pub fn handle(&self) -> SemaphoreHandle {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.backend.destroy_semaphore(self.handle);
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Semaphore").field(&self.handle).finish()
    }
}

// ============================================================================
// Queue
// ============================================================================

struct Record {
    pool: CommandPoolHandle,
    cmd: CommandBufferHandle,
    state: CmdBufferState,
    executions: u64,
}

#[derive(Default)]
struct PriorityWork {
    pool: Option<CommandPoolHandle>,
    cmd: Option<CommandBufferHandle>,
    open: bool,
    stage_mask: PipelineStage,
    handlers: Vec<CompletionHandler>,
    /// Bumped every time the priority buffer is begun.
    generation: u64,
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    records: HashMap<u64, Record>,
    pending: Vec<u64>,
    priority: PriorityWork,
    waits: Vec<(Arc<Semaphore>, PipelineStage)>,
    deferred: Vec<DeferredRelease>,
}

impl QueueState {
    fn record_mut(&mut self, id: u64) -> Result<&mut Record, GraphicsError> {
        self.records
            .get_mut(&id)
            .ok_or_else(|| GraphicsError::InvalidState(format!("unknown command buffer {id}")))
    }

    fn any_record_in(&self, states: &[CmdBufferState]) -> bool {
        self.records.values().any(|record| states.contains(&record.state))
    }
}

/// A submission queue.
///
/// # Example
///
/// ```ignore
/// let queue = device.default_queue();
/// let mut cmd = queue.cmd_buffer()?;
/// cmd.encode(&graphics)?;
/// cmd.encode(&compute)?;
/// cmd.enqueue()?;
/// queue.submit()?;
/// assert_eq!(cmd.executions(), 1);
/// ```
pub struct Queue {
    backend: Arc<dyn GpuBackend>,
    capabilities: QueueCapabilities,
    state: Mutex<QueueState>,
}

impl Queue {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>, capabilities: QueueCapabilities) -> Self {
        Self {
            backend,
            capabilities,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Kinds of work this queue executes.
    pub fn capabilities(&self) -> QueueCapabilities {
        self.capabilities
    }

    /// Create a command buffer with its own command pool.
    ///
    /// # Errors
    ///
    /// Returns a device error if the pool or buffer cannot be created.
    pub fn cmd_buffer(&self) -> Result<CmdBuffer<'_>, GraphicsError> {
        let pool = self.backend.create_command_pool()?;
        let cmd = match self.backend.allocate_command_buffer(pool) {
            Ok(cmd) => cmd,
            Err(e) => {
                self.backend.destroy_command_pool(pool);
                return Err(e.into());
            }
        };

        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.records.insert(
            id,
            Record {
                pool,
                cmd,
                state: CmdBufferState::Fresh,
                executions: 0,
            },
        );
        log::trace!("Queue: created command buffer {} ({:?})", id, cmd);
        Ok(CmdBuffer::new(self, id, cmd))
    }

    /// Get the priority command buffer, beginning it if needed.
    ///
    /// `stage_mask` is merged into the mask the next pending batch waits at;
    /// `PipelineStage::ALL_COMMANDS` replaces it. `on_complete` runs once
    /// after the next submit with its outcome.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an empty `stage_mask`, and a device
    /// error if the priority buffer cannot be created or begun.
    /// `on_complete` is dropped without being called in either case.
    pub fn priority(
        &self,
        stage_mask: PipelineStage,
        on_complete: CompletionHandler,
    ) -> Result<PriorityCmd<'_>, GraphicsError> {
        check_stage_mask(stage_mask)?;
        let mut state = self.state.lock();
        let work = &mut state.priority;

        let pool = match work.pool {
            Some(pool) => pool,
            None => {
                let pool = self.backend.create_command_pool()?;
                work.pool = Some(pool);
                pool
            }
        };
        let cmd = match work.cmd {
            Some(cmd) => cmd,
            None => {
                let cmd = self.backend.allocate_command_buffer(pool)?;
                work.cmd = Some(cmd);
                cmd
            }
        };
        if !work.open {
            self.backend.begin_command_buffer(cmd)?;
            work.open = true;
            work.generation += 1;
            work.stage_mask = PipelineStage::empty();
            log::trace!("Queue: began priority command buffer {:?}", cmd);
        }

        if stage_mask == PipelineStage::ALL_COMMANDS {
            work.stage_mask = stage_mask;
        } else {
            work.stage_mask |= stage_mask;
        }
        work.handlers.push(on_complete);
        Ok(PriorityCmd::new(self, cmd, work.generation))
    }

    /// Make the next submit wait on `semaphore` at `stage_mask`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an empty `stage_mask`.
    pub fn wait_for(
        &self,
        semaphore: &Arc<Semaphore>,
        stage_mask: PipelineStage,
    ) -> Result<(), GraphicsError> {
        check_stage_mask(stage_mask)?;
        self.state
            .lock()
            .waits
            .push((Arc::clone(semaphore), stage_mask));
        Ok(())
    }

    /// Number of command buffers waiting for the next submit.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Submit the priority buffer and every enqueued command buffer, then
    /// wait for the queue to drain.
    ///
    /// With nothing to submit this makes no backend call. Otherwise pending
    /// and priority bookkeeping is cleared and completion handlers run even
    /// when the backend fails.
    ///
    /// # Errors
    ///
    /// Returns a device error if ending the priority buffer, submitting, or
    /// waiting fails.
    pub fn submit(&self) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();

        let mut priority_cmd = None;
        if state.priority.open {
            state.priority.open = false;
            let cmd = state.priority.cmd;
            if let Some(cmd) = cmd {
                if let Err(e) = self.backend.end_command_buffer(cmd) {
                    log::error!("Queue: failed to end priority command buffer: {}", e);
                    let handlers = self.finish(&mut *state, false);
                    drop(state);
                    notify(handlers, false);
                    return Err(e.into());
                }
                priority_cmd = Some(cmd);
            }
        }

        if priority_cmd.is_none() && state.pending.is_empty() {
            if !state.any_record_in(&[CmdBufferState::Recording, CmdBufferState::Pending]) {
                let deferred = std::mem::take(&mut state.deferred);
                drop(state);
                release(deferred);
            }
            return Ok(());
        }

        let pending_cmds: Vec<CommandBufferHandle> = state
            .pending
            .iter()
            .filter_map(|id| state.records.get(id).map(|record| record.cmd))
            .collect();
        log::debug!(
            "Queue: submitting {} priority + {} pending command buffers",
            usize::from(priority_cmd.is_some()),
            pending_cmds.len()
        );

        let mut outcome = Ok(());
        let mut link = None;
        let mut batches = Vec::with_capacity(2);
        if let Some(cmd) = priority_cmd {
            batches.push(SubmitBatch {
                command_buffers: vec![cmd],
                ..Default::default()
            });
        }
        if !pending_cmds.is_empty() {
            let mut batch = SubmitBatch {
                command_buffers: pending_cmds,
                ..Default::default()
            };
            if priority_cmd.is_some() {
                match self.backend.create_semaphore() {
                    Ok(semaphore) => {
                        batches[0].signal.push(semaphore);
                        batch.wait.push((semaphore, state.priority.stage_mask));
                        link = Some(semaphore);
                    }
                    Err(e) => outcome = Err(e),
                }
            }
            batches.push(batch);
        }
        for (semaphore, stage_mask) in &state.waits {
            batches[0].wait.push((semaphore.handle(), *stage_mask));
        }

        if outcome.is_ok() {
            outcome = self
                .backend
                .queue_submit(&batches)
                .and_then(|()| self.backend.queue_wait_idle());
        }
        if let Some(semaphore) = link {
            self.backend.destroy_semaphore(semaphore);
        }

        let success = outcome.is_ok();
        if let Err(e) = &outcome {
            log::error!("Queue: submission failed: {}", e);
        }
        let handlers = self.finish(&mut *state, success);
        let deferred = if state.any_record_in(&[CmdBufferState::Recording]) {
            Vec::new()
        } else {
            std::mem::take(&mut state.deferred)
        };
        drop(state);

        release(deferred);
        notify(handlers, success);
        outcome.map_err(GraphicsError::from)
    }

    /// Destroy a backend object once nothing recorded can still use it.
    pub(crate) fn defer_release(&self, release: DeferredRelease) {
        self.state.lock().deferred.push(release);
    }

    /// Clear per-submit state and hand back the completion handlers.
    fn finish(&self, state: &mut QueueState, success: bool) -> Vec<CompletionHandler> {
        for id in std::mem::take(&mut state.pending) {
            if let Some(record) = state.records.get_mut(&id) {
                if success {
                    record.state = CmdBufferState::Executed;
                    record.executions += 1;
                } else {
                    record.state = CmdBufferState::Fresh;
                }
            }
        }
        state.waits.clear();
        state.priority.open = false;
        state.priority.stage_mask = PipelineStage::empty();
        std::mem::take(&mut state.priority.handlers)
    }
}

fn check_stage_mask(stage_mask: PipelineStage) -> Result<(), GraphicsError> {
    if stage_mask.is_empty() {
        return Err(GraphicsError::InvalidParameter(
            "pipeline stage mask must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn notify(handlers: Vec<CompletionHandler>, success: bool) {
    for handler in handlers {
        handler(success);
    }
}

fn release(deferred: Vec<DeferredRelease>) {
    if !deferred.is_empty() {
        log::debug!("Queue: running {} deferred releases", deferred.len());
    }
    for release in deferred {
        release();
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let leaked = state.records.len();
        for (_, record) in state.records.drain() {
            self.backend.destroy_command_pool(record.pool);
        }
        if let Some(pool) = state.priority.pool.take() {
            self.backend.destroy_command_pool(pool);
        }
        let handlers = std::mem::take(&mut state.priority.handlers);
        let deferred = std::mem::take(&mut state.deferred);
        release(deferred);
        notify(handlers, false);

        if leaked > 0 {
            log::error!("Queue dropped with {} live command buffers", leaked);
            if !std::thread::panicking() {
                panic!("Queue dropped with {leaked} live command buffers");
            }
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(Queue: Send, Sync);
static_assertions::assert_impl_all!(Semaphore: Send, Sync);
