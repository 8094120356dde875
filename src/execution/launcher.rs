//! Async execution wrapper - runs invocations off the caller's task

use crate::core::{PipelineRun, TriggerSource};
use crate::execution::PipelineInvoker;
use crate::transform::ProcessRunner;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

/// A reserved execution slot; the slot is released when this is dropped
#[derive(Debug)]
pub struct RunSlot {
    _permit: OwnedSemaphorePermit,
}

/// Launches pipeline invocations as detached tasks, at most
/// `max_concurrent` at a time
pub struct RunLauncher<R> {
    invoker: Arc<PipelineInvoker<R>>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl<R> Clone for RunLauncher<R> {
    fn clone(&self) -> Self {
        Self {
            invoker: self.invoker.clone(),
            slots: self.slots.clone(),
            capacity: self.capacity,
        }
    }
}

impl<R: ProcessRunner + 'static> RunLauncher<R> {
    pub fn new(invoker: PipelineInvoker<R>, max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        Self {
            invoker: Arc::new(invoker),
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn invoker(&self) -> &PipelineInvoker<R> {
        &self.invoker
    }

    /// Reserve a slot without waiting; `None` when every slot is busy
    pub fn try_reserve(&self) -> Option<RunSlot> {
        self.slots
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| RunSlot { _permit: permit })
    }

    /// Number of invocations currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Schedule run `run_id` and return immediately.
    ///
    /// The task owns `slot` until the run reaches a terminal state. The
    /// handle may be dropped; the task keeps running detached.
    pub fn launch(
        &self,
        slot: RunSlot,
        run_id: i64,
        triggered_by: TriggerSource,
    ) -> JoinHandle<Option<PipelineRun>> {
        let invoker = self.invoker.clone();
        debug!("Launching run {} in the background", run_id);

        tokio::spawn(async move {
            let _slot = slot;
            invoker.run_tracked(run_id, triggered_by).await
        })
    }
}
