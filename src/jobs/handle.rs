//! Worker-side view of a task.

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::Completion;
use crate::error::TaskError;
use crate::tasks::{ClientId, MutationBus, Task, TaskId, TaskKind, TaskPayload};

/// Non-owning handle a worker holds for its task: the ids, a clone of the
/// cancellation token and a producer end of the mutation bus.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    client_id: ClientId,
    task_id: TaskId,
    kind: TaskKind,
    cancellation: CancellationToken,
    bus: MutationBus,
}

impl TaskHandle {
    pub(crate) fn for_task(task: &Task, bus: MutationBus) -> Self {
        Self {
            client_id: task.client_id,
            task_id: task.id.clone(),
            kind: task.kind,
            cancellation: task.cancellation_token(),
            bus,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the task is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancellation.cancelled()
    }

    pub fn progress(&self, progress: u8, message: impl Into<String>) {
        self.bus.progress(
            self.client_id,
            self.task_id.clone(),
            progress,
            Some(message.into()),
        );
    }

    pub fn message(&self, message: impl Into<String>) {
        self.bus
            .message(self.client_id, self.task_id.clone(), message);
    }

    pub(crate) fn finish(&self, completion: Completion) {
        self.bus.finish(
            self.client_id,
            self.task_id.clone(),
            completion.message,
            completion.result,
        );
    }

    pub(crate) fn fail(&self, error: TaskError) {
        self.bus.fail(self.client_id, self.task_id.clone(), error);
    }

    /// Register a sub-task in the same client namespace whose cancellation
    /// follows this task's.
    pub fn child(&self, payload: TaskPayload) -> ChildTask {
        let task = Task::new(self.client_id, payload).with_parent(&self.cancellation);
        let handle = TaskHandle::for_task(&task, self.bus.clone());
        self.bus.add(task);
        ChildTask {
            handle,
            settled: false,
        }
    }
}

/// A sub-task settled by its parent worker rather than by the executor.
///
/// Dropping it unsettled (parent failed early, was cancelled, or panicked)
/// cancels it and then fails it, which removes it from the registry.
#[derive(Debug)]
pub struct ChildTask {
    handle: TaskHandle,
    settled: bool,
}

impl ChildTask {
    pub fn task_id(&self) -> &TaskId {
        self.handle.task_id()
    }

    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    pub fn finish(mut self, completion: Completion) {
        self.settled = true;
        self.handle.finish(completion);
    }

    pub fn fail(mut self, error: TaskError) {
        self.settled = true;
        self.handle.fail(error);
    }
}

impl Drop for ChildTask {
    fn drop(&mut self) {
        if !self.settled {
            let reason = "parent task ended";
            self.handle
                .bus
                .cancel(self.handle.client_id, self.handle.task_id.clone(), reason);
            self.handle.fail(TaskError::Cancelled(reason.to_string()));
        }
    }
}
