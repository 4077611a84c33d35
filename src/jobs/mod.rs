//! Job executor: one spawned worker per submitted job.
//!
//! `submit` registers the task on the bus *before* spawning, then runs the
//! job future raced against the task's cancellation token. Whatever happens
//! inside (success, error, cancellation, panic) the worker leaves through a
//! single exit path that emits exactly one `Finish` or `Fail`.

pub mod api;
pub mod download;
pub mod handle;
pub mod search;
pub mod thumbnails;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::TaskError;
use crate::remote::Marketplace;
use crate::tasks::{ClientId, MutationBus, Task, TaskId, TaskPayload, TaskResult};
use crate::upload::AssetPacker;

pub use handle::{ChildTask, TaskHandle};

/// Successful outcome of a job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub message: String,
    pub result: TaskResult,
}

impl Completion {
    pub fn new(message: impl Into<String>, result: TaskResult) -> Self {
        Self {
            message: message.into(),
            result,
        }
    }

    /// Completion with a message and an empty result.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(message, TaskResult::Empty)
    }
}

pub type JobResult = Result<Completion, TaskError>;

/// Shared dependencies of every job.
pub struct JobContext {
    pub marketplace: Marketplace,
    pub bus: MutationBus,
    /// Bounds concurrent thumbnail fetches across all batches.
    pub thumbnail_permits: Arc<Semaphore>,
    pub packer: Arc<dyn AssetPacker>,
}

/// Spawns and supervises job workers.
#[derive(Clone)]
pub struct JobExecutor {
    ctx: Arc<JobContext>,
}

impl JobExecutor {
    pub fn new(ctx: JobContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &Arc<JobContext> {
        &self.ctx
    }

    pub fn bus(&self) -> &MutationBus {
        &self.ctx.bus
    }

    /// Create a task for `payload`, register it, and spawn `work` for it.
    pub fn submit<F, Fut>(&self, client_id: ClientId, payload: TaskPayload, work: F) -> TaskId
    where
        F: FnOnce(Arc<JobContext>, TaskHandle) -> Fut,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let (task_id, worker) = self.launch(Task::new(client_id, payload), work);
        tokio::spawn(worker);
        task_id
    }

    /// Like [`submit`](Self::submit) but hands back the join handle.
    pub fn submit_tracked<F, Fut>(
        &self,
        client_id: ClientId,
        payload: TaskPayload,
        work: F,
    ) -> (TaskId, JoinHandle<()>)
    where
        F: FnOnce(Arc<JobContext>, TaskHandle) -> Fut,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let (task_id, worker) = self.launch(Task::new(client_id, payload), work);
        (task_id, tokio::spawn(worker))
    }

    /// Register the task and build (but do not spawn) its worker future.
    pub(crate) fn launch<F, Fut>(
        &self,
        task: Task,
        work: F,
    ) -> (TaskId, impl Future<Output = ()> + Send + 'static)
    where
        F: FnOnce(Arc<JobContext>, TaskHandle) -> Fut,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let handle = TaskHandle::for_task(&task, self.ctx.bus.clone());
        let task_id = task.id.clone();
        tracing::debug!(
            client_id = %task.client_id,
            task_id = %task_id,
            kind = %task.kind,
            "Submitting job"
        );
        self.ctx.bus.add(task);

        let job = work(self.ctx.clone(), handle.clone());
        (task_id, run_to_completion(handle, job))
    }
}

/// Drive one job to exactly one terminal mutation.
async fn run_to_completion<Fut>(handle: TaskHandle, job: Fut)
where
    Fut: Future<Output = JobResult> + Send + 'static,
{
    let outcome = tokio::select! {
        biased;
        _ = handle.cancelled() => Err(TaskError::Cancelled("interrupted".to_string())),
        caught = AssertUnwindSafe(job).catch_unwind() => {
            caught.unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic))))
        }
    };

    match outcome {
        Ok(completion) => handle.finish(completion),
        Err(error) => handle.fail(error),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
