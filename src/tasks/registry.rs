//! Task registry: client namespace → task id → task.
//!
//! Reads take a snapshot under the read lock. Writes are only performed by the
//! mutation bus consumer (see [`super::bus`]), which holds the write lock for
//! the duration of a single mutation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockWriteGuard};

use super::model::{ClientId, Task, TaskId, TaskResult, TaskStatus};
use crate::error::{RegistryError, TaskError};

/// How a lifecycle mutation landed on its task.
#[derive(Debug, Clone)]
pub enum Applied {
    /// The transition was recorded.
    Updated(Task),
    /// The task was in a status that does not accept this mutation.
    Ignored { status: TaskStatus },
    /// A late outcome for a cancelled task; the task was dropped.
    Removed(Task),
}

/// Result of a poll for one client namespace.
#[derive(Debug, Clone)]
pub struct Report {
    /// Task snapshots ordered by creation time.
    pub tasks: Vec<Task>,
    /// True on the client's first poll, even if jobs were already added.
    pub new_client: bool,
}

/// Result of a client disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected {
    /// Number of tasks whose cancellation handle was fired.
    pub cancelled: usize,
    /// Namespaces left after removal.
    pub remaining_clients: usize,
}

/// The namespace map itself. Only reachable mutably through the bus.
#[derive(Debug, Default)]
pub struct Namespaces {
    clients: HashMap<ClientId, HashMap<TaskId, Task>>,
    /// Clients that have polled at least once since connecting.
    reported: HashSet<ClientId>,
}

impl Namespaces {
    fn task_mut(&mut self, client_id: ClientId, task_id: &TaskId) -> Result<&mut Task, RegistryError> {
        self.clients
            .get_mut(&client_id)
            .and_then(|tasks| tasks.get_mut(task_id))
            .ok_or_else(|| RegistryError::UnknownTask {
                client_id,
                task_id: task_id.clone(),
            })
    }

    fn remove(&mut self, client_id: ClientId, task_id: &TaskId) -> Option<Task> {
        self.clients.get_mut(&client_id)?.remove(task_id)
    }

    /// Register a task, creating its client namespace on first contact.
    pub fn add(&mut self, task: Task) -> Result<(), RegistryError> {
        let tasks = self.clients.entry(task.client_id).or_default();
        if tasks.contains_key(&task.id) {
            return Err(RegistryError::DuplicateTask {
                client_id: task.client_id,
                task_id: task.id,
            });
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Set progress (clamped to 100) and optionally the message of a live task.
    pub fn update_progress(
        &mut self,
        client_id: ClientId,
        task_id: &TaskId,
        progress: u8,
        message: Option<String>,
    ) -> Result<Applied, RegistryError> {
        let task = self.task_mut(client_id, task_id)?;
        if task.is_terminal() {
            return Ok(Applied::Ignored {
                status: task.status,
            });
        }
        task.progress = progress.min(100);
        if let Some(message) = message.filter(|m| !m.is_empty()) {
            task.message = message;
        }
        Ok(Applied::Updated(task.clone()))
    }

    /// Replace the message of a live task.
    pub fn update_message(
        &mut self,
        client_id: ClientId,
        task_id: &TaskId,
        message: String,
    ) -> Result<Applied, RegistryError> {
        let task = self.task_mut(client_id, task_id)?;
        if task.is_terminal() {
            return Ok(Applied::Ignored {
                status: task.status,
            });
        }
        task.message = message;
        Ok(Applied::Updated(task.clone()))
    }

    /// Record success. A finish for a cancelled task drops the task.
    pub fn finish(
        &mut self,
        client_id: ClientId,
        task_id: &TaskId,
        message: String,
        result: TaskResult,
    ) -> Result<Applied, RegistryError> {
        let task = self.task_mut(client_id, task_id)?;
        let status = task.status;
        match status {
            TaskStatus::Created => {
                task.status = TaskStatus::Finished;
                task.progress = 100;
                task.result = result;
                if !message.is_empty() {
                    task.message = message;
                }
                Ok(Applied::Updated(task.clone()))
            }
            TaskStatus::Cancelled => Ok(self
                .remove(client_id, task_id)
                .map(Applied::Removed)
                .unwrap_or(Applied::Ignored {
                    status: TaskStatus::Cancelled,
                })),
            status => Ok(Applied::Ignored { status }),
        }
    }

    /// Record failure. A failure for a cancelled task is discarded and the
    /// task dropped, so a cancelled operation never surfaces as an error.
    pub fn fail(
        &mut self,
        client_id: ClientId,
        task_id: &TaskId,
        error: &TaskError,
    ) -> Result<Applied, RegistryError> {
        let task = self.task_mut(client_id, task_id)?;
        let status = task.status;
        match status {
            TaskStatus::Created => {
                task.status = TaskStatus::Error;
                task.message = error.user_message();
                task.detailed_message = error.to_string();
                Ok(Applied::Updated(task.clone()))
            }
            TaskStatus::Cancelled => Ok(self
                .remove(client_id, task_id)
                .map(Applied::Removed)
                .unwrap_or(Applied::Ignored {
                    status: TaskStatus::Cancelled,
                })),
            status => Ok(Applied::Ignored { status }),
        }
    }

    /// Fire the task's cancellation handle and mark it cancelled.
    pub fn cancel(
        &mut self,
        client_id: ClientId,
        task_id: &TaskId,
        reason: String,
    ) -> Result<Applied, RegistryError> {
        let task = self.task_mut(client_id, task_id)?;
        if task.is_terminal() {
            return Ok(Applied::Ignored {
                status: task.status,
            });
        }
        task.revoke();
        task.status = TaskStatus::Cancelled;
        task.message = reason;
        Ok(Applied::Updated(task.clone()))
    }

    /// Snapshot a namespace for the poller and drop its finished/errored
    /// tasks, so each terminal result is delivered at most once.
    pub fn report(&mut self, client_id: ClientId) -> Report {
        let new_client = self.reported.insert(client_id);
        let tasks = self.clients.entry(client_id).or_default();

        let mut snapshot: Vec<Task> = tasks.values().cloned().collect();
        snapshot.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        tasks.retain(|_, task| !task.status.is_reportable_terminal());

        Report {
            tasks: snapshot,
            new_client,
        }
    }

    /// Cancel every task of a namespace and remove the namespace.
    pub fn disconnect(&mut self, client_id: ClientId) -> Disconnected {
        self.reported.remove(&client_id);
        let cancelled = self
            .clients
            .remove(&client_id)
            .map(|tasks| {
                for task in tasks.values() {
                    task.revoke();
                }
                tasks.len()
            })
            .unwrap_or(0);

        Disconnected {
            cancelled,
            remaining_clients: self.clients.len(),
        }
    }

    fn get(&self, client_id: ClientId, task_id: &TaskId) -> Option<&Task> {
        self.clients.get(&client_id)?.get(task_id)
    }
}

/// Shared, lock-guarded task registry.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    inner: RwLock<Namespaces>,
}

impl TaskRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Exclusive access for the mutation bus consumer.
    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Namespaces> {
        self.inner.write().await
    }

    /// Snapshot of one task.
    pub async fn get(&self, client_id: ClientId, task_id: &TaskId) -> Option<Task> {
        self.inner.read().await.get(client_id, task_id).cloned()
    }

    /// Snapshot of every task of a namespace, ordered by creation time.
    pub async fn tasks(&self, client_id: ClientId) -> Vec<Task> {
        let guard = self.inner.read().await;
        let mut tasks: Vec<Task> = guard
            .clients
            .get(&client_id)
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub async fn contains_client(&self, client_id: ClientId) -> bool {
        self.inner.read().await.clients.contains_key(&client_id)
    }

    pub async fn client_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }
}
