//! Mutation bus: the single writer of the task registry.
//!
//! Producers (HTTP handlers and job workers) never touch the registry map
//! directly. They send a [`Mutation`] over one unbounded channel; a single
//! consumer loop applies mutations in arrival order. Because every mutation
//! kind shares one channel, a producer's `Add` always lands before its own
//! later `Finish`/`Fail`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::model::{ClientId, Task, TaskId, TaskResult};
use super::registry::{Applied, Disconnected, Namespaces, Report, TaskRegistry};
use crate::error::TaskError;

/// One registry write request.
#[derive(Debug)]
pub enum Mutation {
    Add(Task),
    UpdateProgress {
        client_id: ClientId,
        task_id: TaskId,
        progress: u8,
        message: Option<String>,
    },
    UpdateMessage {
        client_id: ClientId,
        task_id: TaskId,
        message: String,
    },
    Finish {
        client_id: ClientId,
        task_id: TaskId,
        message: String,
        result: TaskResult,
    },
    Fail {
        client_id: ClientId,
        task_id: TaskId,
        error: TaskError,
    },
    Cancel {
        client_id: ClientId,
        task_id: TaskId,
        reason: String,
    },
    /// Snapshot-and-drain for a poll.
    Report {
        client_id: ClientId,
        reply: oneshot::Sender<Report>,
    },
    /// Cancel all tasks of a client and drop its namespace.
    Disconnect {
        client_id: ClientId,
        reply: oneshot::Sender<Disconnected>,
    },
}

/// Cloneable producer side of the bus.
#[derive(Debug, Clone)]
pub struct MutationBus {
    tx: mpsc::UnboundedSender<Mutation>,
}

impl MutationBus {
    fn send(&self, mutation: Mutation) {
        if self.tx.send(mutation).is_err() {
            tracing::debug!("Mutation bus closed, dropping mutation");
        }
    }

    pub fn add(&self, task: Task) {
        self.send(Mutation::Add(task));
    }

    pub fn progress(
        &self,
        client_id: ClientId,
        task_id: TaskId,
        progress: u8,
        message: Option<String>,
    ) {
        self.send(Mutation::UpdateProgress {
            client_id,
            task_id,
            progress,
            message,
        });
    }

    pub fn message(&self, client_id: ClientId, task_id: TaskId, message: impl Into<String>) {
        self.send(Mutation::UpdateMessage {
            client_id,
            task_id,
            message: message.into(),
        });
    }

    pub fn finish(
        &self,
        client_id: ClientId,
        task_id: TaskId,
        message: impl Into<String>,
        result: TaskResult,
    ) {
        self.send(Mutation::Finish {
            client_id,
            task_id,
            message: message.into(),
            result,
        });
    }

    pub fn fail(&self, client_id: ClientId, task_id: TaskId, error: TaskError) {
        self.send(Mutation::Fail {
            client_id,
            task_id,
            error,
        });
    }

    pub fn cancel(&self, client_id: ClientId, task_id: TaskId, reason: impl Into<String>) {
        self.send(Mutation::Cancel {
            client_id,
            task_id,
            reason: reason.into(),
        });
    }

    /// Snapshot and drain one client namespace. `None` once the bus is gone.
    pub async fn report(&self, client_id: ClientId) -> Option<Report> {
        let (reply, rx) = oneshot::channel();
        self.send(Mutation::Report { client_id, reply });
        rx.await.ok()
    }

    /// Cancel every task of a client. `None` once the bus is gone.
    pub async fn disconnect(&self, client_id: ClientId) -> Option<Disconnected> {
        let (reply, rx) = oneshot::channel();
        self.send(Mutation::Disconnect { client_id, reply });
        rx.await.ok()
    }
}

/// Start the consumer loop. It runs until every [`MutationBus`] clone is
/// dropped.
pub fn spawn_bus_loop(registry: Arc<TaskRegistry>) -> (MutationBus, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        tracing::debug!("Mutation bus started");
        while let Some(mutation) = rx.recv().await {
            let mut namespaces = registry.write().await;
            apply(&mut namespaces, mutation);
        }
        tracing::debug!("Mutation bus stopped");
    });

    (MutationBus { tx }, handle)
}

fn apply(namespaces: &mut Namespaces, mutation: Mutation) {
    match mutation {
        Mutation::Add(task) => {
            let (client_id, task_id, kind) = (task.client_id, task.id.clone(), task.kind);
            match namespaces.add(task) {
                Ok(()) => tracing::debug!(
                    client_id = %client_id,
                    task_id = %task_id,
                    kind = %kind,
                    "Task added"
                ),
                Err(e) => tracing::warn!(error = %e, "Dropping add"),
            }
        }
        Mutation::UpdateProgress {
            client_id,
            task_id,
            progress,
            message,
        } => {
            if let Err(e) = namespaces.update_progress(client_id, &task_id, progress, message) {
                tracing::warn!(error = %e, "Dropping progress update");
            }
        }
        Mutation::UpdateMessage {
            client_id,
            task_id,
            message,
        } => {
            if let Err(e) = namespaces.update_message(client_id, &task_id, message) {
                tracing::warn!(error = %e, "Dropping message update");
            }
        }
        Mutation::Finish {
            client_id,
            task_id,
            message,
            result,
        } => match namespaces.finish(client_id, &task_id, message, result) {
            Ok(Applied::Updated(task)) => tracing::info!(
                client_id = %client_id,
                task_id = %task_id,
                kind = %task.kind,
                message = %task.message,
                "Task finished"
            ),
            Ok(Applied::Removed(task)) => tracing::debug!(
                client_id = %client_id,
                task_id = %task_id,
                kind = %task.kind,
                "Late finish for cancelled task, removed"
            ),
            Ok(Applied::Ignored { status }) => tracing::warn!(
                client_id = %client_id,
                task_id = %task_id,
                status = %status,
                "Ignoring finish for terminal task"
            ),
            Err(e) => tracing::warn!(error = %e, "Dropping finish"),
        },
        Mutation::Fail {
            client_id,
            task_id,
            error,
        } => match namespaces.fail(client_id, &task_id, &error) {
            Ok(Applied::Updated(task)) => tracing::warn!(
                client_id = %client_id,
                task_id = %task_id,
                kind = %task.kind,
                error = %error,
                "Task failed"
            ),
            Ok(Applied::Removed(task)) if error.is_cancelled() => tracing::debug!(
                client_id = %client_id,
                task_id = %task_id,
                kind = %task.kind,
                "Cancelled task stopped, removed"
            ),
            Ok(Applied::Removed(task)) => tracing::info!(
                client_id = %client_id,
                task_id = %task_id,
                kind = %task.kind,
                error = %error,
                "Cancelled task reported failure, removed"
            ),
            Ok(Applied::Ignored { status }) => tracing::warn!(
                client_id = %client_id,
                task_id = %task_id,
                status = %status,
                error = %error,
                "Ignoring failure for terminal task"
            ),
            Err(e) => tracing::warn!(error = %e, "Dropping failure"),
        },
        Mutation::Cancel {
            client_id,
            task_id,
            reason,
        } => match namespaces.cancel(client_id, &task_id, reason) {
            Ok(Applied::Updated(task)) => tracing::info!(
                client_id = %client_id,
                task_id = %task_id,
                kind = %task.kind,
                reason = %task.message,
                "Task cancelled"
            ),
            Ok(_) => tracing::debug!(
                client_id = %client_id,
                task_id = %task_id,
                "Cancel ignored, task already terminal"
            ),
            Err(e) => tracing::warn!(error = %e, "Dropping cancel"),
        },
        Mutation::Report { client_id, reply } => {
            let report = namespaces.report(client_id);
            if report.new_client {
                tracing::info!(client_id = %client_id, "New client connected");
            }
            let _ = reply.send(report);
        }
        Mutation::Disconnect { client_id, reply } => {
            let result = namespaces.disconnect(client_id);
            tracing::info!(
                client_id = %client_id,
                cancelled = result.cancelled,
                remaining_clients = result.remaining_clients,
                "Client disconnected"
            );
            let _ = reply.send(result);
        }
    }
}
