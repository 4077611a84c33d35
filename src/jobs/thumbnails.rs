//! Thumbnail batch downloader.
//!
//! Fan-out is one worker per missing thumbnail, throttled by the shared
//! thumbnail semaphore; fan-in is a `JoinSet` that is either drained
//! (`block`) or detached.

use reqwest::{Method, StatusCode};
use tokio::task::JoinSet;

use super::{Completion, JobExecutor, TaskHandle};
use crate::error::TaskError;
use crate::remote::{Marketplace, PoolClass, download_to_file};
use crate::tasks::{ApiKey, ClientId, Task, TaskPayload, TaskResult, ThumbnailRequest, ThumbnailSize};

/// What a batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Tasks finished immediately because the file was already there.
    pub found_on_disk: usize,
    /// Workers spawned to fetch.
    pub spawned: usize,
}

impl JobExecutor {
    /// Register one `thumbnail_download` task per request and fetch the
    /// ones not on disk. With `block` the call returns after every spawned
    /// worker has reached a terminal outcome.
    pub async fn download_thumbnails(
        &self,
        client_id: ClientId,
        requests: Vec<ThumbnailRequest>,
        block: bool,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let mut workers = JoinSet::new();

        for request in requests {
            let on_disk = tokio::fs::try_exists(&request.image_path)
                .await
                .unwrap_or(false);
            let task = Task::new(client_id, TaskPayload::ThumbnailDownload(request.clone()));

            if on_disk {
                let handle = TaskHandle::for_task(&task, self.bus().clone());
                self.bus().add(task);
                handle.finish(Completion::message("thumbnail found on disk"));
                summary.found_on_disk += 1;
                continue;
            }

            let (_, worker) = self.launch(task, move |ctx, _| async move {
                let _permit = ctx
                    .thumbnail_permits
                    .acquire()
                    .await
                    .map_err(|_| TaskError::Cancelled("thumbnail downloads stopped".to_string()))?;
                fetch_thumbnail(&ctx.marketplace, &request).await
            });
            workers.spawn(worker);
            summary.spawned += 1;
        }

        if block {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "Thumbnail worker aborted");
                }
            }
        } else {
            workers.detach_all();
        }
        summary
    }
}

async fn fetch_thumbnail(
    marketplace: &Marketplace,
    request: &ThumbnailRequest,
) -> Result<Completion, TaskError> {
    let pool = match request.thumbnail_type {
        ThumbnailSize::Small => PoolClass::SmallThumbs,
        ThumbnailSize::Full => PoolClass::BigThumbs,
    };
    let url = &request.image_url;
    let builder = marketplace.request(pool, Method::GET, url, &ApiKey::default());
    let response = marketplace
        .execute(builder, url, StatusCode::OK, "Downloading thumbnail")
        .await?;
    download_to_file(response, url, &request.image_path, |_, _| {}).await?;
    Ok(Completion::new("thumbnail downloaded", TaskResult::Empty))
}
