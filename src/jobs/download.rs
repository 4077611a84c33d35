//! Asset download job.

use std::path::PathBuf;

use reqwest::{Method, StatusCode};
use serde::Deserialize;

use super::{Completion, JobExecutor};
use crate::error::TaskError;
use crate::remote::transfer::percent;
use crate::remote::{PoolClass, decode, download_to_file, file_name_from_url};
use crate::tasks::{AssetFile, DownloadRequest, TaskId, TaskPayload, TaskResult};

/// Reply of the marketplace's download endpoint.
#[derive(Debug, Deserialize)]
struct SignedFile {
    #[serde(rename = "filePath")]
    file_path: String,
}

impl JobExecutor {
    /// `asset_download`: resolve the signed file URL, stream it into the
    /// first download directory and copy it into the others.
    pub fn download_asset(&self, req: DownloadRequest) -> TaskId {
        let job = req.clone();
        self.submit(req.app_id, TaskPayload::AssetDownload(req), move |ctx, handle| async move {
            let req = job;
            let file = pick_file(&req.asset_data.files, &req.prefs.resolution)
                .ok_or_else(|| TaskError::InvalidInput("asset has no blend file".to_string()))?;
            let Some((first_dir, other_dirs)) = req.download_dirs.split_first() else {
                return Err(TaskError::InvalidInput("no download directory given".to_string()));
            };

            handle.progress(0, "Getting download URL");
            let url = format!("{}?scene_uuid={}", file.download_url, req.prefs.scene_id);
            let builder = ctx.marketplace.request(
                PoolClass::Api,
                Method::GET,
                &url,
                &req.prefs.api_key,
            );
            let response = ctx
                .marketplace
                .execute(builder, &url, StatusCode::OK, "Getting download URL")
                .await?;
            let signed: SignedFile = decode(response, &url).await?;

            let name = file_name_from_url(&signed.file_path)
                .unwrap_or_else(|| format!("{}.blend", req.asset_data.id));
            let target = first_dir.join(&name);

            let builder = ctx.marketplace.pool(PoolClass::Downloads).get(&signed.file_path);
            let response = ctx
                .marketplace
                .execute(builder, &signed.file_path, StatusCode::OK, "Downloading asset")
                .await?;

            let mut last = 0;
            download_to_file(response, &signed.file_path, &target, |done, total| {
                let now = percent(done, total);
                if now != last {
                    last = now;
                    handle.progress(now, format!("Downloading {}%", now));
                }
            })
            .await?;

            let mut placed: Vec<PathBuf> = vec![target.clone()];
            for dir in other_dirs {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| TaskError::io("create directory", dir, e))?;
                let copy = dir.join(&name);
                tokio::fs::copy(&target, &copy)
                    .await
                    .map_err(|e| TaskError::io("copy", &copy, e))?;
                placed.push(copy);
            }

            tracing::info!(
                client_id = %handle.client_id(),
                asset = %req.asset_data.name,
                files = placed.len(),
                "Asset downloaded"
            );
            Ok(Completion::new("Asset downloaded", TaskResult::Files(placed)))
        })
    }
}

/// File entry for the preferred resolution, falling back to the blend file.
fn pick_file<'a>(files: &'a [AssetFile], resolution: &str) -> Option<&'a AssetFile> {
    let by_type = |file_type: &str| files.iter().find(|f| f.file_type == file_type);
    (!resolution.is_empty())
        .then(|| by_type(resolution))
        .flatten()
        .or_else(|| by_type("blend"))
}
