//! Search job and the thumbnail requests derived from a result page.

use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;

use super::{Completion, JobExecutor};
use crate::remote::file_name_from_url;
use crate::tasks::{SearchRequest, TaskId, TaskPayload, TaskResult, ThumbnailRequest, ThumbnailSize};

impl JobExecutor {
    /// `search`: run the query, finish with the raw result set, then fetch
    /// thumbnails for the page in the background.
    pub fn search(&self, req: SearchRequest) -> TaskId {
        let client_id = req.client_id();
        let query = req.clone();
        let executor = self.clone();
        self.submit(client_id, TaskPayload::Search(req), move |ctx, _| async move {
            let body: Value = ctx
                .marketplace
                .get_json(&query.url_query, &query.prefs.api_key, "Search")
                .await?;

            let (small, full) =
                thumbnail_requests(&body, &query.blender_version, &query.temp_dir);
            tracing::debug!(
                client_id = %client_id,
                small = small.len(),
                full = full.len(),
                "Search finished, fetching thumbnails"
            );
            tokio::spawn(async move {
                let (small, full) = tokio::join!(
                    executor.download_thumbnails(client_id, small, true),
                    executor.download_thumbnails(client_id, full, true),
                );
                tracing::debug!(
                    client_id = %client_id,
                    on_disk = small.found_on_disk + full.found_on_disk,
                    fetched = small.spawned + full.spawned,
                    "Thumbnail batches done"
                );
            });

            Ok(Completion::new(
                "Search results downloaded",
                TaskResult::json(body),
            ))
        })
    }
}

/// Small and full thumbnail requests for every result, skipping URLs
/// already requested earlier on the page.
pub fn thumbnail_requests(
    search: &Value,
    host_version: &str,
    temp_dir: &Path,
) -> (Vec<ThumbnailRequest>, Vec<ThumbnailRequest>) {
    let mut small = Vec::new();
    let mut full = Vec::new();
    let Some(results) = search.get("results").and_then(Value::as_array) else {
        tracing::warn!("Search response has no results list");
        return (small, full);
    };

    let webp_capable = supports_webp(host_version);
    let mut seen = HashSet::new();

    for (index, result) in results.iter().enumerate() {
        let use_webp = webp_capable
            && result
                .get("webpGeneratedTimestamp")
                .and_then(Value::as_f64)
                .is_some_and(|ts| ts > 0.0);
        let is_hdr = result.get("assetType").and_then(Value::as_str) == Some("hdr");
        let asset_base_id = result
            .get("assetBaseId")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let small_key = if use_webp {
            "thumbnailSmallUrlWebp"
        } else {
            "thumbnailSmallUrl"
        };
        let full_key = match (is_hdr, use_webp) {
            (true, true) => "thumbnailLargeUrlNonsquaredWebp",
            (true, false) => "thumbnailLargeUrlNonsquared",
            (false, true) => "thumbnailMiddleUrlWebp",
            (false, false) => "thumbnailMiddleUrl",
        };

        for (key, size, out) in [
            (small_key, ThumbnailSize::Small, &mut small),
            (full_key, ThumbnailSize::Full, &mut full),
        ] {
            let Some(url) = result.get(key).and_then(Value::as_str) else {
                tracing::debug!(index, key, "Result without thumbnail url");
                continue;
            };
            let Some(name) = file_name_from_url(url) else {
                tracing::debug!(index, url, "Cannot derive thumbnail file name");
                continue;
            };
            if !seen.insert(url.to_string()) {
                continue;
            }
            out.push(ThumbnailRequest {
                thumbnail_type: size,
                image_path: temp_dir.join(name),
                image_url: url.to_string(),
                asset_base_id: asset_base_id.to_string(),
                index,
            });
        }
    }

    (small, full)
}

/// Webp thumbnails need host version 3.4 or newer.
fn supports_webp(version: &str) -> bool {
    let mut parts = version.split('.').map(|p| p.trim().parse::<u32>());
    match (parts.next(), parts.next()) {
        (Some(Ok(major)), Some(Ok(minor))) => (major, minor) >= (3, 4),
        (Some(Ok(major)), None) => major > 3,
        _ => false,
    }
}
