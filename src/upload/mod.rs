//! Asset upload pipeline.
//!
//! One upload request walks `metadata -> packing -> files -> finalize` inside
//! a single job. The first failing stage fails the whole task and nothing
//! after it runs. Metadata additionally reports through its own sub-task.

pub mod metadata;
pub mod packing;
pub mod transfer;

use reqwest::{Method, StatusCode};
use serde_json::{Value, json};

use crate::error::TaskError;
use crate::jobs::{Completion, JobContext, JobExecutor, TaskHandle};
use crate::tasks::{AssetUploadRequest, TaskId, TaskPayload, TaskResult, UploadItem};

pub use metadata::{AssetRecord, sync_metadata};
pub use packing::{AssetPacker, BlenderPacker, PackingJob, UploadFile, prepare_files};
pub use transfer::upload_file;

/// Statuses from which a partial re-upload sends the asset back to review.
const REVIEW_AGAIN_STATUSES: [&str; 3] = ["on_hold", "deleted", "rejected"];

/// Whether the asset should be marked `uploaded` once files are transferred.
pub fn should_mark_uploaded(main_file: bool, verification_status: &str) -> bool {
    main_file || REVIEW_AGAIN_STATUSES.contains(&verification_status)
}

impl JobExecutor {
    /// `asset_upload`: run the full pipeline for one asset.
    pub fn upload_asset(&self, req: AssetUploadRequest) -> TaskId {
        let app_id = req.app_id;
        let job = req.clone();
        self.submit(
            app_id,
            TaskPayload::AssetUpload(Box::new(req)),
            move |ctx, handle| async move {
                let record = run_pipeline(&ctx, &handle, &job).await?;
                tracing::info!(
                    client_id = %handle.client_id(),
                    task_id = %handle.task_id(),
                    asset_id = %record.id,
                    "Asset uploaded"
                );
                Ok(Completion::new(
                    "Upload successful",
                    TaskResult::Asset(Box::new(record)),
                ))
            },
        )
    }
}

async fn run_pipeline(
    ctx: &JobContext,
    handle: &TaskHandle,
    req: &AssetUploadRequest,
) -> Result<AssetRecord, TaskError> {
    let main_file = req.includes(UploadItem::MainFile);

    handle.progress(0, "Uploading metadata");
    let metadata_task = handle.child(TaskPayload::AssetMetadataUpload(Box::new(req.clone())));
    let record = match sync_metadata(&ctx.marketplace, req).await {
        Ok(record) => {
            metadata_task.finish(Completion::new(
                "Metadata upload successful",
                TaskResult::Asset(Box::new(record.clone())),
            ));
            record
        }
        Err(error) => {
            metadata_task.fail(error.clone());
            return Err(error);
        }
    };

    if main_file {
        handle.progress(10, "Packing files");
    }
    let files = prepare_files(ctx.packer.as_ref(), req, &record).await?;

    let total = files.len().max(1);
    for (n, file) in files.iter().enumerate() {
        let progress = 20 + (n * 70 / total) as u8;
        handle.progress(progress, format!("Uploading {}", file.file_type));
        upload_file(&ctx.marketplace, &req.prefs.api_key, &record.id, file).await?;
    }

    if should_mark_uploaded(main_file, &record.verification_status) {
        handle.progress(95, "Finalizing upload");
        let url = ctx
            .marketplace
            .url(&format!("/api/v1/assets/{}/", record.id));
        let _: Value = ctx
            .marketplace
            .send_json(
                Method::PATCH,
                &url,
                &req.prefs.api_key,
                &json!({ "verificationStatus": "uploaded" }),
                StatusCode::OK,
                "Finalizing upload",
            )
            .await?;
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::{executor_with_packer, wait_terminal};
    use crate::tasks::{
        AssetExportData, AssetUploadData, ClientId, Preferences, Task, TaskKind, TaskRegistry,
        TaskStatus,
    };
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::extract::{Path as UrlPath, State};
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::{patch, post, put};
    use axum::{Json, Router};

    #[derive(Default)]
    struct Market {
        verification_status: String,
        reject_metadata: bool,
        patches: Mutex<Vec<Value>>,
        slots: Mutex<Vec<Value>>,
        stored: Mutex<Vec<usize>>,
        confirmed: Mutex<usize>,
        base: Mutex<String>,
    }

    impl Market {
        fn record(&self) -> Value {
            json!({
                "id": "v1",
                "assetBaseId": "b1",
                "assetType": "model",
                "name": "Chair",
                "verificationStatus": self.verification_status,
            })
        }
    }

    async fn spawn_market(market: Arc<Market>) -> String {
        let app = Router::new()
            .route(
                "/api/v1/assets/",
                post(|State(m): State<Arc<Market>>| async move {
                    if m.reject_metadata {
                        (HttpStatus::BAD_REQUEST, Json(json!({"detail": "bad"})))
                    } else {
                        (HttpStatus::CREATED, Json(m.record()))
                    }
                }),
            )
            .route(
                "/api/v1/assets/{id}/",
                patch(
                    |State(m): State<Arc<Market>>, Json(body): Json<Value>| async move {
                        m.patches.lock().unwrap().push(body);
                        Json(m.record())
                    },
                ),
            )
            .route(
                "/api/v1/uploads/",
                post(
                    |State(m): State<Arc<Market>>, Json(body): Json<Value>| async move {
                        let n = {
                            let mut slots = m.slots.lock().unwrap();
                            slots.push(body);
                            slots.len()
                        };
                        let base = m.base.lock().unwrap().clone();
                        (
                            HttpStatus::CREATED,
                            Json(json!({
                                "s3UploadUrl": format!("{base}/storage/{n}"),
                                "uploadDoneUrl": format!("{base}/done/{n}"),
                            })),
                        )
                    },
                ),
            )
            .route(
                "/storage/{n}",
                put(
                    |State(m): State<Arc<Market>>, UrlPath(_n): UrlPath<usize>, body: axum::body::Bytes| async move {
                        m.stored.lock().unwrap().push(body.len());
                        HttpStatus::OK
                    },
                ),
            )
            .route(
                "/done/{n}",
                post(|State(m): State<Arc<Market>>| async move {
                    *m.confirmed.lock().unwrap() += 1;
                    HttpStatus::OK
                }),
            )
            .with_state(market.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        *market.base.lock().unwrap() = base.clone();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    /// Writes the packed file the way the packing script would.
    struct FakePacker;

    #[async_trait]
    impl AssetPacker for FakePacker {
        async fn pack(&self, job: &PackingJob) -> Result<(), TaskError> {
            tokio::fs::write(&job.packed_file, b"packed-blend")
                .await
                .map_err(|e| TaskError::io("write", &job.packed_file, e))
        }
    }

    fn request(dir: &Path, existing: bool, set: Vec<UploadItem>) -> AssetUploadRequest {
        std::fs::write(dir.join("thumb.jpg"), b"jpeg-bytes").unwrap();
        AssetUploadRequest {
            app_id: ClientId(3),
            prefs: Preferences::default(),
            upload_data: AssetUploadData {
                asset_type: "model".into(),
                name: "Chair".into(),
                ..Default::default()
            },
            export_data: AssetExportData {
                asset_base_id: if existing { "b1".into() } else { String::new() },
                id: if existing { "v1".into() } else { String::new() },
                temp_dir: dir.to_path_buf(),
                thumbnail_path: dir.join("thumb.jpg"),
                ..Default::default()
            },
            upload_set: set,
        }
    }

    async fn metadata_task(registry: &TaskRegistry, client: ClientId) -> Task {
        registry
            .tasks(client)
            .await
            .into_iter()
            .find(|t| t.kind == TaskKind::AssetMetadataUpload)
            .unwrap()
    }

    fn uploaded_patches(market: &Market) -> usize {
        market
            .patches
            .lock()
            .unwrap()
            .iter()
            .filter(|p| **p == json!({"verificationStatus": "uploaded"}))
            .count()
    }

    #[test]
    fn finalize_rule() {
        assert!(should_mark_uploaded(true, "validated"));
        assert!(should_mark_uploaded(false, "on_hold"));
        assert!(should_mark_uploaded(false, "deleted"));
        assert!(should_mark_uploaded(false, "rejected"));
        assert!(!should_mark_uploaded(false, "validated"));
        assert!(!should_mark_uploaded(false, "uploaded"));
    }

    #[tokio::test]
    async fn new_asset_with_main_file_runs_every_stage() {
        let market = Arc::new(Market {
            verification_status: "uploading".into(),
            ..Default::default()
        });
        let base = spawn_market(market.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (executor, registry) = executor_with_packer(&base, Arc::new(FakePacker));

        let req = request(
            dir.path(),
            false,
            vec![UploadItem::Metadata, UploadItem::Thumbnail, UploadItem::MainFile],
        );
        let id = executor.upload_asset(req);
        let task = wait_terminal(&registry, ClientId(3), &id).await;

        assert_eq!(task.status, TaskStatus::Finished, "{}", task.detailed_message);
        assert_eq!(task.progress, 100);
        let slots = market.slots.lock().unwrap().clone();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0]["fileType"], "thumbnail");
        assert_eq!(slots[0]["originalFilename"], "thumb.jpg");
        assert_eq!(slots[1]["fileType"], "blend");
        assert_eq!(slots[1]["originalFilename"], "b1.blend");
        assert_eq!(slots[1]["assetId"], "v1");
        assert_eq!(*market.stored.lock().unwrap(), vec![10, 12]);
        assert_eq!(*market.confirmed.lock().unwrap(), 2);
        assert_eq!(uploaded_patches(&market), 1);

        let meta = metadata_task(&registry, ClientId(3)).await;
        assert_eq!(meta.status, TaskStatus::Finished);
    }

    #[tokio::test]
    async fn thumbnail_fix_up_finalizes_blocked_asset() {
        let market = Arc::new(Market {
            verification_status: "on_hold".into(),
            ..Default::default()
        });
        let base = spawn_market(market.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (executor, registry) = executor_with_packer(&base, Arc::new(FakePacker));

        let id = executor.upload_asset(request(dir.path(), true, vec![UploadItem::Thumbnail]));
        let task = wait_terminal(&registry, ClientId(3), &id).await;

        assert_eq!(task.status, TaskStatus::Finished, "{}", task.detailed_message);
        assert_eq!(uploaded_patches(&market), 1);
    }

    #[tokio::test]
    async fn thumbnail_fix_up_leaves_validated_asset_alone() {
        let market = Arc::new(Market {
            verification_status: "validated".into(),
            ..Default::default()
        });
        let base = spawn_market(market.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (executor, registry) = executor_with_packer(&base, Arc::new(FakePacker));

        let id = executor.upload_asset(request(dir.path(), true, vec![UploadItem::Thumbnail]));
        let task = wait_terminal(&registry, ClientId(3), &id).await;

        assert_eq!(task.status, TaskStatus::Finished, "{}", task.detailed_message);
        assert_eq!(uploaded_patches(&market), 0);
        assert_eq!(market.patches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn metadata_rejection_fails_both_tasks() {
        let market = Arc::new(Market {
            reject_metadata: true,
            ..Default::default()
        });
        let base = spawn_market(market.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (executor, registry) = executor_with_packer(&base, Arc::new(FakePacker));

        let id = executor.upload_asset(request(
            dir.path(),
            false,
            vec![UploadItem::Metadata, UploadItem::MainFile],
        ));
        let task = wait_terminal(&registry, ClientId(3), &id).await;
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.message, "Creating asset failed (400)");

        let meta = metadata_task(&registry, ClientId(3)).await;
        assert_eq!(meta.status, TaskStatus::Error);
        assert!(market.slots.lock().unwrap().is_empty());
        assert!(!dir.path().join("data.json").exists());
    }
}
