use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::jobs::api::submit_first_contact;
use crate::tasks::{
    AssetRequest, AssetUploadRequest, ClientId, CreateCommentRequest, DownloadRequest,
    FeedbackCommentRequest, GravatarRequest, MarkCommentPrivateRequest,
    MarkNotificationReadRequest, MinimalRequest, SearchRequest, SendRatingRequest, Task, TaskId,
};

fn accepted(task_id: TaskId) -> Response {
    Json(json!({ "task_id": task_id })).into_response()
}

fn bus_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": "Daemon is shutting down"})),
    )
        .into_response()
}

// ── Lifecycle ───────────────────────────────────────────────────────────

pub(super) async fn index() -> String {
    std::process::id().to_string()
}

/// Poll: snapshot the client's tasks, drop the terminal ones, and on first
/// contact kick off the warm-up jobs.
pub(super) async fn report(
    State(state): State<AppState>,
    Json(req): Json<MinimalRequest>,
) -> Response {
    state.liveness.touch().await;
    let Some(report) = state.executor.bus().report(req.app_id).await else {
        return bus_unavailable();
    };
    if report.new_client {
        tracing::info!(client_id = %req.app_id, "New client connected");
        submit_first_contact(&state.executor, req.app_id, &req.api_key);
    }

    let mut tasks = Vec::with_capacity(report.tasks.len() + 1);
    tasks.push(Task::daemon_status(req.app_id));
    tasks.extend(report.tasks);
    Json(tasks).into_response()
}

pub(super) async fn report_blender_quit(
    State(state): State<AppState>,
    Json(req): Json<MinimalRequest>,
) -> Response {
    let Some(gone) = state.executor.bus().disconnect(req.app_id).await else {
        return bus_unavailable();
    };
    tracing::info!(
        client_id = %req.app_id,
        cancelled = gone.cancelled,
        remaining = gone.remaining_clients,
        "Client quit"
    );
    if gone.remaining_clients == 0 {
        tracing::info!("No clients left, shutting down");
        state.shutdown.trigger_after(state.config.disconnect_grace);
    }
    Json(json!({
        "cancelled": gone.cancelled,
        "remaining_clients": gone.remaining_clients,
    }))
    .into_response()
}

pub(super) async fn shutdown(State(state): State<AppState>) -> &'static str {
    tracing::info!("Shutdown requested");
    state.shutdown.trigger_after(state.config.shutdown_grace);
    "Going to kill myself now"
}

#[derive(Debug, Deserialize)]
pub(super) struct CancelRequest {
    app_id: ClientId,
    task_id: TaskId,
}

pub(super) async fn cancel_download(
    State(state): State<AppState>,
    Json(req): Json<CancelRequest>,
) -> Response {
    state
        .executor
        .bus()
        .cancel(req.app_id, req.task_id.clone(), "cancelled by user");
    Json(json!({ "task_id": req.task_id })).into_response()
}

// ── Long-running jobs ───────────────────────────────────────────────────

pub(super) async fn search_asset(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Response {
    accepted(state.executor.search(req))
}

pub(super) async fn download_asset(
    State(state): State<AppState>,
    Json(req): Json<DownloadRequest>,
) -> Response {
    accepted(state.executor.download_asset(req))
}

pub(super) async fn upload_asset(
    State(state): State<AppState>,
    Json(req): Json<AssetUploadRequest>,
) -> Response {
    accepted(state.executor.upload_asset(req))
}

// ── Simple API jobs ─────────────────────────────────────────────────────

pub(super) async fn categories(
    State(state): State<AppState>,
    Json(req): Json<MinimalRequest>,
) -> Response {
    accepted(state.executor.fetch_categories(req))
}

pub(super) async fn disclaimer(
    State(state): State<AppState>,
    Json(req): Json<MinimalRequest>,
) -> Response {
    accepted(state.executor.fetch_disclaimer(req))
}

pub(super) async fn notifications(
    State(state): State<AppState>,
    Json(req): Json<MinimalRequest>,
) -> Response {
    accepted(state.executor.fetch_notifications(req))
}

pub(super) async fn mark_notification_read(
    State(state): State<AppState>,
    Json(req): Json<MarkNotificationReadRequest>,
) -> Response {
    accepted(state.executor.mark_notification_read(req))
}

pub(super) async fn user_profile(
    State(state): State<AppState>,
    Json(req): Json<MinimalRequest>,
) -> Response {
    accepted(state.executor.fetch_user_profile(req))
}

pub(super) async fn gravatar_image(
    State(state): State<AppState>,
    Json(req): Json<GravatarRequest>,
) -> Response {
    accepted(state.executor.fetch_gravatar(req, &state.config.gravatar_dir))
}

pub(super) async fn get_rating(
    State(state): State<AppState>,
    Json(req): Json<AssetRequest>,
) -> Response {
    accepted(state.executor.fetch_rating(req))
}

pub(super) async fn send_rating(
    State(state): State<AppState>,
    Json(req): Json<SendRatingRequest>,
) -> Response {
    accepted(state.executor.send_rating(req))
}

pub(super) async fn get_bookmarks(
    State(state): State<AppState>,
    Json(req): Json<MinimalRequest>,
) -> Response {
    accepted(state.executor.fetch_bookmarks(req))
}

pub(super) async fn get_comments(
    State(state): State<AppState>,
    Json(req): Json<AssetRequest>,
) -> Response {
    accepted(state.executor.fetch_comments(req))
}

pub(super) async fn create_comment(
    State(state): State<AppState>,
    Json(req): Json<CreateCommentRequest>,
) -> Response {
    accepted(state.executor.create_comment(req))
}

pub(super) async fn feedback_comment(
    State(state): State<AppState>,
    Json(req): Json<FeedbackCommentRequest>,
) -> Response {
    accepted(state.executor.feedback_comment(req))
}

pub(super) async fn mark_comment_private(
    State(state): State<AppState>,
    Json(req): Json<MarkCommentPrivateRequest>,
) -> Response {
    accepted(state.executor.mark_comment_private(req))
}

#[cfg(test)]
mod tests {
    use super::super::{AppState, router};
    use crate::config::DaemonConfig;
    use crate::jobs::testing::executor;
    use crate::watchdog::{Liveness, Shutdown};
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn state() -> AppState {
        // Nothing listens on port 9; first-contact jobs fail fast.
        let (executor, _registry) = executor("http://127.0.0.1:9");
        AppState {
            executor,
            liveness: Liveness::new(),
            shutdown: Shutdown::new(),
            config: Arc::new(DaemonConfig::default()),
        }
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn index_reports_pid() {
        let response = router(state())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes, std::process::id().to_string().as_bytes());
    }

    #[tokio::test]
    async fn report_starts_with_daemon_status() {
        let response = router(state())
            .oneshot(post("/report", json!({"app_id": 11})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let tasks = body_json(response).await;
        assert_eq!(tasks[0]["task_type"], "daemon_status");
        assert_eq!(tasks[0]["status"], "finished");
        assert_eq!(tasks[0]["app_id"], 11);
    }

    #[tokio::test]
    async fn job_endpoint_answers_with_task_id() {
        let response = router(state())
            .oneshot(post("/categories", json!({"app_id": 4})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["task_id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let response = router(state())
            .oneshot(post("/search_asset", json!({"app_id": "x"})))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn last_client_quitting_schedules_shutdown() {
        let state = state();
        let shutdown = state.shutdown.clone();
        let app = router(state);

        app.clone()
            .oneshot(post("/report", json!({"app_id": 5})))
            .await
            .unwrap();
        let response = app
            .oneshot(post("/report_blender_quit", json!({"app_id": 5})))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["remaining_clients"], 0);

        tokio::time::timeout(std::time::Duration::from_secs(5), shutdown.wait())
            .await
            .unwrap();
    }
}
