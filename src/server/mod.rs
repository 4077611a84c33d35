//! Local HTTP surface for the plugin.
//!
//! Handlers only parse the request, enqueue work and answer. Job endpoints
//! reply `{"task_id": ...}` straight away; results arrive through `/report`.

mod handlers;

use std::future::IntoFuture;
use std::sync::Arc;

use axum::Router;
use axum::routing::any;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::DaemonConfig;
use crate::jobs::JobExecutor;
use crate::watchdog::{Liveness, Shutdown};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub executor: JobExecutor,
    pub liveness: Liveness,
    pub shutdown: Shutdown,
    pub config: Arc<DaemonConfig>,
}

/// Build the router with every daemon route.
pub fn router(state: AppState) -> Router {
    use handlers::*;

    Router::new()
        .route("/", any(index))
        .route("/report", any(report))
        .route("/report_blender_quit", any(report_blender_quit))
        .route("/shutdown", any(shutdown))
        .route("/cancel_download", any(cancel_download))
        .route("/search_asset", any(search_asset))
        .route("/download_asset", any(download_asset))
        .route("/asset/upload", any(upload_asset))
        .route("/categories", any(categories))
        .route("/disclaimer", any(disclaimer))
        .route("/notifications", any(notifications))
        .route(
            "/notifications/mark_notification_read",
            any(mark_notification_read),
        )
        .route("/profiles/get_user_profile", any(user_profile))
        .route("/profiles/fetch_gravatar_image", any(gravatar_image))
        .route("/ratings/get_rating", any(get_rating))
        .route("/ratings/send_rating", any(send_rating))
        .route("/ratings/get_bookmarks", any(get_bookmarks))
        .route("/comments/get_comments", any(get_comments))
        .route("/comments/create_comment", any(create_comment))
        .route("/comments/feedback_comment", any(feedback_comment))
        .route("/comments/mark_comment_private", any(mark_comment_private))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the shutdown signal fires. A graceful stop drains open
/// requests; a forced stop returns at once and drops them.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let stop = state.shutdown.wait();
    let forced = state.shutdown.wait_forced();
    let server = axum::serve(listener, router(state))
        .with_graceful_shutdown(stop)
        .into_future();

    tokio::select! {
        served = server => served,
        _ = forced => {
            tracing::warn!("Forced shutdown, abandoning open requests");
            Ok(())
        }
    }
}
