//! Task model: one tracked unit of asynchronous work.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::payload::TaskPayload;
use crate::upload::AssetRecord;

/// Owning plugin instance (the host application's process id).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClientId(pub i64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task identifier, unique within one client namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Work is pending or in flight.
    Created,
    /// Work completed and `result` is set.
    Finished,
    /// Work failed; `message` holds the reason.
    Error,
    /// Work was interrupted on request.
    Cancelled,
}

impl TaskStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Created)
    }

    /// Terminal states the poller consumes and removes.
    pub fn is_reportable_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Operation type of a task, as the plugin knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "daemon_status")]
    DaemonStatus,
    #[serde(rename = "search")]
    Search,
    #[serde(rename = "thumbnail_download")]
    ThumbnailDownload,
    #[serde(rename = "asset_download")]
    AssetDownload,
    #[serde(rename = "asset_upload")]
    AssetUpload,
    #[serde(rename = "asset_metadata_upload")]
    AssetMetadataUpload,
    #[serde(rename = "categories_update")]
    Categories,
    #[serde(rename = "disclaimer")]
    Disclaimer,
    #[serde(rename = "notifications")]
    Notifications,
    #[serde(rename = "notifications/mark_notification_read")]
    MarkNotificationRead,
    #[serde(rename = "profiles/get_user_profile")]
    UserProfile,
    #[serde(rename = "profiles/fetch_gravatar_image")]
    GravatarImage,
    #[serde(rename = "ratings/get_rating")]
    GetRating,
    #[serde(rename = "ratings/send_rating")]
    SendRating,
    #[serde(rename = "ratings/get_bookmarks")]
    GetBookmarks,
    #[serde(rename = "comments/get_comments")]
    GetComments,
    #[serde(rename = "comments/create_comment")]
    CreateComment,
    #[serde(rename = "comments/feedback_comment")]
    FeedbackComment,
    #[serde(rename = "comments/mark_comment_private")]
    MarkCommentPrivate,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DaemonStatus => "daemon_status",
            Self::Search => "search",
            Self::ThumbnailDownload => "thumbnail_download",
            Self::AssetDownload => "asset_download",
            Self::AssetUpload => "asset_upload",
            Self::AssetMetadataUpload => "asset_metadata_upload",
            Self::Categories => "categories_update",
            Self::Disclaimer => "disclaimer",
            Self::Notifications => "notifications",
            Self::MarkNotificationRead => "notifications/mark_notification_read",
            Self::UserProfile => "profiles/get_user_profile",
            Self::GravatarImage => "profiles/fetch_gravatar_image",
            Self::GetRating => "ratings/get_rating",
            Self::SendRating => "ratings/send_rating",
            Self::GetBookmarks => "ratings/get_bookmarks",
            Self::GetComments => "comments/get_comments",
            Self::CreateComment => "comments/create_comment",
            Self::FeedbackComment => "comments/feedback_comment",
            Self::MarkCommentPrivate => "comments/mark_comment_private",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload produced by a successful task.
///
/// Always serializes to a JSON value, never `null`: absence of data is an
/// empty object.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TaskResult {
    #[default]
    Empty,
    /// Raw response data passed through from the marketplace.
    Json(serde_json::Value),
    /// Canonical asset record after a metadata sync or upload.
    Asset(Box<AssetRecord>),
    /// Files written to local disk.
    Files(Vec<PathBuf>),
    /// Cached avatar image.
    Gravatar(PathBuf),
}

impl TaskResult {
    /// Wrap raw JSON, mapping `null` to [`TaskResult::Empty`].
    pub fn json(value: serde_json::Value) -> Self {
        if value.is_null() {
            Self::Empty
        } else {
            Self::Json(value)
        }
    }
}

impl Serialize for TaskResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Empty | Self::Json(serde_json::Value::Null) => {
                serializer.serialize_map(Some(0))?.end()
            }
            Self::Json(value) => value.serialize(serializer),
            Self::Asset(record) => record.serialize(serializer),
            Self::Files(paths) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("file_paths", paths)?;
                map.end()
            }
            Self::Gravatar(path) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("gravatar_path", path)?;
                map.end()
            }
        }
    }
}

/// A task and its lifecycle state.
///
/// Owned by the registry once added. Workers never hold a `Task`; they hold a
/// [`crate::jobs::TaskHandle`] carrying the ids and a clone of the
/// cancellation token.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    #[serde(rename = "data")]
    pub payload: TaskPayload,
    #[serde(rename = "app_id")]
    pub client_id: ClientId,
    #[serde(rename = "task_id")]
    pub id: TaskId,
    #[serde(rename = "task_type")]
    pub kind: TaskKind,
    pub message: String,
    #[serde(rename = "message_detailed")]
    pub detailed_message: String,
    pub progress: u8,
    pub status: TaskStatus,
    pub result: TaskResult,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    cancellation: CancellationToken,
}

impl Task {
    /// Create a new task in `created` status with a fresh id.
    pub fn new(client_id: ClientId, payload: TaskPayload) -> Self {
        Self::with_id(client_id, TaskId::generate(), payload)
    }

    /// Create a new task with a caller-chosen id.
    pub fn with_id(client_id: ClientId, id: TaskId, payload: TaskPayload) -> Self {
        Self {
            kind: payload.kind(),
            payload,
            client_id,
            id,
            message: String::new(),
            detailed_message: String::new(),
            progress: 0,
            status: TaskStatus::Created,
            result: TaskResult::Empty,
            created_at: Utc::now(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Synthetic "daemon is alive" entry included in every report.
    pub fn daemon_status(client_id: ClientId) -> Self {
        let mut task = Self::new(client_id, TaskPayload::DaemonStatus {});
        task.status = TaskStatus::Finished;
        task.message = "Daemon is running".to_string();
        task
    }

    /// Tie this task's cancellation to a parent: cancelling the parent
    /// cancels this task, not the other way around.
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancellation = parent.child_token();
        self
    }

    /// Non-owning handle to this task's cancellation signal.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Fire the cancellation signal. Idempotent.
    pub(crate) fn revoke(&self) {
        self.cancellation.cancel();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::payload::MinimalRequest;

    #[test]
    fn new_task_starts_created_with_empty_result() {
        let task = Task::new(
            ClientId(7),
            TaskPayload::Categories(MinimalRequest::for_client(ClientId(7))),
        );
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.kind, TaskKind::Categories);
        assert_eq!(task.progress, 0);
        assert_eq!(task.result, TaskResult::Empty);
        assert!(!task.cancellation_token().is_cancelled());
    }

    #[test]
    fn task_serializes_with_wire_names() {
        let task = Task::daemon_status(ClientId(42));
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["app_id"], 42);
        assert_eq!(json["task_type"], "daemon_status");
        assert_eq!(json["status"], "finished");
        assert_eq!(json["message"], "Daemon is running");
        assert_eq!(json["result"], serde_json::json!({}));
        assert_eq!(json["data"], serde_json::json!({}));
        assert!(json["task_id"].as_str().is_some());
        assert!(json.get("created_at").is_none());
    }

    #[test]
    fn null_json_result_is_empty_object() {
        assert_eq!(TaskResult::json(serde_json::Value::Null), TaskResult::Empty);
        let raw = serde_json::to_string(&TaskResult::Json(serde_json::Value::Null)).unwrap();
        assert_eq!(raw, "{}");
    }

    #[test]
    fn file_results_serialize_as_objects() {
        let files = TaskResult::Files(vec![PathBuf::from("/tmp/a.blend")]);
        assert_eq!(
            serde_json::to_value(&files).unwrap(),
            serde_json::json!({"file_paths": ["/tmp/a.blend"]})
        );
        let gravatar = TaskResult::Gravatar(PathBuf::from("/tmp/bkit_g/1.jpg"));
        assert_eq!(
            serde_json::to_value(&gravatar).unwrap(),
            serde_json::json!({"gravatar_path": "/tmp/bkit_g/1.jpg"})
        );
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskStatus::Created.is_terminal());
        assert!(TaskStatus::Finished.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Cancelled.is_reportable_terminal());
    }

    #[test]
    fn kind_serde_matches_as_str() {
        for kind in [
            TaskKind::Search,
            TaskKind::ThumbnailDownload,
            TaskKind::GetRating,
            TaskKind::MarkCommentPrivate,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn revoke_is_idempotent() {
        let task = Task::daemon_status(ClientId(1));
        let token = task.cancellation_token();
        task.revoke();
        task.revoke();
        assert!(token.is_cancelled());
    }
}
