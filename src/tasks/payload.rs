//! Typed task payloads: the request data a task was created from.
//!
//! Each [`TaskPayload`] variant maps to exactly one [`TaskKind`]. Payloads are
//! echoed back to the plugin as the task's `data` field, minus credentials.

use std::path::PathBuf;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};

use super::model::{ClientId, TaskKind};

/// Marketplace API key. Redacted in `Debug`, never serialized.
#[derive(Clone, Default)]
pub struct ApiKey(Option<Arc<SecretString>>);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        let key: String = key.into();
        if key.is_empty() {
            Self(None)
        } else {
            Self(Some(Arc::new(SecretString::from(key))))
        }
    }

    /// The raw key, if one was provided.
    pub fn expose(&self) -> Option<&str> {
        self.0.as_deref().map(|s| s.expose_secret())
    }

    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(_) => f.write_str("ApiKey([REDACTED])"),
            None => f.write_str("ApiKey(None)"),
        }
    }
}

impl<'de> Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.map(ApiKey::new).unwrap_or_default())
    }
}

/// Plugin preferences block (`PREFS`) sent with heavier requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default, skip_serializing)]
    pub api_key: ApiKey,
    #[serde(default)]
    pub app_id: ClientId,
    #[serde(default)]
    pub scene_id: String,
    #[serde(default)]
    pub system_id: String,
    #[serde(default)]
    pub unpack_files: bool,
    /// Preferred texture resolution, e.g. `resolution_2K` or `ORIGINAL`.
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub project_subdir: String,
    #[serde(default)]
    pub global_dir: String,
    #[serde(default)]
    pub binary_path: PathBuf,
    #[serde(default)]
    pub addon_dir: PathBuf,
}

/// Client id plus optional API key; enough for most simple API jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinimalRequest {
    pub app_id: ClientId,
    #[serde(default, skip_serializing)]
    pub api_key: ApiKey,
}

impl MinimalRequest {
    pub fn for_client(app_id: ClientId) -> Self {
        Self {
            app_id,
            api_key: ApiKey::default(),
        }
    }
}

/// Search request (`/search_asset`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub app_id: Option<ClientId>,
    #[serde(rename = "PREFS", default)]
    pub prefs: Preferences,
    /// Fully built marketplace search URL.
    #[serde(rename = "urlquery")]
    pub url_query: String,
    #[serde(default)]
    pub addon_version: String,
    #[serde(default)]
    pub blender_version: String,
    #[serde(rename = "tempdir")]
    pub temp_dir: PathBuf,
}

impl SearchRequest {
    pub fn client_id(&self) -> ClientId {
        self.app_id.unwrap_or(self.prefs.app_id)
    }
}

/// Which of the two thumbnail sizes a download targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbnailSize {
    Small,
    Full,
}

/// One thumbnail download derived from a search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailRequest {
    pub thumbnail_type: ThumbnailSize,
    pub image_path: PathBuf,
    pub image_url: String,
    #[serde(rename = "assetBaseId")]
    pub asset_base_id: String,
    /// Position of the asset in the search result page.
    pub index: usize,
}

/// A downloadable file entry of an asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFile {
    #[serde(default)]
    pub created: String,
    pub download_url: String,
    pub file_type: String,
}

/// Asset description sent with a download request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadAssetData {
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub available_resolutions: Vec<u32>,
    pub files: Vec<AssetFile>,
    #[serde(rename = "assetType", default)]
    pub asset_type: String,
}

/// Asset download request (`/download_asset`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub app_id: ClientId,
    pub download_dirs: Vec<PathBuf>,
    pub asset_data: DownloadAssetData,
    #[serde(rename = "PREFS", default)]
    pub prefs: Preferences,
}

/// Avatar download (`/profiles/fetch_gravatar_image`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GravatarRequest {
    pub app_id: ClientId,
    pub id: i64,
    /// Server-relative avatar path, e.g. `/avatar-redirect/<uuid>/128/`.
    #[serde(default)]
    pub avatar128: String,
    #[serde(rename = "gravatarHash", default)]
    pub gravatar_hash: String,
}

/// Any request scoped to a single asset (ratings, comments).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRequest {
    pub app_id: ClientId,
    #[serde(default, skip_serializing)]
    pub api_key: ApiKey,
    pub asset_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRatingRequest {
    pub app_id: ClientId,
    #[serde(default, skip_serializing)]
    pub api_key: ApiKey,
    pub asset_id: String,
    /// Rating dimension, e.g. `quality` or `working_hours`.
    pub rating_type: String,
    pub rating_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCommentRequest {
    pub app_id: ClientId,
    #[serde(default, skip_serializing)]
    pub api_key: ApiKey,
    pub asset_id: String,
    pub comment_text: String,
    /// Parent comment id, 0 for a top-level comment.
    #[serde(default)]
    pub reply_to_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackCommentRequest {
    pub app_id: ClientId,
    #[serde(default, skip_serializing)]
    pub api_key: ApiKey,
    pub asset_id: String,
    pub comment_id: i64,
    pub flag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkCommentPrivateRequest {
    pub app_id: ClientId,
    #[serde(default, skip_serializing)]
    pub api_key: ApiKey,
    pub asset_id: String,
    pub comment_id: i64,
    pub is_private: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkNotificationReadRequest {
    pub app_id: ClientId,
    #[serde(default, skip_serializing)]
    pub api_key: ApiKey,
    #[serde(rename = "notification_id")]
    pub notification: i64,
}

/// Members of an upload set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadItem {
    #[serde(rename = "METADATA")]
    Metadata,
    #[serde(rename = "THUMBNAIL")]
    Thumbnail,
    #[serde(rename = "MAINFILE")]
    MainFile,
}

/// Asset metadata as the plugin edits it; body of the create/update call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetUploadData {
    #[serde(default)]
    pub addon_version: String,
    pub asset_type: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub is_free: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub license: String,
    pub name: String,
    /// Free-form parameter mapping; flattened to `{parameterType, value}`
    /// pairs before it is sent.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub source_app_name: String,
    #[serde(default)]
    pub source_app_version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub verification_status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub asset_base_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

/// Local export details for an upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetExportData {
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub thumbnail_path: PathBuf,
    #[serde(rename = "assetBaseId", default)]
    pub asset_base_id: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub eval_path_computing: String,
    #[serde(default)]
    pub eval_path_state: String,
    #[serde(default)]
    pub eval_path: String,
    pub temp_dir: PathBuf,
    #[serde(rename = "source_filepath", default)]
    pub source_file_path: PathBuf,
    #[serde(default)]
    pub binary_path: PathBuf,
    #[serde(default)]
    pub debug_value: i64,
    #[serde(
        rename = "hdr_filepath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub hdr_file_path: Option<PathBuf>,
}

/// Asset upload request (`/asset/upload`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetUploadRequest {
    pub app_id: ClientId,
    #[serde(rename = "PREFS", default)]
    pub prefs: Preferences,
    pub upload_data: AssetUploadData,
    pub export_data: AssetExportData,
    pub upload_set: Vec<UploadItem>,
}

impl AssetUploadRequest {
    pub fn includes(&self, item: UploadItem) -> bool {
        self.upload_set.contains(&item)
    }
}

/// Operation-specific input of a task, keyed by task kind.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TaskPayload {
    DaemonStatus {},
    Search(SearchRequest),
    ThumbnailDownload(ThumbnailRequest),
    AssetDownload(DownloadRequest),
    AssetUpload(Box<AssetUploadRequest>),
    AssetMetadataUpload(Box<AssetUploadRequest>),
    Categories(MinimalRequest),
    Disclaimer(MinimalRequest),
    Notifications(MinimalRequest),
    MarkNotificationRead(MarkNotificationReadRequest),
    UserProfile(MinimalRequest),
    GravatarImage(GravatarRequest),
    GetRating(AssetRequest),
    SendRating(SendRatingRequest),
    GetBookmarks(MinimalRequest),
    GetComments(AssetRequest),
    CreateComment(CreateCommentRequest),
    FeedbackComment(FeedbackCommentRequest),
    MarkCommentPrivate(MarkCommentPrivateRequest),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::DaemonStatus {} => TaskKind::DaemonStatus,
            Self::Search(_) => TaskKind::Search,
            Self::ThumbnailDownload(_) => TaskKind::ThumbnailDownload,
            Self::AssetDownload(_) => TaskKind::AssetDownload,
            Self::AssetUpload(_) => TaskKind::AssetUpload,
            Self::AssetMetadataUpload(_) => TaskKind::AssetMetadataUpload,
            Self::Categories(_) => TaskKind::Categories,
            Self::Disclaimer(_) => TaskKind::Disclaimer,
            Self::Notifications(_) => TaskKind::Notifications,
            Self::MarkNotificationRead(_) => TaskKind::MarkNotificationRead,
            Self::UserProfile(_) => TaskKind::UserProfile,
            Self::GravatarImage(_) => TaskKind::GravatarImage,
            Self::GetRating(_) => TaskKind::GetRating,
            Self::SendRating(_) => TaskKind::SendRating,
            Self::GetBookmarks(_) => TaskKind::GetBookmarks,
            Self::GetComments(_) => TaskKind::GetComments,
            Self::CreateComment(_) => TaskKind::CreateComment,
            Self::FeedbackComment(_) => TaskKind::FeedbackComment,
            Self::MarkCommentPrivate(_) => TaskKind::MarkCommentPrivate,
        }
    }
}
