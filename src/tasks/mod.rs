//! Task tracking: the task model, typed payloads, the per-client registry
//! and the mutation bus that serializes every write to it.

pub mod bus;
pub mod model;
pub mod payload;
pub mod registry;

pub use bus::{Mutation, MutationBus, spawn_bus_loop};
pub use model::{ClientId, Task, TaskId, TaskKind, TaskResult, TaskStatus};
pub use payload::{
    ApiKey, AssetExportData, AssetFile, AssetRequest, AssetUploadData, AssetUploadRequest,
    CreateCommentRequest, DownloadAssetData, DownloadRequest, FeedbackCommentRequest,
    GravatarRequest, MarkCommentPrivateRequest, MarkNotificationReadRequest, MinimalRequest,
    Preferences, SearchRequest, SendRatingRequest, TaskPayload, ThumbnailRequest, ThumbnailSize,
    UploadItem,
};
pub use registry::{Applied, Disconnected, Report, TaskRegistry};
