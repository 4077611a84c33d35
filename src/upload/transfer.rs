//! Three-step file transfer: negotiate a slot, stream the bytes to object
//! storage, then confirm.

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use super::packing::UploadFile;
use crate::error::TaskError;
use crate::remote::{Marketplace, PoolClass};
use crate::tasks::ApiKey;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadSlotRequest<'a> {
    asset_id: &'a str,
    file_type: &'a str,
    file_index: u32,
    original_filename: &'a str,
}

/// Upload slot handed out by the marketplace.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadTarget {
    pub asset_id: String,
    pub file_path: String,
    pub file_type: String,
    pub id: String,
    pub original_filename: String,
    pub upload_url: String,
    pub s3_upload_url: String,
    pub upload_done_url: String,
}

/// Upload one file for `asset_id`. Any step failing fails the file; earlier
/// steps are not rolled back.
pub async fn upload_file(
    marketplace: &Marketplace,
    api_key: &ApiKey,
    asset_id: &str,
    file: &UploadFile,
) -> Result<(), TaskError> {
    let original_filename = file
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let url = marketplace.url("/api/v1/uploads/");
    let target: UploadTarget = marketplace
        .send_json(
            Method::POST,
            &url,
            api_key,
            &UploadSlotRequest {
                asset_id,
                file_type: file.file_type,
                file_index: file.index,
                original_filename: &original_filename,
            },
            StatusCode::CREATED,
            "Requesting upload",
        )
        .await?;

    let source = tokio::fs::File::open(&file.path)
        .await
        .map_err(|e| TaskError::io("open", &file.path, e))?;
    let length = source
        .metadata()
        .await
        .map_err(|e| TaskError::io("stat", &file.path, e))?
        .len();

    tracing::debug!(
        file_type = file.file_type,
        path = %file.path.display(),
        bytes = length,
        "Uploading file"
    );
    let response = marketplace
        .pool(PoolClass::Uploads)
        .put(&target.s3_upload_url)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_LENGTH, length)
        .body(Body::wrap_stream(ReaderStream::new(source)))
        .send()
        .await
        .map_err(|e| TaskError::transport(&target.s3_upload_url, e))?;
    accept(response, &target.s3_upload_url, "Uploading file")?;

    let response = marketplace
        .request(PoolClass::Api, Method::POST, &target.upload_done_url, api_key)
        .send()
        .await
        .map_err(|e| TaskError::transport(&target.upload_done_url, e))?;
    accept(response, &target.upload_done_url, "Confirming upload")?;
    Ok(())
}

/// Anything below 400 counts as accepted.
fn accept(response: Response, url: &str, operation: &str) -> Result<Response, TaskError> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(TaskError::Status {
            operation: operation.to_string(),
            status,
            url: url.to_string(),
        });
    }
    Ok(response)
}
