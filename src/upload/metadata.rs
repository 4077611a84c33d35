//! Metadata stage: create or update the remote asset record.

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TaskError;
use crate::remote::Marketplace;
use crate::tasks::{AssetUploadRequest, UploadItem};

/// Marker that takes a re-uploaded asset out of the verified pool.
pub const IN_REVIEW_STATUS: &str = "uploading";

/// Canonical asset record as the marketplace returns it after create/update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssetRecord {
    pub addon_version: String,
    pub adult: bool,
    pub asset_base_id: String,
    pub asset_type: String,
    pub category: String,
    pub description: String,
    pub display_name: String,
    pub id: String,
    pub is_free: bool,
    pub is_private: bool,
    pub license: String,
    pub name: String,
    pub parameters: Value,
    pub source_app_name: String,
    pub source_app_version: String,
    pub tags: Vec<String>,
    pub url: String,
    pub verification_status: String,
    pub version_number: String,
}

/// One `{parameterType, value}` entry of the asset parameter list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetParameter {
    #[serde(rename = "parameterType")]
    pub parameter_type: String,
    pub value: String,
}

/// Flatten the plugin's parameter mapping into the list the API expects.
/// Lists are joined with `,`; everything else uses its plain text form.
pub fn parameters_to_list(parameters: &Map<String, Value>) -> Vec<AssetParameter> {
    parameters
        .iter()
        .map(|(key, value)| AssetParameter {
            parameter_type: key.clone(),
            value: parameter_text(value),
        })
        .collect()
}

fn parameter_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(parameter_text)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

/// Request body for create/update: the edited metadata with its
/// parameters flattened.
fn request_body(req: &AssetUploadRequest, in_review: bool) -> Result<Value, TaskError> {
    let mut data = req.upload_data.clone();
    if in_review {
        data.verification_status = IN_REVIEW_STATUS.to_string();
    }
    let params = parameters_to_list(&data.parameters);
    let mut body = serde_json::to_value(&data)
        .map_err(|e| TaskError::InvalidInput(format!("unserializable metadata: {e}")))?;
    body["parameters"] = serde_json::to_value(params)
        .map_err(|e| TaskError::InvalidInput(format!("unserializable parameters: {e}")))?;
    Ok(body)
}

/// POST a new asset when the export carries no identity yet, PATCH the
/// existing one otherwise. A main file update also moves the asset back
/// into review.
pub async fn sync_metadata(
    marketplace: &Marketplace,
    req: &AssetUploadRequest,
) -> Result<AssetRecord, TaskError> {
    let key = &req.prefs.api_key;
    if req.export_data.asset_base_id.is_empty() {
        let url = marketplace.url("/api/v1/assets/");
        let body = request_body(req, false)?;
        marketplace
            .send_json(
                Method::POST,
                &url,
                key,
                &body,
                StatusCode::CREATED,
                "Creating asset",
            )
            .await
    } else {
        let url = marketplace.url(&format!("/api/v1/assets/{}/", req.export_data.id));
        let body = request_body(req, req.includes(UploadItem::MainFile))?;
        marketplace
            .send_json(
                Method::PATCH,
                &url,
                key,
                &body,
                StatusCode::OK,
                "Updating asset",
            )
            .await
    }
}
