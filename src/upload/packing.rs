//! Packing stage: turn the exported scene into an uploadable file.
//!
//! The heavy lifting is done by the host application running headless with
//! the add-on's packing script. The subprocess sits behind [`AssetPacker`]
//! so the pipeline can run against a substitute.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

use super::AssetRecord;
use crate::error::TaskError;
use crate::tasks::{AssetExportData, AssetUploadRequest, UploadItem};

/// Clean template scene, relative to the add-on directory.
const CLEAN_TEMPLATE: &str = "blendfiles/cleaned.blend";
/// Packing script, relative to the add-on directory.
const PACKING_SCRIPT: &str = "upload_bg.py";

/// Side-channel document handed to the packing script.
#[derive(Debug, Serialize)]
pub struct PackingData<'a> {
    pub export_data: &'a AssetExportData,
    pub upload_data: &'a AssetRecord,
    pub upload_set: &'a [UploadItem],
}

/// Everything one packing run needs.
#[derive(Debug, Clone)]
pub struct PackingJob {
    pub binary_path: PathBuf,
    pub addon_dir: PathBuf,
    /// The written [`PackingData`] file.
    pub data_file: PathBuf,
    /// Where the script is expected to leave the packed file.
    pub packed_file: PathBuf,
}

#[async_trait]
pub trait AssetPacker: Send + Sync {
    /// Run the packer to completion.
    async fn pack(&self, job: &PackingJob) -> Result<(), TaskError>;
}

/// Runs the host application in background mode with the packing script.
#[derive(Debug, Default)]
pub struct BlenderPacker;

impl BlenderPacker {
    fn command(job: &PackingJob) -> Command {
        let user_scripts = job
            .addon_dir
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let mut cmd = Command::new(&job.binary_path);
        cmd.arg("--background")
            .arg("--factory-startup")
            .arg("--addons")
            .arg("blenderkit")
            .arg("-noaudio")
            .arg(job.addon_dir.join(CLEAN_TEMPLATE))
            .arg("--python")
            .arg(job.addon_dir.join(PACKING_SCRIPT))
            .arg("--")
            .arg(&job.data_file)
            .env("BLENDER_USER_SCRIPTS", user_scripts)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AssetPacker for BlenderPacker {
    async fn pack(&self, job: &PackingJob) -> Result<(), TaskError> {
        tracing::info!(
            binary = %job.binary_path.display(),
            data_file = %job.data_file.display(),
            "Running asset packing"
        );
        let output = Self::command(job)
            .output()
            .await
            .map_err(|e| TaskError::io("run", &job.binary_path, e))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        tracing::debug!(output = %combined, "Packing output");

        if !output.status.success() {
            return Err(TaskError::Subprocess {
                exit_code: output.status.code(),
                output: combined,
            });
        }
        Ok(())
    }
}

/// One file to transfer: remote file type, index and local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_type: &'static str,
    pub index: u32,
    pub path: PathBuf,
}

/// Pack if needed and list the files the upload set asks for.
///
/// HDR assets upload their source image as-is. Other assets are packed to
/// `<temp_dir>/<assetBaseId>.blend`. New assets take their identity from
/// the freshly created record.
pub async fn prepare_files(
    packer: &dyn AssetPacker,
    req: &AssetUploadRequest,
    record: &AssetRecord,
) -> Result<Vec<UploadFile>, TaskError> {
    let mut export = req.export_data.clone();
    if export.asset_base_id.is_empty() {
        export.asset_base_id = record.asset_base_id.clone();
        export.id = record.id.clone();
    }
    let mut upload_data = record.clone();
    upload_data.asset_base_id = export.asset_base_id.clone();
    upload_data.id = export.id.clone();

    let main_file = req.includes(UploadItem::MainFile);
    let mut packed = PathBuf::new();
    if main_file {
        if upload_data.asset_type == "hdr" {
            packed = export.hdr_file_path.clone().unwrap_or_default();
        } else {
            packed = export.temp_dir.join(format!("{}.blend", export.asset_base_id));
            let data_file = export.temp_dir.join("data.json");
            let data = PackingData {
                export_data: &export,
                upload_data: &upload_data,
                upload_set: &req.upload_set,
            };
            let json = serde_json::to_vec(&data)
                .map_err(|e| TaskError::InvalidInput(format!("unserializable packing data: {e}")))?;
            tokio::fs::write(&data_file, json)
                .await
                .map_err(|e| TaskError::io("write", &data_file, e))?;

            packer
                .pack(&PackingJob {
                    binary_path: export.binary_path.clone(),
                    addon_dir: req.prefs.addon_dir.clone(),
                    data_file,
                    packed_file: packed.clone(),
                })
                .await?;
        }

        if packed.as_os_str().is_empty() || !tokio::fs::try_exists(&packed).await.unwrap_or(false) {
            return Err(TaskError::MissingOutput { path: packed });
        }
    }

    let files = req
        .upload_set
        .iter()
        .filter_map(|item| match item {
            UploadItem::Thumbnail => Some(UploadFile {
                file_type: "thumbnail",
                index: 0,
                path: export.thumbnail_path.clone(),
            }),
            UploadItem::MainFile => Some(UploadFile {
                file_type: "blend",
                index: 0,
                path: packed.clone(),
            }),
            UploadItem::Metadata => None,
        })
        .collect();
    Ok(files)
}
