//! Streamed file transfer with atomic placement.
//!
//! Bytes are written to a hidden sibling path and renamed into place only
//! after the last chunk is flushed, so a reader never sees a truncated file
//! under the final name. Each writer gets its own sibling, so concurrent
//! transfers to one target never share bytes; the last rename wins. The
//! partial file is removed on error and when the transfer future is dropped
//! (cancellation).

use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Response;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::TaskError;

/// Temporary sibling file, deleted unless committed.
#[derive(Debug)]
pub struct PartialFile {
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PartialFile {
    /// Reserve a unique `.<name>.<uuid>.part` path next to `target`.
    pub fn new(target: &Path) -> Self {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = target.with_file_name(format!(".{name}.{}.part", Uuid::new_v4().simple()));
        Self {
            temp,
            target: target.to_path_buf(),
            committed: false,
        }
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Move the finished file into place.
    pub async fn commit(mut self) -> Result<PathBuf, TaskError> {
        tokio::fs::rename(&self.temp, &self.target)
            .await
            .map_err(|e| TaskError::io("rename", &self.target, e))?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

/// Stream a response body to `target`.
///
/// `on_progress` is called after every chunk with the bytes written so far
/// and the announced content length, if any. Returns the bytes written.
pub async fn download_to_file(
    response: Response,
    url: &str,
    target: &Path,
    mut on_progress: impl FnMut(u64, Option<u64>),
) -> Result<u64, TaskError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TaskError::io("create directory", parent, e))?;
    }

    let partial = PartialFile::new(target);
    let mut file = tokio::fs::File::create(partial.temp_path())
        .await
        .map_err(|e| TaskError::io("create", partial.temp_path(), e))?;

    let total = response.content_length();
    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TaskError::transport(url, e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| TaskError::io("write", partial.temp_path(), e))?;
        written += chunk.len() as u64;
        on_progress(written, total);
    }
    file.flush()
        .await
        .map_err(|e| TaskError::io("flush", partial.temp_path(), e))?;
    drop(file);

    partial.commit().await?;
    Ok(written)
}

/// Percentage of `done` over `total`, clamped to `0..=100`.
pub fn percent(done: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => (done.saturating_mul(100) / total).min(100) as u8,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streamed(byte: u8) -> Response {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
            (0..20).map(|_| Ok(vec![byte; 1000])).collect();
        let body = reqwest::Body::wrap_stream(futures::stream::iter(chunks));
        Response::from(axum::http::Response::new(body))
    }

    #[test]
    fn partial_file_is_unique_hidden_sibling() {
        let target = Path::new("/tmp/thumbs/abc.webp");
        let a = PartialFile::new(target);
        let b = PartialFile::new(target);
        assert_ne!(a.temp_path(), b.temp_path());

        let name = a.temp_path().file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(a.temp_path().parent(), Some(Path::new("/tmp/thumbs")));
        assert!(name.starts_with(".abc.webp."));
        assert!(name.ends_with(".part"));
    }

    #[tokio::test]
    async fn concurrent_writers_to_one_target_never_mix() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("thumb.png");

        let (a, b) = tokio::join!(
            download_to_file(streamed(b'A'), "http://a", &target, |_, _| {}),
            download_to_file(streamed(b'B'), "http://b", &target, |_, _| {}),
        );
        assert_eq!(a.unwrap(), 20_000);
        assert_eq!(b.unwrap(), 20_000);

        let placed = tokio::fs::read(&target).await.unwrap();
        assert_eq!(placed.len(), 20_000);
        assert!(placed.iter().all(|&c| c == placed[0]));

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name());
        }
        assert_eq!(names, vec![std::ffi::OsString::from("thumb.png")]);
    }

    #[tokio::test]
    async fn uncommitted_partial_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.bin");
        {
            let partial = PartialFile::new(&target);
            tokio::fs::write(partial.temp_path(), b"half").await.unwrap();
        }
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_moves_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.bin");
        let partial = PartialFile::new(&target);
        tokio::fs::write(partial.temp_path(), b"full").await.unwrap();
        let placed = partial.commit().await.unwrap();
        assert_eq!(placed, target);
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"full");
    }

    #[test]
    fn percent_handles_unknown_and_overshoot() {
        assert_eq!(percent(50, Some(200)), 25);
        assert_eq!(percent(10, None), 0);
        assert_eq!(percent(10, Some(0)), 0);
        assert_eq!(percent(300, Some(200)), 100);
    }
}
