use std::path::{Path, PathBuf};

use anyhow::Context;
use futures_util::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub upload_dir: PathBuf,
    pub upload_csv: PathBuf,
}

impl StoragePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir: PathBuf = data_dir.into();
        let upload_dir = data_dir.join("uploads");
        let upload_csv = upload_dir.join("billing.csv");

        Self {
            upload_dir,
            upload_csv,
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.upload_dir)?;
        Ok(())
    }
}

pub fn file_present_nonempty(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(m) => m.is_file() && m.len() > 0,
        Err(_) => false,
    }
}

/// Writes a byte stream to `dest` via a `.part` sibling and renames it into place.
/// An empty stream leaves `dest` untouched and returns 0.
pub async fn write_stream<S, B, E>(stream: S, dest: &Path) -> anyhow::Result<u64>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    let tmp = tmp_path(dest);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }

    let mut stream = std::pin::pin!(stream);
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .with_context(|| format!("create {}", tmp.display()))?;

    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("read upload body chunk")?;
        let chunk = chunk.as_ref();
        written += chunk.len() as u64;
        file.write_all(chunk).await?;

        if written % (50 * 1024 * 1024) < chunk.len() as u64 {
            tracing::info!("... received {} MB", written / (1024 * 1024));
        }
    }

    file.flush().await?;
    drop(file);

    if written == 0 {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Ok(0);
    }

    tokio::fs::rename(&tmp, dest)
        .await
        .with_context(|| format!("rename {} -> {}", tmp.display(), dest.display()))?;

    Ok(written)
}

fn tmp_path(dest: &Path) -> PathBuf {
    let fname = dest
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("upload");
    dest.with_file_name(format!("{fname}.part"))
}
