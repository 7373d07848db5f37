//! Media origin backed by the local media root.
//!
//! Videos land in `<root>/videos/<external_id>.<ext>` and are exposed under
//! `/media/videos/...` by the backend, which streams them with range support.
//! No transcoding happens here; thumbnails are only served if something drops
//! a `<external_id>.jpg` into `<root>/thumbnails`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use super::{MediaOrigin, OriginObject, UploadLimits, check_upload};
use crate::error::{CatalogError, CatalogResult};
use crate::metadata::MediaRef;

pub const VIDEOS_SUBDIR: &str = "videos";
pub const THUMBNAILS_SUBDIR: &str = "thumbnails";
/// URL prefix under which the backend serves the media root.
pub const PUBLIC_PREFIX: &str = "/media";

#[derive(Debug, Clone)]
pub struct LocalOrigin {
    root: PathBuf,
}

impl LocalOrigin {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn videos_dir(&self) -> PathBuf {
        self.root.join(VIDEOS_SUBDIR)
    }

    fn thumbnail_path(&self, external_id: &str) -> PathBuf {
        self.root
            .join(THUMBNAILS_SUBDIR)
            .join(format!("{external_id}.jpg"))
    }

    /// Finds the stored video whose file stem equals `external_id`.
    async fn find_video(&self, external_id: &str) -> Result<Option<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(self.videos_dir()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).context("reading local videos directory"),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.file_stem().and_then(|stem| stem.to_str()) == Some(external_id) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

/// External ids end up in file names, so only a conservative alphabet passes.
fn is_safe_external_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Writes `bytes` to a hidden sibling of `target` and renames it into place.
/// The temporary file is removed again if either step fails.
async fn write_atomically(target: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", target.display()))?;
    let tmp = target.with_file_name(format!(".{file_name}.tmp"));

    let written = async {
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, target)
            .await
            .with_context(|| format!("moving upload into {}", target.display()))
    }
    .await;

    if written.is_err()
        && let Err(err) = tokio::fs::remove_file(&tmp).await
        && err.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %tmp.display(), error = %err, "failed to remove partial upload");
    }
    written
}

#[async_trait]
impl MediaOrigin for LocalOrigin {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn store(&self, bytes: Vec<u8>, limits: &UploadLimits) -> CatalogResult<MediaRef> {
        let container = check_upload(&bytes, limits)?;
        let external_id = format!("video_{}", uuid::Uuid::new_v4().simple());
        let file_name = format!("{external_id}.{}", container.extension());

        let dir = self.videos_dir();
        let target = dir.join(&file_name);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))
            .map_err(CatalogError::upstream)?;
        write_atomically(&target, &bytes)
            .await
            .map_err(CatalogError::upstream)?;

        tracing::debug!(%external_id, size = bytes.len(), "stored video locally");
        Ok(MediaRef {
            media_url: format!("{PUBLIC_PREFIX}/{VIDEOS_SUBDIR}/{file_name}"),
            thumbnail_url: format!("{PUBLIC_PREFIX}/{THUMBNAILS_SUBDIR}/{external_id}.jpg"),
            external_id,
        })
    }

    async fn remove(&self, external_id: &str) -> Result<()> {
        if !is_safe_external_id(external_id) {
            anyhow::bail!("refusing to remove suspicious media id {external_id:?}");
        }
        if let Some(path) = self.find_video(external_id).await? {
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("removing {}", path.display()))?;
        }
        let thumbnail = self.thumbnail_path(external_id);
        match tokio::fs::remove_file(&thumbnail).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("removing {}", thumbnail.display()));
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<serde_json::Value> {
        let dir = self.videos_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        Ok(json!({ "status": "ok", "root": self.root.display().to_string() }))
    }

    async fn list(&self) -> Result<Vec<OriginObject>> {
        let mut objects = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.videos_dir()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(objects),
            Err(err) => return Err(err).context("reading local videos directory"),
        };
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !metadata.is_file() || name.starts_with('.') {
                continue;
            }
            let Some(stem) = Path::new(&name).file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            objects.push(OriginObject {
                external_id: stem.to_owned(),
                url: format!("{PUBLIC_PREFIX}/{VIDEOS_SUBDIR}/{name}"),
                bytes: metadata.len(),
            });
        }
        objects.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(objects)
    }
}
