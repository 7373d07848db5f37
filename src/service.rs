//! Orchestration of the record store and the media origin.
//!
//! Everything that mutates the catalogue goes through `VideoService`, which
//! validates input, keeps media objects and records in step, and maps
//! collaborator failures into `CatalogError`.

use std::sync::Arc;

use crate::error::{CatalogError, CatalogResult};
use crate::metadata::{ListFilter, RecordStore, VideoDraft, VideoPatch, VideoRecord};
use crate::origin::{MediaOrigin, UploadLimits};

#[derive(Clone)]
pub struct VideoService {
    store: Arc<dyn RecordStore>,
    origin: Arc<dyn MediaOrigin>,
    limits: UploadLimits,
}

impl VideoService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        origin: Arc<dyn MediaOrigin>,
        limits: UploadLimits,
    ) -> Self {
        Self {
            store,
            origin,
            limits,
        }
    }

    pub fn origin(&self) -> &Arc<dyn MediaOrigin> {
        &self.origin
    }

    pub fn limits(&self) -> UploadLimits {
        self.limits
    }

    pub async fn list(&self, filter: &ListFilter) -> CatalogResult<Vec<VideoRecord>> {
        self.store.list(filter).await.map_err(CatalogError::upstream)
    }

    pub async fn get(&self, id: &str) -> CatalogResult<VideoRecord> {
        self.store
            .get(id)
            .await
            .map_err(CatalogError::upstream)?
            .ok_or_else(|| CatalogError::not_found(id))
    }

    /// Validates the draft, stores the media, then creates the record. If the
    /// record cannot be written the stored media is released again.
    pub async fn upload(&self, draft: VideoDraft, bytes: Vec<u8>) -> CatalogResult<VideoRecord> {
        let draft = normalize_draft(draft)?;
        let media = self.origin.store(bytes, &self.limits).await?;

        match self.store.create(&draft, &media).await {
            Ok(record) => {
                tracing::info!(
                    id = %record.id,
                    external_id = %record.external_id,
                    origin = self.origin.name(),
                    "video uploaded"
                );
                Ok(record)
            }
            Err(err) => {
                if let Err(cleanup_err) = self.origin.remove(&media.external_id).await {
                    tracing::error!(
                        error = %cleanup_err,
                        external_id = %media.external_id,
                        "failed to release media after record insert failed"
                    );
                }
                Err(CatalogError::upstream(err.context("creating video record")))
            }
        }
    }

    pub async fn update(&self, id: &str, patch: VideoPatch) -> CatalogResult<VideoRecord> {
        let patch = normalize_patch(patch)?;
        let record = self
            .store
            .update(id, &patch)
            .await
            .map_err(CatalogError::upstream)?
            .ok_or_else(|| CatalogError::not_found(id))?;
        tracing::info!(%id, "video metadata updated");
        Ok(record)
    }

    /// Deletes the record, then releases its media. A failed release leaves the
    /// record deleted and is only logged.
    pub async fn delete(&self, id: &str) -> CatalogResult<VideoRecord> {
        let record = self
            .store
            .delete(id)
            .await
            .map_err(CatalogError::upstream)?
            .ok_or_else(|| CatalogError::not_found(id))?;

        if let Err(err) = self.origin.remove(&record.external_id).await {
            tracing::warn!(
                error = %format!("{err:#}"),
                %id,
                external_id = %record.external_id,
                "video deleted but media object was not released"
            );
        }
        tracing::info!(%id, "video deleted");
        Ok(record)
    }

    pub async fn increment_view(&self, id: &str) -> CatalogResult<u64> {
        self.store
            .increment_view(id)
            .await
            .map_err(CatalogError::upstream)?
            .ok_or_else(|| CatalogError::not_found(id))
    }
}

fn required(field: &str, value: String) -> CatalogResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn supplied(field: &str, value: Option<String>) -> CatalogResult<Option<String>> {
    value.map(|value| required(field, value)).transpose()
}

fn normalize_draft(draft: VideoDraft) -> CatalogResult<VideoDraft> {
    Ok(VideoDraft {
        title: required("title", draft.title)?,
        description: required("description", draft.description)?,
        duration: required("duration", draft.duration)?,
        category: required("category", draft.category)?,
        subcategory: required("subcategory", draft.subcategory)?,
    })
}

fn normalize_patch(patch: VideoPatch) -> CatalogResult<VideoPatch> {
    if patch.is_empty() {
        return Err(CatalogError::validation("no fields to update"));
    }
    Ok(VideoPatch {
        title: supplied("title", patch.title)?,
        description: supplied("description", patch.description)?,
        duration: supplied("duration", patch.duration)?,
        category: supplied("category", patch.category)?,
        subcategory: supplied("subcategory", patch.subcategory)?,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::error::CatalogResult;
    use crate::metadata::MediaRef;
    use crate::origin::{MediaOrigin, OriginObject, UploadLimits, check_upload};

    /// In-memory origin that remembers what it stored and released.
    #[derive(Default)]
    pub struct FakeOrigin {
        pub stored: Mutex<Vec<String>>,
        pub removed: Mutex<Vec<String>>,
        pub fail_remove: AtomicBool,
    }

    impl FakeOrigin {
        pub fn removed(&self) -> Vec<String> {
            self.removed.lock().clone()
        }

        pub fn set_fail_remove(&self, fail: bool) {
            self.fail_remove.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MediaOrigin for FakeOrigin {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn store(&self, bytes: Vec<u8>, limits: &UploadLimits) -> CatalogResult<MediaRef> {
            let container = check_upload(&bytes, limits)?;
            let mut stored = self.stored.lock();
            let external_id = format!("fake_{}", stored.len() + 1);
            stored.push(external_id.clone());
            Ok(MediaRef {
                media_url: format!("https://cdn.test/{external_id}.{}", container.extension()),
                thumbnail_url: format!("https://cdn.test/{external_id}.jpg"),
                external_id,
            })
        }

        async fn remove(&self, external_id: &str) -> Result<()> {
            if self.fail_remove.load(Ordering::SeqCst) {
                return Err(anyhow!("origin unavailable"));
            }
            self.removed.lock().push(external_id.to_string());
            Ok(())
        }

        async fn ping(&self) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "status": "ok" }))
        }

        async fn list(&self) -> Result<Vec<OriginObject>> {
            Ok(self
                .stored
                .lock()
                .iter()
                .map(|id| OriginObject {
                    external_id: id.clone(),
                    url: format!("https://cdn.test/{id}"),
                    bytes: 0,
                })
                .collect())
        }
    }

    pub fn draft(title: &str) -> crate::metadata::VideoDraft {
        crate::metadata::VideoDraft {
            title: title.to_string(),
            description: format!("{title} walkthrough"),
            duration: "10:00".to_string(),
            category: "Community Practices".to_string(),
            subcategory: "Parent Engagement".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeOrigin, draft};
    use super::*;
    use crate::metadata::{MediaRef, MetadataStore};
    use crate::origin::samples;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        origin: Arc<FakeOrigin>,
        service: VideoService,
    }

    async fn fixture() -> Result<Fixture> {
        let dir = tempfile::tempdir()?;
        let store = MetadataStore::open(&dir.path().join("catalog.db")).await?;
        let origin = Arc::new(FakeOrigin::default());
        let service = VideoService::new(
            Arc::new(store),
            origin.clone(),
            UploadLimits::default(),
        );
        Ok(Fixture {
            _dir: dir,
            origin,
            service,
        })
    }

    #[tokio::test]
    async fn upload_trims_and_persists() -> Result<()> {
        let fx = fixture().await?;
        let mut input = draft("Classroom Inclusion");
        input.title = "  Classroom Inclusion \n".to_string();

        let record = fx.service.upload(input, samples::mp4()).await?;
        assert_eq!(record.title, "Classroom Inclusion");
        assert_eq!(record.views, 0);
        assert_eq!(record.external_id, "fake_1");
        assert!(record.media_url.ends_with(".mp4"));

        let fetched = fx.service.get(&record.id).await?;
        assert_eq!(fetched, record);
        Ok(())
    }

    #[tokio::test]
    async fn upload_validates_before_touching_origin() -> Result<()> {
        let fx = fixture().await?;
        let mut input = draft("Untitled");
        input.category = "   ".to_string();

        let err = fx.service.upload(input, samples::mp4()).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(ref msg) if msg.contains("category")));
        assert!(fx.origin.stored.lock().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn upload_surfaces_origin_rejections() -> Result<()> {
        let fx = fixture().await?;
        let err = fx
            .service
            .upload(draft("Slides"), b"%PDF-1.7 not a video".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnsupportedFormat));
        assert!(fx.service.list(&ListFilter::default()).await?.is_empty());
        Ok(())
    }

    struct BrokenStore;

    #[async_trait]
    impl RecordStore for BrokenStore {
        async fn list(&self, _: &ListFilter) -> Result<Vec<VideoRecord>> {
            Err(anyhow!("database offline"))
        }
        async fn get(&self, _: &str) -> Result<Option<VideoRecord>> {
            Err(anyhow!("database offline"))
        }
        async fn create(&self, _: &VideoDraft, _: &MediaRef) -> Result<VideoRecord> {
            Err(anyhow!("database offline"))
        }
        async fn update(&self, _: &str, _: &VideoPatch) -> Result<Option<VideoRecord>> {
            Err(anyhow!("database offline"))
        }
        async fn delete(&self, _: &str) -> Result<Option<VideoRecord>> {
            Err(anyhow!("database offline"))
        }
        async fn increment_view(&self, _: &str) -> Result<Option<u64>> {
            Err(anyhow!("database offline"))
        }
    }

    #[tokio::test]
    async fn failed_insert_releases_stored_media() {
        let origin = Arc::new(FakeOrigin::default());
        let service = VideoService::new(
            Arc::new(BrokenStore),
            origin.clone(),
            UploadLimits::default(),
        );

        let err = service
            .upload(draft("Orphan"), samples::webm())
            .await
            .unwrap_err();
        match err {
            CatalogError::Upstream(message) => assert!(message.contains("database offline")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(origin.removed(), vec!["fake_1".to_string()]);
    }

    #[tokio::test]
    async fn update_applies_supplied_fields() -> Result<()> {
        let fx = fixture().await?;
        let record = fx.service.upload(draft("Before"), samples::mp4()).await?;

        let updated = fx
            .service
            .update(
                &record.id,
                VideoPatch {
                    title: Some(" After ".to_string()),
                    ..VideoPatch::default()
                },
            )
            .await?;
        assert_eq!(updated.title, "After");
        assert_eq!(updated.description, record.description);
        assert_eq!(updated.media_url, record.media_url);
        Ok(())
    }

    #[tokio::test]
    async fn update_rejects_empty_and_blank_patches() -> Result<()> {
        let fx = fixture().await?;
        let record = fx.service.upload(draft("Stable"), samples::mp4()).await?;

        let err = fx
            .service
            .update(&record.id, VideoPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));

        let err = fx
            .service
            .update(
                &record.id,
                VideoPatch {
                    subcategory: Some("".to_string()),
                    ..VideoPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));

        let err = fx
            .service
            .update(
                "missing",
                VideoPatch {
                    title: Some("x".to_string()),
                    ..VideoPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn delete_releases_media_and_view_then_fails() -> Result<()> {
        let fx = fixture().await?;
        let record = fx.service.upload(draft("Short lived"), samples::mp4()).await?;
        assert_eq!(fx.service.increment_view(&record.id).await?, 1);

        fx.service.delete(&record.id).await?;
        assert_eq!(fx.origin.removed(), vec![record.external_id.clone()]);

        let err = fx.service.increment_view(&record.id).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { ref id } if id == &record.id));
        assert!(matches!(
            fx.service.get(&record.id).await.unwrap_err(),
            CatalogError::NotFound { .. }
        ));
        assert!(fx.service.list(&ListFilter::default()).await?.is_empty());

        let err = fx.service.delete(&record.id).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn delete_survives_origin_failure() -> Result<()> {
        let fx = fixture().await?;
        let record = fx.service.upload(draft("Sticky"), samples::mp4()).await?;
        fx.origin.set_fail_remove(true);

        let deleted = fx.service.delete(&record.id).await?;
        assert_eq!(deleted.id, record.id);
        assert!(fx.origin.removed().is_empty());
        assert!(fx.service.list(&ListFilter::default()).await?.is_empty());
        Ok(())
    }
}
