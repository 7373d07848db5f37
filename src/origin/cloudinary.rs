//! Cloudinary-backed media origin.
//!
//! Uploads go through the signed REST upload endpoint with three eager MP4
//! renditions requested asynchronously. ureq is blocking, so every request
//! runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use sha1::{Digest, Sha1};

use super::{MediaOrigin, OriginObject, UploadLimits, check_upload};
use crate::error::{CatalogError, CatalogResult};
use crate::metadata::MediaRef;

pub const DEFAULT_FOLDER: &str = "vidshelf-videos";
const API_BASE: &str = "https://api.cloudinary.com/v1_1";
const DELIVERY_BASE: &str = "https://res.cloudinary.com";
const LIST_PAGE_SIZE: &str = "100";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// 1080p, 720p and 480p H.264/AAC renditions, best to most economical.
pub const EAGER_RENDITIONS: &str = "w_1920,h_1080,c_limit,q_auto:best,f_mp4,vc_h264,ac_aac\
|w_1280,h_720,c_limit,q_auto:good,f_mp4,vc_h264,ac_aac\
|w_854,h_480,c_limit,q_auto:eco,f_mp4,vc_h264,ac_aac";

#[derive(Debug, Clone)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Clone)]
pub struct CloudinaryOrigin {
    credentials: Arc<CloudinaryCredentials>,
    folder: String,
    api_base: String,
    agent: ureq::Agent,
}

impl std::fmt::Debug for CloudinaryOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryOrigin")
            .field("cloud_name", &self.credentials.cloud_name)
            .field("folder", &self.folder)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ResourcesResponse {
    #[serde(default)]
    resources: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    public_id: String,
    secure_url: String,
    #[serde(default)]
    bytes: u64,
}

impl CloudinaryOrigin {
    pub fn new(credentials: CloudinaryCredentials) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            credentials: Arc::new(credentials),
            folder: DEFAULT_FOLDER.to_string(),
            api_base: API_BASE.to_string(),
            agent,
        }
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    pub fn thumbnail_url(&self, public_id: &str) -> String {
        thumbnail_url(&self.credentials.cloud_name, public_id)
    }

    fn endpoint(&self, tail: &str) -> String {
        format!("{}/{}/{tail}", self.api_base, self.credentials.cloud_name)
    }

    fn basic_auth(&self) -> String {
        let pair = format!(
            "{}:{}",
            self.credentials.api_key, self.credentials.api_secret
        );
        format!("Basic {}", BASE64.encode(pair))
    }

    /// Adds `timestamp`, `signature` and `api_key` to `params` and posts them.
    fn post_signed(&self, url: &str, mut params: Vec<(String, String)>) -> Result<ureq::Response> {
        params.push(("timestamp".into(), chrono::Utc::now().timestamp().to_string()));
        let signature = sign(&params, &self.credentials.api_secret);
        params.push(("signature".into(), signature));
        params.push(("api_key".into(), self.credentials.api_key.clone()));

        let form: Vec<(&str, &str)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        send(self.agent.post(url).send_form(&form))
    }

    fn get_authed(&self, url: &str, query: &[(&str, &str)]) -> Result<ureq::Response> {
        let mut request = self
            .agent
            .get(url)
            .set("Authorization", &self.basic_auth());
        for (key, value) in query {
            request = request.query(key, value);
        }
        send(request.call())
    }
}

/// Turns HTTP error statuses into errors carrying Cloudinary's message.
fn send(result: std::result::Result<ureq::Response, ureq::Error>) -> Result<ureq::Response> {
    match result {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(code, response)) => {
            let body = response.into_string().unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_owned))
                .unwrap_or(body);
            Err(anyhow!("cloudinary returned {code}: {message}"))
        }
        Err(err) => Err(anyhow!(err).context("cloudinary request failed")),
    }
}

/// Canonical string for request signing: non-empty params sorted by key,
/// joined as `k=v&k=v`.
fn string_to_sign(params: &[(String, String)]) -> String {
    let mut signed: Vec<&(String, String)> = params
        .iter()
        .filter(|(key, value)| {
            !value.is_empty()
                && !matches!(
                    key.as_str(),
                    "file" | "api_key" | "resource_type" | "cloud_name"
                )
        })
        .collect();
    signed.sort_by(|a, b| a.0.cmp(&b.0));
    signed
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn sign(params: &[(String, String)], api_secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(string_to_sign(params).as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn thumbnail_url(cloud_name: &str, public_id: &str) -> String {
    format!("{DELIVERY_BASE}/{cloud_name}/video/upload/{public_id}.jpg")
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .context("cloudinary worker panicked")?
}

/// `video_<unix millis>_<random>`; the suffix keeps uploads landing in the
/// same millisecond apart.
fn upload_public_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "video_{}_{}",
        chrono::Utc::now().timestamp_millis(),
        &suffix[..12]
    )
}

#[async_trait]
impl MediaOrigin for CloudinaryOrigin {
    fn name(&self) -> &'static str {
        "cloudinary"
    }

    async fn store(&self, bytes: Vec<u8>, limits: &UploadLimits) -> CatalogResult<MediaRef> {
        let container = check_upload(&bytes, limits)?;
        let public_id = upload_public_id();
        let file = format!(
            "data:{};base64,{}",
            container.mime_type(),
            BASE64.encode(&bytes)
        );
        drop(bytes);

        let origin = self.clone();
        let upload = blocking(move || {
            let params = vec![
                ("file".to_string(), file),
                ("folder".to_string(), origin.folder.clone()),
                ("public_id".to_string(), public_id),
                ("eager".to_string(), EAGER_RENDITIONS.to_string()),
                ("eager_async".to_string(), "true".to_string()),
                ("invalidate".to_string(), "true".to_string()),
            ];
            let url = origin.endpoint("video/upload");
            let response = origin.post_signed(&url, params)?;
            response
                .into_json::<UploadResponse>()
                .context("decoding cloudinary upload response")
        })
        .await
        .map_err(CatalogError::upstream)?;

        tracing::info!(public_id = %upload.public_id, "uploaded video to cloudinary");
        Ok(MediaRef {
            thumbnail_url: self.thumbnail_url(&upload.public_id),
            media_url: upload.secure_url,
            external_id: upload.public_id,
        })
    }

    async fn remove(&self, external_id: &str) -> Result<()> {
        let origin = self.clone();
        let public_id = external_id.to_string();
        let outcome = blocking(move || {
            let params = vec![
                ("public_id".to_string(), public_id),
                ("invalidate".to_string(), "true".to_string()),
            ];
            let url = origin.endpoint("video/destroy");
            let response = origin.post_signed(&url, params)?;
            response
                .into_json::<DestroyResponse>()
                .context("decoding cloudinary destroy response")
        })
        .await?;

        match outcome.result.as_str() {
            "ok" | "not found" => Ok(()),
            other => Err(anyhow!("cloudinary refused to destroy {external_id}: {other}")),
        }
    }

    async fn ping(&self) -> Result<serde_json::Value> {
        let origin = self.clone();
        blocking(move || {
            let url = origin.endpoint("ping");
            let response = origin.get_authed(&url, &[])?;
            response
                .into_json::<serde_json::Value>()
                .context("decoding cloudinary ping response")
        })
        .await
    }

    async fn list(&self) -> Result<Vec<OriginObject>> {
        let origin = self.clone();
        let listed = blocking(move || {
            let url = origin.endpoint("resources/video/upload");
            let prefix = format!("{}/", origin.folder);
            let response = origin.get_authed(
                &url,
                &[("prefix", prefix.as_str()), ("max_results", LIST_PAGE_SIZE)],
            )?;
            response
                .into_json::<ResourcesResponse>()
                .context("decoding cloudinary resource listing")
        })
        .await?;

        Ok(listed
            .resources
            .into_iter()
            .map(|resource| OriginObject {
                external_id: resource.public_id,
                url: resource.secure_url,
                bytes: resource.bytes,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn string_to_sign_sorts_and_skips_unsigned_params() {
        let params = pairs(&[
            ("timestamp", "1315060510"),
            ("public_id", "sample_image"),
            ("file", "data:video/mp4;base64,AAAA"),
            ("api_key", "1234"),
            ("eager", "w_400,h_300,c_pad|w_260,h_200,c_crop"),
            ("notification_url", ""),
        ]);
        assert_eq!(
            string_to_sign(&params),
            "eager=w_400,h_300,c_pad|w_260,h_200,c_crop&public_id=sample_image&timestamp=1315060510"
        );
    }

    #[test]
    fn signature_is_sha1_hex_over_params_and_secret() {
        let params = pairs(&[
            ("eager", "w_400,h_300,c_pad|w_260,h_200,c_crop"),
            ("public_id", "sample_image"),
            ("timestamp", "1315060510"),
        ]);
        // Published reference vector for Cloudinary signed uploads.
        assert_eq!(
            sign(&params, "abcd"),
            "bfd09f95f331f558cbd1320e67aa8d488770583e"
        );
    }

    #[test]
    fn thumbnail_points_at_delivery_host() {
        assert_eq!(
            thumbnail_url("demo", "vidshelf-videos/video_1700000000000"),
            "https://res.cloudinary.com/demo/video/upload/vidshelf-videos/video_1700000000000.jpg"
        );
    }

    #[test]
    fn public_ids_differ_within_one_millisecond() {
        let ids: Vec<_> = (0..64).map(|_| upload_public_id()).collect();
        let distinct: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(distinct.len(), ids.len());

        let parts: Vec<_> = ids[0].split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "video");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 12);
    }

    #[test]
    fn eager_renditions_cover_three_heights() {
        let heights: Vec<_> = EAGER_RENDITIONS
            .split('|')
            .map(|t| t.split(',').nth(1).unwrap_or_default())
            .collect();
        assert_eq!(heights, ["h_1080", "h_720", "h_480"]);
        assert!(EAGER_RENDITIONS.split('|').all(|t| t.contains("vc_h264")));
    }

    #[tokio::test]
    async fn store_rejects_invalid_payload_without_network() {
        let origin = CloudinaryOrigin::new(CloudinaryCredentials {
            cloud_name: "demo".into(),
            api_key: "key".into(),
            api_secret: "secret".into(),
        });
        let err = origin
            .store(b"not a video at all".to_vec(), &UploadLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnsupportedFormat));
    }
}
