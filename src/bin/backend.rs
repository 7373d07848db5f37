#![forbid(unsafe_code)]

//! Axum backend for the vidshelf catalogue.
//!
//! Serves the JSON API, the catalogue views derived from the in-memory
//! snapshot, files of the local media origin (with range support) and the
//! single-page frontend from `WWW_ROOT`.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{
        DefaultBodyLimit, Multipart, Path as AxumPath, Query, State, multipart::MultipartError,
    },
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use clap::Parser;
use mime_guess::{MimeGuess, mime::Mime};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    signal,
};
use tokio_util::io::ReaderStream;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use vidshelf::catalog::{self, DEFAULT_RANK_LIMIT, SearchOutcome};
use vidshelf::config::{AppConfig, ConfigOverrides, OriginKind, resolve_config};
use vidshelf::error::CatalogError;
use vidshelf::library::{CatalogEvent, CatalogSnapshot, Page, ViewEvent, ViewState};
use vidshelf::metadata::{ListFilter, MetadataStore, VideoDraft, VideoPatch, VideoRecord};
use vidshelf::origin::local::{THUMBNAILS_SUBDIR, VIDEOS_SUBDIR};
use vidshelf::service::VideoService;
use vidshelf::telemetry;

// Room for the text fields and multipart framing around the video itself.
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Parser)]
#[command(name = "backend", about = "Serve the vidshelf catalogue API")]
struct Cli {
    #[arg(long)]
    media_root: Option<PathBuf>,
    #[arg(long)]
    www_root: Option<PathBuf>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    host: Option<String>,
    /// `local` or `cloudinary`.
    #[arg(long)]
    origin: Option<OriginKind>,
    #[arg(long)]
    max_upload_bytes: Option<u64>,
    /// Alternative `.env` file.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl Cli {
    fn into_settings(self) -> Result<(AppConfig, IpAddr)> {
        let config = resolve_config(ConfigOverrides {
            media_root: self.media_root,
            www_root: self.www_root,
            vidshelf_port: self.port,
            vidshelf_host: self.host,
            origin: self.origin,
            max_upload_bytes: self.max_upload_bytes,
            env_path: self.env_file,
        })?;
        let host = parse_host_arg(&config.vidshelf_host)?;
        Ok((config, host))
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .map_err(|err| anyhow!("invalid host {value}: {err}"))
}

/// Shared handler state.
///
/// * `service` performs every mutation and owns the media origin.
/// * `metadata` is only consulted for `data_version`, to spot writes made by
///   other processes such as `seed`.
/// * `cache` holds the catalogue snapshot that read endpoints render from.
#[derive(Clone)]
struct AppState {
    service: VideoService,
    metadata: MetadataStore,
    cache: Arc<CatalogCache>,
    media_root: Arc<PathBuf>,
    www_root: Arc<PathBuf>,
}

/// `generation` moves on every change that a list loaded earlier would not
/// reflect. A load only installs its result if the generation it started
/// under is still current.
#[derive(Default)]
struct CatalogCache {
    snapshot: RwLock<Option<CatalogSnapshot>>,
    last_db_version: RwLock<Option<i64>>,
    generation: AtomicU64,
}

impl AppState {
    async fn open(config: &AppConfig) -> Result<Self> {
        let metadata = MetadataStore::open(&config.database_path())
            .await
            .context("opening catalogue database")?;
        let service = VideoService::new(
            Arc::new(metadata.clone()),
            config.media_origin(),
            config.upload_limits(),
        );
        Ok(Self {
            service,
            metadata,
            cache: Arc::new(CatalogCache::default()),
            media_root: Arc::new(config.media_root.clone()),
            www_root: Arc::new(config.www_root.clone()),
        })
    }

    async fn ensure_fresh_cache(&self) -> ApiResult<()> {
        let version = self
            .metadata
            .data_version()
            .await
            .map_err(CatalogError::upstream)?;

        let mut last = self.cache.last_db_version.write();
        if let Some(previous) = *last
            && version != previous
        {
            tracing::debug!(previous, version, "catalogue changed on disk, dropping snapshot");
            let mut snapshot = self.cache.snapshot.write();
            self.cache.generation.fetch_add(1, Ordering::AcqRel);
            snapshot.take();
        }
        *last = Some(version);
        Ok(())
    }

    async fn snapshot(&self) -> ApiResult<CatalogSnapshot> {
        loop {
            self.ensure_fresh_cache().await?;
            if let Some(cached) = self.cache.snapshot.read().clone() {
                return Ok(cached);
            }

            let generation = self.cache.generation.load(Ordering::Acquire);
            let videos = self.service.list(&ListFilter::default()).await?;
            if let Some(snapshot) = self.install(generation, videos) {
                return Ok(snapshot);
            }
            tracing::debug!("catalogue changed while loading, reloading snapshot");
        }
    }

    /// Caches `videos` unless a mutation was recorded after `generation`.
    fn install(&self, generation: u64, videos: Vec<VideoRecord>) -> Option<CatalogSnapshot> {
        let mut guard = self.cache.snapshot.write();
        if self.cache.generation.load(Ordering::Acquire) != generation {
            return None;
        }
        let snapshot = CatalogSnapshot::new(videos);
        *guard = Some(snapshot.clone());
        Some(snapshot)
    }

    /// Patches the cached snapshot after a mutation made through this API.
    /// Without a snapshot there is nothing to patch, but a load in flight
    /// must still learn that its list is stale.
    fn record(&self, event: CatalogEvent) {
        let mut guard = self.cache.snapshot.write();
        self.cache.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(current) = guard.take() {
            *guard = Some(current.apply(event));
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            details: None,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            details: None,
        }
    }

    fn from_multipart(err: MultipartError) -> Self {
        Self {
            status: err.status(),
            message: err.body_text(),
            details: None,
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        let (status, details) = match &err {
            CatalogError::NotFound { .. } => (StatusCode::NOT_FOUND, None),
            CatalogError::Validation(_) => (StatusCode::BAD_REQUEST, None),
            CatalogError::TooLarge { size, limit } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                Some(json!({ "size": size, "limit": limit })),
            ),
            CatalogError::UnsupportedFormat => (StatusCode::UNSUPPORTED_MEDIA_TYPE, None),
            CatalogError::Upstream(_) => {
                tracing::error!(error = %err, "request failed upstream");
                (StatusCode::BAD_GATEWAY, None)
            }
        };
        Self {
            status,
            message: err.to_string(),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.message });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let (config, host) = Cli::parse().into_settings()?;

    let state = AppState::open(&config).await?;
    tracing::info!(
        media_root = %config.media_root.display(),
        origin = state.service.origin().name(),
        max_upload_bytes = config.max_upload_bytes,
        "catalogue ready"
    );
    let app = build_router(state, config.max_upload_bytes);

    let addr = SocketAddr::new(host, config.vidshelf_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!(%addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn build_router(state: AppState, max_upload_bytes: u64) -> Router {
    let body_limit = usize::try_from(max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES))
        .unwrap_or(usize::MAX);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/videos", get(list_videos).post(create_video))
        .route(
            "/api/videos/{id}",
            get(get_video).put(update_video).delete(delete_video),
        )
        .route("/api/videos/{id}/view", put(record_view))
        .route("/api/catalog", get(catalog_page))
        .route("/api/catalog/search", get(search_catalog))
        .route("/api/catalog/top", get(top_videos))
        .route("/api/catalog/stats", get(catalog_stats))
        .route("/api/catalog/categories", get(category_options))
        .route("/api/origin/ping", get(origin_ping))
        .route("/api/origin/videos", get(origin_videos))
        .route("/media/{*path}", get(serve_media))
        .fallback(static_fallback)
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to install Ctrl+C handler");
    }
    tracing::info!("shutting down");
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "message": "Server is running",
        "origin": state.service.origin().name(),
    }))
}

async fn list_videos(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> ApiResult<Json<Vec<VideoRecord>>> {
    if filter.is_empty() {
        let snapshot = state.snapshot().await?;
        return Ok(Json(snapshot.videos().to_vec()));
    }
    Ok(Json(state.service.list(&filter).await?))
}

async fn get_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<VideoRecord>> {
    let snapshot = state.snapshot().await?;
    let record = snapshot
        .get(&id)
        .cloned()
        .ok_or_else(|| CatalogError::not_found(&id))?;
    Ok(Json(record))
}

fn draft_field<'a>(draft: &'a mut VideoDraft, name: &str) -> Option<&'a mut String> {
    match name {
        "title" => Some(&mut draft.title),
        "description" => Some(&mut draft.description),
        "duration" => Some(&mut draft.duration),
        "category" => Some(&mut draft.category),
        "subcategory" => Some(&mut draft.subcategory),
        _ => None,
    }
}

async fn create_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<VideoRecord>)> {
    let mut draft = VideoDraft::default();
    let mut video: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ApiError::from_multipart)?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        if name == "video" {
            let bytes = field.bytes().await.map_err(ApiError::from_multipart)?;
            video = Some(bytes.to_vec());
        } else if let Some(slot) = draft_field(&mut draft, &name) {
            *slot = field.text().await.map_err(ApiError::from_multipart)?;
        }
    }

    let bytes = video.ok_or_else(|| CatalogError::validation("video file is required"))?;
    let record = state.service.upload(draft, bytes).await?;
    state.record(CatalogEvent::Added(record.clone()));
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(patch): Json<VideoPatch>,
) -> ApiResult<Json<VideoRecord>> {
    let record = state.service.update(&id, patch).await?;
    state.record(CatalogEvent::Replaced(record.clone()));
    Ok(Json(record))
}

async fn delete_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<StatusCode> {
    state.service.delete(&id).await?;
    state.record(CatalogEvent::Removed { id });
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
struct ViewCount {
    views: u64,
}

async fn record_view(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<ViewCount>> {
    let views = state.service.increment_view(&id).await?;
    state.record(CatalogEvent::Viewed { id, views });
    Ok(Json(ViewCount { views }))
}

#[derive(Debug, Default, Deserialize)]
struct CatalogQuery {
    #[serde(default)]
    page: Page,
    #[serde(default)]
    q: String,
    /// Comma separated category names.
    #[serde(default)]
    expanded: String,
}

async fn catalog_page(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> ApiResult<Response> {
    let snapshot = state.snapshot().await?;
    let mut view = ViewState::new(snapshot)
        .apply(ViewEvent::Navigate(query.page))
        .apply(ViewEvent::SearchChanged(query.q));
    for category in query.expanded.split(',').map(str::trim) {
        if !category.is_empty() && !view.is_expanded(category) {
            view = view.apply(ViewEvent::ToggleCategory(category.to_string()));
        }
    }
    Ok(Json(view.render()).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

/// `term` is null when nothing was searched for; `results` then holds the
/// whole catalogue.
#[derive(Serialize)]
struct SearchResponse<'a> {
    term: Option<&'a str>,
    results: Vec<&'a VideoRecord>,
}

async fn search_catalog(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Response> {
    let snapshot = state.snapshot().await?;
    let videos = snapshot.videos();
    let response = match catalog::search(videos, &query.q) {
        SearchOutcome::NoTerm => SearchResponse {
            term: None,
            results: videos.iter().collect(),
        },
        SearchOutcome::Matches(results) => SearchResponse {
            term: Some(&query.q),
            results,
        },
    };
    Ok(Json(response).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct TopQuery {
    limit: Option<usize>,
}

async fn top_videos(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> ApiResult<Response> {
    let snapshot = state.snapshot().await?;
    let ranked = catalog::rank(snapshot.videos(), query.limit.unwrap_or(DEFAULT_RANK_LIMIT));
    Ok(Json(ranked).into_response())
}

async fn catalog_stats(State(state): State<AppState>) -> ApiResult<Json<catalog::CatalogStats>> {
    let snapshot = state.snapshot().await?;
    Ok(Json(catalog::stats(snapshot.videos())))
}

async fn category_options(State(state): State<AppState>) -> ApiResult<Response> {
    let snapshot = state.snapshot().await?;
    Ok(Json(snapshot.category_options()).into_response())
}

async fn origin_ping(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let origin = state.service.origin();
    let status = origin.ping().await.map_err(CatalogError::upstream)?;
    Ok(Json(json!({ "origin": origin.name(), "status": status })))
}

async fn origin_videos(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let origin = state.service.origin();
    let objects = origin.list().await.map_err(CatalogError::upstream)?;
    Ok(Json(json!({
        "origin": origin.name(),
        "count": objects.len(),
        "videos": objects,
    })))
}

async fn serve_media(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let target = resolve_media_path(&state.media_root, &path)?;
    stream_file(target, None, Some(&headers)).await
}

/// Only the video and thumbnail folders of the media root are public; the
/// database next to them is not.
fn resolve_media_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let candidate = Path::new(request_path.trim_start_matches('/'));
    let mut components = candidate.components();
    let public = matches!(
        components.next(),
        Some(Component::Normal(dir)) if dir == VIDEOS_SUBDIR || dir == THUMBNAILS_SUBDIR
    );
    let mut rest = components.peekable();
    if !public
        || rest.peek().is_none()
        || rest.any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    match serve_www_path(&state.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => stream_file(root.join("index.html"), None, None).await,
        Ok(_) => stream_file(target, None, None).await,
        Err(_) if should_fallback_to_index(request_path) => {
            stream_file(root.join("index.html"), None, None).await
        }
        Err(_) => Err(ApiError::not_found("file not found")),
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

/// Client-side routes have no extension; asset misses should stay 404s.
fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    trimmed.is_empty() || Path::new(trimmed).extension().is_none()
}

fn header_value(value: String) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(&value).map_err(|err| ApiError::internal(err.to_string()))
}

async fn stream_file(
    path: PathBuf,
    mime: Option<Mime>,
    headers: Option<&HeaderMap>,
) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    if !metadata.is_file() {
        return Err(ApiError::not_found("file not found"));
    }
    let size = metadata.len();

    let guessed = mime.or_else(|| MimeGuess::from_path(&path).first());
    let range = headers
        .and_then(|headers| headers.get(header::RANGE))
        .and_then(|value| parse_range_header(value, size));

    let mut response = match range {
        Some((start, _)) if start >= size => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            response
                .headers_mut()
                .insert(header::CONTENT_RANGE, header_value(format!("bytes */{size}"))?);
            response
        }
        Some((start, end)) => {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|err| ApiError::internal(err.to_string()))?;
            let body = Body::from_stream(ReaderStream::new(file.take(length)));
            let mut response = body.into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            response.headers_mut().insert(
                header::CONTENT_RANGE,
                header_value(format!("bytes {start}-{end}/{size}"))?,
            );
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            response
        }
        None => {
            let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            response
        }
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(mime) = guessed
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

fn parse_range_header(value: &HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let (unit, range) = value.split_once('=')?;
    if unit.trim() != "bytes" {
        return None;
    }
    // Only the first range of a multi-range request is honoured.
    let range = range.split(',').next()?.trim();
    let (start_str, end_str) = range.split_once('-')?;

    if start_str.is_empty() {
        // "-N" asks for the last N bytes.
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        return Some((size.saturating_sub(suffix_len), size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().ok()?;
    let end = if end_str.is_empty() {
        size.saturating_sub(1)
    } else {
        end_str.parse().ok()?
    };
    if end < start {
        return None;
    }
    Some((start, end))
}
