#![forbid(unsafe_code)]

//! Loads a TOML catalogue into the record store.
//!
//! Seeded records point at placeholder media (`externalId = seed_<uuid>`);
//! they exist to populate the catalogue views, not to be played.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use vidshelf::config::{DATABASE_FILE, resolve_media_root};
use vidshelf::metadata::{MediaRef, MetadataStore, VideoDraft};
use vidshelf::origin::local::{PUBLIC_PREFIX, THUMBNAILS_SUBDIR, VIDEOS_SUBDIR};
use vidshelf::telemetry;

#[derive(Debug, Parser)]
#[command(name = "seed", about = "Seed the vidshelf catalogue from a TOML file")]
struct Cli {
    /// Catalogue file (categories → subcategories → videos).
    #[arg(long)]
    catalog: PathBuf,
    /// Delete every existing record first.
    #[arg(long)]
    replace: bool,
    #[arg(long)]
    media_root: Option<PathBuf>,
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct SeedCatalogue {
    #[serde(default)]
    categories: Vec<SeedCategory>,
}

#[derive(Debug, Deserialize)]
struct SeedCategory {
    name: String,
    #[serde(default)]
    subcategories: Vec<SeedSubcategory>,
}

#[derive(Debug, Deserialize)]
struct SeedSubcategory {
    name: String,
    #[serde(default)]
    videos: Vec<SeedVideo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedVideo {
    title: String,
    #[serde(default)]
    duration: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    views: u64,
    media_url: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct SeedSummary {
    cleared: u64,
    inserted: usize,
}

fn parse_catalogue(raw: &str) -> Result<SeedCatalogue> {
    let catalogue: SeedCatalogue = toml::from_str(raw).context("parsing seed catalogue")?;
    for category in &catalogue.categories {
        if category.name.trim().is_empty() {
            bail!("seed catalogue has a category without a name");
        }
        for subcategory in &category.subcategories {
            if subcategory.name.trim().is_empty() {
                bail!("category {:?} has a subcategory without a name", category.name);
            }
            if let Some(video) = subcategory.videos.iter().find(|v| v.title.trim().is_empty()) {
                bail!(
                    "{} / {} has a video without a title ({:?})",
                    category.name,
                    subcategory.name,
                    video.description
                );
            }
        }
    }
    Ok(catalogue)
}

/// Every seeded record gets its own external id, across runs too, so deleting
/// one record never releases media another still points at.
fn placeholder_media(media_url: Option<&str>) -> MediaRef {
    let external_id = format!("seed_{}", uuid::Uuid::new_v4().simple());
    MediaRef {
        media_url: media_url
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{PUBLIC_PREFIX}/{VIDEOS_SUBDIR}/{external_id}.mp4")),
        thumbnail_url: format!("{PUBLIC_PREFIX}/{THUMBNAILS_SUBDIR}/{external_id}.jpg"),
        external_id,
    }
}

async fn seed_store(
    store: &MetadataStore,
    catalogue: &SeedCatalogue,
    replace: bool,
) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();
    if replace {
        summary.cleared = store.clear().await.context("clearing existing records")?;
        tracing::info!(cleared = summary.cleared, "cleared existing videos");
    }

    for category in &catalogue.categories {
        for subcategory in &category.subcategories {
            for video in &subcategory.videos {
                let draft = VideoDraft {
                    title: video.title.trim().to_string(),
                    description: video.description.trim().to_string(),
                    duration: video.duration.trim().to_string(),
                    category: category.name.trim().to_string(),
                    subcategory: subcategory.name.trim().to_string(),
                };
                let media = placeholder_media(video.media_url.as_deref());
                store
                    .insert_seeded(&draft, &media, video.views)
                    .await
                    .with_context(|| format!("seeding {:?}", draft.title))?;
                summary.inserted += 1;
            }
        }
    }
    Ok(summary)
}

async fn run(cli: Cli) -> Result<SeedSummary> {
    let raw = std::fs::read_to_string(&cli.catalog)
        .with_context(|| format!("reading {}", cli.catalog.display()))?;
    let catalogue = parse_catalogue(&raw)?;

    let media_root = resolve_media_root(cli.media_root, cli.env_file.as_deref())?;
    let store = MetadataStore::open(&media_root.join(DATABASE_FILE))
        .await
        .with_context(|| format!("opening catalogue under {}", media_root.display()))?;
    seed_store(&store, &catalogue, cli.replace).await
}

fn catalogue_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();
    let label = catalogue_label(&cli.catalog);
    let summary = run(cli).await?;
    tracing::info!(
        catalogue = %label,
        inserted = summary.inserted,
        cleared = summary.cleared,
        "seeded videos"
    );
    Ok(())
}
