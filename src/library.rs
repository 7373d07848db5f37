//! Immutable application state.
//!
//! `CatalogSnapshot` is the copy-on-write record list: applying a
//! `CatalogEvent` builds a new snapshot and never touches a record another
//! reader may still hold. `ViewState` layers the browsing state on top (page,
//! search box, expanded categories, the single open modal) and renders it into
//! a serializable `PageModel`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::{self, CatalogStats, DEFAULT_RANK_LIMIT, SearchOutcome, SubcategoryGroup};
use crate::metadata::VideoRecord;
use crate::theme::{CategoryTheme, recommended_categories, theme_for};

/// Record mutations observed by the holder of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEvent {
    /// A freshly created record; listed first because lists are newest-first.
    Added(VideoRecord),
    /// New metadata for an existing record.
    Replaced(VideoRecord),
    Removed { id: String },
    Viewed { id: String, views: u64 },
}

#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    videos: Arc<Vec<VideoRecord>>,
}

impl CatalogSnapshot {
    pub fn new(videos: Vec<VideoRecord>) -> Self {
        Self {
            videos: Arc::new(videos),
        }
    }

    pub fn videos(&self) -> &[VideoRecord] {
        &self.videos
    }

    pub fn get(&self, id: &str) -> Option<&VideoRecord> {
        self.videos.iter().find(|record| record.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// True when both snapshots share the same underlying list.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.videos, &other.videos)
    }

    /// Produces the snapshot that follows `event`. Events naming an id that is
    /// not in the snapshot leave it unchanged (and shared).
    pub fn apply(&self, event: CatalogEvent) -> Self {
        match event {
            CatalogEvent::Added(record) => {
                let mut videos = Vec::with_capacity(self.videos.len() + 1);
                videos.extend(
                    self.videos
                        .iter()
                        .filter(|existing| existing.id != record.id)
                        .cloned(),
                );
                videos.insert(0, record);
                Self::new(videos)
            }
            CatalogEvent::Replaced(record) => {
                if !self.contains(&record.id) {
                    return self.clone();
                }
                // The stored view count can trail one this snapshot already saw.
                self.map_record(&record.id, |current| VideoRecord {
                    views: current.views.max(record.views),
                    ..record.clone()
                })
            }
            CatalogEvent::Removed { id } => {
                if !self.contains(&id) {
                    return self.clone();
                }
                Self::new(
                    self.videos
                        .iter()
                        .filter(|record| record.id != id)
                        .cloned()
                        .collect(),
                )
            }
            CatalogEvent::Viewed { id, views } => {
                if !self.contains(&id) {
                    return self.clone();
                }
                // Counters never move backwards, even if responses race.
                self.map_record(&id, |current| VideoRecord {
                    views: current.views.max(views),
                    ..current.clone()
                })
            }
        }
    }

    /// Choices for the upload form: recommended categories first, then every
    /// other category already in use, in first-seen order.
    pub fn category_options(&self) -> Vec<CategoryOption<'_>> {
        let groups = catalog::group_by_category(self.videos()).into_categories();
        let mut options: Vec<CategoryOption<'_>> = recommended_categories()
            .map(|name| CategoryOption {
                name,
                theme: theme_for(name),
                recommended: true,
                video_count: groups
                    .iter()
                    .find(|group| group.name == name)
                    .map_or(0, |group| group.video_count()),
            })
            .collect();
        for group in &groups {
            if options.iter().all(|option| option.name != group.name) {
                options.push(CategoryOption {
                    name: group.name,
                    theme: theme_for(group.name),
                    recommended: false,
                    video_count: group.video_count(),
                });
            }
        }
        options
    }

    fn map_record(&self, id: &str, update: impl Fn(&VideoRecord) -> VideoRecord) -> Self {
        Self::new(
            self.videos
                .iter()
                .map(|record| {
                    if record.id == id {
                        update(record)
                    } else {
                        record.clone()
                    }
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Page {
    #[default]
    Home,
    Analytics,
}

/// At most one modal is open at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modal {
    Player { video_id: String },
    Upload,
    Edit { video_id: String },
    ConfirmDelete { video_id: String },
}

impl Modal {
    fn video_id(&self) -> Option<&str> {
        match self {
            Self::Player { video_id }
            | Self::Edit { video_id }
            | Self::ConfirmDelete { video_id } => Some(video_id),
            Self::Upload => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    Catalog(CatalogEvent),
    Navigate(Page),
    SearchChanged(String),
    ToggleCategory(String),
    Open(Modal),
    Close,
    /// A form submission (upload, edit, delete) went out.
    SubmitStarted,
    SubmitFinished,
}

#[derive(Debug, Clone, Default)]
pub struct ViewState {
    catalog: CatalogSnapshot,
    page: Page,
    search_term: String,
    expanded: Vec<String>,
    modal: Option<Modal>,
    submitting: bool,
}

impl ViewState {
    pub fn new(catalog: CatalogSnapshot) -> Self {
        Self {
            catalog,
            ..Self::default()
        }
    }

    pub fn catalog(&self) -> &CatalogSnapshot {
        &self.catalog
    }

    pub fn page(&self) -> Page {
        self.page
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    pub fn is_expanded(&self, category: &str) -> bool {
        self.expanded.iter().any(|name| name == category)
    }

    pub fn modal(&self) -> Option<&Modal> {
        self.modal.as_ref()
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    /// The record shown in the player, if the player is open.
    pub fn playing(&self) -> Option<&VideoRecord> {
        match &self.modal {
            Some(Modal::Player { video_id }) => self.catalog.get(video_id),
            _ => None,
        }
    }

    pub fn apply(&self, event: ViewEvent) -> Self {
        let mut next = self.clone();
        match event {
            ViewEvent::Catalog(event) => {
                next.catalog = self.catalog.apply(event);
                // A modal pointing at a record that vanished has nothing to show.
                let orphaned = next
                    .modal
                    .as_ref()
                    .and_then(Modal::video_id)
                    .is_some_and(|id| !next.catalog.contains(id));
                if orphaned {
                    next.modal = None;
                }
            }
            ViewEvent::Navigate(page) => next.page = page,
            ViewEvent::SearchChanged(term) => next.search_term = term,
            ViewEvent::ToggleCategory(category) => {
                if self.is_expanded(&category) {
                    next.expanded.retain(|name| *name != category);
                } else {
                    next.expanded.push(category);
                }
            }
            ViewEvent::Open(modal) => {
                let known = modal
                    .video_id()
                    .is_none_or(|id| self.catalog.contains(id));
                if known && !self.submitting {
                    next.modal = Some(modal);
                }
            }
            ViewEvent::Close => {
                if !self.submitting {
                    next.modal = None;
                }
            }
            ViewEvent::SubmitStarted => next.submitting = true,
            ViewEvent::SubmitFinished => next.submitting = false,
        }
        next
    }

    /// Derives what the current page shows. The analytics page ignores the
    /// search box; the home page shows search results whenever a term is set.
    pub fn render(&self) -> PageModel<'_> {
        let videos = self.catalog.videos();
        match self.page {
            Page::Analytics => PageModel::Analytics {
                stats: catalog::stats(videos),
                most_viewed: catalog::rank(videos, DEFAULT_RANK_LIMIT),
            },
            Page::Home => match catalog::search(videos, &self.search_term) {
                SearchOutcome::Matches(results) => PageModel::SearchResults {
                    term: &self.search_term,
                    results,
                },
                SearchOutcome::NoTerm => PageModel::Home {
                    categories: catalog::group_by_category(videos)
                        .into_categories()
                        .into_iter()
                        .map(|group| {
                            let expanded = self.is_expanded(group.name);
                            CategorySection {
                                name: group.name,
                                theme: theme_for(group.name),
                                expanded,
                                subcategory_count: group.subcategories.len(),
                                video_count: group.video_count(),
                                subcategories: if expanded {
                                    group.subcategories
                                } else {
                                    Vec::new()
                                },
                            }
                        })
                        .collect(),
                },
            },
        }
    }
}

/// One category card on the home page. Subcategories are only listed while
/// the card is expanded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySection<'a> {
    pub name: &'a str,
    pub theme: CategoryTheme,
    pub expanded: bool,
    pub subcategory_count: usize,
    pub video_count: usize,
    pub subcategories: Vec<SubcategoryGroup<'a>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryOption<'a> {
    pub name: &'a str,
    pub theme: CategoryTheme,
    pub recommended: bool,
    pub video_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "page", rename_all = "camelCase")]
pub enum PageModel<'a> {
    Home {
        categories: Vec<CategorySection<'a>>,
    },
    #[serde(rename_all = "camelCase")]
    SearchResults {
        term: &'a str,
        results: Vec<&'a VideoRecord>,
    },
    #[serde(rename_all = "camelCase")]
    Analytics {
        stats: CatalogStats,
        most_viewed: Vec<&'a VideoRecord>,
    },
}
