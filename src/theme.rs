//! Display policy for categories: an icon and a colour gradient per known
//! category name, with an explicit fallback for everything else.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryTheme {
    pub icon: &'static str,
    pub color: &'static str,
}

pub const DEFAULT_THEME: CategoryTheme = CategoryTheme {
    icon: "📚",
    color: "from-purple-500 to-purple-600",
};

/// Recommended categories and their themes. Lookups are exact string matches.
const THEMES: &[(&str, CategoryTheme)] = &[
    (
        "Student's Diversity",
        CategoryTheme {
            icon: "👥",
            color: "from-blue-500 to-blue-600",
        },
    ),
    (
        "Community Practices",
        CategoryTheme {
            icon: "🏘️",
            color: "from-green-500 to-green-600",
        },
    ),
    ("Inadequate Resources and Training", DEFAULT_THEME),
];

pub fn theme_for(category: &str) -> CategoryTheme {
    THEMES
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, theme)| *theme)
        .unwrap_or(DEFAULT_THEME)
}

/// Category names offered to uploaders. Records may still carry any string.
pub fn recommended_categories() -> impl Iterator<Item = &'static str> {
    THEMES.iter().map(|(name, _)| *name)
}
