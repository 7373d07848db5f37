//! Pure views over the flat record list: category grouping, free-text search
//! and most-viewed ranking.
//!
//! Nothing in here performs IO or mutates its input. Every function borrows the
//! records it is given and returns views that point back into that slice, so
//! callers can render from a snapshot without copying records.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::metadata::VideoRecord;

/// Number of entries in the most-viewed listing when the caller does not ask
/// for a specific amount.
pub const DEFAULT_RANK_LIMIT: usize = 10;

/// Records sharing one `(category, subcategory)` pair, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct SubcategoryGroup<'a> {
    pub name: &'a str,
    pub videos: Vec<&'a VideoRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryGroup<'a> {
    pub name: &'a str,
    pub subcategories: Vec<SubcategoryGroup<'a>>,
}

impl<'a> CategoryGroup<'a> {
    pub fn subcategory(&self, name: &str) -> Option<&SubcategoryGroup<'a>> {
        self.subcategories.iter().find(|group| group.name == name)
    }

    pub fn video_count(&self) -> usize {
        self.subcategories.iter().map(|group| group.videos.len()).sum()
    }
}

/// Two-level category → subcategory → records structure. Categories and
/// subcategories keep the order in which they were first seen.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Grouping<'a> {
    categories: Vec<CategoryGroup<'a>>,
}

impl<'a> Grouping<'a> {
    pub fn categories(&self) -> &[CategoryGroup<'a>] {
        &self.categories
    }

    pub fn into_categories(self) -> Vec<CategoryGroup<'a>> {
        self.categories
    }

    pub fn category(&self, name: &str) -> Option<&CategoryGroup<'a>> {
        self.categories.iter().find(|group| group.name == name)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Total number of records across every bucket.
    pub fn video_count(&self) -> usize {
        self.categories.iter().map(CategoryGroup::video_count).sum()
    }
}

/// Buckets every record under its literal category and subcategory, empty
/// strings included. No record is dropped or duplicated.
pub fn group_by_category(records: &[VideoRecord]) -> Grouping<'_> {
    let mut categories: Vec<CategoryGroup<'_>> = Vec::new();
    let mut category_index: HashMap<&str, usize> = HashMap::new();
    let mut subcategory_index: HashMap<(&str, &str), usize> = HashMap::new();

    for record in records {
        let category = record.category.as_str();
        let subcategory = record.subcategory.as_str();

        let cat_pos = *category_index.entry(category).or_insert_with(|| {
            categories.push(CategoryGroup {
                name: category,
                subcategories: Vec::new(),
            });
            categories.len() - 1
        });
        let group = &mut categories[cat_pos];

        let sub_pos = *subcategory_index
            .entry((category, subcategory))
            .or_insert_with(|| {
                group.subcategories.push(SubcategoryGroup {
                    name: subcategory,
                    videos: Vec::new(),
                });
                group.subcategories.len() - 1
            });
        group.subcategories[sub_pos].videos.push(record);
    }

    Grouping { categories }
}

/// Result of a free-text search. `NoTerm` means the caller supplied nothing to
/// search for and should show the regular catalogue; `Matches` may be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome<'a> {
    NoTerm,
    Matches(Vec<&'a VideoRecord>),
}

impl<'a> SearchOutcome<'a> {
    pub fn matches(&self) -> Option<&[&'a VideoRecord]> {
        match self {
            Self::NoTerm => None,
            Self::Matches(found) => Some(found),
        }
    }
}

/// Case-insensitive substring search over title, description, category and
/// subcategory. Results keep input order.
///
/// Lowercasing uses Unicode's locale-independent mapping so results do not
/// depend on the host.
pub fn search<'a>(records: &'a [VideoRecord], term: &str) -> SearchOutcome<'a> {
    if term.trim().is_empty() {
        return SearchOutcome::NoTerm;
    }
    let needle = term.to_lowercase();
    let found = records
        .iter()
        .filter(|record| record_matches(record, &needle))
        .collect();
    SearchOutcome::Matches(found)
}

fn record_matches(record: &VideoRecord, needle: &str) -> bool {
    [
        record.title.as_str(),
        record.description.as_str(),
        record.category.as_str(),
        record.subcategory.as_str(),
    ]
    .iter()
    .any(|field| field.to_lowercase().contains(needle))
}

/// Most viewed records first, at most `limit` of them. Equal view counts keep
/// their relative input order.
pub fn rank(records: &[VideoRecord], limit: usize) -> Vec<&VideoRecord> {
    let mut ranked: Vec<&VideoRecord> = records.iter().collect();
    // `sort_by` is stable, which is what keeps ties in input order.
    ranked.sort_by(|a, b| b.views.cmp(&a.views));
    ranked.truncate(limit);
    ranked
}

pub fn total_views(records: &[VideoRecord]) -> u64 {
    records
        .iter()
        .fold(0u64, |sum, record| sum.saturating_add(record.views))
}

/// Number of unique category strings, compared case-sensitively.
pub fn distinct_categories(records: &[VideoRecord]) -> usize {
    records
        .iter()
        .map(|record| record.category.as_str())
        .collect::<HashSet<_>>()
        .len()
}

/// Headline numbers for the analytics page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub total_videos: usize,
    pub total_views: u64,
    pub distinct_categories: usize,
}

pub fn stats(records: &[VideoRecord]) -> CatalogStats {
    CatalogStats {
        total_videos: records.len(),
        total_views: total_views(records),
        distinct_categories: distinct_categories(records),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn video(title: &str, category: &str, subcategory: &str, views: u64) -> VideoRecord {
        VideoRecord {
            id: title.to_lowercase(),
            title: title.into(),
            description: format!("{title} description"),
            duration: "10:00".into(),
            category: category.into(),
            subcategory: subcategory.into(),
            media_url: format!("/media/videos/{title}.mp4"),
            external_id: title.into(),
            thumbnail_url: String::new(),
            views,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn ids<'a>(records: impl IntoIterator<Item = &'a &'a VideoRecord>) -> Vec<&'a str> {
        records.into_iter().map(|record| record.id.as_str()).collect()
    }

    /// Small deterministic corpus with repeated categories, blank fields and
    /// mixed case, used by the property-style tests below.
    fn corpus() -> Vec<VideoRecord> {
        vec![
            video("Alpha", "Student's Diversity", "Attention", 5),
            video("Beta", "Community Practices", "Support", 5),
            video("Gamma", "Student's Diversity", "Communication", 9),
            video("Delta", "", "", 0),
            video("Epsilon", "student's diversity", "Attention", 1),
            video("Zeta", "Community Practices", "", 9),
            video("Eta", "Student's Diversity", "Attention", 3),
        ]
    }

    #[test]
    fn grouping_preserves_first_seen_order() {
        let records = corpus();
        let grouping = group_by_category(&records);

        let names: Vec<_> = grouping.categories().iter().map(|g| g.name).collect();
        assert_eq!(
            names,
            vec![
                "Student's Diversity",
                "Community Practices",
                "",
                "student's diversity"
            ]
        );

        let diversity = grouping.category("Student's Diversity").unwrap();
        let subs: Vec<_> = diversity.subcategories.iter().map(|g| g.name).collect();
        assert_eq!(subs, vec!["Attention", "Communication"]);
        assert_eq!(
            ids(&diversity.subcategory("Attention").unwrap().videos),
            vec!["alpha", "eta"]
        );
    }

    #[test]
    fn grouping_neither_drops_nor_duplicates() {
        let records = corpus();
        for end in 0..=records.len() {
            let slice = &records[..end];
            let grouping = group_by_category(slice);
            assert_eq!(grouping.video_count(), slice.len());

            let mut seen: Vec<&str> = grouping
                .categories()
                .iter()
                .flat_map(|cat| cat.subcategories.iter())
                .flat_map(|sub| sub.videos.iter().map(|record| record.id.as_str()))
                .collect();
            seen.sort_unstable();
            seen.dedup();
            assert_eq!(seen.len(), slice.len());
        }
    }

    #[test]
    fn grouping_keeps_blank_classification() {
        let records = corpus();
        let grouping = group_by_category(&records);
        let blank = grouping.category("").unwrap();
        assert_eq!(ids(&blank.subcategory("").unwrap().videos), vec!["delta"]);
        let community = grouping.category("Community Practices").unwrap();
        assert_eq!(ids(&community.subcategory("").unwrap().videos), vec!["zeta"]);
    }

    #[test]
    fn grouping_empty_input() {
        let grouping = group_by_category(&[]);
        assert!(grouping.is_empty());
        assert_eq!(grouping.len(), 0);
    }

    #[test]
    fn search_without_term_is_distinct_from_no_matches() {
        let records = corpus();
        assert_eq!(search(&records, ""), SearchOutcome::NoTerm);
        assert_eq!(search(&records, "  \t\n"), SearchOutcome::NoTerm);
        assert_eq!(search(&[], ""), SearchOutcome::NoTerm);
        assert_eq!(
            search(&records, "no such video"),
            SearchOutcome::Matches(vec![])
        );
        assert_eq!(search(&[], "alpha"), SearchOutcome::Matches(vec![]));
    }

    #[test]
    fn search_is_case_insensitive_across_fields() {
        let mut records = corpus();
        records[0].description = "Breaking barriers in communication".into();

        let outcome = search(&records, "COMM");
        let found = outcome.matches().unwrap();
        // Alpha (description), Beta and Zeta (category), Gamma (subcategory).
        assert_eq!(ids(found), vec!["alpha", "beta", "gamma", "zeta"]);
    }

    #[test]
    fn search_matches_exactly_the_records_containing_the_term() {
        let records = corpus();
        for term in ["a", "ALPHA", "diversity", "'s d", "tion", "xyz", " Div"] {
            let outcome = search(&records, term);
            let found = outcome.matches().unwrap();
            let needle = term.to_lowercase();
            let expected: Vec<&str> = records
                .iter()
                .filter(|r| {
                    [&r.title, &r.description, &r.category, &r.subcategory]
                        .iter()
                        .any(|field| field.to_lowercase().contains(&needle))
                })
                .map(|r| r.id.as_str())
                .collect();
            assert_eq!(ids(found), expected, "term {term:?}");
        }
    }

    #[test]
    fn search_folds_non_ascii_case() {
        let records = vec![video("Éducation Über", "Ξένα", "x", 0)];
        assert_eq!(search(&records, "éDUCATION").matches().unwrap().len(), 1);
        assert_eq!(search(&records, "über").matches().unwrap().len(), 1);
        assert_eq!(search(&records, "ΞΈΝΑ").matches().unwrap().len(), 1);
    }

    #[test]
    fn rank_breaks_ties_by_input_order() {
        let records = vec![
            video("Alpha", "A", "a", 5),
            video("Beta", "A", "a", 5),
            video("Gamma", "A", "a", 9),
        ];
        assert_eq!(ids(&rank(&records, 2)), vec!["gamma", "alpha"]);
        assert_eq!(ids(&rank(&records, 3)), vec!["gamma", "alpha", "beta"]);
    }

    #[test]
    fn rank_limits() {
        let records = corpus();
        assert!(rank(&records, 0).is_empty());
        assert!(rank(&[], DEFAULT_RANK_LIMIT).is_empty());

        let full = rank(&records, records.len() + 5);
        assert_eq!(full.len(), records.len());
        assert!(full.windows(2).all(|pair| pair[0].views >= pair[1].views));
        assert_eq!(
            ids(&full),
            vec!["gamma", "zeta", "alpha", "beta", "eta", "epsilon", "delta"]
        );
    }

    #[test]
    fn rank_default_limit_is_ten() {
        let records: Vec<_> = (0..15)
            .map(|n| video(&format!("V{n}"), "A", "a", n))
            .collect();
        let top = rank(&records, DEFAULT_RANK_LIMIT);
        assert_eq!(top.len(), 10);
        assert_eq!(top[0].views, 14);
        assert_eq!(top[9].views, 5);
    }

    #[test]
    fn total_views_sums_and_ignores_order() {
        assert_eq!(total_views(&[]), 0);
        let mut records = corpus();
        assert_eq!(total_views(&records), 32);
        records.reverse();
        assert_eq!(total_views(&records), 32);
        records.rotate_left(3);
        assert_eq!(total_views(&records), 32);
    }

    #[test]
    fn distinct_categories_is_case_sensitive() {
        let records = vec![
            video("One", "A", "x", 0),
            video("Two", "B", "x", 0),
            video("Three", "A", "y", 0),
        ];
        assert_eq!(distinct_categories(&records), 2);
        assert_eq!(distinct_categories(&corpus()), 4);
        assert_eq!(distinct_categories(&[]), 0);
    }

    #[test]
    fn stats_bundle() {
        let records = corpus();
        assert_eq!(
            stats(&records),
            CatalogStats {
                total_videos: 7,
                total_views: 32,
                distinct_categories: 4,
            }
        );
    }
}
