//! View projection: the list the user actually sees.
//!
//! Search first, then the status filter, then sort. The projection is pure;
//! [`ProjectionCache`] only skips recomputation when neither the store
//! revision nor the view state changed.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::record::TaskRecord;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Created,
    Updated,
    Title,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl StatusFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFilter::All => "all",
            StatusFilter::Active => "active",
            StatusFilter::Completed => "completed",
        }
    }

    pub fn matches(&self, record: &TaskRecord) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Active => !record.completed,
            StatusFilter::Completed => record.completed,
        }
    }
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Created => "created",
            SortKey::Updated => "updated",
            SortKey::Title => "title",
        }
    }
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

fn normalize_text(value: &str) -> String {
    value.trim().to_lowercase()
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_text(s).as_str() {
            "all" => Ok(StatusFilter::All),
            "active" | "open" => Ok(StatusFilter::Active),
            "completed" | "done" => Ok(StatusFilter::Completed),
            other => Err(format!(
                "unknown status filter '{other}' (expected all, active or completed)"
            )),
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_text(s).as_str() {
            "created" | "created_at" => Ok(SortKey::Created),
            "updated" | "updated_at" => Ok(SortKey::Updated),
            "title" => Ok(SortKey::Title),
            other => Err(format!(
                "unknown sort key '{other}' (expected created, updated or title)"
            )),
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_text(s).as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction '{other}' (expected asc or desc)")),
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient UI state. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewState {
    pub filter: StatusFilter,
    pub sort: SortKey,
    pub direction: SortDirection,
    #[serde(default)]
    pub search: String,
}

impl ViewState {
    pub fn with_filter(mut self, filter: StatusFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sort(mut self, sort: SortKey, direction: SortDirection) -> Self {
        self.sort = sort;
        self.direction = direction;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }
}

/// Case-insensitive substring match on title or description.
/// `needle` must already be normalized; empty matches everything.
fn matches_search(record: &TaskRecord, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    record.title.to_lowercase().contains(needle)
        || record
            .description
            .as_deref()
            .is_some_and(|text| text.to_lowercase().contains(needle))
}

fn compare_by_key(a: &TaskRecord, b: &TaskRecord, key: SortKey) -> Ordering {
    match key {
        SortKey::Created => a.created_at.cmp(&b.created_at),
        SortKey::Updated => a.updated_at.cmp(&b.updated_at),
        SortKey::Title => a
            .title
            .to_lowercase()
            .cmp(&b.title.to_lowercase())
            .then_with(|| a.title.cmp(&b.title)),
    }
}

/// Project `records` through `view`. Ties always break by ascending id.
pub fn project(records: &[TaskRecord], view: &ViewState) -> Vec<TaskRecord> {
    let needle = normalize_text(&view.search);
    let mut visible: Vec<TaskRecord> = records
        .iter()
        .filter(|record| matches_search(record, &needle))
        .filter(|record| view.filter.matches(record))
        .cloned()
        .collect();

    visible.sort_by(|a, b| {
        let ordering = compare_by_key(a, b, view.sort);
        let ordering = match view.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        ordering.then_with(|| a.id.cmp(&b.id))
    });
    visible
}

/// Remembers the last projection for one store.
#[derive(Debug, Default)]
pub struct ProjectionCache {
    key: Option<(u64, ViewState)>,
    rows: Vec<TaskRecord>,
    pub hits: u64,
    pub misses: u64,
}

impl ProjectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, store: &RecordStore, view: &ViewState) -> &[TaskRecord] {
        let fresh = matches!(&self.key, Some((revision, cached)) if *revision == store.revision() && cached == view);
        if fresh {
            self.hits += 1;
        } else {
            self.misses += 1;
            self.rows = project(&store.records(), view);
            self.key = Some((store.revision(), view.clone()));
        }
        &self.rows
    }

    pub fn invalidate(&mut self) {
        self.key = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreEvent;
    use chrono::{Duration, Utc};

    fn task(id: &str, title: &str, completed: bool, age_secs: i64) -> TaskRecord {
        let at = Utc::now() - Duration::seconds(age_secs);
        TaskRecord {
            id: id.to_string(),
            title: title.to_string(),
            description: None,
            completed,
            created_at: at,
            updated_at: at,
            owner_id: "alice".to_string(),
        }
    }

    fn ids(records: &[TaskRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn search_applies_before_filter() {
        let records = vec![
            task("1", "Buy milk", false, 10),
            task("2", "Milk the cow", true, 5),
        ];
        let view = ViewState::default()
            .with_filter(StatusFilter::Active)
            .with_search("milk");
        assert_eq!(ids(&project(&records, &view)), vec!["1"]);
    }

    #[test]
    fn search_covers_description() {
        let mut record = task("1", "Errands", false, 1);
        record.description = Some("Pick up MILK".to_string());
        let view = ViewState::default().with_search("  milk ");
        assert_eq!(project(&[record], &view).len(), 1);
    }

    #[test]
    fn default_sort_is_newest_first() {
        let records = vec![task("a", "Old", false, 30), task("b", "New", false, 1)];
        assert_eq!(ids(&project(&records, &ViewState::default())), vec!["b", "a"]);
    }

    #[test]
    fn ties_break_by_ascending_id_in_both_directions() {
        let at = Utc::now();
        let mut records = vec![task("b", "Same", false, 0), task("a", "Same", false, 0)];
        for record in &mut records {
            record.created_at = at;
        }
        for direction in [SortDirection::Asc, SortDirection::Desc] {
            let view = ViewState::default().with_sort(SortKey::Created, direction);
            assert_eq!(ids(&project(&records, &view)), vec!["a", "b"]);
        }
    }

    #[test]
    fn title_sort_ignores_case() {
        let records = vec![
            task("1", "banana", false, 0),
            task("2", "Apple", false, 0),
            task("3", "cherry", false, 0),
        ];
        let view = ViewState::default().with_sort(SortKey::Title, SortDirection::Asc);
        assert_eq!(ids(&project(&records, &view)), vec!["2", "1", "3"]);
    }

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!("Done".parse::<StatusFilter>().unwrap(), StatusFilter::Completed);
        assert_eq!("updated_at".parse::<SortKey>().unwrap(), SortKey::Updated);
        assert_eq!("ASC".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        assert!("sideways".parse::<SortDirection>().is_err());
    }

    #[test]
    fn cache_recomputes_only_on_change() {
        let mut store = RecordStore::new();
        store.apply(StoreEvent::Inserted(task("1", "One", false, 0)));
        let mut cache = ProjectionCache::new();
        let view = ViewState::default();

        assert_eq!(cache.get(&store, &view).len(), 1);
        assert_eq!(cache.get(&store, &view).len(), 1);
        assert_eq!((cache.hits, cache.misses), (1, 1));

        store.apply(StoreEvent::Inserted(task("2", "Two", false, 0)));
        assert_eq!(cache.get(&store, &view).len(), 2);

        let completed = view.clone().with_filter(StatusFilter::Completed);
        assert!(cache.get(&store, &completed).is_empty());
        assert_eq!(cache.misses, 3);
    }
}
