//! Query engine - pure derivations over a snapshot.
//!
//! Nothing here mutates its input. Functions take any iterator of record
//! references (a [`Snapshot`](crate::Snapshot), a slice, or the output of a
//! previous step) and return references in a new order, so views compose
//! without copying records.

use crate::{Record, RecordId, ScoreTier};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Department value meaning "no department constraint".
pub const ALL_DEPARTMENTS: &str = "all";

/// Predicates for [`filter`]. Every set predicate must hold.
///
/// Text predicates are case-insensitive substring matches; empty strings
/// impose no constraint. Once either score bound is set, records without a
/// score are excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filter {
    pub name_contains: Option<String>,
    pub city_contains: Option<String>,
    pub activity_contains: Option<String>,
    pub score_min: Option<i64>,
    pub score_max: Option<i64>,
    pub favorite_only: bool,
    /// Exact department, or [`ALL_DEPARTMENTS`]
    pub department: Option<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name_contains(mut self, needle: impl Into<String>) -> Self {
        self.name_contains = Some(needle.into());
        self
    }

    pub fn city_contains(mut self, needle: impl Into<String>) -> Self {
        self.city_contains = Some(needle.into());
        self
    }

    pub fn activity_contains(mut self, needle: impl Into<String>) -> Self {
        self.activity_contains = Some(needle.into());
        self
    }

    pub fn score_min(mut self, min: i64) -> Self {
        self.score_min = Some(min);
        self
    }

    pub fn score_max(mut self, max: i64) -> Self {
        self.score_max = Some(max);
        self
    }

    pub fn favorite_only(mut self) -> Self {
        self.favorite_only = true;
        self
    }

    pub fn department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    /// Whether no predicate is active.
    pub fn is_empty(&self) -> bool {
        active(&self.name_contains).is_none()
            && active(&self.city_contains).is_none()
            && active(&self.activity_contains).is_none()
            && self.score_min.is_none()
            && self.score_max.is_none()
            && !self.favorite_only
            && self.department_constraint().is_none()
    }

    fn department_constraint(&self) -> Option<&str> {
        active(&self.department).filter(|d| !d.eq_ignore_ascii_case(ALL_DEPARTMENTS))
    }

    /// Evaluate all predicates against one record.
    pub fn matches(&self, record: &Record) -> bool {
        contains(&record.name, &self.name_contains)
            && contains(&record.city, &self.city_contains)
            && contains(&record.activity_code, &self.activity_contains)
            && self.matches_score(record.score)
            && (!self.favorite_only || record.favorite)
            && self
                .department_constraint()
                .map_or(true, |d| record.department.as_deref() == Some(d))
    }

    fn matches_score(&self, score: Option<i64>) -> bool {
        if self.score_min.is_none() && self.score_max.is_none() {
            return true;
        }
        let Some(score) = score else {
            return false;
        };
        self.score_min.map_or(true, |min| score >= min)
            && self.score_max.map_or(true, |max| score <= max)
    }
}

fn active(predicate: &Option<String>) -> Option<&str> {
    predicate.as_deref().filter(|s| !s.is_empty())
}

fn contains(field: &Option<String>, predicate: &Option<String>) -> bool {
    match active(predicate) {
        None => true,
        Some(needle) => field
            .as_deref()
            .is_some_and(|value| value.to_lowercase().contains(&needle.to_lowercase())),
    }
}

/// Keep the records matching `predicates`, preserving their order.
pub fn filter<'a, I>(records: I, predicates: &Filter) -> Vec<&'a Record>
where
    I: IntoIterator<Item = &'a Record>,
{
    if predicates.is_empty() {
        return records.into_iter().collect();
    }
    records
        .into_iter()
        .filter(|r| predicates.matches(r))
        .collect()
}

/// Sortable record attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    Id,
    #[serde(alias = "nom_complet")]
    Name,
    #[serde(alias = "social_ville")]
    City,
    #[serde(alias = "social_code_postal")]
    PostalCode,
    #[serde(alias = "departement")]
    Department,
    #[serde(alias = "activite_principale")]
    ActivityCode,
    Score,
    #[default]
    #[serde(alias = "dateparution")]
    PublishedOn,
    #[serde(alias = "date_creation")]
    CreatedOn,
    #[serde(alias = "favori")]
    Favorite,
}

impl SortKey {
    /// Column name in the remote store.
    pub fn column(&self) -> &'static str {
        match self {
            SortKey::Id => "id",
            SortKey::Name => "nom_complet",
            SortKey::City => "social_ville",
            SortKey::PostalCode => "social_code_postal",
            SortKey::Department => "departement",
            SortKey::ActivityCode => "activite_principale",
            SortKey::Score => "score",
            SortKey::PublishedOn => "dateparution",
            SortKey::CreatedOn => "date_creation",
            SortKey::Favorite => "favori",
        }
    }

    /// Natural ordering of the attribute; absent values sort lowest.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        match self {
            SortKey::Id => a.id.cmp(&b.id),
            SortKey::Name => a.name.cmp(&b.name),
            SortKey::City => a.city.cmp(&b.city),
            SortKey::PostalCode => a.postal_code.cmp(&b.postal_code),
            SortKey::Department => a.department.cmp(&b.department),
            SortKey::ActivityCode => a.activity_code.cmp(&b.activity_code),
            SortKey::Score => a.score.cmp(&b.score),
            SortKey::PublishedOn => a.published_on.cmp(&b.published_on),
            SortKey::CreatedOn => a.created_on.cmp(&b.created_on),
            SortKey::Favorite => a.favorite.cmp(&b.favorite),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    #[default]
    Desc,
}

impl Direction {
    pub fn is_ascending(&self) -> bool {
        matches!(self, Direction::Asc)
    }
}

/// Stable sort by `key`. Records comparing equal keep their relative order
/// in both directions.
pub fn sort<'a, I>(records: I, key: SortKey, direction: Direction) -> Vec<&'a Record>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut sorted: Vec<&Record> = records.into_iter().collect();
    match direction {
        Direction::Asc => sorted.sort_by(|a, b| key.compare(a, b)),
        Direction::Desc => sorted.sort_by(|a, b| key.compare(b, a)),
    }
    sorted
}

/// One page of a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-indexed page number that was requested
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

impl<T> Page<T> {
    /// Transform the items while keeping the totals.
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
            total_items: self.total_items,
        }
    }
}

/// Slice out page `page` (1-indexed) of `page_size` items.
///
/// Out-of-range pages, including page 0, return no items with correct
/// totals. A zero page size yields zero pages.
pub fn paginate<T: Clone>(items: &[T], page_size: usize, page: usize) -> Page<T> {
    let total_items = items.len();
    let total_pages = if page_size == 0 {
        0
    } else {
        total_items.div_ceil(page_size)
    };

    let slice = match page.checked_sub(1) {
        Some(index) if index < total_pages => {
            let start = index * page_size;
            let end = (start + page_size).min(total_items);
            &items[start..end]
        }
        _ => &[],
    };

    Page {
        items: slice.to_vec(),
        page,
        page_size,
        total_pages,
        total_items,
    }
}

/// Keep geolocated records, optionally restricted to one activity code.
pub fn geo_filter<'a, I>(records: I, activity_code: Option<&str>) -> Vec<&'a Record>
where
    I: IntoIterator<Item = &'a Record>,
{
    let activity_code = activity_code.filter(|c| !c.is_empty());
    records
        .into_iter()
        .filter(|r| r.position().is_some())
        .filter(|r| activity_code.map_or(true, |code| r.activity_code.as_deref() == Some(code)))
        .collect()
}

/// A map pin for one geolocated record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMarker {
    pub id: RecordId,
    pub latitude: f64,
    pub longitude: f64,
    pub tier: ScoreTier,
}

/// Build markers; records without a position are skipped.
pub fn markers<'a, I>(records: I) -> Vec<MapMarker>
where
    I: IntoIterator<Item = &'a Record>,
{
    records
        .into_iter()
        .filter_map(|r| {
            r.position().map(|(latitude, longitude)| MapMarker {
                id: r.id,
                latitude,
                longitude,
                tier: r.score_tier(),
            })
        })
        .collect()
}

/// Sorted distinct activity codes, for filter pickers.
pub fn distinct_activity_codes<'a, I>(records: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Record>,
{
    distinct(records, |r| r.activity_code.as_deref())
}

/// Sorted distinct departments, for filter pickers.
pub fn distinct_departments<'a, I>(records: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Record>,
{
    distinct(records, |r| r.department.as_deref())
}

fn distinct<'a, I, F>(records: I, field: F) -> Vec<String>
where
    I: IntoIterator<Item = &'a Record>,
    F: Fn(&'a Record) -> Option<&'a str>,
{
    records
        .into_iter()
        .filter_map(field)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}
