//! Listing handler - filtered, sorted and paginated records.

use crate::error::{AppError, Result};
use liquidata_engine::{
    filter, paginate, sort, Direction, Filter, Record, RecordId, Snapshot, SortKey, Version,
};
use serde::{Deserialize, Serialize};

/// Maximum page size a client may request.
const MAX_PAGE_SIZE: usize = 500;

/// Query parameters for the listing.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingQuery {
    pub name_contains: Option<String>,
    pub city_contains: Option<String>,
    pub activity_contains: Option<String>,
    pub score_min: Option<i64>,
    pub score_max: Option<i64>,
    pub favorite_only: Option<bool>,
    /// Exact department, or `all`
    pub department: Option<String>,
    pub sort: Option<SortKey>,
    pub direction: Option<Direction>,
    /// 1-indexed page number
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl ListingQuery {
    /// Predicates for the engine filter.
    pub fn filter(&self) -> Filter {
        Filter {
            name_contains: self.name_contains.clone(),
            city_contains: self.city_contains.clone(),
            activity_contains: self.activity_contains.clone(),
            score_min: self.score_min,
            score_max: self.score_max,
            favorite_only: self.favorite_only.unwrap_or(false),
            department: self.department.clone(),
        }
    }
}

/// One page of the listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingResponse {
    pub items: Vec<Record>,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_items: usize,
    /// Version of the snapshot the page was cut from
    pub version: Version,
}

/// Filter, sort and paginate a snapshot.
pub fn handle_listing(
    snapshot: &Snapshot,
    query: &ListingQuery,
    default_page_size: usize,
) -> Result<ListingResponse> {
    let page_size = query.page_size.unwrap_or(default_page_size);
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(AppError::BadRequest(format!(
            "pageSize must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    let page_number = query.page.unwrap_or(1);

    let hits = filter(snapshot, &query.filter());
    let ordered = sort(
        hits,
        query.sort.unwrap_or_default(),
        query.direction.unwrap_or_default(),
    );
    let page = paginate(&ordered, page_size, page_number).map(Record::clone);

    Ok(ListingResponse {
        items: page.items,
        page: page.page,
        page_size: page.page_size,
        total_pages: page.total_pages,
        total_items: page.total_items,
        version: snapshot.version(),
    })
}

/// Look up one record.
pub fn handle_record(snapshot: &Snapshot, id: RecordId) -> Result<Record> {
    snapshot
        .get(id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("Record {} not found", id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        let records: Vec<Record> = (1..=20)
            .map(|i| {
                Record::new(i)
                    .with_name(format!("Entreprise {:02}", i))
                    .with_department(if i <= 10 { "44" } else { "35" })
                    .with_score(i % 10 + 1)
            })
            .collect();
        Snapshot::new(3, records)
    }

    #[test]
    fn default_page_size_applies() {
        let response = handle_listing(&snapshot(), &ListingQuery::default(), 14).unwrap();
        assert_eq!(response.items.len(), 14);
        assert_eq!(response.total_pages, 2);
        assert_eq!(response.total_items, 20);
        assert_eq!(response.version, 3);
    }

    #[test]
    fn filters_and_sorts() {
        let query = ListingQuery {
            department: Some("35".into()),
            sort: Some(SortKey::Name),
            direction: Some(Direction::Asc),
            ..ListingQuery::default()
        };
        let response = handle_listing(&snapshot(), &query, 14).unwrap();
        let ids: Vec<RecordId> = response.items.iter().map(|r| r.id).collect();
        assert_eq!(ids, (11..=20).collect::<Vec<_>>());
    }

    #[test]
    fn out_of_range_page_is_empty() {
        let query = ListingQuery {
            page: Some(9),
            ..ListingQuery::default()
        };
        let response = handle_listing(&snapshot(), &query, 14).unwrap();
        assert!(response.items.is_empty());
        assert_eq!(response.total_items, 20);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let query = ListingQuery {
            page_size: Some(0),
            ..ListingQuery::default()
        };
        assert!(matches!(
            handle_listing(&snapshot(), &query, 14),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn missing_record_is_not_found() {
        assert!(handle_record(&snapshot(), 5).is_ok());
        assert!(matches!(
            handle_record(&snapshot(), 99),
            Err(AppError::NotFound(_))
        ));
    }
}
