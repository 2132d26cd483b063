//! Map handler - geolocated markers.

use liquidata_engine::{
    distinct_activity_codes, distinct_departments, filter, geo_filter, markers, Filter, MapMarker,
    Snapshot, Version,
};
use serde::{Deserialize, Serialize};

/// Activity selector value meaning no constraint.
const ALL_ACTIVITIES: &str = "all";

/// Query parameters for the map view.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapQuery {
    /// Exact activity code, or `all`
    pub activity: Option<String>,
    pub department: Option<String>,
    pub score_min: Option<i64>,
    pub favorite_only: Option<bool>,
}

/// Markers and the choices for the map's filter controls.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapResponse {
    pub markers: Vec<MapMarker>,
    /// Records shown on the map
    pub geolocated: usize,
    /// Records in the snapshot
    pub total: usize,
    pub activity_codes: Vec<String>,
    pub departments: Vec<String>,
    pub version: Version,
}

pub fn handle_map(snapshot: &Snapshot, query: &MapQuery) -> MapResponse {
    let predicates = Filter {
        department: query.department.clone(),
        score_min: query.score_min,
        favorite_only: query.favorite_only.unwrap_or(false),
        ..Filter::default()
    };
    let activity = query
        .activity
        .as_deref()
        .filter(|a| !a.is_empty() && *a != ALL_ACTIVITIES);

    let located = geo_filter(filter(snapshot, &predicates), activity);

    MapResponse {
        geolocated: located.len(),
        markers: markers(located),
        total: snapshot.len(),
        activity_codes: distinct_activity_codes(snapshot),
        departments: distinct_departments(snapshot),
        version: snapshot.version(),
    }
}
