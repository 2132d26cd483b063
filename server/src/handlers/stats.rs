//! Dashboard statistics handler.

use liquidata_engine::{aggregate, Snapshot, Statistics, Version};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub version: Version,
    #[serde(flatten)]
    pub statistics: Statistics,
}

pub fn handle_stats(snapshot: &Snapshot) -> StatsResponse {
    StatsResponse {
        version: snapshot.version(),
        statistics: aggregate(snapshot),
    }
}
