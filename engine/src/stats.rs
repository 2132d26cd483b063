//! Dashboard aggregates.

use crate::record::{SCORE_MAX, SCORE_MIN};
use crate::Record;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Number of entries kept in the activity and city rankings.
pub const TOP_N: usize = 5;

/// Label for records without an activity code or city.
pub const OTHER_LABEL: &str = "Autre";

const BUCKETS: usize = (SCORE_MAX - SCORE_MIN + 1) as usize;

/// A labelled count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountEntry {
    pub name: String,
    pub value: usize,
}

/// Publications in one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthCount {
    pub year: i32,
    pub month: u32,
    pub count: usize,
}

impl MonthCount {
    /// `month/year` label, e.g. `3/2024`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.month, self.year)
    }
}

/// Aggregate statistics over a sequence of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total: usize,
    pub favorites: usize,
    /// Favorites as a rounded percentage of the total
    pub favorite_percent: u32,
    /// Records with a usable score
    pub scored: usize,
    /// Mean of the clamped scores of scored records
    pub average_score: Option<f64>,
    pub by_activity: Vec<CountEntry>,
    pub by_city: Vec<CountEntry>,
    /// `score_histogram[i]` counts records scoring `i + 1`
    pub score_histogram: [usize; BUCKETS],
    /// Chronological publication counts
    pub monthly_trend: Vec<MonthCount>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            total: 0,
            favorites: 0,
            favorite_percent: 0,
            scored: 0,
            average_score: None,
            by_activity: Vec::new(),
            by_city: Vec::new(),
            score_histogram: [0; BUCKETS],
            monthly_trend: Vec::new(),
        }
    }
}

impl Statistics {
    /// The most frequent city, if any record was counted.
    pub fn top_city(&self) -> Option<&CountEntry> {
        self.by_city.first()
    }
}

/// Frequency counter that remembers first-encounter order for tie-breaks.
#[derive(Default)]
struct Tally {
    order: Vec<(String, usize)>,
    index: HashMap<String, usize>,
}

impl Tally {
    fn add(&mut self, label: Option<&str>) {
        let label = label.unwrap_or(OTHER_LABEL);
        match self.index.get(label) {
            Some(&i) => self.order[i].1 += 1,
            None => {
                self.index.insert(label.to_string(), self.order.len());
                self.order.push((label.to_string(), 1));
            }
        }
    }

    fn top(mut self, n: usize) -> Vec<CountEntry> {
        // Stable: equal counts keep first-encounter order.
        self.order.sort_by(|a, b| b.1.cmp(&a.1));
        self.order
            .into_iter()
            .take(n)
            .map(|(name, value)| CountEntry { name, value })
            .collect()
    }
}

/// Compute dashboard statistics.
///
/// Records without a score are left out of the histogram and the average
/// but still count toward `total`; likewise for publication dates and the
/// monthly trend.
pub fn aggregate<'a, I>(records: I) -> Statistics
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut stats = Statistics::default();
    let mut activities = Tally::default();
    let mut cities = Tally::default();
    let mut months: BTreeMap<(i32, u32), usize> = BTreeMap::new();
    let mut score_sum: i64 = 0;

    for record in records {
        stats.total += 1;
        if record.favorite {
            stats.favorites += 1;
        }

        activities.add(record.activity_code.as_deref());
        cities.add(record.city.as_deref());

        if let Some(score) = record.score {
            let clamped = score.clamp(SCORE_MIN, SCORE_MAX);
            stats.score_histogram[(clamped - SCORE_MIN) as usize] += 1;
            stats.scored += 1;
            score_sum += clamped;
        }

        if let Some(date) = record.published_on {
            *months.entry((date.year(), date.month())).or_default() += 1;
        }
    }

    if stats.total > 0 {
        stats.favorite_percent =
            ((stats.favorites as f64 / stats.total as f64) * 100.0).round() as u32;
    }
    if stats.scored > 0 {
        stats.average_score = Some(score_sum as f64 / stats.scored as f64);
    }

    stats.by_activity = activities.top(TOP_N);
    stats.by_city = cities.top(TOP_N);
    stats.monthly_trend = months
        .into_iter()
        .map(|((year, month), count)| MonthCount { year, month, count })
        .collect();

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn on(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn empty_input_is_all_zero() {
        let stats = aggregate(std::iter::empty());
        assert_eq!(stats, Statistics::default());
        assert_eq!(stats.total, 0);
        assert_eq!(stats.score_histogram, [0; 10]);
        assert!(stats.top_city().is_none());
    }

    #[test]
    fn histogram_clamps_out_of_range_scores() {
        let records = vec![
            Record::new(1).with_score(0),
            Record::new(2).with_score(1),
            Record::new(3).with_score(10),
            Record::new(4).with_score(14),
            Record::new(5),
        ];
        let stats = aggregate(&records);
        assert_eq!(stats.score_histogram[0], 2);
        assert_eq!(stats.score_histogram[9], 2);
        assert_eq!(stats.scored, 4);
        assert_eq!(stats.total, 5);
        assert_eq!(stats.average_score, Some(5.5));
    }

    #[test]
    fn rankings_break_ties_by_first_encounter() {
        let records: Vec<Record> = ["Nantes", "Lyon", "Lyon", "Brest", "Nantes", "Caen", "Pau", "Agen"]
            .iter()
            .enumerate()
            .map(|(i, city)| Record::new(i as i64).with_city(*city))
            .collect();
        let stats = aggregate(&records);

        let names: Vec<&str> = stats.by_city.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Nantes", "Lyon", "Brest", "Caen", "Pau"]);
        assert_eq!(stats.top_city().map(|c| c.value), Some(2));
    }

    #[test]
    fn missing_activity_counts_as_other() {
        let records = vec![Record::new(1), Record::new(2).with_activity_code("47.11")];
        let stats = aggregate(&records);
        assert_eq!(stats.by_activity[0].name, OTHER_LABEL);
    }

    #[test]
    fn monthly_trend_is_chronological() {
        let records = vec![
            Record::new(1).with_published_on(on(2024, 2, 1)),
            Record::new(2).with_published_on(on(2023, 12, 30)),
            Record::new(3).with_published_on(on(2024, 2, 20)),
            Record::new(4),
        ];
        let stats = aggregate(&records);
        let labels: Vec<String> = stats.monthly_trend.iter().map(MonthCount::label).collect();
        assert_eq!(labels, vec!["12/2023", "2/2024"]);
        assert_eq!(stats.monthly_trend[1].count, 2);
    }

    #[test]
    fn favorite_share() {
        let records = vec![
            Record::new(1).with_favorite(true),
            Record::new(2),
            Record::new(3),
        ];
        let stats = aggregate(&records);
        assert_eq!(stats.favorites, 1);
        assert_eq!(stats.favorite_percent, 33);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_total_matches_input(
                scores in prop::collection::vec(prop::option::of(-5i64..20), 0..60),
            ) {
                let records: Vec<Record> = scores
                    .iter()
                    .enumerate()
                    .map(|(i, score)| {
                        let mut record = Record::new(i as i64);
                        record.score = *score;
                        record
                    })
                    .collect();

                let stats = aggregate(&records);
                prop_assert_eq!(stats.total, records.len());
                prop_assert_eq!(stats.score_histogram.iter().sum::<usize>(), stats.scored);
                prop_assert!(stats.by_city.len() <= TOP_N);
            }
        }
    }
}
