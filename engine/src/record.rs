//! Record types for liquidation notices.
//!
//! A [`Record`] is the typed form of one remote row. Every optional column is
//! an explicit `Option`; conversion from a row turns empty strings,
//! unparsable numbers and unparsable dates into `None` so business logic
//! never sees a half-valid value.

use crate::{error::Result, schema::RowSchema, Error, RecordId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Lowest score on the notation scale.
pub const SCORE_MIN: i64 = 1;
/// Highest score on the notation scale.
pub const SCORE_MAX: i64 = 10;

/// Colour band of a score, used for badges and map markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreTier {
    /// Score of 4 or less
    Low,
    /// Score from 5 to 7
    Medium,
    /// Score above 7
    High,
    /// No usable score
    Unknown,
}

impl ScoreTier {
    /// Classify an optional score.
    pub fn of(score: Option<i64>) -> Self {
        match score {
            None => ScoreTier::Unknown,
            Some(s) if s <= 4 => ScoreTier::Low,
            Some(s) if s <= 7 => ScoreTier::Medium,
            Some(_) => ScoreTier::High,
        }
    }
}

/// Publication details of the legal notice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub number: Option<String>,
    pub tribunal: Option<String>,
    pub trader: Option<String>,
    pub registry: Option<String>,
    pub url: Option<String>,
    pub registry_url: Option<String>,
}

/// Free-text annotations attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotations {
    /// Positive points noted by the analyst
    pub positive: Option<String>,
    /// Negative points noted by the analyst
    pub negative: Option<String>,
    pub finances: Option<String>,
    pub headcount: Option<String>,
    pub director: Option<String>,
    pub mail: Option<String>,
    pub liquidator_contact: Option<String>,
}

/// One liquidation notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Stable identifier, unique within the collection
    pub id: RecordId,
    /// Company registration number
    pub siren: Option<String>,
    /// Display name
    pub name: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub department: Option<String>,
    /// Latitude in decimal degrees
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees
    pub longitude: Option<f64>,
    /// Categorical activity code
    pub activity_code: Option<String>,
    /// Activity description
    pub activity: Option<String>,
    /// Integer score, nominally within 1..=10
    pub score: Option<i64>,
    pub published_on: Option<NaiveDate>,
    /// Company creation date
    pub created_on: Option<NaiveDate>,
    /// Row creation time in the remote store
    pub created_at: Option<DateTime<Utc>>,
    pub favorite: bool,
    pub notice: Notice,
    pub annotations: Annotations,
}

impl Record {
    /// Create a record with only an identifier set.
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            siren: None,
            name: None,
            address: None,
            postal_code: None,
            city: None,
            department: None,
            latitude: None,
            longitude: None,
            activity_code: None,
            activity: None,
            score: None,
            published_on: None,
            created_on: None,
            created_at: None,
            favorite: false,
            notice: Notice::default(),
            annotations: Annotations::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn with_activity_code(mut self, code: impl Into<String>) -> Self {
        self.activity_code = Some(code.into());
        self
    }

    pub fn with_score(mut self, score: i64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_published_on(mut self, date: NaiveDate) -> Self {
        self.published_on = Some(date);
        self
    }

    pub fn with_favorite(mut self, favorite: bool) -> Self {
        self.favorite = favorite;
        self
    }

    /// Score colour band.
    pub fn score_tier(&self) -> ScoreTier {
        ScoreTier::of(self.score)
    }

    /// Coordinates when both are present and finite.
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    /// Convert a remote row into a record, validating it against `schema`.
    ///
    /// Any validation failure is reported as [`Error::MalformedRecord`]
    /// carrying the row id when one could be read.
    pub fn from_row_with(schema: &RowSchema, row: &Value) -> Result<Self> {
        let id = row.get("id").and_then(Value::as_i64);

        schema
            .validate_row(row)
            .map_err(|e| Error::MalformedRecord {
                id,
                reason: e.to_string(),
            })?;

        let id = id.ok_or_else(|| Error::MalformedRecord {
            id: None,
            reason: "id out of range".into(),
        })?;

        Ok(Self {
            id,
            siren: text(row, "entreprise_id"),
            name: text(row, "nom_complet"),
            address: text(row, "social_adresse"),
            postal_code: text(row, "social_code_postal"),
            city: text(row, "social_ville"),
            department: text(row, "departement"),
            latitude: row.get("latitude").and_then(decimal),
            longitude: row.get("longitude").and_then(decimal),
            activity_code: text(row, "activite_principale"),
            activity: text(row, "activite"),
            score: row.get("score").and_then(integer),
            published_on: date_of(row, "dateparution"),
            created_on: date_of(row, "date_creation"),
            created_at: row
                .get("created_at")
                .and_then(Value::as_str)
                .and_then(parse_timestamp),
            favorite: row.get("favori").and_then(Value::as_bool).unwrap_or(false),
            notice: Notice {
                number: text(row, "numeroannonce"),
                tribunal: text(row, "tribunal"),
                trader: text(row, "commercant"),
                registry: text(row, "registre"),
                url: text(row, "url_complete"),
                registry_url: text(row, "url_registre"),
            },
            annotations: Annotations {
                positive: text(row, "positif"),
                negative: text(row, "negatif"),
                finances: text(row, "finances"),
                headcount: text(row, "effectif"),
                director: text(row, "dirigeant"),
                mail: text(row, "courrier"),
                liquidator_contact: text(row, "coordonnees_mandataire"),
            },
        })
    }

    /// Convert a remote row using the notice table schema.
    pub fn from_row(row: &Value) -> Result<Self> {
        Self::from_row_with(&RowSchema::entreprise(), row)
    }

    /// Render the record back into the remote row shape.
    pub fn to_row(&self) -> Value {
        let mut row = Map::new();
        row.insert("id".into(), json!(self.id));
        row.insert("favori".into(), json!(self.favorite));

        let columns: [(&str, &Option<String>); 21] = [
            ("entreprise_id", &self.siren),
            ("nom_complet", &self.name),
            ("social_adresse", &self.address),
            ("social_code_postal", &self.postal_code),
            ("social_ville", &self.city),
            ("departement", &self.department),
            ("activite_principale", &self.activity_code),
            ("activite", &self.activity),
            ("numeroannonce", &self.notice.number),
            ("tribunal", &self.notice.tribunal),
            ("commercant", &self.notice.trader),
            ("registre", &self.notice.registry),
            ("url_complete", &self.notice.url),
            ("url_registre", &self.notice.registry_url),
            ("positif", &self.annotations.positive),
            ("negatif", &self.annotations.negative),
            ("finances", &self.annotations.finances),
            ("effectif", &self.annotations.headcount),
            ("dirigeant", &self.annotations.director),
            ("courrier", &self.annotations.mail),
            ("coordonnees_mandataire", &self.annotations.liquidator_contact),
        ];
        for (column, value) in columns {
            row.insert(column.into(), json!(value));
        }

        row.insert("score".into(), json!(self.score.map(|s| s.to_string())));
        row.insert(
            "latitude".into(),
            json!(self.latitude.map(|v| v.to_string())),
        );
        row.insert(
            "longitude".into(),
            json!(self.longitude.map(|v| v.to_string())),
        );
        row.insert(
            "dateparution".into(),
            json!(self.published_on.map(|d| d.to_string())),
        );
        row.insert(
            "date_creation".into(),
            json!(self.created_on.map(|d| d.to_string())),
        );
        row.insert(
            "created_at".into(),
            json!(self.created_at.map(|t| t.to_rfc3339())),
        );

        Value::Object(row)
    }
}

/// Convert a batch of rows, dropping malformed ones with a warning.
pub fn ingest_rows<I>(schema: &RowSchema, rows: I) -> Vec<Record>
where
    I: IntoIterator<Item = Value>,
{
    rows.into_iter()
        .filter_map(|row| match Record::from_row_with(schema, &row) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed record");
                None
            }
        })
        .collect()
}

fn text(row: &Value, column: &str) -> Option<String> {
    row.get(column)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn date_of(row: &Value, column: &str) -> Option<NaiveDate> {
    row.get(column).and_then(Value::as_str).and_then(parse_date)
}

/// Read an integer score from a number or from the leading digits of a string.
///
/// `"8"` and `"7.5"` yield 8 and 7, `"abc"` yields `None`.
pub fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => parse_int_prefix(s),
        _ => None,
    }
}

/// Parse the optional sign and leading digits of a string.
pub fn parse_int_prefix(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let magnitude: i64 = digits[..end].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Read a finite decimal from a number or a string.
pub fn decimal(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// Parse a calendar date from `YYYY-MM-DD` or a timestamp string.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(s).map(|t| t.date_naive()))
        .or_else(|| s.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

/// Parse an RFC 3339 or PostgreSQL-rendered timestamp.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|t| t.with_timezone(&Utc))
        .ok()
}
