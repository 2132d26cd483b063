//! Row schema and validation.
//!
//! Rows arrive from the remote store as loosely-typed JSON objects. The row
//! schema describes which columns must be present and which JSON kinds each
//! column may carry, so a row can be rejected before it is converted into a
//! [`Record`](crate::Record).

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the remote table holding liquidation notices.
pub const DEFAULT_TABLE: &str = "entreprise";

/// Column kinds accepted in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Integral JSON number
    Integer,
    /// JSON string
    Text,
    /// JSON number or a string holding one
    Numeric,
    /// JSON string holding a date or timestamp
    Date,
    Bool,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Integer => write!(f, "Integer"),
            FieldKind::Text => write!(f, "Text"),
            FieldKind::Numeric => write!(f, "Numeric"),
            FieldKind::Date => write!(f, "Date"),
            FieldKind::Bool => write!(f, "Bool"),
            FieldKind::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a column in a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Column name as stored remotely
    pub name: String,
    /// Accepted JSON kind
    pub kind: FieldKind,
    /// Whether the column must be present and non-null
    pub required: bool,
}

impl FieldDef {
    /// Create a required column definition.
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    /// Create an optional column definition.
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }

    /// Validate a JSON value against this column definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None | Some(Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            None | Some(Value::Null) => Ok(()),
            Some(v) => self.validate_kind(v),
        }
    }

    fn validate_kind(&self, value: &Value) -> Result<()> {
        let valid = match self.kind {
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Text => value.is_string(),
            FieldKind::Numeric => value.is_number() || value.is_string(),
            FieldKind::Date => value.is_string(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.kind.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Integer",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Schema for a remote table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSchema {
    /// Table name
    pub table: String,
    /// Column definitions
    pub fields: Vec<FieldDef>,
}

impl RowSchema {
    /// Create a new row schema.
    pub fn new(table: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            table: table.into(),
            fields,
        }
    }

    /// The schema of the liquidation notice table.
    pub fn entreprise() -> Self {
        use FieldKind::*;

        let mut fields = vec![
            FieldDef::required("id", Integer),
            FieldDef::optional("score", Numeric),
            FieldDef::optional("latitude", Numeric),
            FieldDef::optional("longitude", Numeric),
            FieldDef::optional("dateparution", Date),
            FieldDef::optional("date_creation", Date),
            FieldDef::optional("created_at", Date),
            FieldDef::optional("favori", Bool),
            FieldDef::optional("location", Json),
        ];
        fields.extend(
            [
                "entreprise_id",
                "nom_complet",
                "social_adresse",
                "social_code_postal",
                "social_ville",
                "departement",
                "activite_principale",
                "activite",
                "positif",
                "negatif",
                "finances",
                "tribunal",
                "numeroannonce",
                "commercant",
                "registre",
                "url_complete",
                "url_registre",
                "effectif",
                "dirigeant",
                "courrier",
                "coordonnees_mandataire",
            ]
            .into_iter()
            .map(|name| FieldDef::optional(name, Text)),
        );

        Self::new(DEFAULT_TABLE, fields)
    }

    /// Validate a row against this schema.
    ///
    /// Columns not named by the schema are ignored.
    pub fn validate_row(&self, row: &Value) -> Result<()> {
        let obj = row
            .as_object()
            .ok_or_else(|| Error::TypeMismatch {
                field: "<row>".into(),
                expected: "Object".into(),
                got: json_type_name(row).into(),
            })?;

        for field in &self.fields {
            field.validate(obj.get(&field.name))?;
        }

        Ok(())
    }

    /// Look up a column definition.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl Default for RowSchema {
    fn default() -> Self {
        Self::entreprise()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_field_missing() {
        let field = FieldDef::required("id", FieldKind::Integer);
        assert!(matches!(
            field.validate(None),
            Err(Error::MissingRequiredField(name)) if name == "id"
        ));
        assert!(matches!(
            field.validate(Some(&Value::Null)),
            Err(Error::MissingRequiredField(_))
        ));
    }

    #[test]
    fn optional_field_accepts_null() {
        let field = FieldDef::optional("score", FieldKind::Numeric);
        assert!(field.validate(None).is_ok());
        assert!(field.validate(Some(&Value::Null)).is_ok());
    }

    #[test]
    fn numeric_accepts_numbers_and_text() {
        let field = FieldDef::optional("score", FieldKind::Numeric);
        assert!(field.validate(Some(&json!(8))).is_ok());
        assert!(field.validate(Some(&json!(7.5))).is_ok());
        assert!(field.validate(Some(&json!("8"))).is_ok());
        assert!(field.validate(Some(&json!(true))).is_err());
    }

    #[test]
    fn type_mismatch_reports_kinds() {
        let field = FieldDef::optional("favori", FieldKind::Bool);
        let err = field.validate(Some(&json!("yes"))).unwrap_err();
        assert_eq!(
            err,
            Error::TypeMismatch {
                field: "favori".into(),
                expected: "Bool".into(),
                got: "String".into(),
            }
        );
    }

    #[test]
    fn entreprise_schema_validates_rows() {
        let schema = RowSchema::entreprise();
        assert_eq!(schema.table, "entreprise");

        let row = json!({
            "id": 1,
            "nom_complet": "ACME SARL",
            "score": "8",
            "latitude": "48.85",
            "longitude": 2.35,
            "favori": false,
            "unknown_column": [1, 2, 3]
        });
        assert!(schema.validate_row(&row).is_ok());

        assert!(schema.validate_row(&json!({"nom_complet": "x"})).is_err());
        assert!(schema.validate_row(&json!({"id": "1"})).is_err());
        assert!(schema.validate_row(&json!([1])).is_err());
    }

    #[test]
    fn field_lookup() {
        let schema = RowSchema::entreprise();
        assert_eq!(
            schema.field("favori").map(|f| f.kind),
            Some(FieldKind::Bool)
        );
        assert!(schema.field("nope").is_none());
    }
}
