//! Change events delivered by the remote feed.

use crate::{error::Result, schema::RowSchema, Error, Record, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A remote-origin change to the record collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "record", rename_all = "lowercase")]
pub enum ChangeEvent {
    Inserted(Record),
    Updated(Record),
    Deleted(RecordId),
}

impl ChangeEvent {
    /// Identifier of the affected record.
    pub fn record_id(&self) -> RecordId {
        match self {
            ChangeEvent::Inserted(r) | ChangeEvent::Updated(r) => r.id,
            ChangeEvent::Deleted(id) => *id,
        }
    }
}

/// A raw message from a change feed subscription, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum FeedMessage {
    /// A row was inserted; carries the new row
    Insert { record: Value },
    /// A row was updated; carries the new row
    Update { record: Value },
    /// A row was deleted; carries at least the old row's id
    Delete { old_record: Value },
    /// The subscription's connection dropped
    #[serde(skip)]
    Lost(String),
}

impl FeedMessage {
    /// Validate the message into a change event.
    ///
    /// Returns `Ok(None)` for [`FeedMessage::Lost`], which carries no change.
    pub fn into_event(self, schema: &RowSchema) -> Result<Option<ChangeEvent>> {
        match self {
            FeedMessage::Insert { record } => {
                Record::from_row_with(schema, &record).map(|r| Some(ChangeEvent::Inserted(r)))
            }
            FeedMessage::Update { record } => {
                Record::from_row_with(schema, &record).map(|r| Some(ChangeEvent::Updated(r)))
            }
            FeedMessage::Delete { old_record } => old_record
                .get("id")
                .and_then(Value::as_i64)
                .map(|id| Some(ChangeEvent::Deleted(id)))
                .ok_or_else(|| Error::MalformedRecord {
                    id: None,
                    reason: "delete notification without id".into(),
                }),
            FeedMessage::Lost(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_notification_payloads() {
        let msg: FeedMessage = serde_json::from_value(json!({
            "type": "INSERT",
            "record": {"id": 5, "nom_complet": "X"}
        }))
        .unwrap();
        let event = msg.into_event(&RowSchema::entreprise()).unwrap().unwrap();
        assert!(matches!(event, ChangeEvent::Inserted(ref r) if r.id == 5));

        let msg: FeedMessage = serde_json::from_value(json!({
            "type": "DELETE",
            "old_record": {"id": 9}
        }))
        .unwrap();
        let event = msg.into_event(&RowSchema::entreprise()).unwrap().unwrap();
        assert_eq!(event, ChangeEvent::Deleted(9));
        assert_eq!(event.record_id(), 9);
    }

    #[test]
    fn delete_without_id_is_malformed() {
        let msg = FeedMessage::Delete {
            old_record: json!({}),
        };
        assert!(matches!(
            msg.into_event(&RowSchema::entreprise()),
            Err(Error::MalformedRecord { .. })
        ));
    }

    #[test]
    fn lost_carries_no_event() {
        let msg = FeedMessage::Lost("closed".into());
        assert_eq!(msg.into_event(&RowSchema::entreprise()).unwrap(), None);
    }
}
