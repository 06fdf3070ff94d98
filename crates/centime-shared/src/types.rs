use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named partition of funds. All amounts are signed integer cents.
///
/// `balance`, `target` and `month_target` are projections: each is the sum
/// of the corresponding deltas over every event merged for this envelope.
/// `month_delta` is derived on read (sum of balance deltas dated within the
/// current calendar month) and never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub id: Uuid,
    /// Empty while the row only exists because an event referenced it.
    pub name: String,
    pub balance: i64,
    pub target: i64,
    pub month_target: i64,
    pub month_delta: i64,
    pub deleted: bool,
}

impl Envelope {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// An immutable ledger entry carrying *deltas* to one envelope.
///
/// `event_id` is the idempotency key: merging the same event twice on the
/// same peer is a no-op. The numeric fields are additive, so projections
/// converge regardless of merge order. `date` is assigned by the first peer
/// to merge the event and never modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: Uuid,
    /// May name an envelope no peer has materialized yet.
    pub envelope_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// New envelope name, or empty to leave the name unchanged.
    #[serde(default)]
    pub name: String,
    pub balance: i64,
    pub target: i64,
    pub month_target: i64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub comment: String,
}

impl Event {
    /// A fresh zero event against the given envelope.
    pub fn for_envelope(envelope_id: Uuid) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            envelope_id,
            date: None,
            name: String::new(),
            balance: 0,
            target: 0,
            month_target: 0,
            deleted: false,
            comment: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_round_trip() {
        let event = Event {
            event_id: Uuid::new_v4(),
            envelope_id: Uuid::new_v4(),
            date: Some(Utc::now()),
            name: "Rent".to_string(),
            balance: -4200,
            target: 100_000,
            month_target: 80_000,
            deleted: false,
            comment: "monthly".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        let restored: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn event_json_field_names_are_camel_case() {
        let event = Event::for_envelope(Uuid::new_v4());
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("\"eventId\""));
        assert!(json.contains("\"envelopeId\""));
        assert!(json.contains("\"monthTarget\""));
        // A dateless event serializes without the field entirely.
        assert!(!json.contains("\"date\""));
    }

    #[test]
    fn dateless_event_deserializes() {
        let json = r#"{
            "eventId": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "envelopeId": "00000000-0000-0000-0000-000000000001",
            "balance": 1000,
            "target": 0,
            "monthTarget": 0
        }"#;

        let event: Event = serde_json::from_str(json).unwrap();
        assert!(event.date.is_none());
        assert!(event.name.is_empty());
        assert_eq!(event.balance, 1000);
        assert!(!event.deleted);
    }
}
