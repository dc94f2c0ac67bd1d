use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Trait every domain event implements.
///
/// `event_type` is a stable string, not a reflected type name: the handler registry keys on
/// it and the wire format carries the same value, so routing never depends on Rust's type
/// system surviving (de)serialization.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    fn event_id(&self) -> Uuid;
    fn aggregate_id(&self) -> Uuid;
    fn user_id(&self) -> Uuid;
    fn event_type(&self) -> &'static str;
    fn occurred_at(&self) -> DateTime<Utc>;
    fn version(&self) -> i64;

    /// Serializes the event-specific payload. Implementors derive `Serialize` and delegate here.
    fn payload(&self) -> JsonValue;
}

/// Transport envelope for a domain event, matching the remote-bus wire format (spec §6):
/// a JSON "detail" object carrying the identifying fields at the top level plus the payload,
/// wrapped with `source`, `detail_type`, and `resources` for the bus envelope proper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub source: String,
    pub detail_type: String,
    pub resources: Vec<String>,
    pub detail: EventDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDetail {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub user_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub version: i64,
    #[serde(flatten)]
    pub payload: JsonValue,
}

impl EventEnvelope {
    pub fn from_event(event: &dyn DomainEvent, source: impl Into<String>) -> Self {
        let event_type = event.event_type().to_string();
        let aggregate_id = event.aggregate_id();
        Self {
            source: source.into(),
            detail_type: event_type.clone(),
            resources: vec![aggregate_id.to_string()],
            detail: EventDetail {
                event_id: event.event_id(),
                aggregate_id,
                user_id: event.user_id(),
                event_type,
                occurred_at: event.occurred_at(),
                version: event.version(),
                payload: event.payload(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize)]
    struct TestEvent {
        event_id: Uuid,
        aggregate_id: Uuid,
        user_id: Uuid,
        occurred_at: DateTime<Utc>,
        version: i64,
        note: String,
    }

    impl DomainEvent for TestEvent {
        fn event_id(&self) -> Uuid {
            self.event_id
        }
        fn aggregate_id(&self) -> Uuid {
            self.aggregate_id
        }
        fn user_id(&self) -> Uuid {
            self.user_id
        }
        fn event_type(&self) -> &'static str {
            "test.event"
        }
        fn occurred_at(&self) -> DateTime<Utc> {
            self.occurred_at
        }
        fn version(&self) -> i64 {
            self.version
        }
        fn payload(&self) -> JsonValue {
            serde_json::json!({ "note": self.note })
        }
    }

    #[test]
    fn envelope_carries_identifying_fields_at_top_level() {
        let event = TestEvent {
            event_id: Uuid::new_v4(),
            aggregate_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            version: 1,
            note: "hello".to_string(),
        };

        let envelope = EventEnvelope::from_event(&event, "knowledge-graph.core");
        assert_eq!(envelope.detail_type, "test.event");
        assert_eq!(envelope.resources, vec![event.aggregate_id.to_string()]);
        assert_eq!(envelope.detail.event_id, event.event_id);
        assert_eq!(envelope.detail.version, 1);
        assert_eq!(envelope.detail.payload["note"], "hello");
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let event = TestEvent {
            event_id: Uuid::new_v4(),
            aggregate_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            version: 3,
            note: "round trip".to_string(),
        };

        let envelope = EventEnvelope::from_event(&event, "knowledge-graph.core");
        let json = serde_json::to_string(&envelope).unwrap();
        let restored: EventEnvelope = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.detail.event_id, envelope.detail.event_id);
        assert_eq!(restored.detail.version, envelope.detail.version);
        assert_eq!(restored.detail.payload["note"], "round trip");
    }
}
