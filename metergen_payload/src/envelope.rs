//! Message-bus envelopes
//!
//! An [`Envelope`] wraps a payload in notification metadata. Serialization
//! stamps a `_unique_id`, packs the caller's context as `_context_<key>`
//! members and nests the json-encoded message inside a versioned [`Wire`]
//! record.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::Error;

/// Priority stamped on every sample envelope
pub const PRIORITY: &str = "SAMPLE";
/// Version of the [`Wire`] encoding
pub const WIRE_VERSION: &str = "2.0";

const CONTEXT_PREFIX: &str = "_context_";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Notification metadata around a payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope<P> {
    /// Unique identifier of this envelope
    pub message_id: String,
    /// Who published the payload
    pub publisher_id: String,
    /// UTC creation time with microseconds
    pub timestamp: String,
    /// Message priority
    pub priority: String,
    /// Kind of event carried
    pub event_type: String,
    /// The wrapped data
    pub payload: P,
}

/// Versioned transport record, the outermost layer of a serialized envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wire {
    /// Encoding version
    #[serde(rename = "oslo.version")]
    pub version: String,
    /// The json-encoded envelope
    #[serde(rename = "oslo.message")]
    pub message: String,
}

/// An [`Envelope`] as it is encoded inside [`Wire::message`]
#[derive(Serialize)]
struct Stamped<'a, P> {
    #[serde(flatten)]
    envelope: &'a Envelope<P>,
    #[serde(rename = "_unique_id")]
    unique_id: String,
    #[serde(flatten)]
    context: BTreeMap<String, &'a Value>,
}

impl<P> Envelope<P>
where
    P: Serialize,
{
    /// Create a new instance of [`Envelope`] stamped with a fresh message id
    /// and the current time.
    pub fn new(publisher_id: impl Into<String>, event_type: impl Into<String>, payload: P) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            publisher_id: publisher_id.into(),
            timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
            priority: PRIORITY.to_string(),
            event_type: event_type.into(),
            payload,
        }
    }

    /// Encode this envelope for the message bus.
    ///
    /// # Errors
    ///
    /// Function will error if the payload cannot be encoded as json.
    pub fn serialize(&self, context: &BTreeMap<String, Value>) -> Result<Wire, Error> {
        let stamped = Stamped {
            envelope: self,
            unique_id: Uuid::new_v4().simple().to_string(),
            context: context
                .iter()
                .map(|(key, value)| (format!("{CONTEXT_PREFIX}{key}"), value))
                .collect(),
        };
        Ok(Wire {
            version: WIRE_VERSION.to_string(),
            message: serde_json::to_string(&stamped)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_is_stamped() {
        let env = Envelope::new("ceilometer.polling", "telemetry.polling", json!([]));
        assert_eq!(env.priority, "SAMPLE");
        assert!(Uuid::parse_str(&env.message_id).is_ok());
        assert!(NaiveDateTime::parse_from_str(&env.timestamp, TIMESTAMP_FORMAT).is_ok());
        assert_eq!(env.timestamp.rsplit('.').next().map(str::len), Some(6));
    }

    #[test]
    fn serialize_nests_message_with_unique_id_and_context() {
        let env = Envelope::new("pub", "metering", vec![1, 2, 3]);
        let mut context = BTreeMap::new();
        context.insert("user".to_string(), json!("alice"));
        let wire = env.serialize(&context).unwrap();
        assert_eq!(wire.version, "2.0");

        let inner: Value = serde_json::from_str(&wire.message).unwrap();
        assert_eq!(inner["payload"], json!([1, 2, 3]));
        assert_eq!(inner["event_type"], "metering");
        assert_eq!(inner["publisher_id"], "pub");
        assert_eq!(inner["_context_user"], "alice");
        let unique = inner["_unique_id"].as_str().unwrap();
        assert_eq!(unique.len(), 32);
        assert!(unique.chars().all(|c| c.is_ascii_hexdigit()));

        let outer = serde_json::to_value(&wire).unwrap();
        assert!(outer.get("oslo.version").is_some());
        assert!(outer.get("oslo.message").is_some());
    }

    #[test]
    fn empty_context_adds_no_members() {
        let env = Envelope::new("pub", "metering", json!({"samples": []}));
        let wire = env.serialize(&BTreeMap::new()).unwrap();
        let inner: Value = serde_json::from_str(&wire.message).unwrap();
        let keys: Vec<&String> = inner.as_object().unwrap().keys().collect();
        assert!(!keys.iter().any(|k| k.starts_with(CONTEXT_PREFIX)));
    }

    #[test]
    fn each_serialization_gets_a_new_unique_id() {
        let env = Envelope::new("pub", "metering", json!(null));
        let a: Value = serde_json::from_str(&env.serialize(&BTreeMap::new()).unwrap().message).unwrap();
        let b: Value = serde_json::from_str(&env.serialize(&BTreeMap::new()).unwrap().message).unwrap();
        assert_ne!(a["_unique_id"], b["_unique_id"]);
        assert_eq!(a["message_id"], b["message_id"]);
    }
}
