//! Signed meter messages
//!
//! A [`MeterMessage`] is the transport form of a [`Sample`]. Each message
//! carries an HMAC-SHA256 signature keyed by a secret shared with the
//! consumer. The signature covers every field but itself, fed key by key in
//! sorted order with nested mappings flattened to `parent:child` keys.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::{Error, MeterType, Sample, sample::isoformat};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_FIELD: &str = "message_signature";
const NESTED_SEPARATOR: char = ':';

/// Transport record of one [`Sample`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterMessage {
    /// Origin tag
    pub source: String,
    /// Meter name
    pub counter_name: String,
    /// Meter type
    pub counter_type: MeterType,
    /// Measurement unit
    pub counter_unit: Option<String>,
    /// The measured value
    pub counter_volume: f64,
    /// Owning user
    pub user_id: Option<String>,
    /// Owning project
    pub project_id: Option<String>,
    /// Measured resource
    pub resource_id: String,
    /// ISO-8601 measurement time
    pub timestamp: String,
    /// Free-form resource attributes
    pub resource_metadata: BTreeMap<String, String>,
    /// Unique identifier of the originating sample
    pub message_id: String,
    /// Never populated by synthetic samples
    pub monotonic_time: Option<u64>,
    /// Hex HMAC-SHA256 over the other fields
    pub message_signature: String,
}

impl MeterMessage {
    /// Convert `sample` into a signed message.
    ///
    /// # Errors
    ///
    /// Function will error if the message cannot be encoded for signing.
    pub fn from_sample(sample: &Sample, secret: &str) -> Result<Self, Error> {
        let mut message = Self {
            source: sample.source.clone(),
            counter_name: sample.name.clone(),
            counter_type: sample.meter_type,
            counter_unit: sample.unit.clone(),
            counter_volume: sample.volume,
            user_id: sample.user_id.clone(),
            project_id: sample.project_id.clone(),
            resource_id: sample.resource_id.clone(),
            timestamp: isoformat(&sample.timestamp),
            resource_metadata: sample.resource_metadata.clone(),
            message_id: sample.id.clone(),
            monotonic_time: None,
            message_signature: String::new(),
        };
        message.message_signature = compute_signature(&serde_json::to_value(&message)?, secret)?;
        Ok(message)
    }

    /// Check the carried signature against `secret`.
    ///
    /// # Errors
    ///
    /// Function will error if the message cannot be encoded for signing.
    pub fn verify(&self, secret: &str) -> Result<bool, Error> {
        if secret.is_empty() {
            return Ok(true);
        }
        let expected = compute_signature(&serde_json::to_value(self)?, secret)?;
        Ok(expected == self.message_signature)
    }
}

/// Compute the hex signature of a json object, ignoring any existing
/// `message_signature` member.
///
/// An empty `secret` disables signing: the signature is the empty string and
/// [`MeterMessage::verify`] accepts any message.
///
/// # Errors
///
/// Function will error if the key is rejected by the MAC.
pub fn compute_signature(message: &Value, secret: &str) -> Result<String, Error> {
    if secret.is_empty() {
        return Ok(String::new());
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    let mut pairs = Vec::new();
    flatten(None, message, &mut pairs);
    for (name, value) in pairs {
        if name == SIGNATURE_FIELD {
            continue;
        }
        mac.update(name.as_bytes());
        mac.update(value.as_bytes());
    }
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Collect `(key, text)` pairs of `value` in key order. Objects nest under
/// `parent:child`; anything else is a leaf.
fn flatten(prefix: Option<&str>, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                let name = match prefix {
                    Some(p) => format!("{p}{NESTED_SEPARATOR}{key}"),
                    None => key.clone(),
                };
                flatten(Some(&name), &map[key], out);
            }
        }
        leaf => {
            if let Some(name) = prefix {
                out.push((name.to_string(), text(leaf)));
            }
        }
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => real_text(f),
            _ => n.to_string(),
        },
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Shortest round-trip text of a real. Whole numbers keep a `.0` so `5` and
/// `5.0` sign differently. Decimal exponents below -4 or from 16 up switch to
/// `1e+16` / `1e-05` notation.
fn real_text(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let scientific = format!("{f:e}");
    let (mantissa, exponent) = scientific
        .split_once('e')
        .and_then(|(m, e)| e.parse::<i32>().ok().map(|e| (m, e)))
        .unwrap_or((scientific.as_str(), 0));
    if exponent < -4 || exponent >= 16 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
    } else if f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;
    use crate::sequence::default_resource_metadata;

    const SECRET: &str = "change this for valid signing";

    fn sample() -> Sample {
        Sample {
            id: "0b5f2d2e-6a0c-4c0b-9d3e-4f0c1c3a9a11".to_string(),
            name: "cpu_util".to_string(),
            meter_type: MeterType::Gauge,
            unit: Some("%".to_string()),
            volume: 5.0,
            user_id: Some("user".to_string()),
            project_id: None,
            resource_id: "resource".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            resource_metadata: default_resource_metadata(),
            source: "artificial".to_string(),
        }
    }

    #[test]
    fn message_carries_sample_fields() {
        let msg = MeterMessage::from_sample(&sample(), SECRET).unwrap();
        assert_eq!(msg.counter_name, "cpu_util");
        assert_eq!(msg.counter_type, MeterType::Gauge);
        assert_eq!(msg.timestamp, "2024-01-01T00:00:00");
        assert_eq!(msg.message_id, "0b5f2d2e-6a0c-4c0b-9d3e-4f0c1c3a9a11");
        assert_eq!(msg.monotonic_time, None);
        assert_eq!(msg.message_signature.len(), 64);
    }

    #[test]
    fn signature_verifies() {
        let msg = MeterMessage::from_sample(&sample(), SECRET).unwrap();
        assert!(msg.verify(SECRET).unwrap());
        assert!(!msg.verify("another secret").unwrap());
    }

    #[test]
    fn signature_covers_fields() {
        let mut msg = MeterMessage::from_sample(&sample(), SECRET).unwrap();
        msg.counter_volume = 6.0;
        assert!(!msg.verify(SECRET).unwrap());

        let mut msg = MeterMessage::from_sample(&sample(), SECRET).unwrap();
        msg.resource_metadata
            .insert("host".to_string(), "elsewhere".to_string());
        assert!(!msg.verify(SECRET).unwrap());
    }

    #[test]
    fn signature_ignores_existing_signature() {
        let a = json!({"a": 1, "message_signature": "x"});
        let b = json!({"a": 1, "message_signature": "y"});
        assert_eq!(
            compute_signature(&a, SECRET).unwrap(),
            compute_signature(&b, SECRET).unwrap()
        );
    }

    #[test]
    fn empty_secret_disables_signing() {
        let mut msg = MeterMessage::from_sample(&sample(), "").unwrap();
        assert_eq!(msg.message_signature, "");
        assert!(msg.verify("").unwrap());
        msg.counter_volume = 6.0;
        msg.message_signature = "anything".to_string();
        assert!(msg.verify("").unwrap());
        assert!(!msg.verify(SECRET).unwrap());
    }

    #[test]
    fn reals_render_like_repr() {
        assert_eq!(real_text(5.0), "5.0");
        assert_eq!(real_text(-0.0), "-0.0");
        assert_eq!(real_text(0.1), "0.1");
        assert_eq!(real_text(0.0001), "0.0001");
        assert_eq!(real_text(1e-5), "1e-05");
        assert_eq!(real_text(1.5e-7), "1.5e-07");
        assert_eq!(real_text(123_456.789), "123456.789");
        assert_eq!(real_text(1e15), "1000000000000000.0");
        assert_eq!(real_text(1e16), "1e+16");
        assert_eq!(real_text(2.5e20), "2.5e+20");
        assert_eq!(real_text(-1e300), "-1e+300");
        assert_eq!(real_text(f64::INFINITY), "inf");
    }

    #[test]
    fn nested_keys_are_flattened_in_order() {
        let mut pairs = Vec::new();
        flatten(
            None,
            &json!({"b": {"y": 1, "x": null}, "a": 2.0, "c": true}),
            &mut pairs,
        );
        assert_eq!(
            pairs,
            [
                ("a".to_string(), "2.0".to_string()),
                ("b:x".to_string(), "None".to_string()),
                ("b:y".to_string(), "1".to_string()),
                ("c".to_string(), "True".to_string()),
            ]
        );
    }
}
