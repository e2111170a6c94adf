//! JSON payload construction for the `send` command.

use anyhow::{bail, Context, Result};
use apns_wire::MAX_PAYLOAD_SIZE;
use serde::Serialize;
use serde_json::{Map, Value};

/// The `aps` dictionary
#[derive(Debug, Default, Clone, Serialize)]
struct Aps {
    #[serde(skip_serializing_if = "Option::is_none")]
    alert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<String>,
    #[serde(rename = "content-available", skip_serializing_if = "Option::is_none")]
    content_available: Option<u8>,
}

/// Notification payload: the `aps` dictionary plus custom top-level keys
#[derive(Debug, Default, Clone, Serialize)]
pub struct Payload {
    aps: Aps,
    #[serde(flatten)]
    custom: Map<String, Value>,
}

impl Payload {
    /// Empty payload
    pub fn new() -> Self {
        Self::default()
    }

    /// Alert text
    pub fn alert(mut self, alert: Option<String>) -> Self {
        self.aps.alert = alert;
        self
    }

    /// Badge number
    pub fn badge(mut self, badge: Option<u32>) -> Self {
        self.aps.badge = badge;
        self
    }

    /// Sound name
    pub fn sound(mut self, sound: Option<String>) -> Self {
        self.aps.sound = sound;
        self
    }

    /// Mark as a background update
    pub fn content_available(mut self, yes: bool) -> Self {
        self.aps.content_available = yes.then_some(1);
        self
    }

    /// Add a custom top-level key
    pub fn custom(mut self, key: &str, value: Value) -> Self {
        self.custom.insert(key.to_string(), value);
        self
    }

    /// Serialize, rejecting payloads the gateway would refuse
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self).context("failed to serialize payload")?;
        check_size(&bytes)?;
        Ok(bytes)
    }
}

/// Validate a caller-provided JSON document and return it compacted
pub fn from_raw_json(raw: &str) -> Result<Vec<u8>> {
    let value: Value = serde_json::from_str(raw).context("payload is not valid JSON")?;
    if !value.is_object() {
        bail!("payload must be a JSON object");
    }
    let bytes = serde_json::to_vec(&value).context("failed to serialize payload")?;
    check_size(&bytes)?;
    Ok(bytes)
}

/// Parse a `key=value` custom key. The value is JSON when it parses as JSON and a
/// plain string otherwise.
pub fn parse_custom(arg: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = arg.split_once('=') else {
        bail!("custom key {:?} is not of the form key=value", arg);
    };
    if key.is_empty() {
        bail!("custom key {:?} has an empty name", arg);
    }
    if key == "aps" {
        bail!("the aps dictionary cannot be set as a custom key");
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn check_size(bytes: &[u8]) -> Result<()> {
    if bytes.len() > MAX_PAYLOAD_SIZE {
        bail!(
            "payload is {} bytes, the gateway accepts at most {}",
            bytes.len(),
            MAX_PAYLOAD_SIZE
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_alert_payload() {
        let bytes = Payload::new()
            .alert(Some("Hello".to_string()))
            .badge(Some(3))
            .sound(Some("default".to_string()))
            .to_bytes()
            .unwrap();

        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({"aps": {"alert": "Hello", "badge": 3, "sound": "default"}})
        );
    }

    #[test]
    fn test_background_payload_with_custom_keys() {
        let bytes = Payload::new()
            .content_available(true)
            .custom("order", json!(42))
            .to_bytes()
            .unwrap();

        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"aps": {"content-available": 1}, "order": 42}));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = Payload::new().alert(Some("x".repeat(MAX_PAYLOAD_SIZE)));
        assert!(payload.to_bytes().is_err());
    }

    #[test]
    fn test_parse_custom() {
        assert_eq!(parse_custom("order=42").unwrap(), ("order".to_string(), json!(42)));
        assert_eq!(
            parse_custom("ids=[1,2]").unwrap(),
            ("ids".to_string(), json!([1, 2]))
        );
        assert_eq!(
            parse_custom("room=lobby").unwrap(),
            ("room".to_string(), json!("lobby"))
        );
        assert_eq!(
            parse_custom("url=https://x/?a=b").unwrap(),
            ("url".to_string(), json!("https://x/?a=b"))
        );

        assert!(parse_custom("order").is_err());
        assert!(parse_custom("=1").is_err());
        assert!(parse_custom("aps={}").is_err());
    }

    #[test]
    fn test_raw_json() {
        let bytes = from_raw_json(r#"{ "aps": { "alert": "Hi" } }"#).unwrap();
        assert_eq!(bytes, br#"{"aps":{"alert":"Hi"}}"#);

        assert!(from_raw_json("[1, 2]").is_err());
        assert!(from_raw_json("{not json").is_err());
    }
}
