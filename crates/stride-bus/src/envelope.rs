use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// CloudEvents-style envelope. The body is always JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: String,
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    pub data: Value,
}

impl CloudEvent {
    pub fn new<T: Serialize>(
        source: impl Into<String>,
        event_type: impl Into<String>,
        data: &T,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            specversion: "1.0".to_string(),
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            event_type: event_type.into(),
            time: Utc::now(),
            datacontenttype: "application/json".to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Serialized size of the whole envelope in bytes.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn envelope_roundtrip() {
        let mut body = HashMap::new();
        body.insert("user_id".to_string(), "u1".to_string());
        let event = CloudEvent::new("stride.ingress", "activity.raw", &body).unwrap();
        assert_eq!(event.specversion, "1.0");
        assert_eq!(event.datacontenttype, "application/json");
        let decoded: HashMap<String, String> = event.decode().unwrap();
        assert_eq!(decoded.get("user_id").map(String::as_str), Some("u1"));
    }

    #[test]
    fn each_envelope_gets_a_fresh_id() {
        let a = CloudEvent::new("s", "t", &1).unwrap();
        let b = CloudEvent::new("s", "t", &1).unwrap();
        assert_ne!(a.id, b.id);
    }
}
