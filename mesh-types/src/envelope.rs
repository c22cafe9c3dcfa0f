//! Envelope - the JSON frame exchanged with the controller in both directions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{NodeId, WireError};

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The outer frame of every message.
///
/// `type` selects the payload shape of `data`. `nodeId` addresses a mesh node
/// other than the directly attached controller; when absent the message is
/// about the local controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Type-specific payload.
    #[serde(default)]
    pub data: Value,
    /// Sender's clock (unix millis) - informational only, not trusted.
    #[serde(default)]
    pub timestamp: u64,
    /// Mesh node the message concerns.
    #[serde(rename = "nodeId", default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}

impl Envelope {
    /// Create an envelope stamped with the current time.
    pub fn new(msg_type: impl Into<String>, data: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
            timestamp: now_millis(),
            node_id: None,
        }
    }

    /// Address the envelope to a mesh node.
    pub fn with_node(mut self, node_id: Option<NodeId>) -> Self {
        self.node_id = node_id;
        self
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Serialization)
    }

    /// Decode a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        serde_json::from_str(text).map_err(WireError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_uses_wire_field_names() {
        let env = Envelope::new("heartbeat", Value::Null).with_node(Some(NodeId::new("node_2")));
        let json: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "heartbeat");
        assert_eq!(json["nodeId"], "node_2");
        assert!(json["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn node_id_omitted_for_local_messages() {
        let env = Envelope::new("scan_network", Value::Null);
        let text = env.to_json().unwrap();
        assert!(!text.contains("nodeId"));
    }

    #[test]
    fn missing_data_and_timestamp_default() {
        let env = Envelope::from_json(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(env.msg_type, "heartbeat");
        assert_eq!(env.data, Value::Null);
        assert_eq!(env.timestamp, 0);
        assert!(env.node_id.is_none());
    }

    #[test]
    fn malformed_frame_is_rejected() {
        let result = Envelope::from_json("{not json");
        assert!(matches!(result, Err(WireError::Deserialization(_))));

        let result = Envelope::from_json(&json!({"data": 1}).to_string());
        assert!(matches!(result, Err(WireError::Deserialization(_))));
    }
}
