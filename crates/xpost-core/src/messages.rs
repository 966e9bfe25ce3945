//! Wire envelope exchanged between windows.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::unique_id;

/// Reserved message names used by the protocol itself.
pub mod names {
    /// Handshake used to learn a peer's origin.
    pub const HELLO: &str = "xpost_hello";
    /// Invoke a function reference registered with the receiver.
    pub const METHOD: &str = "xpost_method";
    /// Ask the parent window to install a forwarding proxy for a tunnel.
    pub const OPEN_TUNNEL: &str = "xpost_open_tunnel";
}

/// Envelope type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgType {
    Request,
    Ack,
    Response,
}

/// Outcome carried by a response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Error,
}

/// The unit exchanged between windows.
///
/// `hash` correlates acks and responses with the originating request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub origin: String,
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    pub hash: String,
    pub name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, rename = "fireAndForget")]
    pub fire_and_forget: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<AckStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// Build a request with a fresh id and a fresh correlation hash derived from `name`.
    pub fn request(origin: &str, name: &str, data: Value, fire_and_forget: bool) -> Self {
        Self {
            id: unique_id(),
            origin: origin.to_string(),
            msg_type: MsgType::Request,
            hash: format!("{}_{}", name, unique_id()),
            name: name.to_string(),
            data,
            fire_and_forget,
            ack: None,
            error: None,
        }
    }

    /// Acknowledge `request` on behalf of `origin`.
    pub fn ack_for(request: &Envelope, origin: &str) -> Self {
        Self {
            id: unique_id(),
            origin: origin.to_string(),
            msg_type: MsgType::Ack,
            hash: request.hash.clone(),
            name: request.name.clone(),
            data: Value::Null,
            fire_and_forget: false,
            ack: None,
            error: None,
        }
    }

    /// Answer `request`, successfully or with an error message.
    pub fn response_for(request: &Envelope, origin: &str, result: Result<Value, String>) -> Self {
        let (ack, data, error) = match result {
            Ok(data) => (AckStatus::Success, data, None),
            Err(message) => (AckStatus::Error, Value::Null, Some(message)),
        };
        Self {
            id: unique_id(),
            origin: origin.to_string(),
            msg_type: MsgType::Response,
            hash: request.hash.clone(),
            name: request.name.clone(),
            data,
            fire_and_forget: false,
            ack: Some(ack),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_hash_is_prefixed_by_name_and_unique() {
        let a = Envelope::request("https://a.com", "getUser", json!({}), false);
        let b = Envelope::request("https://a.com", "getUser", json!({}), false);
        assert!(a.hash.starts_with("getUser_"));
        assert_ne!(a.hash, b.hash);
        assert_ne!(a.id, b.id);
        assert_eq!(a.msg_type, MsgType::Request);
    }

    #[test]
    fn json_shape_uses_wire_field_names() {
        let env = Envelope::request("https://a.com", "ping", json!({"x": 1}), true);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "request");
        assert_eq!(v["fireAndForget"], true);
        assert!(v.get("ack").is_none());
    }

    #[test]
    fn error_response_keeps_hash() {
        let req = Envelope::request("https://a.com", "boom", json!(null), false);
        let res = Envelope::response_for(&req, "https://b.com", Err("nope".into()));
        assert_eq!(res.hash, req.hash);
        assert_eq!(res.ack, Some(AckStatus::Error));
        assert_eq!(res.error.as_deref(), Some("nope"));
        assert_eq!(res.origin, "https://b.com");
    }
}
