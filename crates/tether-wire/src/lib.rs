// Envelope model and JSON codec for the bridge wire protocol.
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fixed keep-alive frame. Sent verbatim, never through the codec.
pub const PING_FRAME: &[u8] = br#"{"type":"ping"}"#;

pub type Result<T> = std::result::Result<T, Error>;

/// Header map carried on an envelope: string keys to arbitrary JSON values.
pub type Headers = Map<String, Value>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("empty address")]
    EmptyAddress,
    #[error("failed to serialize envelope")]
    Serialize(serde_json::Error),
    #[error("failed to deserialize envelope")]
    Deserialize(serde_json::Error),
}

/// Operation carried by a normal-shape envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Send,
    Publish,
    Register,
    Unregister,
}

/// One wire unit, a single JSON object per binary frame.
///
/// Exactly one of the two shapes is populated: a normal message (type,
/// address, optional headers/body/replyAddress) or a server-reported
/// failure (failureCode, failureType, failureMessage). A failure carries
/// no address.
///
/// ```
/// use tether_wire::{Envelope, MessageKind};
///
/// let envelope = Envelope::publish("news", Some("hello".to_string()), None);
/// assert_eq!(envelope.kind(), Some(MessageKind::Publish));
/// assert_eq!(envelope.address(), Some("news"));
/// assert!(!envelope.is_failure());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    #[serde(rename_all = "camelCase")]
    Message {
        #[serde(rename = "type")]
        kind: MessageKind,
        address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<Headers>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_address: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        failure_code: i64,
        failure_type: String,
        failure_message: String,
    },
}

impl Envelope {
    pub fn send(address: impl Into<String>, body: Option<String>, headers: Option<Headers>) -> Self {
        Self::message(MessageKind::Send, address, body, headers)
    }

    // A send expecting a reply routes the response to `reply_address`.
    pub fn send_with_reply(
        address: impl Into<String>,
        body: Option<String>,
        headers: Option<Headers>,
        reply_address: impl Into<String>,
    ) -> Self {
        Self::Message {
            kind: MessageKind::Send,
            address: address.into(),
            headers,
            body,
            reply_address: Some(reply_address.into()),
        }
    }

    pub fn publish(address: impl Into<String>, body: Option<String>, headers: Option<Headers>) -> Self {
        Self::message(MessageKind::Publish, address, body, headers)
    }

    pub fn register(address: impl Into<String>, headers: Option<Headers>) -> Self {
        Self::message(MessageKind::Register, address, None, headers)
    }

    pub fn unregister(address: impl Into<String>, headers: Option<Headers>) -> Self {
        Self::message(MessageKind::Unregister, address, None, headers)
    }

    fn message(
        kind: MessageKind,
        address: impl Into<String>,
        body: Option<String>,
        headers: Option<Headers>,
    ) -> Self {
        Self::Message {
            kind,
            address: address.into(),
            headers,
            body,
            reply_address: None,
        }
    }

    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Self::Message { kind, .. } => Some(*kind),
            Self::Failure { .. } => None,
        }
    }

    /// Routing key for dispatch. Failures carry none and are undeliverable.
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Message { address, .. } => Some(address.as_str()),
            Self::Failure { .. } => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Message { body, .. } => body.as_deref(),
            Self::Failure { .. } => None,
        }
    }

    pub fn headers(&self) -> Option<&Headers> {
        match self {
            Self::Message { headers, .. } => headers.as_ref(),
            Self::Failure { .. } => None,
        }
    }

    pub fn reply_address(&self) -> Option<&str> {
        match self {
            Self::Message { reply_address, .. } => reply_address.as_deref(),
            Self::Failure { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

/// Pluggable envelope encode/decode strategy.
///
/// The engine never interprets frame bytes itself; every outbound envelope
/// goes through `encode` and every inbound frame through `decode`.
pub trait EnvelopeCodec: Send + Sync + 'static {
    fn encode(&self, envelope: &Envelope) -> Result<Bytes>;
    fn decode(&self, frame: &[u8]) -> Result<Envelope>;
}

/// Default codec: the generic JSON mapping, tolerant of unknown fields.
///
/// ```
/// use tether_wire::{Envelope, EnvelopeCodec, JsonCodec};
///
/// let envelope = Envelope::send("echo", Some("ping1".to_string()), None);
/// let frame = JsonCodec.encode(&envelope).expect("encode");
/// let decoded = JsonCodec.decode(&frame).expect("decode");
/// assert_eq!(decoded, envelope);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EnvelopeCodec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Bytes> {
        // Reject malformed envelopes before they reach the wire.
        if matches!(envelope.address(), Some("")) {
            return Err(Error::EmptyAddress);
        }
        let payload = serde_json::to_vec(envelope).map_err(Error::Serialize)?;
        Ok(Bytes::from(payload))
    }

    fn decode(&self, frame: &[u8]) -> Result<Envelope> {
        let envelope: Envelope = serde_json::from_slice(frame).map_err(Error::Deserialize)?;
        if matches!(envelope.address(), Some("")) {
            return Err(Error::EmptyAddress);
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip() {
        // Encoding then decoding should preserve every field.
        let mut headers = Headers::new();
        headers.insert("token".to_string(), json!("123"));
        let envelope = Envelope::send_with_reply(
            "test-address",
            Some("payload".to_string()),
            Some(headers),
            "reply-1",
        );
        let frame = JsonCodec.encode(&envelope).expect("encode");
        let decoded = JsonCodec.decode(&frame).expect("decode");
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn optional_fields_are_omitted_from_wire_form() {
        let envelope = Envelope::send("addr", None, None);
        let frame = JsonCodec.encode(&envelope).expect("encode");
        let value: Value = serde_json::from_slice(&frame).expect("json");
        let object = value.as_object().expect("object");
        assert_eq!(object.get("type"), Some(&json!("send")));
        assert_eq!(object.get("address"), Some(&json!("addr")));
        assert!(!object.contains_key("headers"));
        assert!(!object.contains_key("body"));
        assert!(!object.contains_key("replyAddress"));
    }

    #[test]
    fn reply_address_uses_wire_name() {
        let envelope = Envelope::send_with_reply("addr", None, None, "corr-1");
        let frame = JsonCodec.encode(&envelope).expect("encode");
        let value: Value = serde_json::from_slice(&frame).expect("json");
        assert_eq!(value["replyAddress"], json!("corr-1"));
    }

    #[test]
    fn decodes_failure_shape() {
        let frame = br#"{"failureCode":123,"failureType":"RECIPIENT_FAILURE","failureMessage":"no handler"}"#;
        let envelope = JsonCodec.decode(frame).expect("decode");
        assert!(envelope.is_failure());
        assert_eq!(envelope.address(), None);
        match envelope {
            Envelope::Failure {
                failure_code,
                failure_type,
                failure_message,
            } => {
                assert_eq!(failure_code, 123);
                assert_eq!(failure_type, "RECIPIENT_FAILURE");
                assert_eq!(failure_message, "no handler");
            }
            Envelope::Message { .. } => panic!("expected failure shape"),
        }
    }

    #[test]
    fn decode_tolerates_unknown_fields() {
        let frame = br#"{"type":"publish","address":"news","body":"hi","sentAt":1234,"extra":{"a":1}}"#;
        let envelope = JsonCodec.decode(frame).expect("decode");
        assert_eq!(envelope.kind(), Some(MessageKind::Publish));
        assert_eq!(envelope.body(), Some("hi"));
    }

    #[test]
    fn decode_rejects_empty_address() {
        let frame = br#"{"type":"send","address":""}"#;
        let err = JsonCodec.decode(frame).expect_err("empty address");
        assert!(matches!(err, Error::EmptyAddress));
    }

    #[test]
    fn encode_rejects_empty_address() {
        let envelope = Envelope::publish("", None, None);
        let err = JsonCodec.encode(&envelope).expect_err("empty address");
        assert!(matches!(err, Error::EmptyAddress));
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = JsonCodec.decode(b"not json").expect_err("garbage");
        assert!(matches!(err, Error::Deserialize(_)));
    }

    #[test]
    fn ping_frame_is_the_fixed_literal() {
        assert_eq!(PING_FRAME, br#"{"type":"ping"}"#);
        // The literal itself must stay valid JSON for the bridge.
        let value: Value = serde_json::from_slice(PING_FRAME).expect("json");
        assert_eq!(value["type"], json!("ping"));
    }
}
