//! Swarm signaling protocol — messages, topics and transform hooks

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Topic every participant subscribes to for discovery announcements.
/// Directed messages use the target participant's identity as the topic.
pub const BROADCAST_TOPIC: &str = "all";

/// A message exchanged through the signaling hub
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    /// Broadcast presence advertisement carrying the sender's election token
    Announce { from: String, token: String },
    /// Best-effort goodbye, sent to the remote identity's topic
    Disconnect { from: String },
    /// Opaque handshake payload relayed to the remote identity's topic
    Signal { from: String, payload: Value },
}

impl SignalMessage {
    /// Identity of the participant that authored this message
    pub fn from(&self) -> &str {
        match self {
            SignalMessage::Announce { from, .. } => from,
            SignalMessage::Disconnect { from } => from,
            SignalMessage::Signal { from, .. } => from,
        }
    }

    /// Message type name, for diagnostics
    pub fn message_type(&self) -> &'static str {
        match self {
            SignalMessage::Announce { .. } => "announce",
            SignalMessage::Disconnect { .. } => "disconnect",
            SignalMessage::Signal { .. } => "signal",
        }
    }
}

/// Initiator election: exactly one side of any pair must initiate.
///
/// Both sides compare the same two independently generated tokens under
/// total lexicographic order, so the decisions are always opposite. The
/// side whose token is greater (or equal, which cannot happen with distinct
/// tokens) opens the connection.
pub fn initiates(local_token: &str, remote_token: &str) -> bool {
    local_token >= remote_token
}

/// Whether an opaque handshake payload is a connection offer.
///
/// Only an offer may originate a new passive connection; any other fragment
/// arriving without a prior record is stale and dropped.
pub fn is_offer(payload: &Value) -> bool {
    payload.get("type").and_then(Value::as_str) == Some("offer")
}

/// Outbound message encoder hook
pub type WrapFn = dyn Fn(Value, &str) -> Value + Send + Sync;
/// Inbound message decoder hook; `None` means "discard silently"
pub type UnwrapFn = dyn Fn(Value, &str) -> Option<Value> + Send + Sync;

/// Pluggable pass-through encode/decode hooks applied to every hub frame.
///
/// The default is the identity transform. A custom pair can add envelope
/// framing, filtering or obfuscation without the swarm knowing about it.
#[derive(Clone)]
pub struct Transform {
    wrap: Arc<WrapFn>,
    unwrap: Arc<UnwrapFn>,
}

impl Transform {
    /// Build a transform from a wrap/unwrap pair
    pub fn new(
        wrap: impl Fn(Value, &str) -> Value + Send + Sync + 'static,
        unwrap: impl Fn(Value, &str) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            wrap: Arc::new(wrap),
            unwrap: Arc::new(unwrap),
        }
    }

    /// Encode an outbound frame for the given topic
    pub fn wrap(&self, message: Value, topic: &str) -> Value {
        (self.wrap)(message, topic)
    }

    /// Decode an inbound frame from the given topic
    pub fn unwrap(&self, message: Value, topic: &str) -> Option<Value> {
        (self.unwrap)(message, topic)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new(|message, _topic| message, |message, _topic| Some(message))
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_announce_wire_shape() {
        let msg = SignalMessage::Announce {
            from: "peer-a".to_string(),
            token: "abc123".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "announce");
        assert_eq!(value["from"], "peer-a");
        assert_eq!(value["token"], "abc123");
    }

    #[test]
    fn test_signal_roundtrip() {
        let msg = SignalMessage::Signal {
            from: "peer-a".to_string(),
            payload: json!({"type": "offer", "sdp": "v=0"}),
        };
        let value = serde_json::to_value(&msg).unwrap();
        let back: SignalMessage = serde_json::from_value(value).unwrap();
        match back {
            SignalMessage::Signal { from, payload } => {
                assert_eq!(from, "peer-a");
                assert!(is_offer(&payload));
            }
            other => panic!("wrong variant: {}", other.message_type()),
        }
    }

    #[test]
    fn test_malformed_frame_rejected() {
        let result: Result<SignalMessage, _> =
            serde_json::from_value(json!({"type": "announce"}));
        assert!(result.is_err());

        let result: Result<SignalMessage, _> = serde_json::from_value(json!("not an object"));
        assert!(result.is_err());
    }

    #[test]
    fn test_is_offer() {
        assert!(is_offer(&json!({"type": "offer", "sdp": "v=0"})));
        assert!(!is_offer(&json!({"type": "answer", "sdp": "v=0"})));
        assert!(!is_offer(&json!({"candidate": "..."})));
        assert!(!is_offer(&json!(null)));
    }

    #[test]
    fn test_election_is_deterministic() {
        assert!(initiates("zzz", "aaa"));
        assert!(!initiates("aaa", "zzz"));
        // Equal tokens would make both sides initiate; generation makes
        // collisions vanishingly unlikely, but the comparison is still total.
        assert!(initiates("abc", "abc"));
    }

    #[test]
    fn test_default_transform_is_identity() {
        let transform = Transform::default();
        let frame = json!({"type": "disconnect", "from": "x"});
        assert_eq!(transform.wrap(frame.clone(), "all"), frame);
        assert_eq!(transform.unwrap(frame.clone(), "all"), Some(frame));
    }

    #[test]
    fn test_filtering_transform_discards() {
        let transform = Transform::new(
            |message, _| message,
            |message, _| {
                if message["from"] == "blocked" {
                    None
                } else {
                    Some(message)
                }
            },
        );
        assert!(transform
            .unwrap(json!({"from": "blocked"}), "all")
            .is_none());
        assert!(transform.unwrap(json!({"from": "ok"}), "all").is_some());
    }

    proptest! {
        /// For any two distinct tokens exactly one side wins the election.
        #[test]
        fn prop_election_mirror(a in "[a-z0-9]{1,16}", b in "[a-z0-9]{1,16}") {
            prop_assume!(a != b);
            prop_assert_ne!(initiates(&a, &b), initiates(&b, &a));
        }
    }
}
