//! The JSON wire envelope replication traffic travels in.
//!
//! Every frame on the bus is one serialized [`BusMessage`]. Receivers must
//! ignore messages whose `from` equals their own nick (bus echo) and
//! messages addressed to neither them nor [`BROADCAST`].

use serde::{Deserialize, Serialize};

use crate::constants::BROADCAST;

/// Greeting sent once to a newly noticed peer.
pub const CMD_HELLO: &str = "hello";
/// Periodic liveness heartbeat.
pub const CMD_ALIVE: &str = "i'm alive";
/// Carries one JSON-encoded [`crate::Event`] in `payload`.
pub const CMD_EVENT: &str = "event";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusMessage {
    /// Sender nick (4 random bytes, hex-encoded).
    pub from: String,
    /// Destination nick, or `"*"` for everyone.
    pub to: String,
    /// Per-sender monotonically increasing sequence number.
    pub seq: i64,
    /// One of the `CMD_*` strings. Unknown commands are ignored by
    /// receivers, which keeps the protocol forward-compatible.
    pub cmd: String,
    /// JSON-encoded `Event` when `cmd == "event"`, free-form otherwise.
    #[serde(default)]
    pub payload: String,
}

impl BusMessage {
    pub fn new(from: &str, to: &str, seq: i64, cmd: &str, payload: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            seq,
            cmd: cmd.to_string(),
            payload: payload.to_string(),
        }
    }

    /// Whether a node with the given nick should process this message.
    pub fn addressed_to(&self, nick: &str) -> bool {
        self.from != nick && (self.to == nick || self.to == BROADCAST)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

impl std::fmt::Display for BusMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}: {} (seq {})]", self.cmd, self.payload, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_message_round_trip() {
        let msg = BusMessage::new("a1b2c3d4", "*", 17, CMD_EVENT, "{\"x\":1}");
        let bytes = msg.to_bytes().unwrap();
        let restored = BusMessage::from_bytes(&bytes).unwrap();
        assert_eq!(msg, restored);
    }

    #[test]
    fn wire_field_names() {
        let msg = BusMessage::new("aa", "bb", 1, CMD_HELLO, "");
        let json = String::from_utf8(msg.to_bytes().unwrap()).unwrap();
        for field in ["\"from\"", "\"to\"", "\"seq\"", "\"cmd\"", "\"payload\""] {
            assert!(json.contains(field), "missing {field} in {json}");
        }
    }

    #[test]
    fn addressing() {
        let broadcast = BusMessage::new("aa", "*", 1, CMD_ALIVE, "");
        assert!(broadcast.addressed_to("bb"));
        // Our own broadcast echoes back on the bus.
        assert!(!broadcast.addressed_to("aa"));

        let directed = BusMessage::new("aa", "bb", 2, CMD_HELLO, "");
        assert!(directed.addressed_to("bb"));
        assert!(!directed.addressed_to("cc"));
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(BusMessage::from_bytes(b"").is_err());
        assert!(BusMessage::from_bytes(b"not json").is_err());
        assert!(BusMessage::from_bytes(b"{\"from\":\"aa\"}").is_err());
    }
}
