//! Wire framing between the relay and an agent.
//!
//! The protocol has no request identifiers: the relay sends a command frame,
//! optionally a payload frame, and the agent answers with exactly one data
//! frame. Text `ping` frames are keepalives and never carry data.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Keepalive token sent by the agent.
pub const PING: &str = "ping";

/// Reply to [`PING`].
pub const PONG: &str = "pong";

/// Separator between the JSON header and the body of a response envelope.
pub const ENVELOPE_SEPARATOR: &[u8] = b"\n\n";

/// Error string used when an agent reply is not valid JSON.
pub const BAD_JSON: &str = "bad_json";

/// A single message on the agent connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text message.
    Text(String),
    /// Raw binary message.
    Binary(Bytes),
}

impl Frame {
    /// Returns true for the keepalive control token.
    #[must_use]
    pub fn is_ping(&self) -> bool {
        matches!(self, Self::Text(text) if text == PING)
    }

    /// Raw bytes carried by the frame.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Binary(data) => data,
        }
    }

    /// Length of the carried data in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Whether the frame carries no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The pong control frame.
    #[must_use]
    pub fn pong() -> Self {
        Self::Text(PONG.to_string())
    }
}

/// Encode a command verb (`LIST`, `GET`, `PUT`, `EXECUTE`, ...) as a text frame.
#[must_use]
pub fn encode_command(command: &str) -> Frame {
    Frame::Text(command.to_string())
}

/// Encode a command payload as a binary frame.
#[must_use]
pub fn encode_payload(payload: impl Into<Bytes>) -> Frame {
    Frame::Binary(payload.into())
}

/// Build a PUT payload: `filename + "\n" + contents`.
#[must_use]
pub fn encode_put_payload(filename: &str, contents: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(filename.len() + 1 + contents.len());
    buf.put_slice(filename.as_bytes());
    buf.put_u8(b'\n');
    buf.put_slice(contents);
    buf.freeze()
}

/// Split a PUT payload back into filename and contents.
///
/// Returns `None` if there is no newline or the filename is not UTF-8.
#[must_use]
pub fn decode_put_payload(payload: &Bytes) -> Option<(String, Bytes)> {
    let newline = payload.iter().position(|&b| b == b'\n')?;
    let name = std::str::from_utf8(&payload[..newline]).ok()?;
    Some((name.to_string(), payload.slice(newline + 1..)))
}

/// JSON header of a GET-style response envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// Whether the agent completed the operation.
    #[serde(default)]
    pub ok: bool,
    /// Failure reason when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Name to present to the downloader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EnvelopeHeader {
    /// Sentinel used in place of a header that failed to parse.
    #[must_use]
    pub fn bad_json() -> Self {
        Self {
            ok: false,
            error: Some(BAD_JSON.to_string()),
            name: None,
        }
    }
}

/// Split an agent response into its header and body at the first `\n\n`.
///
/// A malformed header becomes [`EnvelopeHeader::bad_json`]; the body is
/// returned verbatim either way. Input without a separator is treated as a
/// header with an empty body.
#[must_use]
pub fn split_envelope(response: &Bytes) -> (EnvelopeHeader, Bytes) {
    let (head, body) = match find_separator(response) {
        Some(at) => (
            response.slice(..at),
            response.slice(at + ENVELOPE_SEPARATOR.len()..),
        ),
        None => (response.clone(), Bytes::new()),
    };

    let header = serde_json::from_slice(&head).unwrap_or_else(|e| {
        tracing::debug!("Malformed envelope header: {e}");
        EnvelopeHeader::bad_json()
    });

    (header, body)
}

fn find_separator(data: &[u8]) -> Option<usize> {
    data.windows(ENVELOPE_SEPARATOR.len())
        .position(|w| w == ENVELOPE_SEPARATOR)
}

/// Parse an agent reply as JSON, substituting the `bad_json` sentinel.
#[must_use]
pub fn parse_json_lossy(data: &[u8]) -> Value {
    serde_json::from_slice(data).unwrap_or_else(|_| {
        serde_json::json!({
            "ok": false,
            "error": BAD_JSON,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_payload_roundtrip() {
        let payload = encode_put_payload("a.txt", b"hi");
        assert_eq!(&payload[..], b"a.txt\nhi");

        let (name, body) = decode_put_payload(&payload).unwrap();
        assert_eq!(name, "a.txt");
        assert_eq!(&body[..], b"hi");
    }

    #[test]
    fn test_put_payload_keeps_newlines_in_body() {
        let payload = encode_put_payload("notes.md", b"line one\nline two\n");
        let (name, body) = decode_put_payload(&payload).unwrap();
        assert_eq!(name, "notes.md");
        assert_eq!(&body[..], b"line one\nline two\n");
    }

    #[test]
    fn test_decode_put_payload_without_newline() {
        assert!(decode_put_payload(&Bytes::from_static(b"no-separator")).is_none());
    }

    #[test]
    fn test_split_envelope() {
        let response = Bytes::from_static(b"{\"ok\":true,\"name\":\"x\"}\n\nPAYLOAD");
        let (header, body) = split_envelope(&response);

        assert!(header.ok);
        assert_eq!(header.name.as_deref(), Some("x"));
        assert_eq!(header.error, None);
        assert_eq!(&body[..], b"PAYLOAD");
    }

    #[test]
    fn test_split_envelope_bad_json() {
        let response = Bytes::from_static(b"{not json\n\ntrailing bytes");
        let (header, body) = split_envelope(&response);

        assert_eq!(header, EnvelopeHeader::bad_json());
        assert_eq!(
            serde_json::to_value(&header).unwrap(),
            serde_json::json!({"ok": false, "error": "bad_json"})
        );
        assert_eq!(&body[..], b"trailing bytes");
    }

    #[test]
    fn test_split_envelope_first_separator_wins() {
        let response = Bytes::from_static(b"{\"ok\":true}\n\n\n\nbody\n\nmore");
        let (header, body) = split_envelope(&response);

        assert!(header.ok);
        assert_eq!(&body[..], b"\n\nbody\n\nmore");
    }

    #[test]
    fn test_split_envelope_empty_body() {
        let response = Bytes::from_static(b"{\"ok\":false,\"error\":\"not_found\"}\n\n");
        let (header, body) = split_envelope(&response);

        assert!(!header.ok);
        assert_eq!(header.error.as_deref(), Some("not_found"));
        assert!(body.is_empty());
    }

    #[test]
    fn test_split_envelope_without_separator() {
        let (header, body) = split_envelope(&Bytes::from_static(b"{\"ok\":true}"));
        assert!(header.ok);
        assert!(body.is_empty());
    }

    #[test]
    fn test_ping_detection() {
        assert!(Frame::Text("ping".into()).is_ping());
        assert!(!Frame::Text("PING".into()).is_ping());
        assert!(!Frame::Binary(Bytes::from_static(b"ping")).is_ping());
    }

    #[test]
    fn test_parse_json_lossy() {
        assert_eq!(
            parse_json_lossy(br#"{"files":["a"]}"#),
            serde_json::json!({"files": ["a"]})
        );
        assert_eq!(
            parse_json_lossy(b"\xff\xfe"),
            serde_json::json!({"ok": false, "error": "bad_json"})
        );
    }
}
