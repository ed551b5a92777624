use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::response::ResponseNode;

/// Best-effort conversion of a payload field into image bytes.
///
/// Raw bytes pass through, text is read as standard base64, anything else (or a decode
/// failure) yields `None`.
pub fn decode(value: Option<&ResponseNode>) -> Option<Vec<u8>> {
    match value? {
        ResponseNode::Bytes(bytes) => Some(bytes.clone()),
        ResponseNode::Text(text) => decode_base64(text),
        _ => None,
    }
}

/// Standard-alphabet base64 with padding. Line breaks from wrapped payloads are ignored.
pub fn decode_base64(text: &str) -> Option<Vec<u8>> {
    if text.contains(|ch: char| ch.is_ascii_whitespace()) {
        let compact = text
            .chars()
            .filter(|ch| !ch.is_ascii_whitespace())
            .collect::<String>();
        return BASE64.decode(compact.as_bytes()).ok();
    }
    BASE64.decode(text.as_bytes()).ok()
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}
