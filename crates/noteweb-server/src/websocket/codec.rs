//! WebSocket frame ↔ text conversion.
//!
//! Decoding never fails: invalid UTF-8 is replaced and control frames
//! decode to an empty string, which callers treat as "no message".

use axum::extract::ws::Message;

/// Text carried by one received frame.
pub fn decode(message: &Message) -> String {
    match message {
        Message::Text(text) => text.as_str().to_owned(),
        Message::Binary(data) => decode_fragments(std::slice::from_ref(data)),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => String::new(),
    }
}

/// Concatenate binary fragments in order and decode them lossily.
pub fn decode_fragments<B: AsRef<[u8]>>(fragments: &[B]) -> String {
    let bytes: Vec<u8> = fragments
        .iter()
        .flat_map(|fragment| fragment.as_ref().iter().copied())
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Text frame for an outgoing message.
pub fn encode(text: &str) -> Message {
    Message::Text(text.into())
}
