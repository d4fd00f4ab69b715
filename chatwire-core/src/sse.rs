//! Server-Sent-Events decoding for the chat stream.
//!
//! The backend writes one JSON document per frame:
//! ```text
//! data: {"event":"message","answer":"Hi"}
//!
//! data: {"event":"done"}
//!
//! ```
//! Network chunks cut these frames (and the UTF-8 inside them) at arbitrary
//! byte offsets. `FrameDecoder` reassembles complete frames; `parse_frame`
//! turns one frame into a `ChatEvent` or a reason it was skipped.

use serde::Deserialize;

use crate::stream::ChatEvent;

const FRAME_SEPARATOR: &str = "\n\n";
const BOM: char = '\u{FEFF}';

/// Incremental byte → frame decoder. One instance per stream; never shared.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Trailing bytes of a UTF-8 sequence that the last chunk cut in half.
    pending: Vec<u8>,
    /// Decoded text that does not yet end in a frame separator.
    buf: String,
    /// Set once the first character of the body has been decoded.
    started: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every frame it completed, in order.
    /// After this call the buffer holds at most one incomplete frame.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        decode_utf8_prefix(&mut self.pending, &mut self.buf);

        if !self.started && !self.buf.is_empty() {
            self.started = true;
            if self.buf.starts_with(BOM) {
                self.buf.drain(..BOM.len_utf8());
            }
        }

        if self.buf.contains("\r\n") {
            self.buf = self.buf.replace("\r\n", "\n");
        }

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(idx) = self.buf[consumed..].find(FRAME_SEPARATOR) {
            frames.push(self.buf[consumed..consumed + idx].to_string());
            consumed += idx + FRAME_SEPARATOR.len();
        }
        self.buf.drain(..consumed);
        frames
    }

    /// Text held back as a possibly incomplete trailing frame.
    pub fn residual(&self) -> &str {
        &self.buf
    }

    /// True when nothing (not even half a character) is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty() && self.pending.is_empty()
    }
}

/// Append the longest valid UTF-8 prefix of `pending` to `out`, replacing
/// invalid sequences with U+FFFD. An incomplete sequence at the very end is
/// left in `pending` for the next chunk.
fn decode_utf8_prefix(pending: &mut Vec<u8>, out: &mut String) {
    let mut start = 0;
    while start < pending.len() {
        match std::str::from_utf8(&pending[start..]) {
            Ok(s) => {
                out.push_str(s);
                start = pending.len();
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[start..start + valid]));
                start += valid;
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        start += bad;
                    }
                    None => break,
                }
            }
        }
    }
    pending.drain(..start);
}

/// Why a complete frame produced no event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    /// No `data:` record: comment or keep-alive.
    NoData,
    /// `data:` record with an empty payload.
    Heartbeat,
    /// `message` event without a non-empty `answer`.
    EmptyAnswer,
    /// `session_update` event without a `session_id`.
    MissingSessionId,
    /// `event` field absent or not one of the known kinds.
    UnknownKind(Option<String>),
}

#[derive(Debug)]
pub enum Decoded {
    Event(ChatEvent),
    Skipped(Skip),
    /// Payload was not a JSON object of the expected shape.
    Malformed(serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Joined payload of a frame's `data:` lines, or `None` for a frame without any.
/// `:` comments and other fields (`event:`, `id:`, `retry:`) are ignored.
fn frame_data(frame: &str) -> Option<String> {
    let mut data: Option<String> = None;
    for line in frame.lines() {
        let Some(rest) = line.trim_start().strip_prefix("data:") else {
            continue;
        };
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        match &mut data {
            Some(d) => {
                d.push('\n');
                d.push_str(rest);
            }
            None => data = Some(rest.to_string()),
        }
    }
    data
}

pub fn parse_frame(frame: &str) -> Decoded {
    let Some(data) = frame_data(frame.trim()) else {
        return Decoded::Skipped(Skip::NoData);
    };
    let payload = data.trim();
    if payload.is_empty() {
        return Decoded::Skipped(Skip::Heartbeat);
    }
    match serde_json::from_str::<WireEvent>(payload) {
        Ok(wire) => classify(wire),
        Err(e) => Decoded::Malformed(e),
    }
}

fn classify(wire: WireEvent) -> Decoded {
    match wire.event.as_deref() {
        Some("message") => match wire.answer {
            Some(answer) if !answer.is_empty() => Decoded::Event(ChatEvent::Message(answer)),
            _ => Decoded::Skipped(Skip::EmptyAnswer),
        },
        Some("session_update") => match wire.session_id {
            Some(id) => Decoded::Event(ChatEvent::SessionUpdate(id)),
            None => Decoded::Skipped(Skip::MissingSessionId),
        },
        Some("done") => Decoded::Event(ChatEvent::Done),
        Some("error") => Decoded::Event(ChatEvent::Error(
            wire.message
                .unwrap_or_else(|| "unknown server error".to_string()),
        )),
        _ => Decoded::Skipped(Skip::UnknownKind(wire.event)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(frame: &str) -> ChatEvent {
        match parse_frame(frame) {
            Decoded::Event(ev) => ev,
            other => panic!("expected event, got {other:?}"),
        }
    }

    fn skip(frame: &str) -> Skip {
        match parse_frame(frame) {
            Decoded::Skipped(s) => s,
            other => panic!("expected skip, got {other:?}"),
        }
    }

    #[test]
    fn splits_frames_and_keeps_tail() {
        let mut d = FrameDecoder::new();
        let frames = d.push(b"data: a\n\ndata: b\n\ndata: c");
        assert_eq!(frames, vec!["data: a", "data: b"]);
        assert_eq!(d.residual(), "data: c");

        let frames = d.push(b"\n\n");
        assert_eq!(frames, vec!["data: c"]);
        assert!(d.is_empty());
    }

    #[test]
    fn separator_split_across_chunks() {
        let mut d = FrameDecoder::new();
        assert!(d.push(b"data: x\n").is_empty());
        assert_eq!(d.push(b"\ndata: y"), vec!["data: x"]);
        assert_eq!(d.residual(), "data: y");
    }

    #[test]
    fn consecutive_separators_yield_empty_frame() {
        let mut d = FrameDecoder::new();
        assert_eq!(d.push(b"a\n\n\n\nb\n\n"), vec!["a", "", "b"]);
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let text = "data: 汐宝\n\n".as_bytes();
        // '汐' is three bytes starting at offset 6
        let mut d = FrameDecoder::new();
        assert!(d.push(&text[..7]).is_empty());
        assert!(d.push(&text[7..8]).is_empty());
        let frames = d.push(&text[8..]);
        assert_eq!(frames, vec!["data: 汐宝"]);
        assert!(d.is_empty());
    }

    #[test]
    fn leading_bom_is_stripped_even_when_split() {
        let mut d = FrameDecoder::new();
        assert!(d.push(b"\xEF").is_empty());
        assert!(d.push(b"\xBB").is_empty());
        assert_eq!(d.push(b"\xBFdata: a\n\n"), vec!["data: a"]);
        assert!(d.is_empty());
    }

    #[test]
    fn only_the_first_bom_is_stripped() {
        let mut d = FrameDecoder::new();
        assert_eq!(d.push("data: a\n\n\u{FEFF}x\n\n".as_bytes()), vec!["data: a", "\u{FEFF}x"]);
    }

    #[test]
    fn invalid_utf8_becomes_replacement_char() {
        let mut d = FrameDecoder::new();
        let frames = d.push(b"data: a\xffb\n\n");
        assert_eq!(frames, vec!["data: a\u{FFFD}b"]);
    }

    #[test]
    fn crlf_framing_is_normalized_even_when_split() {
        let mut d = FrameDecoder::new();
        assert!(d.push(b"data: a\r\n\r").is_empty());
        assert_eq!(d.push(b"\ndata: b\r\n\r\n"), vec!["data: a", "data: b"]);
    }

    #[test]
    fn parses_known_kinds() {
        assert_eq!(
            event(r#"data: {"event":"message","answer":"Hi"}"#),
            ChatEvent::Message("Hi".into())
        );
        assert_eq!(
            event(r#"data: {"event":"session_update","session_id":"s-9"}"#),
            ChatEvent::SessionUpdate("s-9".into())
        );
        assert_eq!(event(r#"data: {"event":"done"}"#), ChatEvent::Done);
        assert_eq!(
            event(r#"data: {"event":"error","message":"quota"}"#),
            ChatEvent::Error("quota".into())
        );
    }

    #[test]
    fn no_space_after_marker_and_surrounding_whitespace() {
        assert_eq!(
            event("  \ndata:{\"event\":\"message\",\"answer\":\"x\"}  \n"),
            ChatEvent::Message("x".into())
        );
    }

    #[test]
    fn skips_comments_heartbeats_and_unknowns() {
        assert_eq!(skip(": keep-alive"), Skip::NoData);
        assert_eq!(skip(""), Skip::NoData);
        assert_eq!(skip("data:   "), Skip::Heartbeat);
        assert_eq!(
            skip(r#"data: {"event":"message","answer":""}"#),
            Skip::EmptyAnswer
        );
        assert_eq!(skip(r#"data: {"event":"message"}"#), Skip::EmptyAnswer);
        assert_eq!(
            skip(r#"data: {"event":"session_update"}"#),
            Skip::MissingSessionId
        );
        assert_eq!(
            skip(r#"data: {"event":"workflow_started"}"#),
            Skip::UnknownKind(Some("workflow_started".into()))
        );
        assert_eq!(skip(r#"data: {"answer":"orphan"}"#), Skip::UnknownKind(None));
    }

    #[test]
    fn event_field_lines_are_ignored() {
        assert_eq!(
            event("event: message\nid: 4\ndata: {\"event\":\"done\"}"),
            ChatEvent::Done
        );
    }

    #[test]
    fn multiple_data_lines_join_with_newline() {
        assert_eq!(
            event("data: {\"event\":\"message\",\ndata: \"answer\":\"two lines\"}"),
            ChatEvent::Message("two lines".into())
        );
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(parse_frame("data: {not json"), Decoded::Malformed(_)));
        assert!(matches!(parse_frame("data: [DONE]"), Decoded::Malformed(_)));
    }

    #[test]
    fn error_without_message_gets_placeholder() {
        assert_eq!(
            event(r#"data: {"event":"error"}"#),
            ChatEvent::Error("unknown server error".into())
        );
    }
}
