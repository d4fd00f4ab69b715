/// Span/log attribute keys for chat streams.
/// Keep these stable; log queries depend on them.
pub const KEY_SESSION_ID: &str = "session.id";
pub const KEY_REQUEST_ID: &str = "req.id";
pub const KEY_FILES: &str = "chat.files";

pub const KEY_OUTCOME: &str = "stream.outcome";
pub const KEY_FRAMES: &str = "stream.frames";
pub const KEY_MESSAGES: &str = "stream.messages";
pub const KEY_MALFORMED: &str = "stream.malformed";
pub const KEY_LATENCY_MS: &str = "latency.ms";

pub const KEY_ERROR_KIND: &str = "error.kind";
