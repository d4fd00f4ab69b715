use serde::{Deserialize, Serialize};

/// One record per chat stream, emitted when the stream ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StreamTrace {
    /// Session the turn belongs to, if known before or during the stream.
    pub session_id: Option<String>,

    /// Caller-supplied request id, when one was sent as `X-Request-Id`.
    pub request_id: Option<String>,

    /// `StreamOutcome::as_str` of the finished stream.
    pub outcome: Option<String>,

    pub frames: u32,
    pub messages: u32,
    pub malformed: u32,

    /// Time from request to end of body.
    pub latency_ms: Option<u64>,

    /// `ChatClientError::kind` when the stream failed at transport level.
    pub error_kind: Option<String>,
}

impl StreamTrace {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn session_id_opt(mut self, v: Option<&str>) -> Self {
        self.session_id = v.map(|s| s.to_string());
        self
    }
    pub fn request_id_opt(mut self, v: Option<&str>) -> Self {
        self.request_id = v.map(|s| s.to_string());
        self
    }
    pub fn outcome(mut self, v: &str) -> Self {
        self.outcome = Some(v.to_string());
        self
    }
    pub fn counts(mut self, frames: u32, messages: u32, malformed: u32) -> Self {
        self.frames = frames;
        self.messages = messages;
        self.malformed = malformed;
        self
    }
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
    pub fn error_kind_opt(mut self, v: Option<&str>) -> Self {
        self.error_kind = v.map(|s| s.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stream_trace_serializes() {
        let trace = StreamTrace::new()
            .session_id_opt(Some("s-1"))
            .request_id_opt(Some("req-abc"))
            .outcome("completed")
            .counts(4, 2, 1)
            .latency_ms(42);

        let as_json = serde_json::to_value(&trace).unwrap();
        assert_eq!(as_json["session_id"], json!("s-1"));
        assert_eq!(as_json["outcome"], json!("completed"));
        assert_eq!(as_json["messages"], json!(2));
        assert_eq!(as_json["latency_ms"], json!(42));
        assert_eq!(as_json["error_kind"], json!(null));
    }
}
