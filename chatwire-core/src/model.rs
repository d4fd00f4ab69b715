use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};

/// Attachment reference sent along with a chat message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FileRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub transfer_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_file_id: Option<String>,
}

impl FileRef {
    /// Reference an image previously stored through `/api/upload`.
    pub fn image_from_upload(upload: &UploadResponse) -> Self {
        Self {
            kind: "image".into(),
            transfer_method: "local_file".into(),
            url: Some(upload.url.clone()),
            upload_file_id: Some(upload.file_id.clone()),
        }
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub message: String,
    /// `None` asks the backend to open a new session; its id arrives as a `session_update` event.
    pub session_id: Option<String>,
    #[serde(default)]
    pub files: Vec<FileRef>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            files: Vec::new(),
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_file(mut self, file: FileRef) -> Self {
        self.files.push(file);
        self
    }
}

/// Result of draining one chat stream into a single reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatReply {
    pub session_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

/// Body of `POST /auth/register`. The password is only exposed when serialized.
#[derive(Debug)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: SecretString,
}

impl RegisterRequest {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password,
        }
    }
}

impl Serialize for RegisterRequest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("RegisterRequest", 3)?;
        st.serialize_field("username", &self.username)?;
        st.serialize_field("email", &self.email)?;
        st.serialize_field("password", self.password.expose_secret())?;
        st.end()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: String,
}

/// Row of `GET /api/sessions`. Timestamps are passed through as the backend formats them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Row of `GET /api/messages/{session_id}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tokens: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub filename: String,
    pub file_id: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TtsRequest<'a> {
    pub text: &'a str,
}

/// Synthesized speech as returned by `/api/tts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_request_wire_shape() {
        let upload = UploadResponse {
            filename: "cat.png".into(),
            file_id: "local_cat.png".into(),
            url: "/uploads/cat.png".into(),
        };
        let req = ChatRequest::new("look")
            .in_session("s-1")
            .with_file(FileRef::image_from_upload(&upload));
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            json!({
                "message": "look",
                "session_id": "s-1",
                "files": [{
                    "type": "image",
                    "transfer_method": "local_file",
                    "url": "/uploads/cat.png",
                    "upload_file_id": "local_cat.png"
                }]
            })
        );
    }

    #[test]
    fn new_session_request_sends_null_session() {
        let v = serde_json::to_value(ChatRequest::new("hi")).unwrap();
        assert_eq!(v["session_id"], serde_json::Value::Null);
        assert_eq!(v["files"], json!([]));
    }

    #[test]
    fn register_request_sends_password_but_never_logs_it() {
        let req = RegisterRequest::new(
            "bob",
            "bob@example.com",
            SecretString::from("hunter2".to_string()),
        );
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            json!({"username": "bob", "email": "bob@example.com", "password": "hunter2"})
        );
        assert!(!format!("{req:?}").contains("hunter2"));
    }

    #[test]
    fn stored_message_tolerates_missing_optionals() {
        let m: StoredMessage = serde_json::from_value(json!({
            "id": 7,
            "session_id": "s-1",
            "role": "assistant",
            "content": "hello"
        }))
        .unwrap();
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.tokens, None);
    }

    #[test]
    fn session_summary_from_backend_row() {
        let s: SessionSummary = serde_json::from_value(json!({
            "id": "0b6c",
            "user_id": 3,
            "title": "first question",
            "created_at": "2024-05-01T10:00:00",
            "updated_at": "2024-05-01T10:05:00"
        }))
        .unwrap();
        assert_eq!(s.title.as_deref(), Some("first question"));
        assert_eq!(s.user_id, Some(3));
    }
}
