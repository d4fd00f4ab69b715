//! Typed access to every backend endpoint the chat UI uses.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_futures::Instrument;

use crate::config::{Config, SilentClose};
use crate::credentials::Credentials;
use crate::error::{ChatClientError, CoreResult};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{
    AudioClip, ChatReply, ChatRequest, RegisterRequest, SessionSummary, StatusResponse,
    StoredMessage, TokenResponse, TtsRequest, UploadResponse, UserProfile,
};
use crate::source::EventSource;
use crate::stream::{self, ByteStream, StreamFailure, StreamHandler, StreamOutcome, StreamSummary};
use crate::telemetry::{self, StreamTrace};

const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";
const CHAT_PATH: &str = "/api/chat";
const SESSIONS_PATH: &str = "/api/sessions";
const MESSAGES_PATH: &str = "/api/messages";
const UPLOAD_PATH: &str = "/api/upload";
const TTS_PATH: &str = "/api/tts";

#[derive(Serialize)]
struct LoginForm<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    http: HttpClient,
    base: String,
    on_silent_close: SilentClose,
    next_request: Arc<AtomicU64>,
}

impl ChatClient {
    pub fn new(cfg: &Config, credentials: Credentials) -> CoreResult<Self> {
        Ok(Self {
            http: HttpClient::new(&cfg.http, credentials)?,
            base: cfg.base_url().to_string(),
            on_silent_close: cfg.stream.on_silent_close,
            next_request: Arc::new(AtomicU64::new(1)),
        })
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str, credentials: Credentials) -> Self {
        let mut cfg = Config::default();
        cfg.api.base_url = server_base.to_string();
        Self::new(&cfg, credentials).unwrap()
    }

    pub fn credentials(&self) -> &Credentials {
        self.http.credentials()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// `{base}{prefix}/{id}` with `id` escaped as a single path segment.
    fn url_with_id(&self, prefix: &str, id: &str) -> CoreResult<String> {
        let mut url = reqwest::Url::parse(&self.url(prefix))
            .map_err(|e| ChatClientError::Validation(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ChatClientError::Validation("base url cannot carry a path".into()))?
            .push(id);
        Ok(url.into())
    }

    /// Exchange username/password for a bearer token and keep it in the credentials.
    pub async fn login(&self, username: &str, password: &SecretString) -> CoreResult<TokenResponse> {
        let form = LoginForm {
            username,
            password: password.expose_secret(),
        };
        let token: TokenResponse = self
            .http
            .post_form(&self.url(LOGIN_PATH), &form, &RequestCtx::default())
            .await?;
        self.credentials().set_token(token.access_token.clone());
        tracing::info!(username, "logged in");
        Ok(token)
    }

    pub fn logout(&self) {
        self.credentials().clear();
    }

    pub async fn register(&self, req: &RegisterRequest) -> CoreResult<UserProfile> {
        self.http
            .post_json(&self.url(REGISTER_PATH), req, &RequestCtx::default())
            .await
    }

    pub async fn list_sessions(&self) -> CoreResult<Vec<SessionSummary>> {
        self.http
            .get_json(&self.url(SESSIONS_PATH), &RequestCtx::default())
            .await
    }

    pub async fn list_messages(&self, session_id: &str) -> CoreResult<Vec<StoredMessage>> {
        let url = self.url_with_id(MESSAGES_PATH, session_id)?;
        self.http.get_json(&url, &RequestCtx::default()).await
    }

    pub async fn delete_session(&self, session_id: &str) -> CoreResult<StatusResponse> {
        let url = self.url_with_id(SESSIONS_PATH, session_id)?;
        self.http.delete_json(&url, &RequestCtx::default()).await
    }

    pub async fn upload_file(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        mime: Option<&str>,
    ) -> CoreResult<UploadResponse> {
        let mut part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        if let Some(mime) = mime {
            part = part
                .mime_str(mime)
                .map_err(|e| ChatClientError::Validation(format!("invalid mime type '{mime}': {e}")))?;
        }
        let form = reqwest::multipart::Form::new().part("file", part);
        self.http
            .post_multipart(&self.url(UPLOAD_PATH), form, &RequestCtx::default())
            .await
    }

    /// Read a local file and upload it under its own file name.
    pub async fn upload_path(&self, path: &Path) -> CoreResult<UploadResponse> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ChatClientError::Validation(format!("no file name in {}", path.display())))?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        let mime = guess_mime(&filename);
        self.upload_file(&filename, bytes, mime).await
    }

    pub async fn tts(&self, text: &str) -> CoreResult<AudioClip> {
        if text.trim().is_empty() {
            return Err(ChatClientError::Validation("tts text is empty".into()));
        }
        let (content_type, bytes) = self
            .http
            .post_json_for_bytes(&self.url(TTS_PATH), &TtsRequest { text }, &RequestCtx::default())
            .await?;
        Ok(AudioClip {
            content_type,
            bytes,
        })
    }

    /// Stream one chat turn into `handler`. Never fails: problems are reported
    /// through `on_error` and the returned summary's outcome.
    pub async fn stream_chat<H>(
        &self,
        req: &ChatRequest,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> StreamSummary
    where
        H: StreamHandler + ?Sized,
    {
        let request_id = format!("chat-{}", self.next_request.fetch_add(1, Ordering::Relaxed));
        let span = tracing::info_span!(
            "chat.stream",
            "session.id" = req.session_id.as_deref().unwrap_or(""),
            "req.id" = request_id.as_str(),
            "chat.files" = req.files.len() as u64,
            "stream.outcome" = tracing::field::Empty,
            "stream.frames" = tracing::field::Empty,
            "stream.messages" = tracing::field::Empty,
        );
        let source = TaggedSource {
            client: self,
            request_id: &request_id,
        };
        let mut tap = ErrorTap {
            inner: handler,
            error_kind: None,
        };
        let started = Instant::now();
        let summary = stream::run(&source, req, &mut tap, cancel, self.on_silent_close)
            .instrument(span.clone())
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        span.record(telemetry::KEY_OUTCOME, summary.outcome.as_str());
        span.record(telemetry::KEY_FRAMES, summary.frames as u64);
        span.record(telemetry::KEY_MESSAGES, summary.messages as u64);
        if let Some(sid) = summary.session_id.as_deref() {
            span.record(telemetry::KEY_SESSION_ID, sid);
        }
        span.in_scope(|| {
            tracing::info!(
                outcome = summary.outcome.as_str(),
                frames = summary.frames,
                messages = summary.messages,
                malformed = summary.malformed,
                latency_ms,
                "chat stream finished"
            )
        });

        telemetry::emit(
            StreamTrace::new()
                .session_id_opt(summary.session_id.as_deref().or(req.session_id.as_deref()))
                .request_id_opt(Some(&request_id))
                .outcome(summary.outcome.as_str())
                .counts(summary.frames, summary.messages, summary.malformed)
                .latency_ms(latency_ms)
                .error_kind_opt(tap.error_kind),
        );
        summary
    }

    async fn open_chat(&self, req: &ChatRequest, ctx: &RequestCtx<'_>) -> CoreResult<ByteStream> {
        self.http
            .post_event_stream(&self.url(CHAT_PATH), req, ctx)
            .await
    }

    /// Drain one chat turn into a single reply.
    pub async fn send_message(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> CoreResult<ChatReply> {
        let mut collector = ReplyCollector::default();
        let summary = self.stream_chat(req, &mut collector, cancel).await;
        if summary.outcome == StreamOutcome::Cancelled {
            return Err(ChatClientError::Cancelled);
        }
        if let Some(failure) = collector.failure {
            return Err(match failure {
                StreamFailure::Transport(err) => err,
                StreamFailure::Server(message) => ChatClientError::Backend {
                    code: "stream".into(),
                    message,
                },
                StreamFailure::ClosedEarly => ChatClientError::Backend {
                    code: "stream".into(),
                    message: "stream closed before completion".into(),
                },
            });
        }
        Ok(ChatReply {
            session_id: summary.session_id.or_else(|| req.session_id.clone()),
            text: collector.text,
        })
    }
}

#[async_trait]
impl EventSource for ChatClient {
    async fn open(&self, req: &ChatRequest) -> CoreResult<ByteStream> {
        self.open_chat(req, &RequestCtx::default()).await
    }
}

/// Opens the chat stream with an `X-Request-Id` attached.
struct TaggedSource<'a> {
    client: &'a ChatClient,
    request_id: &'a str,
}

#[async_trait]
impl<'a> EventSource for TaggedSource<'a> {
    async fn open(&self, req: &ChatRequest) -> CoreResult<ByteStream> {
        let ctx = RequestCtx {
            request_id: Some(self.request_id),
        };
        self.client.open_chat(req, &ctx).await
    }
}

/// Forwards every callback and remembers the kind of a transport failure.
struct ErrorTap<'h, H: ?Sized> {
    inner: &'h mut H,
    error_kind: Option<&'static str>,
}

impl<H: StreamHandler + ?Sized> StreamHandler for ErrorTap<'_, H> {
    fn on_message(&mut self, text: String) {
        self.inner.on_message(text);
    }

    fn on_session_update(&mut self, session_id: String) {
        self.inner.on_session_update(session_id);
    }

    fn on_done(&mut self) {
        self.inner.on_done();
    }

    fn on_error(&mut self, failure: StreamFailure) {
        if let StreamFailure::Transport(err) = &failure {
            self.error_kind.get_or_insert(err.kind());
        }
        self.inner.on_error(failure);
    }
}

/// Keeps the text and the first failure of a stream.
#[derive(Debug, Default)]
struct ReplyCollector {
    text: String,
    failure: Option<StreamFailure>,
}

impl StreamHandler for ReplyCollector {
    fn on_message(&mut self, text: String) {
        self.text.push_str(&text);
    }

    fn on_error(&mut self, failure: StreamFailure) {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }
}

fn guess_mime(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "pdf" => Some("application/pdf"),
        "txt" => Some("text/plain"),
        _ => None,
    }
}
